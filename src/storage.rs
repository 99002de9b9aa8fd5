use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TerraError;

/// Durable blob storage for transferred rasters. The default backend keeps
/// files where the transfer wrote them; remote backends move them and return
/// the remote location.
pub trait BlobStorage: Send + Sync {
    fn persist(&self, local: &Utf8Path, target: &Utf8Path) -> Result<Utf8PathBuf, TerraError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl BlobStorage for LocalStorage {
    fn persist(&self, local: &Utf8Path, _target: &Utf8Path) -> Result<Utf8PathBuf, TerraError> {
        if !local.as_std_path().exists() {
            return Err(TerraError::StoreIo(format!("{local} does not exist")));
        }
        Ok(local.to_owned())
    }
}
