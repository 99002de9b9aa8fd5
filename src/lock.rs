use std::fs::{self, File, OpenOptions};

use camino::Utf8Path;
use fs2::FileExt;

use crate::error::TerraError;

/// Advisory exclusive lock on a directory, backed by a `.lock` file inside it.
/// The open handle is the lock; the file itself is left in place on release
/// because unlinking a lock file another process may be blocked on is racy.
pub struct PathLock {
    file: File,
}

impl PathLock {
    pub fn acquire(dir: &Utf8Path) -> Result<Self, TerraError> {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| TerraError::StoreIo(format!("create {dir}: {err}")))?;
        let lock_path = dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path.as_std_path())
            .map_err(|err| TerraError::StoreIo(format!("open {lock_path}: {err}")))?;
        file.lock_exclusive()
            .map_err(|err| TerraError::StoreIo(format!("lock {lock_path}: {err}")))?;
        Ok(Self { file })
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
