use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use camino::{Utf8Path, Utf8PathBuf};
use terra_imagery_manager::app::App;
use terra_imagery_manager::catalog::CatalogStore;
use terra_imagery_manager::config::{
    AreaEntry, Config, ConfigLoader, ResolvedConfig, endpoint_for_collection,
};
use terra_imagery_manager::domain::{BoundingBox, ItemKey, RemoteItem};
use terra_imagery_manager::error::TerraError;
use terra_imagery_manager::index::{DisabledIndex, IndexSync, StacIndexHttpClient};
use terra_imagery_manager::output::JsonOutput;
use terra_imagery_manager::search::{SearchClient, SearchQuery, StacHttpClient};
use terra_imagery_manager::storage::LocalStorage;
use terra_imagery_manager::transfer::{
    AssetTransfer, CancelToken, HttpAssetTransfer, TransferMode,
};

#[derive(Parser)]
#[command(name = "terra-im")]
#[command(about = "Incremental satellite-imagery catalog manager")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search, reconcile, and download missing asset bands")]
    Ingest(IngestArgs),
    #[command(about = "Preview the reconciliation plan without downloading")]
    Plan(ConfigArgs),
    #[command(about = "List items persisted in the local catalog")]
    List(ConfigArgs),
    #[command(about = "Show one persisted catalog item")]
    Info(InfoArgs),
}

#[derive(Args, Clone)]
struct IngestArgs {
    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    collection: Option<String>,

    #[arg(long, value_delimiter = ',')]
    assets: Option<Vec<String>>,

    #[arg(long, requires = "bbox")]
    area: Option<String>,

    #[arg(long, requires = "area", help = "minLon,minLat,maxLon,maxLat")]
    bbox: Option<String>,

    #[arg(long)]
    datetime: Option<String>,

    #[arg(long)]
    max_items: Option<usize>,

    #[arg(long, value_enum)]
    mode: Option<TransferMode>,

    #[arg(long)]
    catalog_root: Option<String>,

    #[arg(long)]
    data_root: Option<String>,

    #[arg(long)]
    index_url: Option<String>,
}

#[derive(Args, Clone)]
struct InfoArgs {
    item_key: String,

    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(terra) = report.downcast_ref::<TerraError>() {
            return ExitCode::from(map_exit_code(terra));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TerraError) -> u8 {
    match error {
        TerraError::MissingConfig
        | TerraError::ItemNotFound(_)
        | TerraError::UnknownCollection(_)
        | TerraError::NoItemsFound { .. } => 2,
        TerraError::SearchHttp(_)
        | TerraError::SearchStatus { .. }
        | TerraError::TransferHttp(_)
        | TerraError::TransferStatus { .. }
        | TerraError::IndexHttp(_)
        | TerraError::IndexStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => run_ingest(args),
        Commands::Plan(args) => run_plan(args),
        Commands::List(args) => run_list(args),
        Commands::Info(args) => run_info(args),
    }
}

fn resolve_with_overrides(args: &ConfigArgs) -> Result<ResolvedConfig, TerraError> {
    let mut config = match ConfigLoader::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(TerraError::MissingConfig) => Config::default(),
        Err(err) => return Err(err),
    };

    if let Some(collection) = &args.collection {
        config.collection = Some(collection.clone());
    }
    if let Some(assets) = &args.assets {
        config.assets = assets.clone();
    }
    if let (Some(area), Some(bbox)) = (&args.area, &args.bbox) {
        let bbox: BoundingBox = bbox.parse()?;
        config.areas = vec![AreaEntry {
            name: area.clone(),
            bbox: bbox.to_array(),
        }];
    }
    if let Some(datetime) = &args.datetime {
        config.datetime_range = Some(datetime.clone());
    }
    if let Some(max_items) = args.max_items {
        config.max_items = Some(max_items);
    }
    if let Some(mode) = args.mode {
        config.transfer_mode = Some(mode);
    }
    if let Some(catalog_root) = &args.catalog_root {
        config.catalog_root = Some(catalog_root.clone());
    }
    if let Some(data_root) = &args.data_root {
        config.data_root = Some(data_root.clone());
    }
    if let Some(index_url) = &args.index_url {
        config.index_url = Some(index_url.clone());
    }

    ConfigLoader::resolve_config(config)
}

fn run_ingest(args: IngestArgs) -> miette::Result<()> {
    let resolved = resolve_with_overrides(&args.config).into_diagnostic()?;
    let store = CatalogStore::new(resolved.catalog_root.clone());
    let endpoint =
        endpoint_for_collection(&resolved.collection, &resolved.endpoints).into_diagnostic()?;
    let search = StacHttpClient::new(&endpoint).into_diagnostic()?;
    let transfer = HttpAssetTransfer::new().into_diagnostic()?;

    match &resolved.index_url {
        Some(url) => {
            let index = StacIndexHttpClient::new(url).into_diagnostic()?;
            let app = App::new(store, search, transfer, LocalStorage, index);
            execute_ingest(&app, &resolved, args.dry_run)
        }
        None => {
            let app = App::new(store, search, transfer, LocalStorage, DisabledIndex);
            execute_ingest(&app, &resolved, args.dry_run)
        }
    }
}

fn execute_ingest<S, T, B, I>(
    app: &App<S, T, B, I>,
    resolved: &ResolvedConfig,
    dry_run: bool,
) -> miette::Result<()>
where
    S: SearchClient,
    T: AssetTransfer,
    B: terra_imagery_manager::storage::BlobStorage,
    I: IndexSync,
{
    if dry_run {
        let result = app.plan(resolved, &JsonOutput).into_diagnostic()?;
        JsonOutput::print_plan(&result).into_diagnostic()?;
        return Ok(());
    }
    let cancel = CancelToken::new();
    let result = app.ingest(resolved, &cancel, &JsonOutput).into_diagnostic()?;
    JsonOutput::print_ingest(&result).into_diagnostic()?;
    Ok(())
}

fn run_plan(args: ConfigArgs) -> miette::Result<()> {
    let resolved = resolve_with_overrides(&args).into_diagnostic()?;
    let store = CatalogStore::new(resolved.catalog_root.clone());
    let endpoint =
        endpoint_for_collection(&resolved.collection, &resolved.endpoints).into_diagnostic()?;
    let search = StacHttpClient::new(&endpoint).into_diagnostic()?;
    let app = App::new(store, search, NopTransfer, LocalStorage, DisabledIndex);
    let result = app.plan(&resolved, &JsonOutput).into_diagnostic()?;
    JsonOutput::print_plan(&result).into_diagnostic()?;
    Ok(())
}

fn run_list(args: ConfigArgs) -> miette::Result<()> {
    let resolved = resolve_with_overrides(&args).into_diagnostic()?;
    let store = CatalogStore::new(resolved.catalog_root.clone());
    let app = App::new(store, NopSearch, NopTransfer, LocalStorage, DisabledIndex);
    let result = app
        .list(&resolved.collection, &JsonOutput)
        .into_diagnostic()?;
    JsonOutput::print_list(&result).into_diagnostic()?;
    Ok(())
}

fn run_info(args: InfoArgs) -> miette::Result<()> {
    let resolved = resolve_with_overrides(&args.config).into_diagnostic()?;
    let key: ItemKey = args.item_key.parse().into_diagnostic()?;
    let store = CatalogStore::new(resolved.catalog_root.clone());
    let app = App::new(store, NopSearch, NopTransfer, LocalStorage, DisabledIndex);
    let result = app
        .info(&resolved.collection, &key, &JsonOutput)
        .into_diagnostic()?;
    JsonOutput::print_info(&result).into_diagnostic()?;
    Ok(())
}

#[derive(Clone, Copy)]
struct NopSearch;

impl SearchClient for NopSearch {
    fn search(&self, _query: &SearchQuery<'_>) -> Result<Vec<RemoteItem>, TerraError> {
        Err(TerraError::SearchHttp("not used".to_string()))
    }
}

#[derive(Clone, Copy)]
struct NopTransfer;

impl AssetTransfer for NopTransfer {
    fn transfer(
        &self,
        _href: &str,
        _destination: &Utf8Path,
        _mode: TransferMode,
        _bbox: &BoundingBox,
        _cancel: &CancelToken,
    ) -> Result<Utf8PathBuf, TerraError> {
        Err(TerraError::TransferHttp("not used".to_string()))
    }
}
