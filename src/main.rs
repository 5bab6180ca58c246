/// Version injected at compile time via DRIFTSCAN_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("DRIFTSCAN_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use driftscan::alerter::Alerter;
use driftscan::cache::SingleFlightCache;
use driftscan::config::Config;
use driftscan::gcp::auth;
use driftscan::gcp::client::{Endpoints, GcpClient};
use driftscan::progress::{CountingProgress, ProgressCounter};
use driftscan::remote::{DetailsFetcher, Enumerator, GoogleEnumerator, GoogleRepository, Scanner};
use driftscan::resource::{self, DriftIgnore, Filter, FilterChain, Resource, TypeFilter};
use driftscan::terraform::{
    ProcessLauncher, ProviderInstaller, ProviderLibrary, TerraformProvider, TerraformProviderConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Live-state resource acquisition for drift detection
#[derive(Parser, Debug)]
#[command(name = "driftscan", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List live resources and optionally read their full state
    Scan(ScanArgs),
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// GCP project to scan
    #[arg(short, long)]
    project: Option<String>,

    /// Region to scan; repeat for several. The first one is the default
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Only scan these resource types (comma separated)
    #[arg(long, value_delimiter = ',')]
    types: Vec<String>,

    /// Maximum concurrent enumerations
    #[arg(long)]
    parallelism: Option<usize>,

    /// Number of listings kept in memory
    #[arg(long)]
    cache_size: Option<usize>,

    /// Provider binary to use instead of installing one
    #[arg(long)]
    provider_path: Option<PathBuf>,

    /// Base URL to download provider binaries from
    #[arg(long)]
    registry_url: Option<String>,

    /// Ignore file
    #[arg(long)]
    ignore_file: Option<PathBuf>,

    /// Read every resource through the provider
    #[arg(long)]
    refresh: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "summary")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Summary,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // DRIFTSCAN_LOG refines the level per module, e.g. `driftscan::terraform=trace`
    let filter = EnvFilter::try_from_env("DRIFTSCAN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.to_string().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("driftscan {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("driftscan").join("driftscan.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".driftscan").join("driftscan.log");
    }
    PathBuf::from("driftscan.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    match args.command {
        Command::Scan(scan_args) => {
            if let Err(err) = run_scan(scan_args, CancellationToken::new()).await {
                eprintln!("Error: {err:?}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Config file values overridden by command line flags
fn effective_config(args: &ScanArgs) -> Config {
    let mut config = Config::load();

    if let Some(project) = &args.project {
        config.project_id = Some(project.clone());
    }
    if let Some((first, rest)) = args.regions.split_first() {
        config.region = Some(first.clone());
        config.regions = rest.to_vec();
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    if let Some(cache_size) = args.cache_size {
        config.cache_size = cache_size;
    }
    if let Some(path) = &args.provider_path {
        config.provider.path = Some(path.clone());
    }
    if let Some(url) = &args.registry_url {
        config.provider.registry_url = Some(url.clone());
    }
    if let Some(ignore_file) = &args.ignore_file {
        config.ignore_file = ignore_file.clone();
    }

    config
}

async fn run_scan(args: ScanArgs, token: CancellationToken) -> Result<()> {
    let config = effective_config(&args);

    let project = config.effective_project();
    if project.is_empty() {
        return Err(anyhow!(
            "No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag"
        ));
    }
    let regions = config.all_regions();
    tracing::info!("Using project: {}, regions: {:?}", project, regions);

    let mut filters = FilterChain::new().with(Arc::new(DriftIgnore::load(&config.ignore_file)?));
    if !args.types.is_empty() {
        filters = filters.with(Arc::new(TypeFilter::new(args.types.iter().cloned())));
    }
    let filter: Arc<dyn Filter> = Arc::new(filters);

    let tokens = auth::default_token_source().await?;
    let client = GcpClient::new(tokens, &project, Endpoints::default())?;
    let repository = Arc::new(GoogleRepository::new(
        client,
        Arc::new(SingleFlightCache::new(config.cache_size)),
    ));

    let types: Vec<String> = if args.types.is_empty() {
        resource::get_all_resource_types().into_iter().map(String::from).collect()
    } else {
        args.types.clone()
    };
    let mut enumerators: Vec<Arc<dyn Enumerator>> = Vec::new();
    for resource_type in &types {
        for enumerator in GoogleEnumerator::for_type(resource_type, &repository, &regions)? {
            enumerators.push(Arc::new(enumerator));
        }
    }

    let alerter = Arc::new(Alerter::new());
    let mut scanner = Scanner::new(enumerators, alerter.clone(), filter.clone(), &token, config.parallelism);

    // An interrupt fails the running scan and cancels whatever comes after it
    let scan_stop = scanner.stop_handle();
    let interrupt = token.clone();
    let watcher = tokio::spawn(async move {
        if driftscan::signals::wait_for_shutdown_signal().await.is_ok() {
            tracing::warn!("Interrupted, stopping scan");
            scan_stop.stop();
            interrupt.cancel();
        }
    });

    let result = scan_and_refresh(&args, &config, &project, &mut scanner, filter, alerter.clone(), &token).await;
    watcher.abort();

    print_report(args.output, result?, &alerter)
}

async fn scan_and_refresh(
    args: &ScanArgs,
    config: &Config,
    project: &str,
    scanner: &mut Scanner,
    filter: Arc<dyn Filter>,
    alerter: Arc<Alerter>,
    token: &CancellationToken,
) -> Result<Vec<Resource>> {
    let mut resources = scanner.resources().await?;
    tracing::info!("Found {} resources", resources.len());

    if args.refresh {
        if config.provider.is_configured() {
            resources = refresh(config, project, resources, filter, alerter, token).await?;
        } else {
            tracing::warn!("No provider binary or registry configured, skipping refresh");
            eprintln!("Skipping refresh: use --provider-path or --registry-url");
        }
    }

    Ok(resources)
}

/// Read every resource through the provider; providers are always stopped
async fn refresh(
    config: &Config,
    project: &str,
    resources: Vec<Resource>,
    filter: Arc<dyn Filter>,
    alerter: Arc<Alerter>,
    token: &CancellationToken,
) -> Result<Vec<Resource>> {
    let settings = &config.provider;
    let installer = Arc::new(ProviderInstaller::new(
        settings.effective_plugins_dir(),
        settings.registry_url.clone(),
    )?);
    let launcher =
        ProcessLauncher::new(installer, &settings.name, &settings.version).with_binary(settings.path.clone());

    let project = project.to_string();
    let provider_config = TerraformProviderConfig {
        name: settings.name.clone(),
        default_alias: config.effective_region(),
        provider_config: Arc::new(move |alias: &str| {
            serde_json::json!({ "project": project, "region": alias })
        }),
    };
    let progress = Arc::new(CountingProgress::new());
    let mut library = ProviderLibrary::new();
    library.add_provider(Arc::new(TerraformProvider::new(
        provider_config,
        Arc::new(launcher),
        filter,
        progress.clone(),
    )));

    let result = async {
        let provider = library
            .provider(&settings.name)
            .ok_or_else(|| anyhow!("provider {} is not registered", settings.name))?;
        provider.init().await?;
        DetailsFetcher::new(provider, alerter, token, config.details_parallelism)
            .read_details(resources)
            .await
    }
    .await;

    library.cleanup().await;
    tracing::info!("Read {} resources through the provider", progress.value());
    result
}

fn print_report(format: OutputFormat, resources: Vec<Resource>, alerter: &Alerter) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "resources": resources,
                "alerts": alerter.alerts(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Summary => {
            let total = resources.len();
            for (resource_type, resources) in resource::group_by_type(resources) {
                println!("{:<40} {}", resource_type, resources.len());
            }
            println!("Found {} resources", total);

            for alerts in alerter.alerts().values() {
                for alert in alerts {
                    eprintln!("Warning: {}", alert.message);
                }
            }
        }
    }
    Ok(())
}
