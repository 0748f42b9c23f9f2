use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use beamline_launch::broker::{Broker, RedisBroker};
use beamline_launch::config::{SiteConfig, DEFAULT_CONFIG_DIR};
use beamline_launch::launcher::{local_ip_address, Launcher};
use beamline_launch::lock::InstanceLock;
use beamline_launch::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "launcher")]
#[command(version)]
#[command(about = "Run jobs routed to this host")]
struct Args {
    /// Registry tag of this launcher
    #[arg(long, env = "LAUNCH_TAG", default_value = "")]
    tag: String,

    /// Site name, used to find <config-dir>/<site>.toml
    #[arg(long, env = "LAUNCH_SITE")]
    site: Option<String>,

    /// Site config file (overrides --site lookup)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding per-site config files
    #[arg(long, env = "LAUNCH_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Address to look up in the registry instead of the detected one
    #[arg(long)]
    ip: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let path = SiteConfig::locate(args.site.as_deref(), args.config.as_deref(), &args.config_dir)?;
    let config = SiteConfig::load(&path)?;

    let _lock = InstanceLock::acquire(&config.launcher.lock_file_for(&args.tag))?;

    let ip_address = args
        .ip
        .clone()
        .unwrap_or_else(|| local_ip_address().to_string());

    // Fail before touching the broker when this host is not registered.
    let spec = config.registry().resolve(&ip_address, &args.tag)?.clone();

    tracing::info!(
        site = %config.site,
        config = %path.display(),
        ip_address = %ip_address,
        tag = %args.tag,
        queue = %spec.queue_name,
        "Starting launcher"
    );

    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.broker.url).await?);
    let launcher = Launcher::new(broker, &config, spec)?;
    let shutdown = install_shutdown_handler();

    launcher.run(shutdown).await;

    Ok(())
}
