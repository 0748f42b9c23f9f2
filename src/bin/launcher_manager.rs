use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use beamline_launch::broker::{Broker, RedisBroker};
use beamline_launch::config::{SiteConfig, DEFAULT_CONFIG_DIR};
use beamline_launch::dashboard::{run_dashboard, DashboardState};
use beamline_launch::dispatcher::Dispatcher;
use beamline_launch::lock::InstanceLock;
use beamline_launch::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "launcher-manager")]
#[command(version)]
#[command(about = "Route submitted jobs to live launchers")]
struct Args {
    /// Site name, used to find <config-dir>/<site>.toml
    #[arg(long, env = "LAUNCH_SITE")]
    site: Option<String>,

    /// Site config file (overrides --site lookup)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding per-site config files
    #[arg(long, env = "LAUNCH_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

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

    let _lock = InstanceLock::acquire(&config.manager.lock_file)?;

    tracing::info!(
        site = %config.site,
        config = %path.display(),
        broker = %config.broker.url,
        workers = config.workers.len(),
        status_addr = ?config.manager.status_addr,
        "Starting launcher manager"
    );

    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.broker.url).await?);
    let dispatcher = Dispatcher::from_config(&config, broker.clone())?;
    let shutdown = install_shutdown_handler();

    if let Some(addr) = config.manager.status_addr {
        let state = DashboardState {
            snapshot: dispatcher.subscribe(),
            broker: broker.clone(),
            queues: config.queues.clone(),
            registry: Arc::new(config.registry()),
        };
        tokio::spawn(run_dashboard(addr, state));
    }

    dispatcher.run(shutdown).await;

    Ok(())
}
