//! Push one job onto the incoming queue of a running site.
//!
//! ```text
//! cargo run --example submit_job -- --config site.toml --command ECHO --work single/test
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use beamline_launch::broker::RedisBroker;
use beamline_launch::config::SiteConfig;
use beamline_launch::job::JobDescriptor;
use beamline_launch::producer::submit;

#[derive(Parser, Debug)]
#[command(name = "submit_job")]
struct Args {
    /// Site config file
    #[arg(long)]
    config: PathBuf,

    /// Command tag, e.g. INDEX or ECHO
    #[arg(long, default_value = "ECHO")]
    command: String,

    /// Work directory, re-rooted by the launcher
    #[arg(long, default_value = "single/demo")]
    work: PathBuf,

    /// Only route to launchers serving this site tag
    #[arg(long)]
    site_tag: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = SiteConfig::load(&args.config)?;
    let broker = RedisBroker::connect(&config.broker.url).await?;

    let process_id = uuid::Uuid::new_v4().simple().to_string();
    let mut job = JobDescriptor::new(args.command, process_id, args.work);
    job.site_tag = args.site_tag;

    submit(&broker, &config.queues, &job).await?;
    println!("{}", job.process_id);

    Ok(())
}
