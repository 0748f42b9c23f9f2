//! Execution strategies a launcher hands routed jobs to.
//!
//! The strategy is chosen once at launcher startup from the registry's
//! adapter name:
//!
//! - [`ShellAdapter`]: detached local subprocess of the generic runner
//! - [`ClusterAdapter`]: batch scheduler submission with a per-command queue
//!   and processor count
//! - [`EchoAdapter`]: in-process no-op responder for health checks
//!
//! # Execution Flow
//!
//! Shell and cluster jobs go through [`prepare`] first:
//!
//! 1. `RECEIVED`: the job arrives from the launcher queue
//! 2. `DIR_ALLOCATED`: `directories.work` is re-rooted under the launcher's
//!    `launch_dir`, made unique with [`allocate`] and created
//! 3. `SERIALIZED`: the job is written to `launch_dir/command_files/`
//! 4. `SUBMITTED`: the runner is detached; nothing after this is observed
//!
//! Once a job reaches an adapter it counts as dispatched. Start failures are
//! returned as [`LaunchError::AdapterExecution`], or
//! [`LaunchError::InvalidJob`] for a work path with nothing to re-root, for
//! logging and are never retried.

pub mod cluster;
pub mod command_file;
pub mod echo;
pub mod shell;

use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::allocator::allocate;
use crate::broker::Broker;
use crate::config::{ClusterConfig, RunnerConfig, SiteConfig};
use crate::error::{LaunchError, Result};
use crate::job::{JobDescriptor, JobStage};
use crate::registry::WorkerSpec;

pub use cluster::ClusterAdapter;
pub use echo::EchoAdapter;
pub use shell::ShellAdapter;

/// Command tag the cluster adapter answers in-process.
pub const ECHO_COMMAND: &str = "ECHO";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Shell,
    Cluster,
    Echo,
}

impl FromStr for AdapterKind {
    type Err = LaunchError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "shell" | "shell_simple" => Ok(AdapterKind::Shell),
            "cluster" | "qsub" => Ok(AdapterKind::Cluster),
            "echo" | "echo_simple" => Ok(AdapterKind::Echo),
            other => Err(LaunchError::Configuration(format!(
                "unknown launcher adapter {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::Shell => write!(f, "shell"),
            AdapterKind::Cluster => write!(f, "cluster"),
            AdapterKind::Echo => write!(f, "echo"),
        }
    }
}

/// What an adapter did with a job.
#[derive(Debug)]
pub enum Dispatched {
    Spawned {
        pid: Option<u32>,
        command_file: PathBuf,
    },
    Submitted {
        label: String,
        command_file: PathBuf,
        /// Scheduler-assigned id, `None` if the submission was rejected.
        external_id: oneshot::Receiver<Option<String>>,
    },
    Echoed {
        process_id: String,
    },
}

/// A job with its directory allocated and its command file written.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub job: JobDescriptor,
    pub work_dir: PathBuf,
    pub command_file: PathBuf,
    pub label: String,
    pub nproc: u32,
    pub site_tag: String,
}

/// Join `work` under `launch_dir`, keeping only its normal components so the
/// result can never leave `launch_dir`.
///
/// A path with no normal component would name `launch_dir` itself, and
/// allocating around that lands in a sibling, so it is rejected.
pub fn reroot(launch_dir: &Path, work: &Path) -> Result<PathBuf> {
    let relative: PathBuf = work
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if relative.as_os_str().is_empty() {
        return Err(LaunchError::InvalidJob(format!(
            "work directory {:?} has no path below launch_dir",
            work.display().to_string()
        )));
    }
    Ok(launch_dir.join(relative))
}

/// Allocate the work directory and write the command file.
pub fn prepare(
    mut job: JobDescriptor,
    spec: &WorkerSpec,
    cluster: &ClusterConfig,
    site: &str,
) -> Result<PreparedJob> {
    log_stage(&job, JobStage::Received);

    let candidate = reroot(&spec.launch_dir, &job.directories.work)?;
    let work_dir = allocate(&candidate)?;
    std::fs::create_dir_all(&work_dir)?;
    job.directories.work = work_dir.clone();
    if job.directories.launch_dir.is_none() {
        job.directories.launch_dir = Some(spec.launch_dir.clone());
    }
    log_stage(&job, JobStage::DirAllocated);

    let command_file = command_file::write_command_file(
        &spec.launch_dir.join(command_file::COMMAND_FILE_DIR),
        &job,
    )?;
    let label = command_file::label(&command_file).unwrap_or_else(|| job.command.clone());
    log_stage(&job, JobStage::Serialized);

    let nproc = cluster.nproc_for(&job.command);
    let site_tag = job.site_tag.clone().unwrap_or_else(|| site.to_string());

    Ok(PreparedJob {
        job,
        work_dir,
        command_file,
        label,
        nproc,
        site_tag,
    })
}

fn log_stage(job: &JobDescriptor, stage: JobStage) {
    tracing::debug!(process_id = %job.process_id, command = %job.command, stage = %stage, "Job stage");
}

/// The execution strategy of one launcher.
#[derive(Debug, Clone)]
pub enum Adapter {
    Shell {
        shell: ShellAdapter,
        cluster: ClusterConfig,
        site: String,
    },
    Cluster {
        submit: ClusterAdapter,
        echo: EchoAdapter,
        cluster: ClusterConfig,
        site: String,
    },
    Echo(EchoAdapter),
}

impl Adapter {
    pub fn build(kind: AdapterKind, config: &SiteConfig, broker: Arc<dyn Broker>) -> Self {
        Self::from_parts(
            kind,
            &config.site,
            config.runner.clone(),
            config.cluster.clone(),
            broker,
            &config.queues.results,
        )
    }

    pub fn from_parts(
        kind: AdapterKind,
        site: &str,
        runner: RunnerConfig,
        cluster: ClusterConfig,
        broker: Arc<dyn Broker>,
        results: &str,
    ) -> Self {
        match kind {
            AdapterKind::Shell => Adapter::Shell {
                shell: ShellAdapter::new(runner),
                cluster,
                site: site.to_string(),
            },
            AdapterKind::Cluster => Adapter::Cluster {
                submit: ClusterAdapter::new(cluster.clone(), runner),
                echo: EchoAdapter::new(broker, results),
                cluster,
                site: site.to_string(),
            },
            AdapterKind::Echo => Adapter::Echo(EchoAdapter::new(broker, results)),
        }
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            Adapter::Shell { .. } => AdapterKind::Shell,
            Adapter::Cluster { .. } => AdapterKind::Cluster,
            Adapter::Echo(_) => AdapterKind::Echo,
        }
    }

    pub async fn execute(&self, job: JobDescriptor, spec: &WorkerSpec) -> Result<Dispatched> {
        let dispatched = match self {
            Adapter::Echo(echo) => echo.respond(job).await?,
            Adapter::Cluster { echo, .. } if job.command == ECHO_COMMAND => {
                echo.respond(job).await?
            }
            Adapter::Shell {
                shell,
                cluster,
                site,
            } => {
                let prepared = prepare(job, spec, cluster, site)?;
                let dispatched = shell.launch(&prepared)?;
                log_stage(&prepared.job, JobStage::Submitted);
                dispatched
            }
            Adapter::Cluster {
                submit,
                cluster,
                site,
                ..
            } => {
                let prepared = prepare(job, spec, cluster, site)?;
                let dispatched = submit.launch(&prepared)?;
                log_stage(&prepared.job, JobStage::Submitted);
                dispatched
            }
        };
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_names() {
        assert_eq!(AdapterKind::from_str("shell_simple").unwrap(), AdapterKind::Shell);
        assert_eq!(AdapterKind::from_str("QSUB").unwrap(), AdapterKind::Cluster);
        assert_eq!(AdapterKind::from_str("echo").unwrap(), AdapterKind::Echo);
        assert!(AdapterKind::from_str("docker").is_err());
    }

    #[test]
    fn reroot_stays_under_launch_dir() {
        let launch = Path::new("/scratch/launch");
        assert_eq!(
            reroot(launch, Path::new("single/2024-01-01/B_1")).unwrap(),
            PathBuf::from("/scratch/launch/single/2024-01-01/B_1")
        );
        assert_eq!(
            reroot(launch, Path::new("/data/group/mr/x")).unwrap(),
            PathBuf::from("/scratch/launch/data/group/mr/x")
        );
        assert_eq!(
            reroot(launch, Path::new("../../etc")).unwrap(),
            PathBuf::from("/scratch/launch/etc")
        );
    }

    #[test]
    fn reroot_rejects_paths_naming_launch_dir() {
        let launch = Path::new("/scratch/launch");
        for work in ["", "/", "..", ".", "/../."] {
            assert!(
                matches!(reroot(launch, Path::new(work)), Err(LaunchError::InvalidJob(_))),
                "{:?} should be rejected",
                work
            );
        }
    }
}
