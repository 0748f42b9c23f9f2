use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::oneshot;

use super::{Dispatched, PreparedJob};
use crate::config::{ClusterConfig, RunnerConfig};
use crate::error::{LaunchError, Result};

/// Submits the generic runner to an SGE-style batch scheduler.
#[derive(Debug, Clone)]
pub struct ClusterAdapter {
    cluster: ClusterConfig,
    runner: RunnerConfig,
}

impl ClusterAdapter {
    pub fn new(cluster: ClusterConfig, runner: RunnerConfig) -> Self {
        Self { cluster, runner }
    }

    /// Arguments for the submit program.
    pub fn submit_args(&self, prepared: &PreparedJob) -> Vec<String> {
        vec![
            "-terse".to_string(),
            "-cwd".to_string(),
            "-b".to_string(),
            "y".to_string(),
            "-N".to_string(),
            prepared.label.clone(),
            "-q".to_string(),
            self.cluster.queue_for(&prepared.job.command).to_string(),
            "-pe".to_string(),
            "smp".to_string(),
            prepared.nproc.to_string(),
            "-wd".to_string(),
            prepared.work_dir.display().to_string(),
            self.runner.program.clone(),
            "-s".to_string(),
            prepared.site_tag.clone(),
            prepared.command_file.display().to_string(),
        ]
    }

    /// Start the submission and return immediately. The scheduler's job id
    /// arrives later on the returned receiver.
    pub fn launch(&self, prepared: &PreparedJob) -> Result<Dispatched> {
        let args = self.submit_args(prepared);
        tracing::info!(
            process_id = %prepared.job.process_id,
            queue = %self.cluster.queue_for(&prepared.job.command),
            nproc = prepared.nproc,
            label = %prepared.label,
            "Submitting job to cluster"
        );

        let child = Command::new(&self.cluster.submit_program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LaunchError::AdapterExecution {
                adapter: "cluster".to_string(),
                reason: format!("cannot start {}: {}", self.cluster.submit_program, e),
            })?;

        let (tx, rx) = oneshot::channel();
        let label = prepared.label.clone();
        tokio::spawn(async move {
            let external_id = match child.wait_with_output().await {
                Ok(output) if output.status.success() => parse_job_id(&output.stdout),
                Ok(output) => {
                    tracing::warn!(
                        label = %label,
                        status = %output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Cluster submission rejected"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(label = %label, error = %e, "Cluster submission failed");
                    None
                }
            };
            // Nobody listening is fine.
            let _ = tx.send(external_id);
        });

        Ok(Dispatched::Submitted {
            label: prepared.label.clone(),
            command_file: prepared.command_file.clone(),
            external_id: rx,
        })
    }
}

/// First non-empty stdout line, as printed by `qsub -terse`.
pub fn parse_job_id(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_terse_output() {
        assert_eq!(parse_job_id(b"\n  4242\n").as_deref(), Some("4242"));
        assert_eq!(parse_job_id(b""), None);
    }
}
