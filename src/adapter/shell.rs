use std::process::Stdio;

use tokio::process::Command;

use super::{Dispatched, PreparedJob};
use crate::config::RunnerConfig;
use crate::error::{LaunchError, Result};

/// Runs the generic runner as a detached local subprocess.
#[derive(Debug, Clone)]
pub struct ShellAdapter {
    runner: RunnerConfig,
}

impl ShellAdapter {
    pub fn new(runner: RunnerConfig) -> Self {
        Self { runner }
    }

    /// Spawn `<runner> -s <site_tag> <command_file>` in the job's work
    /// directory and return without waiting for it.
    pub fn launch(&self, prepared: &PreparedJob) -> Result<Dispatched> {
        tracing::info!(
            process_id = %prepared.job.process_id,
            runner = %self.runner.program,
            command_file = %prepared.command_file.display(),
            "Launching job in shell"
        );

        let mut child = Command::new(&self.runner.program)
            .arg("-s")
            .arg(&prepared.site_tag)
            .arg(&prepared.command_file)
            .current_dir(&prepared.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LaunchError::AdapterExecution {
                adapter: "shell".to_string(),
                reason: format!("cannot start {}: {}", self.runner.program, e),
            })?;

        let pid = child.id();
        let label = prepared.label.clone();

        // Reap only. The exit status is logged but never reported upstream.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(label = %label, status = %status, "Runner exited"),
                Err(e) => tracing::warn!(label = %label, error = %e, "Failed to reap runner"),
            }
        });

        Ok(Dispatched::Spawned {
            pid,
            command_file: prepared.command_file.clone(),
        })
    }
}
