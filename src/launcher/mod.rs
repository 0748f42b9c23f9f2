//! The per-host worker loop.
//!
//! A launcher resolves its own `(ip_address, tag)` against the registry,
//! keeps its heartbeat key alive and pops jobs from its dedicated queue.
//! Each job is handed to the adapter chosen at startup and the loop goes
//! straight back to polling; execution is never waited on.
//!
//! A pop never waits past the moment the heartbeat is next due, so an idle
//! launcher refreshes its key on schedule whatever the pop timeout is.

pub mod heartbeat;

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, AdapterKind, Dispatched};
use crate::broker::Broker;
use crate::config::{LauncherConfig, SiteConfig};
use crate::error::{LaunchError, Result};
use crate::job::JobDescriptor;
use crate::registry::WorkerSpec;

pub use heartbeat::Heartbeat;

/// What one poll of the launcher queue amounted to.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing arrived before the pop timeout.
    Idle,
    Dispatched { process_id: String },
    /// The adapter could not start the job. It is not retried.
    Failed {
        process_id: String,
        error: LaunchError,
    },
    /// The payload was not a job descriptor.
    Discarded,
}

pub struct Launcher {
    broker: Arc<dyn Broker>,
    spec: WorkerSpec,
    adapter: Adapter,
    heartbeat: Heartbeat,
    settings: LauncherConfig,
}

impl Launcher {
    pub fn new(broker: Arc<dyn Broker>, config: &SiteConfig, spec: WorkerSpec) -> Result<Self> {
        let kind = AdapterKind::from_str(&spec.adapter_name)?;
        let adapter = Adapter::build(kind, config, broker.clone());
        let heartbeat = Heartbeat::new(
            config.queues.heartbeat_key(&spec.queue_name),
            config.launcher.heartbeat_ttl(),
            config.launcher.heartbeat_interval(),
        );

        Ok(Self {
            broker,
            spec,
            adapter,
            heartbeat,
            settings: config.launcher.clone(),
        })
    }

    /// Build the launcher registered for `(ip_address, tag)`.
    pub fn resolve(
        broker: Arc<dyn Broker>,
        config: &SiteConfig,
        ip_address: &str,
        tag: &str,
    ) -> Result<Self> {
        let spec = config.registry().resolve(ip_address, tag)?.clone();
        Self::new(broker, config, spec)
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Refresh the heartbeat if its interval elapsed.
    pub async fn refresh_heartbeat(&mut self) -> Result<()> {
        if self.heartbeat.due() {
            self.heartbeat.beat(self.broker.as_ref()).await?;
        }
        Ok(())
    }

    /// Wait up to the pop timeout, cut short when the heartbeat falls due,
    /// for one job and hand it to the adapter.
    ///
    /// Only broker failures are returned as errors; adapter failures are
    /// logged and reported in the outcome.
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let timeout = match self.heartbeat.until_due() {
            Some(left) => self.settings.pop_timeout().min(left),
            None => self.settings.pop_timeout(),
        };
        let payload = match self.broker.pop(&self.spec.queue_name, timeout).await? {
            Some(payload) => payload,
            None => return Ok(PollOutcome::Idle),
        };

        let job = match JobDescriptor::from_payload(&payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(queue = %self.spec.queue_name, error = %e, "Discarding malformed job");
                return Ok(PollOutcome::Discarded);
            }
        };

        let process_id = job.process_id.clone();
        tracing::info!(
            process_id = %process_id,
            command = %job.command,
            adapter = %self.adapter.kind(),
            "Received job"
        );

        match self.adapter.execute(job, &self.spec).await {
            Ok(dispatched) => {
                track(dispatched, &process_id);
                Ok(PollOutcome::Dispatched { process_id })
            }
            Err(error) => {
                tracing::error!(process_id = %process_id, error = %error, "Adapter failed to start job");
                Ok(PollOutcome::Failed { process_id, error })
            }
        }
    }

    /// Poll until `shutdown` is cancelled, then withdraw the heartbeat.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            queue = %self.spec.queue_name,
            tag = %self.spec.tag,
            adapter = %self.adapter.kind(),
            launch_dir = %self.spec.launch_dir.display(),
            "Launcher started"
        );

        while !shutdown.is_cancelled() {
            let step = match self.refresh_heartbeat().await {
                Ok(()) => self.poll_once().await.map(|_| ()),
                Err(e) => Err(e),
            };

            if let Err(e) = step {
                tracing::warn!(
                    error = %e,
                    backoff_secs = self.settings.backoff_secs,
                    "Broker operation failed, backing off"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.backoff()) => {}
                }
            }
        }

        if let Err(e) = self.heartbeat.clear(self.broker.as_ref()).await {
            tracing::warn!(key = %self.heartbeat.key(), error = %e, "Failed to clear heartbeat");
        }
        tracing::info!(queue = %self.spec.queue_name, "Launcher stopped");
    }
}

fn track(dispatched: Dispatched, process_id: &str) {
    match dispatched {
        Dispatched::Spawned { pid, command_file } => {
            tracing::debug!(process_id = %process_id, ?pid, command_file = %command_file.display(), "Job spawned");
        }
        Dispatched::Submitted {
            label,
            external_id,
            ..
        } => {
            let process_id = process_id.to_string();
            tokio::spawn(async move {
                match external_id.await {
                    Ok(Some(id)) => {
                        tracing::info!(process_id = %process_id, label = %label, cluster_job_id = %id, "Cluster accepted job")
                    }
                    Ok(None) | Err(_) => {
                        tracing::warn!(process_id = %process_id, label = %label, "No cluster job id reported")
                    }
                }
            });
        }
        Dispatched::Echoed { .. } => {}
    }
}

/// The address this host uses for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a
/// route and source address. Falls back to loopback when there is no route.
pub fn local_ip_address() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::debug!(error = %e, "No outbound route, using loopback address");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
