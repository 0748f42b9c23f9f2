//! The launcher manager: routes jobs from the global incoming queue to the
//! dedicated queue of a live launcher.
//!
//! One cooperative loop does two things:
//!
//! 1. **Liveness tick** (every `manager.tick_secs`): checks every registered
//!    launcher's heartbeat key. Queues of launchers that went offline are
//!    moved back onto the incoming queue; if any launcher came online the
//!    waiting queue is replayed onto the incoming queue too.
//! 2. **Drain**: pops and routes incoming jobs until the queue is empty. A
//!    job with no live match is parked on the waiting queue.
//!
//! Draining runs to completion before the next tick is considered, so a burst
//! of submissions delays liveness reconciliation.
//!
//! # Delivery
//!
//! Requeueing is at-least-once. A launcher whose heartbeat lapses while its
//! job is still running has that job requeued from its queue only if the job
//! had not been popped yet; a job already handed to an adapter is never
//! recalled. A flapping heartbeat can still cause a queued job to run on
//! another launcher and later on the original one, and nothing here
//! de-duplicates that.

pub mod routing;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broker::{self, Broker};
use crate::config::{ManagerConfig, QueueNames, SiteConfig};
use crate::error::{LaunchError, Result};
use crate::job::JobDescriptor;
use crate::registry::WorkerRegistry;

pub use routing::select_worker;

/// Counters and liveness published for the status API.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatcherSnapshot {
    pub live_workers: Vec<String>,
    pub registered_workers: usize,
    pub routed: u64,
    pub parked: u64,
    pub requeued: u64,
    pub replayed: u64,
    pub dropped: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Result of one liveness reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessChange {
    pub went_offline: Vec<String>,
    pub came_online: Vec<String>,
    /// Jobs moved from offline launchers' queues to the incoming queue.
    pub requeued: usize,
    /// Jobs moved from the waiting queue to the incoming queue.
    pub replayed: usize,
}

impl LivenessChange {
    pub fn is_empty(&self) -> bool {
        self.went_offline.is_empty() && self.came_online.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Routed {
        process_id: String,
        queue_name: String,
    },
    Parked {
        process_id: String,
    },
    Dropped {
        reason: String,
    },
}

pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    registry: WorkerRegistry,
    queues: QueueNames,
    settings: ManagerConfig,
    live: HashSet<String>,
    /// Payload popped but not yet delivered because the broker failed.
    pending: Option<String>,
    stats: DispatcherSnapshot,
    snapshot_tx: watch::Sender<DispatcherSnapshot>,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: WorkerRegistry,
        queues: QueueNames,
        settings: ManagerConfig,
    ) -> Result<Self> {
        if registry.is_empty() {
            return Err(LaunchError::Configuration(
                "launcher manager started with an empty worker registry".to_string(),
            ));
        }

        let stats = DispatcherSnapshot {
            registered_workers: registry.len(),
            ..DispatcherSnapshot::default()
        };
        let (snapshot_tx, _) = watch::channel(stats.clone());

        Ok(Self {
            broker,
            registry,
            queues,
            settings,
            live: HashSet::new(),
            pending: None,
            stats,
            snapshot_tx,
        })
    }

    pub fn from_config(config: &SiteConfig, broker: Arc<dyn Broker>) -> Result<Self> {
        Self::new(
            broker,
            config.registry(),
            config.queues.clone(),
            config.manager.clone(),
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatcherSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn live_workers(&self) -> &HashSet<String> {
        &self.live
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Check every heartbeat and recover work across liveness transitions.
    ///
    /// The live set only changes once every transfer succeeded, so a broker
    /// failure part-way is retried in full on the next tick.
    pub async fn reconcile_liveness(&mut self) -> Result<LivenessChange> {
        let mut now_live = HashSet::new();
        for worker in self.registry.iter() {
            let key = self.queues.heartbeat_key(&worker.queue_name);
            if self.broker.exists(&key).await? {
                now_live.insert(worker.queue_name.clone());
            }
        }

        let mut change = LivenessChange::default();
        for worker in self.registry.iter() {
            let was = self.live.contains(&worker.queue_name);
            let is = now_live.contains(&worker.queue_name);
            if was && !is {
                change.went_offline.push(worker.queue_name.clone());
            } else if is && !was {
                change.came_online.push(worker.queue_name.clone());
            }
        }

        for queue_name in &change.went_offline {
            let moved =
                broker::transfer(self.broker.as_ref(), queue_name, &self.queues.incoming).await?;
            tracing::warn!(queue = %queue_name, requeued = moved, "Launcher went offline");
            change.requeued += moved;
        }

        if !change.came_online.is_empty() {
            for queue_name in &change.came_online {
                tracing::info!(queue = %queue_name, "Launcher came online");
            }
            change.replayed = broker::transfer(
                self.broker.as_ref(),
                &self.queues.waiting,
                &self.queues.incoming,
            )
            .await?;
            if change.replayed > 0 {
                tracing::info!(replayed = change.replayed, "Replayed waiting jobs");
            }
        }

        self.live = now_live;
        self.stats.requeued += change.requeued as u64;
        self.stats.replayed += change.replayed as u64;
        self.stats.last_tick = Some(Utc::now());
        self.stats.live_workers = self
            .registry
            .iter()
            .filter(|w| self.live.contains(&w.queue_name))
            .map(|w| w.queue_name.clone())
            .collect();
        self.publish_snapshot();

        Ok(change)
    }

    /// Route one serialized job.
    pub async fn route_payload(&mut self, payload: &str) -> Result<RouteOutcome> {
        let mut job = match JobDescriptor::from_payload(payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "Dropping unroutable payload");
                self.stats.dropped += 1;
                self.publish_snapshot();
                return Ok(RouteOutcome::Dropped {
                    reason: e.to_string(),
                });
            }
        };

        let outcome = match routing::select_worker(&self.registry, &self.live, &job) {
            Some(worker) => {
                routing::assign(&mut job, worker);
                self.broker
                    .push(&worker.queue_name, job.to_payload()?)
                    .await?;
                tracing::info!(
                    process_id = %job.process_id,
                    command = %job.command,
                    queue = %worker.queue_name,
                    "Routed job"
                );
                self.stats.routed += 1;
                RouteOutcome::Routed {
                    process_id: job.process_id,
                    queue_name: worker.queue_name.clone(),
                }
            }
            None => {
                self.broker
                    .push(&self.queues.waiting, payload.to_string())
                    .await?;
                let failure = LaunchError::RoutingFailure {
                    command: job.command.clone(),
                    site_tag: job.site_tag.clone(),
                };
                tracing::info!(process_id = %job.process_id, reason = %failure, "Parked job on waiting queue");
                self.stats.parked += 1;
                RouteOutcome::Parked {
                    process_id: job.process_id,
                }
            }
        };

        self.publish_snapshot();
        Ok(outcome)
    }

    /// Pop one job from the incoming queue (waiting up to `timeout`) and
    /// route it. `Ok(None)` means the queue stayed empty.
    pub async fn drain_once(&mut self, timeout: Duration) -> Result<Option<RouteOutcome>> {
        let payload = match self.pending.take() {
            Some(payload) => payload,
            None => match self.broker.pop(&self.queues.incoming, timeout).await? {
                Some(payload) => payload,
                None => return Ok(None),
            },
        };

        match self.route_payload(&payload).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                // Hold on to it; it has already left the incoming queue.
                self.pending = Some(payload);
                Err(e)
            }
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            workers = self.registry.len(),
            incoming = %self.queues.incoming,
            waiting = %self.queues.waiting,
            tick_secs = self.settings.tick_secs,
            "Launcher manager started"
        );

        let mut last_tick: Option<Instant> = None;

        'outer: while !shutdown.is_cancelled() {
            if last_tick.map_or(true, |t| t.elapsed() >= self.settings.tick()) {
                match self.reconcile_liveness().await {
                    Ok(change) => {
                        if !change.is_empty() {
                            tracing::debug!(?change, "Liveness changed");
                        }
                        last_tick = Some(Instant::now());
                    }
                    Err(e) => {
                        self.back_off(&e, &shutdown).await;
                        continue;
                    }
                }
            }

            loop {
                if shutdown.is_cancelled() {
                    break 'outer;
                }
                match self.drain_once(self.settings.poll_timeout()).await {
                    Ok(Some(_)) => tokio::time::sleep(self.settings.drain_pause()).await,
                    Ok(None) => break,
                    Err(e) => {
                        self.back_off(&e, &shutdown).await;
                        break;
                    }
                }
            }
        }

        if let Some(payload) = self.pending.take() {
            tracing::error!(payload = %payload, "Shutting down with an undelivered job");
        }
        tracing::info!("Launcher manager stopped");
    }

    async fn back_off(&self, error: &LaunchError, shutdown: &CancellationToken) {
        tracing::warn!(
            error = %error,
            backoff_secs = self.settings.backoff_secs,
            "Broker operation failed, backing off"
        );
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.settings.backoff()) => {}
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.stats.clone());
    }
}
