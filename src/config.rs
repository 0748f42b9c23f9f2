use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterKind;
use crate::error::{LaunchError, Result};
use crate::registry::{WorkerRegistry, WorkerSpec};

/// Directory searched for `<site>.toml` when no explicit path is given.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/beamline-launch";

/// Connection settings for the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

/// Well-known queue and key names. These are the only durable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    pub incoming: String,
    pub waiting: String,
    pub heartbeat_prefix: String,
    pub results: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            incoming: "jobs:incoming".to_string(),
            waiting: "jobs:waiting".to_string(),
            heartbeat_prefix: "launcher:alive:".to_string(),
            results: "jobs:results".to_string(),
        }
    }
}

impl QueueNames {
    /// Heartbeat key for the launcher draining `queue_name`.
    pub fn heartbeat_key(&self, queue_name: &str) -> String {
        format!("{}{}", self.heartbeat_prefix, queue_name)
    }
}

/// Launcher manager timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Seconds between liveness reconciliations.
    pub tick_secs: u64,
    /// Blocking pop timeout on the incoming queue.
    pub poll_timeout_ms: u64,
    /// Pause between drain iterations.
    pub drain_pause_ms: u64,
    /// Backoff after a broker failure.
    pub backoff_secs: u64,
    pub lock_file: PathBuf,
    /// Serve the status API here when set.
    pub status_addr: Option<SocketAddr>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 5,
            poll_timeout_ms: 500,
            drain_pause_ms: 50,
            backoff_secs: 5,
            lock_file: PathBuf::from("/tmp/beamline-launch/lock/launcher_manager.lock"),
            status_addr: None,
        }
    }
}

impl ManagerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn drain_pause(&self) -> Duration {
        Duration::from_millis(self.drain_pause_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Launcher timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub heartbeat_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Bounds how late a heartbeat refresh can be.
    pub pop_timeout_secs: u64,
    pub backoff_secs: u64,
    pub lock_file: PathBuf,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_secs: 30,
            heartbeat_interval_secs: 10,
            pop_timeout_secs: 5,
            backoff_secs: 5,
            lock_file: PathBuf::from("/tmp/beamline-launch/lock/launcher.lock"),
        }
    }
}

impl LauncherConfig {
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_secs(self.pop_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    /// Lock file for a tagged launcher: `launcher.lock` becomes
    /// `launcher_<tag>.lock`.
    pub fn lock_file_for(&self, tag: &str) -> PathBuf {
        if tag.is_empty() {
            return self.lock_file.clone();
        }
        let stem = self
            .lock_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "launcher".to_string());
        let name = match self.lock_file.extension() {
            Some(ext) => format!("{}_{}.{}", stem, tag, ext.to_string_lossy()),
            None => format!("{}_{}", stem, tag),
        };
        self.lock_file.with_file_name(name)
    }
}

/// The generic runner that shell and cluster jobs execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub program: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "launch-runner".to_string(),
        }
    }
}

/// Cluster scheduler tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub submit_program: String,
    pub default_queue: String,
    /// Command tag to batch queue.
    pub queues: BTreeMap<String, String>,
    /// Command tag to processor count. Missing commands get one.
    pub nproc: BTreeMap<String, u32>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let queues = [("INDEX", "phase3.q"), ("BEAMCENTER", "all.q"), ("XDS", "all.q")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let nproc = [("INDEX", 4), ("INTEGRATE", 4)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            submit_program: "qsub".to_string(),
            default_queue: "all.q".to_string(),
            queues,
            nproc,
        }
    }
}

impl ClusterConfig {
    pub fn queue_for(&self, command: &str) -> &str {
        self.queues
            .get(command)
            .map(String::as_str)
            .unwrap_or(&self.default_queue)
    }

    pub fn nproc_for(&self, command: &str) -> u32 {
        self.nproc.get(command).copied().unwrap_or(1)
    }
}

/// Everything one site needs, loaded once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site: String,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub queues: QueueNames,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

impl SiteConfig {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            broker: BrokerConfig::default(),
            queues: QueueNames::default(),
            manager: ManagerConfig::default(),
            launcher: LauncherConfig::default(),
            runner: RunnerConfig::default(),
            cluster: ClusterConfig::default(),
            workers: Vec::new(),
        }
    }

    pub fn with_worker(mut self, worker: WorkerSpec) -> Self {
        self.workers.push(worker);
        self
    }

    /// Resolve the config file for a site: an explicit path wins, otherwise
    /// `<config_dir>/<site>.toml`.
    pub fn locate(site: Option<&str>, path: Option<&Path>, config_dir: &Path) -> Result<PathBuf> {
        if let Some(path) = path {
            return Ok(path.to_path_buf());
        }
        match site {
            Some(site) if !site.is_empty() => {
                Ok(config_dir.join(format!("{}.toml", site.to_lowercase())))
            }
            _ => Err(LaunchError::Configuration(
                "could not determine a site; pass --site or --config".to_string(),
            )),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LaunchError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_str(&raw)?;
        tracing::debug!(path = %path.display(), site = %config.site, workers = config.workers.len(), "Loaded site config");
        Ok(config)
    }

    pub fn registry(&self) -> WorkerRegistry {
        WorkerRegistry::new(self.workers.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers.is_empty() {
            return Err(LaunchError::Configuration(
                "worker registry is empty".to_string(),
            ));
        }

        let mut identities = HashSet::new();
        let mut queues = HashSet::new();
        for w in &self.workers {
            if !identities.insert((w.ip_address.as_str(), w.tag.as_str())) {
                return Err(LaunchError::Configuration(format!(
                    "duplicate launcher registration for {} tag {:?}",
                    w.ip_address, w.tag
                )));
            }
            if !queues.insert(w.queue_name.as_str()) {
                return Err(LaunchError::Configuration(format!(
                    "queue {} is registered twice",
                    w.queue_name
                )));
            }
            if w.job_types.is_empty() {
                return Err(LaunchError::Configuration(format!(
                    "launcher on queue {} accepts no job types",
                    w.queue_name
                )));
            }
            AdapterKind::from_str(&w.adapter_name)?;
        }

        if self.launcher.heartbeat_interval_secs >= self.launcher.heartbeat_ttl_secs {
            return Err(LaunchError::Configuration(
                "launcher.heartbeat_interval_secs must be below heartbeat_ttl_secs".to_string(),
            ));
        }
        if self.launcher.pop_timeout_secs > self.launcher.heartbeat_interval_secs {
            return Err(LaunchError::Configuration(
                "launcher.pop_timeout_secs must not exceed heartbeat_interval_secs".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for SiteConfig {
    type Err = LaunchError;

    fn from_str(raw: &str) -> Result<Self> {
        let config: SiteConfig =
            toml::from_str(raw).map_err(|e| LaunchError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
