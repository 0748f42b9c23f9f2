use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, Result};

/// Job type that makes a worker accept any command.
pub const ALL_JOB_TYPES: &str = "ALL";

/// Static registration of one launcher instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub ip_address: String,
    #[serde(default)]
    pub tag: String,
    pub queue_name: String,
    pub launch_dir: PathBuf,
    pub job_types: BTreeSet<String>,
    /// Empty means the worker accepts jobs from any site.
    #[serde(default)]
    pub site_tags: BTreeSet<String>,
    #[serde(rename = "adapter")]
    pub adapter_name: String,
}

impl WorkerSpec {
    pub fn accepts_command(&self, command: &str) -> bool {
        self.job_types.contains(ALL_JOB_TYPES) || self.job_types.contains(command)
    }

    pub fn accepts_site(&self, site_tag: Option<&str>) -> bool {
        match site_tag {
            None => true,
            Some(tag) => self.site_tags.is_empty() || self.site_tags.contains(tag),
        }
    }
}

/// Ordered worker table. Registration order is routing priority.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerSpec>,
}

impl WorkerRegistry {
    pub fn new(workers: Vec<WorkerSpec>) -> Self {
        Self { workers }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerSpec> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn by_queue(&self, queue_name: &str) -> Option<&WorkerSpec> {
        self.workers.iter().find(|w| w.queue_name == queue_name)
    }

    /// Find the entry registered for this host and tag.
    pub fn resolve(&self, ip_address: &str, tag: &str) -> Result<&WorkerSpec> {
        if let Some(spec) = self
            .workers
            .iter()
            .find(|w| w.ip_address == ip_address && w.tag == tag)
        {
            return Ok(spec);
        }

        let tags: Vec<&str> = self
            .workers
            .iter()
            .filter(|w| w.ip_address == ip_address)
            .map(|w| w.tag.as_str())
            .collect();

        let message = if tags.is_empty() {
            format!("no launcher registered for ip address {}", ip_address)
        } else {
            format!(
                "a launcher is registered for ip address {} but not for tag {:?}; available tags: {:?}",
                ip_address, tag, tags
            )
        };
        Err(LaunchError::Configuration(message))
    }
}
