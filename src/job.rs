use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LaunchError, Result};

/// Preference key the dispatcher sets on every routed job.
pub const RUN_MODE_KEY: &str = "run_mode";
/// Run mode for jobs executed by a launcher.
pub const RUN_MODE_SERVER: &str = "server";

/// Directories a job works with.
///
/// `work` is relative to the producer and is re-rooted by the adapter under
/// the executing launcher's `launch_dir`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directories {
    pub work: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_root_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_dir: Option<PathBuf>,
}

/// The unit of work travelling through the broker queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub command: String,
    pub process_id: String,
    pub directories: Directories,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_tag: Option<String>,
    #[serde(default)]
    pub preferences: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_address: Option<String>,
    /// Progress marker, 100 once a responder considers the job done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    /// Fields carried by producers (prior results, data headers) that the
    /// router passes through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobDescriptor {
    pub fn new(
        command: impl Into<String>,
        process_id: impl Into<String>,
        work: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            process_id: process_id.into(),
            directories: Directories {
                work: work.into(),
                ..Directories::default()
            },
            site_tag: None,
            preferences: Map::new(),
            reply_address: None,
            status: None,
            extra: Map::new(),
        }
    }

    pub fn with_site_tag(mut self, site_tag: impl Into<String>) -> Self {
        self.site_tag = Some(site_tag.into());
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.preferences.insert(key.into(), value.into());
        self
    }

    pub fn with_reply_address(mut self, address: impl Into<String>) -> Self {
        self.reply_address = Some(address.into());
        self
    }

    pub fn run_mode(&self) -> Option<&str> {
        self.preferences.get(RUN_MODE_KEY).and_then(Value::as_str)
    }

    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| LaunchError::InvalidJob(e.to_string()))
    }
}

/// Lifecycle of a job as a launcher sees it. `Submitted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStage {
    Received,
    DirAllocated,
    Serialized,
    Submitted,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::Received => write!(f, "RECEIVED"),
            JobStage::DirAllocated => write!(f, "DIR_ALLOCATED"),
            JobStage::Serialized => write!(f, "SERIALIZED"),
            JobStage::Submitted => write!(f, "SUBMITTED"),
        }
    }
}
