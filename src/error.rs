use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    /// Registry or site configuration is unusable. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No live worker currently accepts this job. The job is parked on the
    /// waiting queue and replayed when a worker comes online.
    #[error("No live launcher accepts command {command} for site tag {site_tag:?}")]
    RoutingFailure {
        command: String,
        site_tag: Option<String>,
    },

    #[error("No free directory for {candidate:?} within {bound} suffixes")]
    DirectoryAllocationExhausted { candidate: PathBuf, bound: u32 },

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Adapter {adapter} failed to start job: {reason}")]
    AdapterExecution { adapter: String, reason: String },

    #[error("Invalid job payload: {0}")]
    InvalidJob(String),

    #[error("Record not found: {0}")]
    MissingRecord(String),

    #[error("Lock file {0:?} is held by another process")]
    LockHeld(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LaunchError {
    /// Transient errors that loop sites absorb with a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, LaunchError::BrokerUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;
