//! Job submission and the request handlers that build jobs from earlier
//! results.
//!
//! Producers never talk to launchers. They push a [`JobDescriptor`] onto the
//! incoming queue with [`submit`] and the manager does the routing.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::allocator::allocate;
use crate::broker::Broker;
use crate::config::QueueNames;
use crate::error::{LaunchError, Result};
use crate::job::JobDescriptor;

pub const STATUS_WORKING: &str = "working";
pub const STATUS_DISPATCHED: &str = "dispatched";

/// Append a job to the incoming queue.
pub async fn submit(broker: &dyn Broker, queues: &QueueNames, job: &JobDescriptor) -> Result<()> {
    broker.push(&queues.incoming, job.to_payload()?).await?;
    tracing::info!(process_id = %job.process_id, command = %job.command, "Submitted job");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Reindex,
    Reintegrate,
    MolecularReplacement,
    Merge,
    Download,
}

impl RequestKind {
    /// Command tag of the job this request produces.
    pub fn command(&self) -> &'static str {
        match self {
            RequestKind::Reindex => "INDEX",
            RequestKind::Reintegrate => "INTEGRATE",
            RequestKind::MolecularReplacement => "MR",
            RequestKind::Merge => "MERGE",
            RequestKind::Download => "DOWNLOAD",
        }
    }

    /// Directory level the new work directory is filed under.
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::Reindex => "reindex",
            RequestKind::Reintegrate => "reintegrate",
            RequestKind::MolecularReplacement => "mr",
            RequestKind::Merge => "merge",
            RequestKind::Download => "download",
        }
    }
}

/// A user request to run a follow-up job on an earlier result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudRequest {
    pub request_id: String,
    pub kind: RequestKind,
    pub original_id: String,
    /// Top-level directory to use instead of the one derived from the
    /// earlier result.
    #[serde(default)]
    pub work_dir_override: Option<PathBuf>,
    #[serde(default)]
    pub site_tag: Option<String>,
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

/// The stored result a request builds on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorResult {
    pub work_dir: PathBuf,
    #[serde(default)]
    pub data_root_dir: Option<PathBuf>,
    pub repr: String,
    /// Everything else the result carries, passed to the new job as-is.
    #[serde(default, flatten)]
    pub data: Map<String, Value>,
}

/// The narrow slice of the results database a handler needs.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get_result(&self, id: &str) -> Result<Option<PriorResult>>;

    async fn set_request_status(&self, request_id: &str, status: &str) -> Result<()>;
}

/// Directory the earlier run's type level hangs off: everything before the
/// first `integrate` or `merge` component, or the parent of the work
/// directory when neither appears.
pub fn top_level_dir(prior_work_dir: &Path) -> PathBuf {
    let mut top = PathBuf::new();
    for component in prior_work_dir.components() {
        if let Component::Normal(name) = component {
            if name == "integrate" || name == "merge" {
                return top;
            }
        }
        top.push(component);
    }
    prior_work_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

pub struct RequestHandler<'a> {
    broker: &'a dyn Broker,
    queues: &'a QueueNames,
    store: &'a dyn ResultStore,
}

impl<'a> RequestHandler<'a> {
    pub fn new(broker: &'a dyn Broker, queues: &'a QueueNames, store: &'a dyn ResultStore) -> Self {
        Self {
            broker,
            queues,
            store,
        }
    }

    /// Turn a request into a submitted job.
    ///
    /// The request is marked `working` before anything is built so a retry
    /// of the same request can be recognised. If submission then fails the
    /// status stays `working`.
    pub async fn handle(&self, request: &CloudRequest, date: NaiveDate) -> Result<JobDescriptor> {
        let prior = self
            .store
            .get_result(&request.original_id)
            .await?
            .ok_or_else(|| LaunchError::MissingRecord(request.original_id.clone()))?;

        self.store
            .set_request_status(&request.request_id, STATUS_WORKING)
            .await?;

        let top = match &request.work_dir_override {
            Some(dir) => dir.clone(),
            None => top_level_dir(&prior.work_dir),
        };
        let candidate = top
            .join(request.kind.label())
            .join(date.format("%Y-%m-%d").to_string())
            .join(&prior.repr);
        let work_dir = allocate(&candidate)?;

        let job = self.compose(request, &prior, work_dir);
        submit(self.broker, self.queues, &job).await?;

        self.store
            .set_request_status(&request.request_id, STATUS_DISPATCHED)
            .await?;
        tracing::info!(
            request_id = %request.request_id,
            kind = request.kind.label(),
            process_id = %job.process_id,
            "Dispatched request"
        );
        Ok(job)
    }

    fn compose(&self, request: &CloudRequest, prior: &PriorResult, work_dir: PathBuf) -> JobDescriptor {
        let process_id = uuid::Uuid::new_v4().simple().to_string();
        let mut job = JobDescriptor::new(request.kind.command(), process_id, work_dir);
        job.directories.data_root_dir = prior.data_root_dir.clone();
        job.site_tag = request.site_tag.clone();
        job.preferences = request.preferences.clone();

        job.extra.insert("request_id".to_string(), Value::from(request.request_id.clone()));
        job.extra.insert("repr".to_string(), Value::from(prior.repr.clone()));
        if let Ok(original) = serde_json::to_value(prior) {
            job.extra.insert("original".to_string(), original);
        }
        job
    }
}
