use std::sync::Arc;

use super::Dispatched;
use crate::broker::Broker;
use crate::error::Result;
use crate::job::JobDescriptor;

/// Status an echoed job reports.
pub const ECHO_DONE_STATUS: u32 = 100;

/// In-process responder for health-check jobs: marks the job done and hands
/// it straight back on the results channel and list.
#[derive(Clone)]
pub struct EchoAdapter {
    broker: Arc<dyn Broker>,
    results: String,
}

impl std::fmt::Debug for EchoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoAdapter")
            .field("results", &self.results)
            .finish()
    }
}

impl EchoAdapter {
    pub fn new(broker: Arc<dyn Broker>, results: impl Into<String>) -> Self {
        Self {
            broker,
            results: results.into(),
        }
    }

    pub async fn respond(&self, mut job: JobDescriptor) -> Result<Dispatched> {
        job.status = Some(ECHO_DONE_STATUS);
        let payload = job.to_payload()?;

        self.broker.publish(&self.results, payload.clone()).await?;
        self.broker.push(&self.results, payload).await?;

        tracing::info!(process_id = %job.process_id, command = %job.command, "Echoed job");
        Ok(Dispatched::Echoed {
            process_id: job.process_id,
        })
    }
}
