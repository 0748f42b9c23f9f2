use std::collections::HashSet;

use crate::job::{JobDescriptor, RUN_MODE_KEY, RUN_MODE_SERVER};
use crate::registry::{WorkerRegistry, WorkerSpec};

/// First live worker, in registration order, that accepts the job's command
/// and site tag.
pub fn select_worker<'a>(
    registry: &'a WorkerRegistry,
    live: &HashSet<String>,
    job: &JobDescriptor,
) -> Option<&'a WorkerSpec> {
    registry.iter().find(|w| {
        live.contains(&w.queue_name)
            && w.accepts_command(&job.command)
            && w.accepts_site(job.site_tag.as_deref())
    })
}

/// Stamp a job for the worker it was routed to.
pub fn assign(job: &mut JobDescriptor, worker: &WorkerSpec) {
    job.preferences
        .insert(RUN_MODE_KEY.to_string(), RUN_MODE_SERVER.into());
    job.directories.launch_dir = Some(worker.launch_dir.clone());
}
