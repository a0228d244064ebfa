// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;

use thiserror::Error;

use crate::job_engine::collaborators::Connection;
use crate::job_engine::listener::RequestListener;

/// Ways a job execution can fail.
#[derive(Debug, Error)]
pub enum JobError {
    /// Transient network failure. The listeners decide whether to retry.
    #[error("transient i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else. The job is dropped.
    #[error("job failed: {0}")]
    Fatal(#[from] anyhow::Error),
}

/// What the worker hands to a job besides the connection and the listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    /// Name of the worker thread executing the job.
    pub worker: String,
    /// 1 on the first execution, incremented on every retry the listeners asked for.
    pub attempt: u32,
}

pub trait Job: Send + Sync + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str;

    /// Runs the request against the connection and returns its transaction id.
    ///
    /// Called on the worker thread with the pack lock held.
    fn execute(
        &self,
        conn: &dyn Connection,
        listener: &dyn RequestListener,
        ctx: &JobContext,
    ) -> Result<String, JobError>;

    /// Checked when the job is dequeued and again right before execution.
    fn is_canceled(&self) -> bool;

    /// Listener that only sees this job. Registered for the duration of its execution.
    fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        None
    }

    /// Called right before `execute`, e.g. to start watching the job's source
    /// for cancellation.
    fn observe(&self, _ctx: &JobContext) {}

    /// Counterpart of `observe`, called whatever the outcome.
    fn unobserve(&self, _ctx: &JobContext) {}
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("desc", &self.desc())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
