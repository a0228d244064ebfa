// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::job_engine::collaborators::Connection;
use crate::job_engine::job::{Job, JobContext, JobError};
use crate::job_engine::listener::RequestListener;

type Task = dyn Fn(&dyn Connection, &dyn RequestListener, &JobContext) -> Result<String, JobError>
    + Send
    + Sync
    + 'static;

/// A job whose body is a closure.
pub struct ClosureJob {
    desc: String,
    canceled: Arc<AtomicBool>,
    listener: Option<Arc<dyn RequestListener>>,
    task: Box<Task>,
}

impl ClosureJob {
    pub fn new<F>(desc: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn Connection, &dyn RequestListener, &JobContext) -> Result<String, JobError>
            + Send // the closure runs on the worker thread
            + Sync
            + 'static,
    {
        Self {
            desc: desc.into(),
            canceled: Arc::new(AtomicBool::new(false)),
            listener: None,
            task: Box::new(f),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn RequestListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// A handle that cancels this job from anywhere, even after it was pushed.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.canceled.clone()
    }
}

impl Job for ClosureJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn execute(
        &self,
        conn: &dyn Connection,
        listener: &dyn RequestListener,
        ctx: &JobContext,
    ) -> Result<String, JobError> {
        (self.task)(conn, listener, ctx)
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        self.listener.clone()
    }
}

#[test]
fn test_cancel_token_is_shared() {
    let job = ClosureJob::new("noop", |_conn, _listener, _ctx| Ok(String::new()));
    let token = job.cancel_token();
    assert!(!job.is_canceled());

    token.store(true, Ordering::SeqCst);
    assert!(job.is_canceled());
}
