// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::job_engine::job::Job;
use crate::job_engine::mailbox::due_after;

/// A job waiting for the worker thread to come up.
pub struct PendingJob {
    pub job: Arc<dyn Job>,
    /// Earliest execution time, counted from the push.
    pub due: Instant,
}

/// Jobs submitted before the worker runs.
///
/// The queue is handed to the worker on construction and drained once, when
/// the worker thread starts. Clones share the same queue.
#[derive(Clone, Default)]
pub struct PendingQueue {
    jobs: Arc<Mutex<VecDeque<PendingJob>>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: Arc<dyn Job>) {
        self.push_delayed(job, Duration::ZERO);
    }

    pub fn push_delayed(&self, job: Arc<dyn Job>, delay: Duration) {
        let due = due_after(Instant::now(), delay);
        self.lock().push_back(PendingJob { job, due });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empties the queue, returning its former content in FIFO order.
    pub fn take_all(&self) -> VecDeque<PendingJob> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingJob>> {
        // the deque stays consistent even if a holder panicked
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
