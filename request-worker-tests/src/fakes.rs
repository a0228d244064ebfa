// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use request_worker::{Connection, Job, JobContext, JobError, Lifecycle, RequestListener};

use crate::trace::Trace;

/// A connection that is up unless told otherwise and counts its shutdowns.
pub struct FakeConnection {
    connected: AtomicBool,
    pack_lock: Mutex<()>,
    shutdowns: AtomicUsize,
    trace: Trace,
}

impl FakeConnection {
    pub fn new(trace: &Trace, connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            pack_lock: Mutex::new(()),
            shutdowns: AtomicUsize::new(0),
            trace: trace.clone(),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Connection for FakeConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn pack_lock(&self) -> &Mutex<()> {
        &self.pack_lock
    }

    fn start(&self) {
        self.trace.record("connection start");
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.trace.record("connection shutdown");
    }
}

/// Records the lifecycle notifications.
pub struct RecordingLifecycle {
    trace: Trace,
}

impl RecordingLifecycle {
    pub fn new(trace: &Trace) -> Arc<Self> {
        Arc::new(Self {
            trace: trace.clone(),
        })
    }
}

impl Lifecycle for RecordingLifecycle {
    fn idle(&self) {
        self.trace.record("lifecycle idle");
    }

    fn start(&self) {
        self.trace.record("lifecycle start");
    }

    fn stop(&self) {
        self.trace.record("lifecycle stop");
    }
}

/// A listener that records callbacks under its name and always casts the same vote.
pub struct VotingListener {
    name: String,
    requeue: bool,
    trace: Trace,
}

impl VotingListener {
    pub fn new(trace: &Trace, name: &str, requeue: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            requeue,
            trace: trace.clone(),
        })
    }
}

impl RequestListener for VotingListener {
    fn done(&self, _conn: &dyn Connection, job: &dyn Job, tx_id: &str) {
        self.trace
            .record(format!("{}: done {} {}", self.name, job.desc(), tx_id));
    }

    fn error(&self, _conn: &dyn Connection, job: &dyn Job, _fault: &io::Error) -> bool {
        self.trace
            .record(format!("{}: error {}", self.name, job.desc()));
        self.requeue
    }
}

/// Tracks how many jobs are inside `execute` at the same time.
#[derive(Default)]
pub struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A job that fails with a transient error on its first `fail_times` attempts.
pub struct ScriptedJob {
    name: String,
    fail_times: u32,
    work: Duration,
    canceled: AtomicBool,
    concurrency: Option<Arc<Concurrency>>,
    trace: Trace,
}

impl ScriptedJob {
    pub fn new(trace: &Trace, name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_times: 0,
            work: Duration::ZERO,
            canceled: AtomicBool::new(false),
            concurrency: None,
            trace: trace.clone(),
        }
    }

    pub fn failing(mut self, times: u32) -> Self {
        self.fail_times = times;
        self
    }

    pub fn working_for(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn tracked_by(mut self, concurrency: Arc<Concurrency>) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl Job for ScriptedJob {
    fn desc(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        _conn: &dyn Connection,
        _listener: &dyn RequestListener,
        ctx: &JobContext,
    ) -> Result<String, JobError> {
        if let Some(concurrency) = &self.concurrency {
            concurrency.enter();
        }
        self.trace
            .record(format!("execute {} #{}", self.name, ctx.attempt));
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        if let Some(concurrency) = &self.concurrency {
            concurrency.leave();
        }

        if ctx.attempt <= self.fail_times {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into());
        }
        Ok(format!("tx-{}", self.name))
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}
