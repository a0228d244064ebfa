// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Scripted jobs and a simulated connection, used by the `request-worker`
//! binary to exercise the worker without a real server.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::job_engine::collaborators::{Connection, Lifecycle};
use crate::job_engine::job::{Job, JobContext, JobError};
use crate::job_engine::listener::RequestListener;

/// One job of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedJob {
    pub name: String,
    /// How many attempts fail with a transient error before one succeeds.
    #[serde(default)]
    pub fail_times: u32,
    #[serde(default)]
    pub delay_ms: u64,
    /// Cancel the job right after pushing it.
    #[serde(default)]
    pub cancel: bool,
    /// Bytes reported through `upload_progress`.
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub jobs: Vec<PlannedJob>,
}

impl Plan {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("malformed job plan")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        Self::from_json(&json)
    }
}

impl Default for Plan {
    /// A message that goes through and one that needs a retry.
    fn default() -> Self {
        Self {
            jobs: vec![
                PlannedJob {
                    name: "message-a".to_string(),
                    fail_times: 0,
                    delay_ms: 0,
                    cancel: false,
                    size: 512,
                },
                PlannedJob {
                    name: "message-b".to_string(),
                    fail_times: 1,
                    delay_ms: 0,
                    cancel: false,
                    size: 2048,
                },
            ],
        }
    }
}

/// A job that follows its [`PlannedJob`] script.
pub struct ScriptedJob {
    planned: PlannedJob,
    canceled: AtomicBool,
}

impl ScriptedJob {
    pub fn new(planned: PlannedJob) -> Self {
        Self {
            planned,
            canceled: AtomicBool::new(false),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.planned.delay_ms)
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl Job for ScriptedJob {
    fn desc(&self) -> &str {
        &self.planned.name
    }

    fn execute(
        &self,
        conn: &dyn Connection,
        listener: &dyn RequestListener,
        ctx: &JobContext,
    ) -> Result<String, JobError> {
        if ctx.attempt <= self.planned.fail_times {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("simulated failure {} of {}", ctx.attempt, self.planned.fail_times),
            )
            .into());
        }

        if self.planned.size > 0 {
            listener.upload_progress(conn, self, self.planned.size / 2);
            listener.upload_progress(conn, self, self.planned.size);
        }
        Ok(format!("{}-{}", self.planned.name, ctx.attempt))
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// A connection that comes up a fixed time after `start`.
pub struct SimulatedConnection {
    connect_after: Duration,
    started: Mutex<Option<Instant>>,
    closed: AtomicBool,
    pack_lock: Mutex<()>,
}

impl SimulatedConnection {
    pub fn new(connect_after: Duration) -> Self {
        Self {
            connect_after,
            started: Mutex::new(None),
            closed: AtomicBool::new(false),
            pack_lock: Mutex::new(()),
        }
    }
}

impl Connection for SimulatedConnection {
    fn is_connected(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match *self.started.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(at) => at.elapsed() >= self.connect_after,
            None => false,
        }
    }

    fn pack_lock(&self) -> &Mutex<()> {
        &self.pack_lock
    }

    fn start(&self) {
        info!("connecting (ready in {:?})", self.connect_after);
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn shutdown(&self) {
        info!("disconnecting");
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Logs every callback and votes for a retry when configured to.
pub struct LoggingListener {
    retry: bool,
}

impl LoggingListener {
    pub fn new(retry: bool) -> Self {
        Self { retry }
    }
}

impl RequestListener for LoggingListener {
    fn upload_progress(&self, _conn: &dyn Connection, job: &dyn Job, bytes: u64) {
        info!("{}: {} bytes sent", job.desc(), bytes);
    }

    fn done(&self, _conn: &dyn Connection, job: &dyn Job, tx_id: &str) {
        info!("{}: done (tx {})", job.desc(), tx_id);
    }

    fn error(&self, _conn: &dyn Connection, job: &dyn Job, fault: &io::Error) -> bool {
        warn!("{}: {} (retry: {})", job.desc(), fault, self.retry);
        self.retry
    }
}

/// Stands in for the service owning the network subsystem.
#[derive(Default)]
pub struct LoggingLifecycle {
    stopped: AtomicBool,
}

impl LoggingLifecycle {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Lifecycle for LoggingLifecycle {
    fn idle(&self) {
        info!("lifecycle: idle");
    }

    fn start(&self) {
        info!("lifecycle: start");
        self.stopped.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        info!("lifecycle: stop");
        self.stopped.store(true, Ordering::SeqCst);
    }
}
