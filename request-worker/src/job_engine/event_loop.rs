// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use async_channel::{Receiver, TryRecvError};
use async_io::Timer;
use futures::future::{select, Either};
use futures::pin_mut;
use log::{debug, error, info};

use crate::job_engine::collaborators::Connection;
use crate::job_engine::idle_tracker::IdleTracker;
use crate::job_engine::job::{Job, JobContext, JobError};
use crate::job_engine::listener::{ListenerBroadcaster, RequestListener};
use crate::job_engine::mailbox::{due_after, Envelope, Mailbox, Message};
use crate::job_engine::pending_queue::PendingJob;
use crate::job_engine::worker::{Shared, WorkerState};

enum Outcome {
    Done,
    Requeue,
    Dropped,
}

/// The consumer side of the worker: the only place jobs are executed.
pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    rx: Receiver<Envelope>,
    mailbox: Mailbox,
    tracker: IdleTracker,
    listeners: ListenerBroadcaster,
    /// One-shot observer armed by `RequestWorker::idle`.
    stop_observer: bool,
    /// Quiescence callbacks already ran since the last dispatched message.
    quiet: bool,
}

impl EventLoop {
    /// Takes over from the startup state: drains the pending queue into the
    /// mailbox and signals readiness.
    pub(crate) fn prepare(shared: Arc<Shared>, rx: Receiver<Envelope>) -> Self {
        let mut startup = shared.lock_startup();

        let mut mailbox = Mailbox::new();
        let pending = shared.pending.take_all();
        debug!("processing pending jobs queue ({} jobs)", pending.len());
        for PendingJob { job, due } in pending {
            mailbox.schedule(Message::Job { job, attempt: 1 }, due);
        }

        let mut listeners = ListenerBroadcaster::new();
        for listener in startup.listeners.drain(..) {
            listeners.add(listener);
        }

        let tracker = IdleTracker::new(startup.ref_count, shared.config.idle_grace);
        debug!(
            "idle detection {} (ref={})",
            if tracker.is_armed() { "armed" } else { "disarmed" },
            tracker.ref_count()
        );

        // a shutdown may have overtaken us
        if startup.state == WorkerState::Starting {
            startup.state = WorkerState::Running;
        }
        drop(startup);
        shared.ready.notify_all();

        Self {
            shared,
            rx,
            mailbox,
            tracker,
            listeners,
            stop_observer: false,
            quiet: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.shared.is_interrupted() {
                break;
            }

            if !self.collect() {
                break;
            }

            if let Some(message) = self.mailbox.pop_ready(Instant::now()) {
                self.quiet = false;
                self.dispatch(message);
                continue;
            }

            if !self.quiet {
                self.quiet = true;
                self.on_quiescent();
                // the callbacks may have scheduled something
                continue;
            }

            let received = match self.mailbox.next_due() {
                Some(due) => {
                    let recv = self.rx.recv();
                    let timer = Timer::at(due);
                    pin_mut!(recv, timer);
                    match select(recv, timer).await {
                        Either::Left((received, _)) => Some(received),
                        Either::Right(_) => None,
                    }
                }
                None => Some(self.rx.recv().await),
            };

            match received {
                Some(Ok(envelope)) => self.mailbox.deliver(envelope),
                Some(Err(_)) => break,
                None => {}
            }
        }

        let discarded = self.mailbox.clear();
        info!(
            "{} stopped, {} queued messages discarded",
            self.shared.config.name, discarded
        );
        self.shared.set_state(WorkerState::Stopped);
    }

    /// Moves everything producers have sent so far into the mailbox.
    /// Returns false once the channel is closed.
    fn collect(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => self.mailbox.deliver(envelope),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Closed) => return false,
            }
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::Job { job, attempt } => self.handle_job(job, attempt),
            Message::IdleCheck => {
                if self.tracker.on_idle_check() {
                    info!("mailbox idle - notifying lifecycle");
                    self.shared.lifecycle.idle();
                }
            }
            Message::Hold => self.tracker.hold(&mut self.mailbox),
            Message::Release => self.tracker.release(&mut self.mailbox),
            Message::AddListener(listener) => {
                self.listeners.add(listener);
            }
            Message::RemoveListener(listener) => {
                self.listeners.remove(&listener);
            }
            Message::RequestStop => self.stop_observer = true,
        }
    }

    fn on_quiescent(&mut self) {
        self.tracker.on_quiescent(&mut self.mailbox, Instant::now());

        if self.stop_observer {
            self.stop_observer = false;
            let idle_requested = self.shared.lock_idle_requested();
            if *idle_requested {
                info!("idle request confirmed - stopping");
                self.shared.lifecycle.stop();
            }
        }
    }

    fn handle_job(&mut self, job: Arc<dyn Job>, attempt: u32) {
        // fresh work resets the idle timer
        self.tracker.on_activity(&mut self.mailbox);

        if self.shared.is_interrupted() {
            info!("request worker is not running - dropping {}", job.desc());
            return;
        }

        if job.is_canceled() {
            info!("request {} has been canceled - dropping", job.desc());
            return;
        }

        let conn = match self.shared.connection() {
            Some(conn) if conn.is_connected() => conn,
            _ => {
                let delay = self.shared.config.not_ready_delay;
                debug!("client not ready - retrying {} in {:?}", job.desc(), delay);
                self.mailbox.schedule(
                    Message::Job { job, attempt },
                    due_after(Instant::now(), delay),
                );
                return;
            }
        };

        debug!("JOB: {} (attempt {})", job.desc(), attempt);

        // check again, the wait for the connection may have been long
        if job.is_canceled() {
            info!("request {} has been canceled - dropping", job.desc());
            return;
        }

        let custom = job.listener();
        let registered = match &custom {
            Some(listener) => self.listeners.add(listener.clone()),
            None => false,
        };

        let ctx = JobContext {
            worker: self.shared.config.name.clone(),
            attempt,
        };

        let outcome = {
            let _pack = conn
                .pack_lock()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            panic::catch_unwind(AssertUnwindSafe(|| {
                execute(
                    conn.as_ref(),
                    job.as_ref(),
                    &self.listeners,
                    &ctx,
                    &self.shared.interrupted,
                )
            }))
        };

        if let (true, Some(listener)) = (registered, &custom) {
            self.listeners.remove(listener);
        }

        match outcome {
            Ok(Outcome::Requeue) => {
                let delay = self.shared.config.retry_delay;
                debug!("requeuing job {} in {:?}", job.desc(), delay);
                self.mailbox.schedule(
                    Message::Job {
                        job,
                        attempt: attempt + 1,
                    },
                    due_after(Instant::now(), delay),
                );
            }
            Ok(Outcome::Done) | Ok(Outcome::Dropped) => {}
            Err(payload) => {
                error!(
                    "job {} panicked, dropping it: {}",
                    job.desc(),
                    panic_message(&*payload)
                );
            }
        }
    }
}

/// Runs `job` once. The caller holds the pack lock.
fn execute(
    conn: &dyn Connection,
    job: &dyn Job,
    listeners: &ListenerBroadcaster,
    ctx: &JobContext,
    interrupted: &AtomicBool,
) -> Outcome {
    let _observation = Observation::new(job, ctx);

    match job.execute(conn, listeners, ctx) {
        Ok(tx_id) => {
            debug!("job {} done (tx {})", job.desc(), tx_id);
            listeners.done(conn, job, &tx_id);
            Outcome::Done
        }
        Err(JobError::Io(fault)) => {
            if interrupted.load(Ordering::SeqCst) {
                debug!("worker has been interrupted");
                return Outcome::Dropped;
            }

            error!("request error on {}: {}", job.desc(), fault);
            if listeners.error(conn, job, &fault) {
                Outcome::Requeue
            } else {
                info!("no listener asked for a retry - dropping {}", job.desc());
                Outcome::Dropped
            }
        }
        Err(JobError::Fatal(e)) => {
            error!("job {} failed, dropping it: {:#}", job.desc(), e);
            Outcome::Dropped
        }
    }
}

/// Keeps a job observing its source while it executes.
struct Observation<'a> {
    job: &'a dyn Job,
    ctx: &'a JobContext,
}

impl<'a> Observation<'a> {
    fn new(job: &'a dyn Job, ctx: &'a JobContext) -> Self {
        job.observe(ctx);
        Self { job, ctx }
    }
}

impl Drop for Observation<'_> {
    fn drop(&mut self) {
        self.job.unobserve(self.ctx);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
