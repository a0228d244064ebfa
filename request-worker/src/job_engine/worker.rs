// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use futures::executor::LocalPool;
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::WorkerConfig;
use crate::job_engine::collaborators::{Connection, Lifecycle};
use crate::job_engine::event_loop::EventLoop;
use crate::job_engine::job::Job;
use crate::job_engine::listener::RequestListener;
use crate::job_engine::mailbox::{due_after, Envelope, Message};
use crate::job_engine::pending_queue::PendingQueue;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("the worker has already been started or shut down")]
    AlreadyStarted,

    #[error("could not spawn the worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Everything that has to be known before the event loop takes over.
pub(crate) struct Startup {
    pub(crate) state: WorkerState,
    /// `start` was called or the worker was shut down. `Stopped` is final from then on.
    pub(crate) launched: bool,
    pub(crate) ref_count: u32,
    pub(crate) listeners: Vec<Arc<dyn RequestListener>>,
}

/// State shared between the facade and the worker thread.
pub(crate) struct Shared {
    pub(crate) config: WorkerConfig,
    pub(crate) startup: Mutex<Startup>,
    /// Signalled when the worker leaves `Starting`.
    pub(crate) ready: Condvar,
    pub(crate) interrupted: AtomicBool,
    pub(crate) tx: Sender<Envelope>,
    pub(crate) pending: PendingQueue,
    pub(crate) connection: Mutex<Option<Arc<dyn Connection>>>,
    pub(crate) lifecycle: Arc<dyn Lifecycle>,
    pub(crate) idle_requested: Mutex<bool>,
}

impl Shared {
    pub(crate) fn lock_startup(&self) -> MutexGuard<'_, Startup> {
        self.startup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_idle_requested(&self) -> MutexGuard<'_, bool> {
        self.idle_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.lock_startup().state = state;
        self.ready.notify_all();
    }

    /// Hands a message to the event loop. Fails once the mailbox is closed.
    fn post(&self, message: Message) -> bool {
        self.tx.try_send(Envelope::now(message)).is_ok()
    }
}

/// Serializes outgoing requests onto a single worker thread.
///
/// Jobs pushed before [`start`](Self::start) wait in the [`PendingQueue`];
/// afterwards they go straight to the event loop's mailbox. The worker can
/// only be run once: after [`shutdown`](Self::shutdown) a new one has to be
/// created.
pub struct RequestWorker {
    shared: Arc<Shared>,
    rx: Mutex<Option<Receiver<Envelope>>>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_lock: Mutex<()>,
}

impl RequestWorker {
    pub fn new(
        config: WorkerConfig,
        connection: Arc<dyn Connection>,
        lifecycle: Arc<dyn Lifecycle>,
        pending: PendingQueue,
        ref_count: u32,
    ) -> Self {
        let (tx, rx) = async_channel::unbounded();
        let shared = Shared {
            config,
            startup: Mutex::new(Startup {
                state: WorkerState::Stopped,
                launched: false,
                ref_count,
                listeners: Vec::new(),
            }),
            ready: Condvar::new(),
            interrupted: AtomicBool::new(false),
            tx,
            pending,
            connection: Mutex::new(Some(connection)),
            lifecycle,
            idle_requested: Mutex::new(false),
        };

        Self {
            shared: Arc::new(shared),
            rx: Mutex::new(Some(rx)),
            thread_handle: Mutex::new(None),
            shutdown_lock: Mutex::new(()),
        }
    }

    /// Spawns the worker thread. It starts the connection, drains the pending
    /// queue and then runs the event loop.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut startup = self.shared.lock_startup();
        if startup.launched {
            return Err(WorkerError::AlreadyStarted);
        }
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(WorkerError::AlreadyStarted)?;

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.config.name.clone())
            .spawn(move || {
                if let Some(conn) = shared.connection() {
                    conn.start();
                }
                let event_loop = EventLoop::prepare(shared, rx);

                let mut pool = LocalPool::new();
                pool.run_until(event_loop.run());
            });

        match spawned {
            Ok(handle) => {
                startup.launched = true;
                startup.state = WorkerState::Starting;
                *self
                    .thread_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!("Starting {}", self.shared.config.name);
                Ok(())
            }
            Err(e) => {
                // the receiver went down with the closure
                startup.launched = true;
                Err(WorkerError::Spawn(e))
            }
        }
    }

    pub fn push(&self, job: Arc<dyn Job>) {
        self.push_delayed(job, Duration::ZERO);
    }

    /// Queues `job` to run no earlier than `delay` from now.
    ///
    /// While the worker is starting this blocks for at most
    /// [`WorkerConfig::startup_wait`]; if the worker is still not ready the
    /// job is dropped. Jobs pushed to a stopped worker are dropped as well.
    pub fn push_delayed(&self, job: Arc<dyn Job>, delay: Duration) {
        let mut idle_requested = self.shared.lock_idle_requested();

        if !self.enqueue(job, delay) {
            return;
        }

        // abort any idle request
        if *idle_requested {
            info!("new job, aborting idle request");
            *idle_requested = false;
            self.shared.lifecycle.start();
        }
    }

    fn enqueue(&self, job: Arc<dyn Job>, delay: Duration) -> bool {
        let wait = self.shared.config.startup_wait();
        let startup = self.shared.lock_startup();
        let (startup, _) = self
            .shared
            .ready
            .wait_timeout_while(startup, wait, |s| s.state == WorkerState::Starting)
            .unwrap_or_else(PoisonError::into_inner);

        match startup.state {
            WorkerState::Stopped if !startup.launched => {
                debug!("worker not started - keeping {} pending", job.desc());
                self.shared.pending.push_delayed(job, delay);
                true
            }
            WorkerState::Running => {
                let envelope = Envelope {
                    due: due_after(Instant::now(), delay),
                    message: Message::Job { job, attempt: 1 },
                };
                match self.shared.tx.try_send(envelope) {
                    Ok(()) => true,
                    Err(e) => {
                        info!("mailbox closed - dropping {:?}", e.into_inner().message);
                        false
                    }
                }
            }
            WorkerState::Starting => {
                warn!(
                    "worker still not ready after {:?} - dropping {}",
                    wait,
                    job.desc()
                );
                false
            }
            WorkerState::Stopped | WorkerState::Stopping => {
                info!("request worker is not running - dropping {}", job.desc());
                false
            }
        }
    }

    /// Keeps the subsystem from idling until the matching [`release`](Self::release).
    pub fn hold(&self) {
        let mut startup = self.shared.lock_startup();
        if startup.state == WorkerState::Running {
            self.shared.post(Message::Hold);
        } else {
            startup.ref_count += 1;
        }
    }

    pub fn release(&self) {
        let mut startup = self.shared.lock_startup();
        if startup.state == WorkerState::Running {
            self.shared.post(Message::Release);
        } else {
            startup.ref_count = startup.ref_count.saturating_sub(1);
        }
    }

    /// Registers a listener for every job.
    pub fn add_listener(&self, listener: Arc<dyn RequestListener>) {
        let mut startup = self.shared.lock_startup();
        if startup.state == WorkerState::Running {
            self.shared.post(Message::AddListener(listener));
        } else if !startup.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            startup.listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RequestListener>) {
        let mut startup = self.shared.lock_startup();
        if startup.state == WorkerState::Running {
            self.shared.post(Message::RemoveListener(listener.clone()));
        } else {
            startup.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    /// Asks for the whole subsystem to be stopped as soon as the mailbox is
    /// quiet. A push before that happens cancels the request.
    pub fn idle(&self) {
        let mut idle_requested = self.shared.lock_idle_requested();
        *idle_requested = true;

        let startup = self.shared.lock_startup();
        if startup.state == WorkerState::Running {
            self.shared.post(Message::RequestStop);
        } else {
            debug!("worker not running - idle request kept until the next push");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running && !self.shared.is_interrupted()
    }

    pub fn state(&self) -> WorkerState {
        self.shared.lock_startup().state
    }

    /// Stops the event loop and shuts the connection down.
    ///
    /// Messages still in the mailbox are discarded. A job that is executing
    /// right now runs to completion; use [`join`](Self::join) to wait for it.
    pub fn shutdown(&self) {
        let _guard = self
            .shutdown_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug!("shutting down");
        self.shared.interrupted.store(true, Ordering::SeqCst);

        {
            let mut startup = self.shared.lock_startup();
            startup.launched = true;
            if matches!(startup.state, WorkerState::Starting | WorkerState::Running) {
                startup.state = WorkerState::Stopping;
            }
        }
        self.shared.ready.notify_all();

        debug!("quitting event loop");
        self.shared.tx.close();

        // do not join - the loop notices the interruption on its own
        let conn = self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.shutdown();
        }

        debug!("exiting");
    }

    /// Waits for the worker thread to finish. Returns immediately if it never ran.
    pub fn join(&self) {
        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for RequestWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
