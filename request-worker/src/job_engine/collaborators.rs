// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Mutex;

/// The network connection the worker executes jobs against.
///
/// The worker owns the connection: it starts it when the worker thread comes
/// up and shuts it down exactly once in [`RequestWorker::shutdown`].
///
/// [`RequestWorker::shutdown`]: crate::job_engine::worker::RequestWorker::shutdown
pub trait Connection: Send + Sync {
    /// Whether the transport is established. Jobs are held back until it is.
    fn is_connected(&self) -> bool;

    /// The pack lock. Job execution happens while the worker holds it, so
    /// anything else touching the connection (e.g. a keep-alive) must take it
    /// too. Jobs must not lock it themselves.
    fn pack_lock(&self) -> &Mutex<()>;

    /// Establish the transport. Called on the worker thread before the loop runs.
    fn start(&self);

    /// Tear down the transport.
    fn shutdown(&self);
}

/// One-way notifications towards the service that owns the network subsystem.
///
/// `start` and `stop` are called while the worker's idle-request lock is held,
/// so they must not push jobs to the same worker.
pub trait Lifecycle: Send + Sync {
    /// The mailbox has been quiet for the grace period and nobody holds the
    /// worker: the connection may be released.
    fn idle(&self);

    /// New work arrived after an idle request; connectivity is needed again.
    fn start(&self);

    /// An idle request was confirmed by a quiet mailbox: stop everything.
    fn stop(&self);
}
