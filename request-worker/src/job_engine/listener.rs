// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::job_engine::collaborators::Connection;
use crate::job_engine::job::Job;

/// Callbacks about the progress and outcome of a job.
///
/// Listeners are invoked on the worker thread and must not panic; a panic is
/// treated like a fatal job error.
pub trait RequestListener: Send + Sync {
    fn download_progress(&self, _conn: &dyn Connection, _job: &dyn Job, _bytes: u64) {}

    fn upload_progress(&self, _conn: &dyn Connection, _job: &dyn Job, _bytes: u64) {}

    fn done(&self, _conn: &dyn Connection, _job: &dyn Job, _tx_id: &str) {}

    /// Returns true to have the job requeued.
    fn error(&self, _conn: &dyn Connection, _job: &dyn Job, _fault: &io::Error) -> bool {
        false
    }
}

/// Presents a set of listeners as a single one.
#[derive(Default)]
pub struct ListenerBroadcaster {
    listeners: SmallVec<[Arc<dyn RequestListener>; 4]>,
}

impl ListenerBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` unless the same instance is already registered.
    pub fn add(&mut self, listener: Arc<dyn RequestListener>) -> bool {
        if self.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub fn remove(&mut self, listener: &Arc<dyn RequestListener>) -> bool {
        match self.listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, listener: &Arc<dyn RequestListener>) -> bool {
        self.listeners.iter().any(|l| Arc::ptr_eq(l, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl RequestListener for ListenerBroadcaster {
    fn download_progress(&self, conn: &dyn Connection, job: &dyn Job, bytes: u64) {
        for l in &self.listeners {
            l.download_progress(conn, job, bytes);
        }
    }

    fn upload_progress(&self, conn: &dyn Connection, job: &dyn Job, bytes: u64) {
        for l in &self.listeners {
            l.upload_progress(conn, job, bytes);
        }
    }

    fn done(&self, conn: &dyn Connection, job: &dyn Job, tx_id: &str) {
        for l in &self.listeners {
            l.done(conn, job, tx_id);
        }
    }

    // every listener gets to see the error, so no short circuit
    fn error(&self, conn: &dyn Connection, job: &dyn Job, fault: &io::Error) -> bool {
        let mut requeue = false;
        for l in &self.listeners {
            if l.error(conn, job, fault) {
                requeue = true;
            }
        }
        requeue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_engine::closure_job::ClosureJob;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NoConnection {
        lock: Mutex<()>,
    }

    impl Connection for NoConnection {
        fn is_connected(&self) -> bool {
            false
        }
        fn pack_lock(&self) -> &Mutex<()> {
            &self.lock
        }
        fn start(&self) {}
        fn shutdown(&self) {}
    }

    struct Vote {
        requeue: bool,
        errors: AtomicUsize,
        done: Mutex<Vec<String>>,
    }

    impl Vote {
        fn new(requeue: bool) -> Arc<Self> {
            Arc::new(Self {
                requeue,
                errors: AtomicUsize::new(0),
                done: Mutex::new(Vec::new()),
            })
        }
    }

    impl RequestListener for Vote {
        fn done(&self, _conn: &dyn Connection, _job: &dyn Job, tx_id: &str) {
            self.done.lock().unwrap().push(tx_id.to_string());
        }

        fn error(&self, _conn: &dyn Connection, _job: &dyn Job, _fault: &io::Error) -> bool {
            self.errors.fetch_add(1, Ordering::SeqCst);
            self.requeue
        }
    }

    fn fixtures() -> (NoConnection, ClosureJob) {
        let conn = NoConnection {
            lock: Mutex::new(()),
        };
        let job = ClosureJob::new("noop", |_conn, _listener, _ctx| Ok("tx".to_string()));
        (conn, job)
    }

    #[test]
    fn test_duplicates_are_suppressed() {
        let mut broadcaster = ListenerBroadcaster::new();
        let listener: Arc<dyn RequestListener> = Vote::new(false);

        assert!(broadcaster.add(listener.clone()));
        assert!(!broadcaster.add(listener.clone()));
        assert_eq!(broadcaster.len(), 1);

        assert!(broadcaster.remove(&listener));
        assert!(!broadcaster.remove(&listener));
        assert!(broadcaster.is_empty());
    }

    #[test]
    fn test_error_votes_are_ored() {
        let (conn, job) = fixtures();
        let fault = io::Error::new(io::ErrorKind::ConnectionReset, "reset");

        let no = Vote::new(false);
        let yes = Vote::new(true);
        let also_no = Vote::new(false);

        let mut broadcaster = ListenerBroadcaster::new();
        broadcaster.add(no.clone());
        assert!(!broadcaster.error(&conn, &job, &fault));

        broadcaster.add(yes.clone());
        broadcaster.add(also_no.clone());
        assert!(broadcaster.error(&conn, &job, &fault));

        // the vote does not stop the fan-out
        assert_eq!(no.errors.load(Ordering::SeqCst), 2);
        assert_eq!(yes.errors.load(Ordering::SeqCst), 1);
        assert_eq!(also_no.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_broadcaster_declines_requeue() {
        let (conn, job) = fixtures();
        let fault = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert!(!ListenerBroadcaster::new().error(&conn, &job, &fault));
    }

    #[test]
    fn test_done_reaches_everyone() {
        let (conn, job) = fixtures();
        let a = Vote::new(false);
        let b = Vote::new(false);

        let mut broadcaster = ListenerBroadcaster::new();
        broadcaster.add(a.clone());
        broadcaster.add(b.clone());
        broadcaster.done(&conn, &job, "tx-1");

        assert_eq!(*a.done.lock().unwrap(), vec!["tx-1".to_string()]);
        assert_eq!(*b.done.lock().unwrap(), vec!["tx-1".to_string()]);
    }
}
