// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::{Duration, Instant};

use log::debug;

use crate::job_engine::mailbox::{due_after, Mailbox, Message};

/// Decides when the mailbox has been quiet long enough to let the connection go.
///
/// Lives on the event loop thread. Idle detection is armed while nobody
/// holds the worker; when armed, each quiet spell schedules an `IdleCheck`
/// message `grace` later, and any activity cancels it again.
#[derive(Debug)]
pub struct IdleTracker {
    ref_count: u32,
    armed: bool,
    notified: bool,
    grace: Duration,
}

impl IdleTracker {
    pub fn new(ref_count: u32, grace: Duration) -> Self {
        Self {
            ref_count,
            armed: ref_count == 0,
            notified: false,
            grace,
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn hold(&mut self, mailbox: &mut Mailbox) {
        self.ref_count += 1;
        debug!("hold (ref={}), idle detection disarmed", self.ref_count);
        self.armed = false;
        self.notified = false;
        mailbox.remove_idle_checks();
    }

    pub fn release(&mut self, mailbox: &mut Mailbox) {
        self.ref_count = self.ref_count.saturating_sub(1);
        debug!("release (ref={})", self.ref_count);
        if self.ref_count == 0 {
            mailbox.remove_idle_checks();
            self.armed = true;
            self.notified = false;
        }
    }

    /// A job arrived: whatever idle check was pending is stale.
    pub fn on_activity(&mut self, mailbox: &mut Mailbox) {
        mailbox.remove_idle_checks();
        self.notified = false;
    }

    /// The mailbox has no ready message.
    pub fn on_quiescent(&mut self, mailbox: &mut Mailbox, now: Instant) {
        if !self.armed {
            return;
        }
        mailbox.remove_idle_checks();

        debug!("no more messages (ref={})", self.ref_count);
        if self.ref_count == 0 && !self.notified {
            mailbox.schedule(Message::IdleCheck, due_after(now, self.grace));
        }
    }

    /// The scheduled idle check came due. Returns whether idle should be signalled.
    pub fn on_idle_check(&mut self) -> bool {
        if self.ref_count > 0 || self.notified {
            return false;
        }
        self.notified = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_millis(100);

    #[test]
    fn test_quiet_mailbox_schedules_one_check() {
        let now = Instant::now();
        let mut mailbox = Mailbox::new();
        let mut tracker = IdleTracker::new(0, GRACE);

        tracker.on_quiescent(&mut mailbox, now);
        tracker.on_quiescent(&mut mailbox, now);

        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox.next_due(), Some(now + GRACE));
    }

    #[test]
    fn test_held_tracker_stays_disarmed() {
        let now = Instant::now();
        let mut mailbox = Mailbox::new();
        let mut tracker = IdleTracker::new(1, GRACE);
        assert!(!tracker.is_armed());

        tracker.on_quiescent(&mut mailbox, now);
        assert!(mailbox.is_empty());

        tracker.release(&mut mailbox);
        assert!(tracker.is_armed());
        tracker.on_quiescent(&mut mailbox, now);
        assert!(mailbox.has_idle_check());
    }

    #[test]
    fn test_hold_cancels_scheduled_check() {
        let now = Instant::now();
        let mut mailbox = Mailbox::new();
        let mut tracker = IdleTracker::new(0, GRACE);
        tracker.on_quiescent(&mut mailbox, now);

        tracker.hold(&mut mailbox);

        assert!(!mailbox.has_idle_check());
        assert_eq!(tracker.ref_count(), 1);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let mut mailbox = Mailbox::new();
        let mut tracker = IdleTracker::new(0, GRACE);
        tracker.release(&mut mailbox);
        tracker.release(&mut mailbox);
        assert_eq!(tracker.ref_count(), 0);

        tracker.hold(&mut mailbox);
        assert_eq!(tracker.ref_count(), 1);
    }

    #[test]
    fn test_one_notification_per_quiet_spell() {
        let now = Instant::now();
        let mut mailbox = Mailbox::new();
        let mut tracker = IdleTracker::new(0, GRACE);

        tracker.on_quiescent(&mut mailbox, now);
        assert!(tracker.on_idle_check());

        // still quiet: nothing new gets scheduled
        mailbox.clear();
        tracker.on_quiescent(&mut mailbox, now + GRACE);
        assert!(mailbox.is_empty());
        assert!(!tracker.on_idle_check());

        // a job starts a new spell
        tracker.on_activity(&mut mailbox);
        tracker.on_quiescent(&mut mailbox, now + GRACE);
        assert!(mailbox.has_idle_check());
        assert!(tracker.on_idle_check());
    }
}
