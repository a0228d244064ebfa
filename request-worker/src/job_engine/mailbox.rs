// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::job_engine::job::Job;
use crate::job_engine::listener::RequestListener;

/// Stand-in for delays that do not fit into an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The instant `delay` after `now`. Saturates at a far-future instant
/// instead of overflowing.
pub fn due_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// What the event loop can be asked to do.
pub enum Message {
    Job { job: Arc<dyn Job>, attempt: u32 },
    IdleCheck,
    Hold,
    Release,
    AddListener(Arc<dyn RequestListener>),
    RemoveListener(Arc<dyn RequestListener>),
    /// Arms the one-shot observer that stops the subsystem once the mailbox is quiet.
    RequestStop,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Job { job, attempt } => f
                .debug_struct("Job")
                .field("desc", &job.desc())
                .field("attempt", attempt)
                .finish(),
            Message::IdleCheck => f.write_str("IdleCheck"),
            Message::Hold => f.write_str("Hold"),
            Message::Release => f.write_str("Release"),
            Message::AddListener(_) => f.write_str("AddListener"),
            Message::RemoveListener(_) => f.write_str("RemoveListener"),
            Message::RequestStop => f.write_str("RequestStop"),
        }
    }
}

/// A message together with the instant it becomes eligible.
#[derive(Debug)]
pub struct Envelope {
    pub due: Instant,
    pub message: Message,
}

impl Envelope {
    pub fn now(message: Message) -> Self {
        Self {
            due: Instant::now(),
            message,
        }
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Messages owned by the event loop, ordered by eligibility and then arrival.
#[derive(Default)]
pub struct Mailbox {
    entries: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, message: Message, due: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Reverse(Entry { due, seq, message }));
    }

    pub fn deliver(&mut self, envelope: Envelope) {
        self.schedule(envelope.message, envelope.due);
    }

    /// Pops the next message if it is eligible at `now`.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Message> {
        match self.entries.peek() {
            Some(Reverse(entry)) if entry.due <= now => {
                self.entries.pop().map(|Reverse(entry)| entry.message)
            }
            _ => None,
        }
    }

    /// When the earliest scheduled message becomes eligible.
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.peek().map(|Reverse(entry)| entry.due)
    }

    pub fn remove_idle_checks(&mut self) {
        self.entries
            .retain(|Reverse(entry)| !matches!(entry.message, Message::IdleCheck));
    }

    pub fn has_idle_check(&self) -> bool {
        self.entries
            .iter()
            .any(|Reverse(entry)| matches!(entry.message, Message::IdleCheck))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops everything that is still scheduled.
    pub fn clear(&mut self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        discarded
    }
}
