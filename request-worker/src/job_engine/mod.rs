// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Single-Threaded Request Worker
//!
//! ## Overview
//! Outgoing requests of the messaging client are serialized onto one worker
//! thread that owns the network connection.
//!
//! - Producers push jobs from any thread; the worker executes them one at a time.
//! - Jobs pushed before the worker runs wait in a pending queue that is drained
//!   exactly once on startup.
//! - The mailbox supports delayed delivery; retries and "connection not ready"
//!   re-entries are just delayed messages.
//! - Listeners vote on retries: one `true` is enough to requeue a failed job.
//! - A reference count plus a grace timer decide when the connection may idle.
//!
//! ```text
//!         producers (any thread)
//!              |            |
//!              v            v
//!     +--------------+   +------------------------+
//!     | PendingQueue |-->| mailbox (async_channel |
//!     | (pre-start)  |   |  + due-ordered heap)   |
//!     +--------------+   +-----------+------------+
//!                                    |
//!                        +-----------v------------+
//!                        | EventLoop (one thread) |
//!                        |  pack lock -> execute  |
//!                        +---+---------------+----+
//!                            |               |
//!                    ListenerBroadcaster  IdleTracker -> Lifecycle
//! ```

pub mod closure_job;
pub mod collaborators;
pub(crate) mod event_loop;
pub mod idle_tracker;
pub mod job;
pub mod listener;
pub mod mailbox;
pub mod pending_queue;
pub mod worker;
