// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod job_engine;
pub mod plan;

pub use crate::config::WorkerConfig;
pub use crate::job_engine::closure_job::ClosureJob;
pub use crate::job_engine::collaborators::{Connection, Lifecycle};
pub use crate::job_engine::job::{Job, JobContext, JobError};
pub use crate::job_engine::listener::{ListenerBroadcaster, RequestListener};
pub use crate::job_engine::pending_queue::PendingQueue;
pub use crate::job_engine::worker::{RequestWorker, WorkerError, WorkerState};
