// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use clap::Args;

pub const DEFAULT_WORKER_NAME: &str = "RequestWorker";
/// How long the mailbox must stay quiet before the subsystem is told it may idle.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_millis(5000);
/// Delay before a job that failed with a transient error is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10_000);
/// Delay before a job is looked at again while the connection is not up.
pub const DEFAULT_NOT_READY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_STARTUP_WAIT_RETRIES: u32 = 20;
pub const DEFAULT_STARTUP_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables of a request worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Name of the worker thread.
    pub name: String,
    pub idle_grace: Duration,
    pub retry_delay: Duration,
    pub not_ready_delay: Duration,
    /// `push` waits at most `startup_wait_retries * startup_wait_interval`
    /// for a starting worker before dropping the job.
    pub startup_wait_retries: u32,
    pub startup_wait_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_WORKER_NAME.to_string(),
            idle_grace: DEFAULT_IDLE_GRACE,
            retry_delay: DEFAULT_RETRY_DELAY,
            not_ready_delay: DEFAULT_NOT_READY_DELAY,
            startup_wait_retries: DEFAULT_STARTUP_WAIT_RETRIES,
            startup_wait_interval: DEFAULT_STARTUP_WAIT_INTERVAL,
        }
    }
}

impl WorkerConfig {
    pub fn startup_wait(&self) -> Duration {
        self.startup_wait_interval
            .saturating_mul(self.startup_wait_retries)
    }
}

/// Command line flags for the worker tunables, all in milliseconds.
#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Quiet time before the subsystem is notified that it may idle
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub idle_grace_ms: u64,

    /// Delay before retrying a job that failed with a transient error
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    pub retry_delay_ms: u64,

    /// Delay before looking at a job again while the connection is down
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub not_ready_delay_ms: u64,

    /// How often push() waits for a starting worker
    #[arg(long, default_value_t = DEFAULT_STARTUP_WAIT_RETRIES)]
    pub startup_wait_retries: u32,

    /// How long each of those waits lasts
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub startup_wait_interval_ms: u64,
}

impl From<WorkerArgs> for WorkerConfig {
    fn from(args: WorkerArgs) -> Self {
        Self {
            idle_grace: Duration::from_millis(args.idle_grace_ms),
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            not_ready_delay: Duration::from_millis(args.not_ready_delay_ms),
            startup_wait_retries: args.startup_wait_retries,
            startup_wait_interval: Duration::from_millis(args.startup_wait_interval_ms),
            ..Self::default()
        }
    }
}
