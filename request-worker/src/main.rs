// SPDX-License-Identifier: MIT
// request-worker: drives the request worker with a scripted job plan
//
// - Pushes the planned jobs before the worker starts (they wait in the pending queue).
// - Runs them against a simulated connection and logs every listener callback.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;

use request_worker::config::{WorkerArgs, WorkerConfig};
use request_worker::plan::{LoggingLifecycle, LoggingListener, Plan, ScriptedJob, SimulatedConnection};
use request_worker::{PendingQueue, RequestWorker};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Job plan (JSON). Without it a built-in two-job plan is used.
    #[arg(long, value_name = "FILE")]
    plan: Option<PathBuf>,

    /// How long the simulated connection takes to come up
    #[arg(long, value_name = "MS", default_value_t = 0)]
    connect_after_ms: u64,

    /// Shut the worker down after this long
    #[arg(long, value_name = "MS", default_value_t = 15_000)]
    run_for_ms: u64,

    /// Let failed jobs go instead of voting for a retry
    #[arg(long)]
    no_retry: bool,

    /// Hold the worker so it never reports idle
    #[arg(long)]
    hold: bool,

    #[command(flatten)]
    worker: WorkerArgs,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let args = Args::parse();

    let plan = match &args.plan {
        Some(path) => Plan::load(path)?,
        None => Plan::default(),
    };

    let pending = PendingQueue::new();
    let lifecycle = Arc::new(LoggingLifecycle::default());
    let worker = RequestWorker::new(
        WorkerConfig::from(args.worker.clone()),
        Arc::new(SimulatedConnection::new(Duration::from_millis(
            args.connect_after_ms,
        ))),
        lifecycle.clone(),
        pending.clone(),
        u32::from(args.hold),
    );
    worker.add_listener(Arc::new(LoggingListener::new(!args.no_retry)));

    for planned in plan.jobs {
        let cancel = planned.cancel;
        let job = Arc::new(ScriptedJob::new(planned));
        worker.push_delayed(job.clone(), job.delay());
        if cancel {
            job.cancel();
        }
    }
    info!("{} jobs pending", pending.len());

    worker.start().context("failed to start the request worker")?;
    thread::sleep(Duration::from_millis(args.run_for_ms));

    info!("Stopping request worker");
    worker.shutdown();
    worker.join();
    info!("lifecycle stopped: {}", lifecycle.is_stopped());

    Ok(())
}
