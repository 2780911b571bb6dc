//! Parallel dispatch of the task graph: a dependency-aware scheduler that
//! repeatedly scans for a *ready* task rather than handing the whole list to
//! a data-parallel iterator, since readiness changes dynamically as `SSA`
//! tasks complete and unblock their dependents.
//!
//! Suspension points here are "wait for any one of N children to exit" and
//! "requeue on a contended lock" rather than a flat parallel map. A bounded
//! `std::thread::scope` plus an `mpsc` completion channel expresses that
//! directly.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};

use tracing::{info, warn};

use crate::{
    cache::CacheOutcome,
    context::Context,
    driver,
    error::{DriverError, Result},
    taskgraph::{TaskGraph, TaskStatus},
};

/// Outcome of a completed build: how many tasks were cache hits versus
/// actually invoked a tool, and the path to the final artifact if the graph
/// included a `BIN` task that completed.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub fresh: usize,
    pub built: usize,
    pub artifact: Option<PathBuf>,
}

struct WorkerMsg {
    task: usize,
    result: Result<(CacheOutcome, String, Option<PathBuf>, Option<String>)>,
}

fn dep_outputs(graph: &TaskGraph, task_idx: usize) -> Vec<(usize, PathBuf)> {
    graph.tasks[task_idx]
        .prereqs
        .iter()
        .map(|&p| {
            let t = &graph.tasks[p];
            (t.module, t.output.clone().expect("prerequisite task completed without an output"))
        })
        .collect()
}

fn sidecar_hashes_for(ctx: &Context, task_idx: usize, graph: &TaskGraph, sidecars: &[Option<String>]) -> Vec<(usize, String)> {
    let module = &ctx.graph.modules[graph.tasks[task_idx].module];
    module.deps.iter().filter_map(|(dep_idx, _)| sidecars[*dep_idx].clone().map(|h| (*dep_idx, h))).collect()
}

/// Runs every task in `graph` to completion or failure, honoring
/// prerequisite edges and the concurrency limit `jobs`. A `SIGINT`/`SIGTERM`
/// stops issuing new tasks and waits for running ones to drain (so their
/// atomic renames complete and their locks are released) before returning
/// [`DriverError::Interrupted`], per §5.
pub fn run(ctx: &Context, graph: &mut TaskGraph, jobs: usize) -> Result<BuildReport> {
    let jobs = jobs.max(1);
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        // Best-effort: if a handler is already installed (e.g. a second
        // build within the same process during tests) we simply keep going
        // without our own hook rather than failing the build over it.
        let _ = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        });
    }

    let (tx, rx) = mpsc::channel::<WorkerMsg>();
    let mut running = 0usize;
    let mut sidecars: Vec<Option<String>> = vec![None; ctx.graph.modules.len()];
    let mut report = BuildReport::default();
    let mut draining = false;
    let mut last_would_block: Option<usize> = None;

    std::thread::scope(|scope| {
        loop {
            if graph.any_failed() && !draining {
                draining = true;
                skip_pending(graph);
            }
            if interrupted.load(Ordering::SeqCst) && !draining {
                warn!("received interrupt signal, draining running tasks");
                draining = true;
                skip_pending(graph);
            }

            if !draining {
                while running < jobs {
                    let Some(idx) = graph.ready() else { break };
                    graph.tasks[idx].status = TaskStatus::Running;
                    running += 1;

                    let tx = tx.clone();
                    let task = graph.tasks[idx].clone();
                    let deps = dep_outputs(graph, idx);
                    let sidecar_hashes = sidecar_hashes_for(ctx, idx, graph, &sidecars);
                    scope.spawn(move || {
                        let result = driver::run_task(ctx, &task, &deps, &sidecar_hashes);
                        let _ = tx.send(WorkerMsg { task: idx, result });
                    });
                }
            }

            if running == 0 {
                break;
            }

            let msg = rx.recv().expect("all worker senders dropped without a completion");
            running -= 1;

            match msg.result {
                Ok((CacheOutcome::WouldBlock, _, _, _)) => {
                    graph.tasks[msg.task].status = TaskStatus::Pending;
                    if last_would_block == Some(msg.task) {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    last_would_block = Some(msg.task);
                }
                Ok((outcome, hash, output, sidecar)) => {
                    last_would_block = None;
                    let task = &mut graph.tasks[msg.task];
                    task.status = TaskStatus::Done;
                    task.fingerprint = Some(hash);
                    task.output = output.clone();
                    let module = task.module;
                    if let Some(s) = sidecar {
                        sidecars[module] = Some(s);
                    }
                    match outcome {
                        CacheOutcome::Fresh => report.fresh += 1,
                        CacheOutcome::Built => report.built += 1,
                        CacheOutcome::WouldBlock => unreachable!(),
                    }
                    if msg.task == graph.final_task {
                        report.artifact = output;
                    }
                }
                Err(err) => {
                    last_would_block = None;
                    graph.tasks[msg.task].status = TaskStatus::Failed;
                    warn!(task = msg.task, error = %err, "task failed");
                    if graph.failure.is_none() {
                        graph.failure = Some(err);
                    }
                }
            }
        }
    });

    if interrupted.load(Ordering::SeqCst) {
        return Err(DriverError::Interrupted);
    }
    if let Some(err) = graph.failure.take() {
        return Err(err);
    }

    info!(fresh = report.fresh, built = report.built, "build complete");
    Ok(report)
}

fn skip_pending(graph: &mut TaskGraph) {
    for t in &mut graph.tasks {
        if t.status == TaskStatus::Pending {
            t.status = TaskStatus::Skipped;
        }
    }
}
