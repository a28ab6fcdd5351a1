//! Task stages: `N` concurrent workers draining one input queue into one
//! output queue, with Strategy A sentinel forwarding (§4.3).

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::queue::Queue;

/// Boxed task closure: takes one item, returns one item or a stringified
/// error. Errors and panics are both isolated at the worker boundary (§4.3)
/// and never propagate as stream data.
pub type TaskFn<A, B> = Arc<dyn Fn(A) -> std::result::Result<B, String> + Send + Sync>;

/// A registered unit of work: a name, a closure, and a worker count.
pub struct Task<A, B> {
    name: String,
    max_workers: usize,
    f: TaskFn<A, B>,
}

impl<A, B> Task<A, B> {
    /// Wrap a closure as a task. `max_workers` defaults to 1; `name`
    /// defaults to `"task"`. There is no decorator/macro sugar on top of
    /// this builder — it is the supported construction path (§6).
    pub fn new<F, E>(f: F) -> Self
    where
        F: Fn(A) -> std::result::Result<B, E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        Self {
            name: "task".to_string(),
            max_workers: 1,
            f: Arc::new(move |a: A| f(a).map_err(|e| e.to_string())),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn max_workers(mut self, n: usize) -> Self {
        assert!(n >= 1, "max_workers must be at least 1");
        self.max_workers = n;
        self
    }

    pub fn task_name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers
    }
}

/// Start `task.max_workers` worker tasks bound to `q_in`/`q_out`, returning
/// their join handles so the caller (the pipeline manager) can await them
/// at `shutdown`.
pub(crate) fn spawn_stage<A, B>(
    task: &Task<A, B>,
    q_in: Queue<A>,
    q_out: Queue<B>,
) -> Vec<JoinHandle<()>>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let exited = Arc::new(AtomicUsize::new(0));
    let max_workers = task.max_workers;

    (0..max_workers)
        .map(|worker_id| {
            let q_in = q_in.clone();
            let q_out = q_out.clone();
            let f = task.f.clone();
            let name = task.name.clone();
            let exited = exited.clone();
            tokio::spawn(run_worker(
                worker_id, name, f, q_in, q_out, exited, max_workers,
            ))
        })
        .collect()
}

async fn run_worker<A, B>(
    worker_id: usize,
    name: String,
    f: TaskFn<A, B>,
    q_in: Queue<A>,
    q_out: Queue<B>,
    exited: Arc<AtomicUsize>,
    max_workers: usize,
) where
    A: Send + 'static,
    B: Send + 'static,
{
    loop {
        match q_in.get().await {
            Ok(item) if item.is_eos() => {
                // Strategy A: re-enqueue so the next idle sibling worker
                // (if any) also observes stream end, then exit.
                q_in.put_eos().await;
                break;
            }
            Ok(item) => {
                let value = item.into_value().expect("checked non-eos above");
                match std::panic::catch_unwind(AssertUnwindSafe(|| (f)(value))) {
                    Ok(Ok(result)) => q_out.put(result).await,
                    Ok(Err(message)) => {
                        warn!(
                            task = %name,
                            worker = worker_id,
                            error = %message,
                            "task closure returned an error; dropping item"
                        );
                    }
                    Err(_panic) => {
                        warn!(
                            task = %name,
                            worker = worker_id,
                            "task closure panicked; dropping item"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(task = %name, worker = worker_id, error = %e, "queue drained unexpectedly");
                break;
            }
        }
    }

    if exited.fetch_add(1, Ordering::SeqCst) + 1 == max_workers {
        // Last worker out acts as the stage coordinator: any leftover Eos
        // copies left behind by sibling re-enqueues have nobody left to
        // consume them, so drain them here and emit exactly one downstream.
        while !q_in.is_empty() {
            let _ = q_in.get().await;
        }
        q_out.put_eos().await;
        info!(task = %name, workers = max_workers, "stage drained, forwarded single Eos");
    }
}
