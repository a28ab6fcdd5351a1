//! A default pipeline, for script-style callers that would rather not
//! thread a [`PipelineManager`] through their own code. Everything here is
//! a thin wrapper around a single process-wide instance; building on your
//! own `PipelineManager` directly works just as well and composes better
//! with more than one pipeline per process.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::Result;
use crate::node::NodeId;
use crate::pipeline::{PipelineConfig, PipelineManager};
use crate::queue::Queue;
use crate::snapshot;
use crate::task::Task;

static DEFAULT: Lazy<Mutex<PipelineManager>> = Lazy::new(|| Mutex::new(PipelineManager::new()));

/// Replace the default pipeline with a fresh one, discarding any graph
/// built on it so far.
pub fn init() {
    *DEFAULT.lock() = PipelineManager::new();
}

/// Same as [`init`], with a custom [`PipelineConfig`].
pub fn init_with_config(config: PipelineConfig) {
    *DEFAULT.lock() = PipelineManager::with_config(config);
}

/// Run a closure with exclusive access to the default manager — the escape
/// hatch for anything not exposed as its own free function below.
pub fn with_manager<R>(f: impl FnOnce(&mut PipelineManager) -> R) -> R {
    f(&mut DEFAULT.lock())
}

pub fn new_queue<T>() -> Queue<T> {
    DEFAULT.lock().new_queue()
}

pub fn task<A, B>(task: Task<A, B>, q_in: &Queue<A>, q_out: &Queue<B>) -> Result<()>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    DEFAULT.lock().task(task, q_in, q_out)
}

pub fn map<A, B>(task: Task<A, B>, q_in: &Queue<A>) -> Result<Queue<B>>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    DEFAULT.lock().map(task, q_in)
}

pub fn chain<T>(tasks: Vec<Task<T, T>>, q_in: &Queue<T>) -> Result<Queue<T>>
where
    T: Send + Sync + 'static,
{
    DEFAULT.lock().chain(tasks, q_in)
}

pub fn split<T, V>(
    predicate: impl Fn(&T) -> V + Send + Sync + 'static,
    q_in: &Queue<T>,
    outputs: HashMap<V, Queue<T>>,
) -> Result<()>
where
    T: Send + Sync + 'static,
    V: Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    DEFAULT.lock().split(predicate, q_in, outputs)
}

pub fn merge<T>(q_ins: Vec<Queue<T>>, q_out: &Queue<T>) -> Result<()>
where
    T: Send + Sync + 'static,
{
    DEFAULT.lock().merge(q_ins, q_out)
}

pub fn batch<T>(q_in: &Queue<T>, q_out: &Queue<Vec<T>>, batch_size: usize, fill_batch: bool) -> Result<()>
where
    T: Send + Sync + 'static,
{
    DEFAULT.lock().batch(q_in, q_out, batch_size, fill_batch)
}

pub fn unbatch<T>(q_in: &Queue<Vec<T>>, q_out: &Queue<T>) -> Result<()>
where
    T: Send + Sync + 'static,
{
    DEFAULT.lock().unbatch(q_in, q_out)
}

pub fn filter<T>(
    predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    q_in: &Queue<T>,
    q_out: &Queue<T>,
) -> Result<()>
where
    T: Send + Sync + 'static,
{
    DEFAULT.lock().filter(predicate, q_in, q_out)
}

/// Push one value onto an already-running queue. `PipelineManager::push_to_queue`
/// is a pass-through to `Queue::put` and needs no lock on the manager, so
/// this calls straight through rather than taking `DEFAULT`.
pub async fn push_to_queue<T>(q: &Queue<T>, value: T) {
    q.put(value).await;
}

/// Start the default pipeline running. The lock is held only long enough
/// to spawn stage workers and the operator driver — `run` never awaits the
/// spawned work itself.
pub async fn run() -> Result<()> {
    let mut guard = DEFAULT.lock();
    guard.run().await
}

/// Await the default pipeline to completion. The lock is held for the
/// whole wait, which is fine for the single-default-pipeline use this
/// module targets but means a second caller can't build a competing
/// pipeline on `DEFAULT` until this returns.
pub async fn shutdown() -> Result<()> {
    let mut guard = DEFAULT.lock();
    guard.shutdown().await
}

/// Reset the default manager so it can build and run a new graph.
pub fn reset() {
    DEFAULT.lock().reset();
}

/// Render the default pipeline's graph, rooted at `root`, as Graphviz DOT.
pub fn render(root: NodeId, path: impl AsRef<Path>, skip_anon: bool) -> Result<()> {
    snapshot::render(DEFAULT.lock().graph(), root, path, skip_anon)
}
