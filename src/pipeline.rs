//! `PipelineManager`: owns the graph build/run/shutdown lifecycle (§4.5, §5).
//!
//! Building a pipeline means wiring already-constructed, strongly-typed
//! [`Queue`] handles together with tasks and operators; the manager itself
//! stays untyped by keeping only boxed spawn thunks and trait objects, plus
//! the [`Graph`] metadata used for snapshots. `run` starts every registered
//! queue, spawns every task stage's workers, and hands the operators to a
//! single driver task that round-robins `step()` across them.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::node::{Graph, NodeId, NodeKind};
use crate::op::{BadValuePolicy, BatchOp, FilterOp, MergeOp, Operator, SplitOp, UnbatchOp};
use crate::queue::Queue;
use crate::task::{self, Task};

/// Tunables shared by every stage and operator a manager runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity new queues get when the caller doesn't pick one explicitly.
    /// `None` means unbounded.
    pub default_queue_capacity: Option<usize>,
    /// How long the operator driver sleeps between rounds once a full pass
    /// advances nothing (cooperative yield, not a busy spin).
    pub yield_interval: Duration,
    /// Worker count a `task`/`map`/`chain` call uses when the caller doesn't
    /// override it.
    pub default_max_workers: usize,
    /// If true, a split whose predicate returns an unregistered value
    /// aborts the pipeline instead of logging and dropping the item.
    pub strict_split: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_queue_capacity: None,
            yield_interval: Duration::from_millis(1),
            default_max_workers: 1,
            strict_split: false,
        }
    }
}

trait Startable: Send + Sync {
    fn start(&self) -> Result<()>;
}

impl<T: Send + Sync + 'static> Startable for Queue<T> {
    fn start(&self) -> Result<()> {
        Queue::start(self)
    }
}

type StageSpawner = Box<dyn FnOnce() -> Vec<JoinHandle<()>> + Send>;

/// Owns a pipeline's graph, its queues' lifecycle, and the operator driver.
pub struct PipelineManager {
    config: PipelineConfig,
    graph: Graph,
    queues: Vec<Box<dyn Startable>>,
    registered_queue_ids: HashSet<NodeId>,
    stage_spawners: Vec<StageSpawner>,
    operators: Vec<Box<dyn Operator>>,
    task_handles: Vec<JoinHandle<()>>,
    driver_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    started: bool,
}

impl PipelineManager {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            graph: Graph::new(),
            queues: Vec::new(),
            registered_queue_ids: HashSet::new(),
            stage_spawners: Vec::new(),
            operators: Vec::new(),
            task_handles: Vec::new(),
            driver_handle: None,
            cancel: CancellationToken::new(),
            started: false,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// A token that cancels the operator driver loop (see [`PipelineConfig::strict_split`]
    /// and the manager's own `shutdown`). Not tripped anywhere else by the
    /// engine itself.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn ensure_not_running(&self) -> Result<()> {
        if self.started {
            return Err(PipelineError::lifecycle(
                "pipeline already running; builder calls must precede run()",
            ));
        }
        Ok(())
    }

    /// Register `q` in the graph and, the first time it's seen, queue it for
    /// `start()`. A queue shared between two build calls — `chain`'s
    /// output-of-one/input-of-next, `batch`'s output reused as `unbatch`'s
    /// input — is registered once per edge it touches; dedup by `NodeId`
    /// keeps `run()` from calling `Queue::start` on it twice.
    fn register_queue<T: Send + Sync + 'static>(&mut self, name: Option<String>, q: &Queue<T>) {
        self.graph.insert_existing(q.id(), NodeKind::Queue, name);
        if self.registered_queue_ids.insert(q.id()) {
            self.queues.push(Box::new(q.clone()));
        }
    }

    /// Wire a single-input, single-output task stage between two queues.
    pub fn task<A, B>(&mut self, task: Task<A, B>, q_in: &Queue<A>, q_out: &Queue<B>) -> Result<()>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        self.ensure_not_running()?;

        let task_id = self
            .graph
            .insert_node(NodeKind::Task, Some(task.task_name().to_string()));
        self.register_queue(q_in.name().map(str::to_string), q_in);
        self.register_queue(q_out.name().map(str::to_string), q_out);
        self.graph.add_edge(q_in.id(), task_id);
        self.graph.add_edge(task_id, q_out.id());

        let q_in = q_in.clone();
        let q_out = q_out.clone();
        self.stage_spawners
            .push(Box::new(move || task::spawn_stage(&task, q_in, q_out)));
        Ok(())
    }

    /// Convenience over `task`: builds a fresh output queue and returns it.
    pub fn map<A, B>(&mut self, task: Task<A, B>, q_in: &Queue<A>) -> Result<Queue<B>>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        let q_out = self.new_queue::<B>();
        self.task(task, q_in, &q_out)?;
        Ok(q_out)
    }

    /// Wire a sequence of same-typed tasks back to back, creating an
    /// anonymous intermediate queue between each pair. Returns the final
    /// output queue.
    pub fn chain<T>(&mut self, tasks: Vec<Task<T, T>>, q_in: &Queue<T>) -> Result<Queue<T>>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_not_running()?;
        let mut current = q_in.clone();
        for task in tasks {
            current = self.map(task, &current)?;
        }
        Ok(current)
    }

    /// Fan out `q_in` by `predicate`, one output queue per registered value.
    pub fn split<T, V>(
        &mut self,
        predicate: impl Fn(&T) -> V + Send + Sync + 'static,
        q_in: &Queue<T>,
        outputs: HashMap<V, Queue<T>>,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        V: Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
    {
        self.ensure_not_running()?;

        let op_id = self.graph.insert_node(NodeKind::Op, Some("split".into()));
        self.register_queue(q_in.name().map(str::to_string), q_in);
        self.graph.add_edge(q_in.id(), op_id);
        for q in outputs.values() {
            self.register_queue(q.name().map(str::to_string), q);
            self.graph.add_edge(op_id, q.id());
        }

        let policy = if self.config.strict_split {
            BadValuePolicy::Abort(self.cancel.clone())
        } else {
            BadValuePolicy::Drop
        };
        let op = SplitOp::with_policy(Arc::new(predicate), q_in.clone(), outputs, policy);
        self.operators.push(Box::new(op));
        Ok(())
    }

    /// Fan in `q_ins` into a single `q_out`, forwarding one `Eos` once every
    /// input has reached it.
    pub fn merge<T>(&mut self, q_ins: Vec<Queue<T>>, q_out: &Queue<T>) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_not_running()?;

        let op_id = self.graph.insert_node(NodeKind::Op, Some("merge".into()));
        for q in &q_ins {
            self.register_queue(q.name().map(str::to_string), q);
            self.graph.add_edge(q.id(), op_id);
        }
        self.register_queue(q_out.name().map(str::to_string), q_out);
        self.graph.add_edge(op_id, q_out.id());

        let op = MergeOp::new(q_ins, q_out.clone());
        self.operators.push(Box::new(op));
        Ok(())
    }

    /// Group items from `q_in` into fixed-size `Vec<T>` batches on `q_out`.
    pub fn batch<T>(
        &mut self,
        q_in: &Queue<T>,
        q_out: &Queue<Vec<T>>,
        batch_size: usize,
        fill_batch: bool,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_not_running()?;

        let op_id = self
            .graph
            .insert_node(NodeKind::Op, Some(format!("batch({batch_size})")));
        self.register_queue(q_in.name().map(str::to_string), q_in);
        self.register_queue(q_out.name().map(str::to_string), q_out);
        self.graph.add_edge(q_in.id(), op_id);
        self.graph.add_edge(op_id, q_out.id());

        let op = BatchOp::new(q_in.clone(), q_out.clone(), batch_size, fill_batch);
        self.operators.push(Box::new(op));
        Ok(())
    }

    /// Inverse of `batch`: flatten `Vec<T>` batches on `q_in` back onto `q_out`.
    pub fn unbatch<T>(&mut self, q_in: &Queue<Vec<T>>, q_out: &Queue<T>) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_not_running()?;

        let op_id = self.graph.insert_node(NodeKind::Op, Some("unbatch".into()));
        self.register_queue(q_in.name().map(str::to_string), q_in);
        self.register_queue(q_out.name().map(str::to_string), q_out);
        self.graph.add_edge(q_in.id(), op_id);
        self.graph.add_edge(op_id, q_out.id());

        let op = UnbatchOp::new(q_in.clone(), q_out.clone());
        self.operators.push(Box::new(op));
        Ok(())
    }

    /// Keep only items for which `predicate` returns true.
    pub fn filter<T>(
        &mut self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        q_in: &Queue<T>,
        q_out: &Queue<T>,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_not_running()?;

        let op_id = self.graph.insert_node(NodeKind::Op, Some("filter".into()));
        self.register_queue(q_in.name().map(str::to_string), q_in);
        self.register_queue(q_out.name().map(str::to_string), q_out);
        self.graph.add_edge(q_in.id(), op_id);
        self.graph.add_edge(op_id, q_out.id());

        let op = FilterOp::new(Arc::new(predicate), q_in.clone(), q_out.clone());
        self.operators.push(Box::new(op));
        Ok(())
    }

    /// Build a fresh, anonymous queue sized per `PipelineConfig::default_queue_capacity`.
    pub fn new_queue<T>(&self) -> Queue<T> {
        match self.config.default_queue_capacity {
            Some(cap) => Queue::bounded(cap),
            None => Queue::new(),
        }
    }

    /// Push one value onto an already-running queue. A thin pass-through
    /// kept as a manager method for parity with the build-time API.
    pub async fn push_to_queue<T>(&self, q: &Queue<T>, value: T) {
        q.put(value).await;
    }

    /// Start every registered queue, spawn every task stage's workers, and
    /// launch the single operator driver task. Idempotent calls are a
    /// `LifecycleError`.
    pub async fn run(&mut self) -> Result<()> {
        self.ensure_not_running()?;
        self.started = true;

        for q in &self.queues {
            q.start()?;
        }

        for spawner in self.stage_spawners.drain(..) {
            self.task_handles.extend(spawner());
        }

        if !self.operators.is_empty() {
            let operators = std::mem::take(&mut self.operators);
            let yield_interval = self.config.yield_interval;
            let cancel = self.cancel.clone();
            self.driver_handle = Some(tokio::spawn(drive_operators(
                operators,
                yield_interval,
                cancel,
            )));
        }

        info!(
            queues = self.queues.len(),
            stages = self.task_handles.len(),
            "pipeline running"
        );
        Ok(())
    }

    /// Await every task stage and the operator driver to completion. Waits
    /// for natural end-of-stream; call `cancellation_token().cancel()` first
    /// if an early stop is needed.
    pub async fn shutdown(&mut self) -> Result<()> {
        for handle in self.task_handles.drain(..) {
            handle
                .await
                .map_err(|e| PipelineError::task("stage", e.to_string()))?;
        }
        if let Some(handle) = self.driver_handle.take() {
            handle
                .await
                .map_err(|e| PipelineError::task("operator-driver", e.to_string()))?;
        }
        Ok(())
    }

    /// Reset so the manager can build and run a new graph. The prior run
    /// must already be shut down.
    pub fn reset(&mut self) {
        self.graph.clear();
        self.queues.clear();
        self.registered_queue_ids.clear();
        self.stage_spawners.clear();
        self.operators.clear();
        self.cancel = CancellationToken::new();
        self.started = false;
    }
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive_operators(
    mut operators: Vec<Box<dyn Operator>>,
    yield_interval: Duration,
    cancel: CancellationToken,
) {
    while !operators.is_empty() {
        if cancel.is_cancelled() {
            info!(
                remaining = operators.len(),
                "operator driver cancelled with operators still active"
            );
            return;
        }

        let mut finished = Vec::new();
        for (idx, op) in operators.iter_mut().enumerate() {
            if op.step().await {
                finished.push(idx);
            }
        }

        if finished.is_empty() {
            tokio::time::sleep(yield_interval).await;
            continue;
        }

        for idx in finished.into_iter().rev() {
            let op = operators.remove(idx);
            info!(operator = %op.name(), "operator reached shutdown");
        }
    }
}
