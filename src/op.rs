//! The five operator state machines: split, merge, batch, unbatch, filter.
//!
//! Every operator implements [`Operator`], a small object-safe trait the
//! pipeline manager's driver loop (`§4.5`) can hold a heterogeneous
//! `Vec<Box<dyn Operator>>` of, even though each concrete operator is
//! generic over the item type of the edges it touches. `step` is async
//! purely so an operator can `.await` a `Queue::put` on a bounded output
//! queue — it still does a bounded amount of work per call and never waits
//! on an *input* becoming available (it checks `is_empty` first).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::queue::Queue;

/// What a [`SplitOp`] does when its predicate returns a value with no
/// registered output queue.
#[derive(Clone)]
pub enum BadValuePolicy {
    /// Log a warning and drop the item (default).
    Drop,
    /// Log an error and cancel the pipeline's driver loop via the given
    /// token (`strict_split`, see the manager's `PipelineConfig`).
    Abort(CancellationToken),
}

/// A control-flow node the driver advances one `step` at a time.
#[async_trait]
pub trait Operator: Send {
    /// Perform a bounded amount of work; returns `true` once this operator
    /// has observed its terminal condition and emitted its terminal output
    /// (it should be removed from the driver's active list).
    async fn step(&mut self) -> bool;

    /// Display name used in logs and graph snapshots.
    fn name(&self) -> String;
}

/// `SplitOp(predicate, q_in, {v -> q_out_v})`: fan-out by predicate value.
pub struct SplitOp<T, V> {
    predicate: Arc<dyn Fn(&T) -> V + Send + Sync>,
    q_in: Queue<T>,
    outputs: HashMap<V, Queue<T>>,
    on_bad_value: BadValuePolicy,
    shutdown: bool,
}

impl<T, V> SplitOp<T, V>
where
    V: Eq + Hash + std::fmt::Debug,
{
    pub fn new(
        predicate: Arc<dyn Fn(&T) -> V + Send + Sync>,
        q_in: Queue<T>,
        outputs: HashMap<V, Queue<T>>,
    ) -> Self {
        Self::with_policy(predicate, q_in, outputs, BadValuePolicy::Drop)
    }

    pub fn with_policy(
        predicate: Arc<dyn Fn(&T) -> V + Send + Sync>,
        q_in: Queue<T>,
        outputs: HashMap<V, Queue<T>>,
        on_bad_value: BadValuePolicy,
    ) -> Self {
        Self {
            predicate,
            q_in,
            outputs,
            on_bad_value,
            shutdown: false,
        }
    }
}

#[async_trait]
impl<T, V> Operator for SplitOp<T, V>
where
    T: Send + Sync + 'static,
    V: Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    async fn step(&mut self) -> bool {
        if !self.q_in.is_empty() {
            match self.q_in.get().await {
                Ok(item) if item.is_eos() => {
                    for q_out in self.outputs.values() {
                        q_out.put_eos().await;
                    }
                    self.shutdown = true;
                }
                Ok(item) => {
                    let value = item.into_value().expect("checked non-eos above");
                    let key = (self.predicate)(&value);
                    match self.outputs.get(&key) {
                        Some(q_out) => q_out.put(value).await,
                        None => match &self.on_bad_value {
                            BadValuePolicy::Drop => warn!(
                                operator = %self.name(),
                                value = ?key,
                                "split predicate returned unregistered value; dropping item"
                            ),
                            BadValuePolicy::Abort(cancel) => {
                                error!(
                                    operator = %self.name(),
                                    value = ?key,
                                    "split predicate returned unregistered value; aborting pipeline"
                                );
                                cancel.cancel();
                                self.shutdown = true;
                            }
                        },
                    }
                }
                Err(e) => warn!(operator = %self.name(), error = %e, "queue drained unexpectedly"),
            }
        }
        self.shutdown
    }

    fn name(&self) -> String {
        "SplitOp".to_string()
    }
}

/// `MergeOp({q_in_1..q_in_k}, q_out)`: fan-in, k Eoses consumed before one is emitted.
pub struct MergeOp<T> {
    q_ins: Vec<Queue<T>>,
    q_out: Queue<T>,
    sentinels_reached: usize,
    sentinels_expected: usize,
    shutdown: bool,
}

impl<T> MergeOp<T> {
    pub fn new(q_ins: Vec<Queue<T>>, q_out: Queue<T>) -> Self {
        let sentinels_expected = q_ins.len();
        Self {
            q_ins,
            q_out,
            sentinels_reached: 0,
            sentinels_expected,
            shutdown: false,
        }
    }
}

#[async_trait]
impl<T> Operator for MergeOp<T>
where
    T: Send + Sync + 'static,
{
    async fn step(&mut self) -> bool {
        for q_in in &self.q_ins {
            if self.shutdown {
                break;
            }
            if !q_in.is_empty() {
                match q_in.get().await {
                    Ok(item) if item.is_eos() => {
                        self.sentinels_reached += 1;
                        if self.sentinels_reached == self.sentinels_expected {
                            self.q_out.put_eos().await;
                            self.shutdown = true;
                        }
                    }
                    Ok(item) => {
                        let value = item.into_value().expect("checked non-eos above");
                        self.q_out.put(value).await;
                    }
                    Err(e) => warn!(operator = %self.name(), error = %e, "queue drained unexpectedly"),
                }
            }
        }
        self.shutdown
    }

    fn name(&self) -> String {
        "MergeOp".to_string()
    }
}

/// `BatchOp(q_in, q_out, batch_size, fill_batch)`.
pub struct BatchOp<T> {
    q_in: Queue<T>,
    q_out: Queue<Vec<T>>,
    batch_size: usize,
    fill_batch: bool,
    buffer: Vec<T>,
    shutdown: bool,
}

impl<T> BatchOp<T> {
    pub fn new(q_in: Queue<T>, q_out: Queue<Vec<T>>, batch_size: usize, fill_batch: bool) -> Self {
        assert!(batch_size >= 1, "batch_size must be at least 1");
        Self {
            q_in,
            q_out,
            batch_size,
            fill_batch,
            buffer: Vec::new(),
            shutdown: false,
        }
    }

    async fn send_batch(&mut self) {
        let batch = std::mem::take(&mut self.buffer);
        self.q_out.put(batch).await;
    }
}

#[async_trait]
impl<T> Operator for BatchOp<T>
where
    T: Send + Sync + 'static,
{
    async fn step(&mut self) -> bool {
        while !self.q_in.is_empty() {
            match self.q_in.get().await {
                Ok(item) if item.is_eos() => {
                    if !self.buffer.is_empty() {
                        self.send_batch().await;
                    }
                    self.q_out.put_eos().await;
                    self.shutdown = true;
                    break;
                }
                Ok(item) => {
                    let value = item.into_value().expect("checked non-eos above");
                    self.buffer.push(value);
                    if self.buffer.len() == self.batch_size {
                        self.send_batch().await;
                    }
                }
                Err(e) => {
                    warn!(operator = %self.name(), error = %e, "queue drained unexpectedly");
                    break;
                }
            }
        }

        if !self.fill_batch && !self.buffer.is_empty() {
            self.send_batch().await;
        }

        self.shutdown
    }

    fn name(&self) -> String {
        format!("BatchOp(batch_size={})", self.batch_size)
    }
}

/// `UnbatchOp(q_in, q_out)`: inverse of [`BatchOp`].
pub struct UnbatchOp<T> {
    q_in: Queue<Vec<T>>,
    q_out: Queue<T>,
    shutdown: bool,
}

impl<T> UnbatchOp<T> {
    pub fn new(q_in: Queue<Vec<T>>, q_out: Queue<T>) -> Self {
        Self {
            q_in,
            q_out,
            shutdown: false,
        }
    }
}

#[async_trait]
impl<T> Operator for UnbatchOp<T>
where
    T: Send + Sync + 'static,
{
    async fn step(&mut self) -> bool {
        while !self.q_in.is_empty() {
            match self.q_in.get().await {
                Ok(item) if item.is_eos() => {
                    self.q_out.put_eos().await;
                    self.shutdown = true;
                    break;
                }
                Ok(item) => {
                    let batch = item.into_value().expect("checked non-eos above");
                    for value in batch {
                        self.q_out.put(value).await;
                    }
                }
                Err(e) => {
                    warn!(operator = %self.name(), error = %e, "queue drained unexpectedly");
                    break;
                }
            }
        }
        self.shutdown
    }

    fn name(&self) -> String {
        "UnbatchOp".to_string()
    }
}

/// `FilterOp(predicate, q_in, q_out)`.
pub struct FilterOp<T> {
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    q_in: Queue<T>,
    q_out: Queue<T>,
    shutdown: bool,
}

impl<T> FilterOp<T> {
    pub fn new(
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
        q_in: Queue<T>,
        q_out: Queue<T>,
    ) -> Self {
        Self {
            predicate,
            q_in,
            q_out,
            shutdown: false,
        }
    }
}

#[async_trait]
impl<T> Operator for FilterOp<T>
where
    T: Send + Sync + 'static,
{
    async fn step(&mut self) -> bool {
        while !self.q_in.is_empty() {
            match self.q_in.get().await {
                Ok(item) if item.is_eos() => {
                    self.q_out.put_eos().await;
                    self.shutdown = true;
                    break;
                }
                Ok(item) => {
                    let value = item.into_value().expect("checked non-eos above");
                    if (self.predicate)(&value) {
                        self.q_out.put(value).await;
                    }
                }
                Err(e) => {
                    warn!(operator = %self.name(), error = %e, "queue drained unexpectedly");
                    break;
                }
            }
        }
        self.shutdown
    }

    fn name(&self) -> String {
        "FilterOp".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain_until_shutdown(op: &mut dyn Operator) {
        let mut guard = 0;
        while !op.step().await {
            guard += 1;
            assert!(guard < 10_000, "operator never reached shutdown");
        }
    }

    #[tokio::test]
    async fn split_partitions_by_predicate() {
        let q_in = Queue::new().with_fixed_inputs(vec![-2, 1, 4, -1, 7]);
        q_in.start().unwrap();
        let q_true = Queue::new();
        q_true.start().unwrap();
        let q_false = Queue::new();
        q_false.start().unwrap();

        let mut outputs = HashMap::new();
        outputs.insert(true, q_true.clone());
        outputs.insert(false, q_false.clone());

        let pred: Arc<dyn Fn(&i32) -> bool + Send + Sync> = Arc::new(|x: &i32| *x > 0);
        let mut op = SplitOp::new(pred, q_in, outputs);
        drain_until_shutdown(&mut op).await;

        assert_eq!(q_true.flush(), vec![1, 4, 7]);
        assert_eq!(q_false.flush(), vec![-2, -1]);
    }

    #[tokio::test]
    async fn split_logs_and_drops_unregistered_value() {
        let q_in = Queue::new().with_fixed_inputs(vec![1]);
        q_in.start().unwrap();
        let q_true = Queue::new();
        q_true.start().unwrap();

        let mut outputs = HashMap::new();
        outputs.insert(true, q_true.clone());
        // Deliberately no `false` branch registered.

        let pred: Arc<dyn Fn(&i32) -> bool + Send + Sync> = Arc::new(|x: &i32| *x < 0);
        let mut op = SplitOp::new(pred, q_in, outputs);
        drain_until_shutdown(&mut op).await;

        // The item routed to the missing `false` branch was dropped, not
        // delivered anywhere; `q_true` still receives its `Eos` once the
        // operator observes stream end, since `Eos` fans out to every
        // registered output regardless of which branches saw real items.
        assert_eq!(q_true.flush(), Vec::<i32>::new());
    }

    #[tokio::test]
    async fn split_abort_policy_cancels_token_on_bad_value() {
        let q_in = Queue::new().with_fixed_inputs(vec![1, 2]);
        q_in.start().unwrap();
        let q_true = Queue::new();
        q_true.start().unwrap();

        let outputs = HashMap::new(); // nothing registered at all
        let cancel = CancellationToken::new();
        let pred: Arc<dyn Fn(&i32) -> bool + Send + Sync> = Arc::new(|x: &i32| *x > 0);
        let mut op = SplitOp::with_policy(
            pred,
            q_in,
            outputs,
            BadValuePolicy::Abort(cancel.clone()),
        );

        // The operator reports shutdown immediately on the first bad value
        // rather than continuing to drain.
        assert!(op.step().await);
        assert!(cancel.is_cancelled());
        let _ = q_true;
    }

    #[tokio::test]
    async fn merge_preserves_per_input_order() {
        let q1 = Queue::new().with_fixed_inputs(vec![1, 3, 5, 7]);
        q1.start().unwrap();
        let q2 = Queue::new().with_fixed_inputs(vec![0, 2, 4, 6]);
        q2.start().unwrap();
        let q_out = Queue::new();
        q_out.start().unwrap();

        let mut op = MergeOp::new(vec![q1, q2], q_out.clone());
        drain_until_shutdown(&mut op).await;

        let out = q_out.flush();
        let mut expected: Vec<i32> = (0..8).collect();
        expected.sort();
        let mut got = out.clone();
        got.sort();
        assert_eq!(got, expected);

        let odds: Vec<_> = out.iter().filter(|x| *x % 2 == 1).cloned().collect();
        assert_eq!(odds, vec![1, 3, 5, 7]);
        let evens: Vec<_> = out.iter().filter(|x| *x % 2 == 0).cloned().collect();
        assert_eq!(evens, vec![0, 2, 4, 6]);
    }

    #[tokio::test]
    async fn batch_fills_exactly_with_fill_batch_true() {
        let q_in = Queue::new().with_fixed_inputs(0..15);
        q_in.start().unwrap();
        let q_out = Queue::new();
        q_out.start().unwrap();

        let mut op = BatchOp::new(q_in, q_out.clone(), 4, true);
        drain_until_shutdown(&mut op).await;

        let batches = q_out.flush();
        assert_eq!(
            batches,
            vec![
                vec![0, 1, 2, 3],
                vec![4, 5, 6, 7],
                vec![8, 9, 10, 11],
                vec![12, 13, 14],
            ]
        );
    }

    #[tokio::test]
    async fn batch_and_unbatch_round_trip() {
        let q_in = Queue::new().with_fixed_inputs(0..20);
        q_in.start().unwrap();
        let q_batched = Queue::new();
        q_batched.start().unwrap();
        let q_out = Queue::new();
        q_out.start().unwrap();

        let mut batch_op = BatchOp::new(q_in, q_batched.clone(), 7, true);
        drain_until_shutdown(&mut batch_op).await;

        let mut unbatch_op = UnbatchOp::new(q_batched, q_out.clone());
        drain_until_shutdown(&mut unbatch_op).await;

        let out = q_out.flush();
        let expected: Vec<i32> = (0..20).collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn filter_keeps_only_matching_items() {
        let q_in = Queue::new().with_fixed_inputs(vec![-1, 1, 2, -4, 1, 9, -2, -3]);
        q_in.start().unwrap();
        let q_out = Queue::new();
        q_out.start().unwrap();

        let pred: Arc<dyn Fn(&i32) -> bool + Send + Sync> = Arc::new(|x: &i32| *x > 0);
        let mut op = FilterOp::new(pred, q_in, q_out.clone());
        drain_until_shutdown(&mut op).await;

        assert_eq!(q_out.flush(), vec![1, 2, 1, 9]);
    }
}
