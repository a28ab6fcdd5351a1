//! The queue abstraction: a bounded-or-unbounded FIFO carrying `StreamItem<T>`,
//! with pre-start buffering and a blocking `get`.
//!
//! A `Queue<T>` is cheap to clone (it is a handle around an `Arc`); cloning
//! it does not duplicate the underlying buffer. By the graph invariant
//! (§3), only one consumer role ever calls `get`/`is_empty`/`flush` on a
//! given queue, though the handle itself may be cloned freely (e.g. to give
//! a coordinator task and its workers each their own handle to the same
//! `q_in`).

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{PipelineError, Result};
use crate::item::StreamItem;
use crate::node::NodeId;

struct State<T> {
    started: bool,
    items: VecDeque<StreamItem<T>>,
    /// Set once a consumer has popped `Eos` off this queue. Any further
    /// `get`/`flush` call is a programmer error (`DrainError`).
    eos_taken: bool,
}

struct Inner<T> {
    id: NodeId,
    name: Option<String>,
    capacity: Option<usize>,
    state: Mutex<State<T>>,
    item_ready: Notify,
    space_ready: Notify,
}

/// A typed FIFO edge between two nodes in the pipeline graph.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Queue<T> {
    /// A fresh, anonymous, unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity_named(None, None)
    }

    /// A fresh queue with a display name (used in snapshots and logs).
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_capacity_named(Some(name.into()), None)
    }

    /// A bounded queue: `put` suspends once `capacity` items are buffered.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity_named(None, Some(capacity))
    }

    fn with_capacity_named(name: Option<String>, capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NodeId::new(),
                name,
                capacity,
                state: Mutex::new(State {
                    started: false,
                    items: VecDeque::new(),
                    eos_taken: false,
                }),
                item_ready: Notify::new(),
                space_ready: Notify::new(),
            }),
        }
    }

    /// Seed this queue with fixed inputs `x1 ... xn`, followed by `Eos` (§3).
    /// Must be called before `start`.
    #[must_use]
    pub fn with_fixed_inputs(self, values: impl IntoIterator<Item = T>) -> Self {
        let mut state = self.inner.state.lock();
        debug_assert!(!state.started, "fixed inputs must be set before start()");
        state.items.extend(values.into_iter().map(StreamItem::Value));
        state.items.push_back(StreamItem::Eos);
        drop(state);
        self
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    /// Transition the pre-start buffer into the runtime queue. Idempotent
    /// calls are a `LifecycleError`.
    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.started {
            return Err(PipelineError::lifecycle(format!(
                "queue {} already started",
                self.display_name()
            )));
        }
        state.started = true;
        Ok(())
    }

    /// Non-blocking: true if no item is currently available.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().items.is_empty()
    }

    /// Append a value. Suspends if the queue is bounded and full.
    pub async fn put(&self, value: T) {
        self.put_item(StreamItem::Value(value)).await;
    }

    /// Append the end-of-stream marker. Never blocked by capacity: a
    /// bounded queue must still let its single, terminal `Eos` through so
    /// downstream stages can always observe stream end and shut down.
    ///
    /// Resets `eos_taken`: a task stage's re-enqueued `Eos` (Strategy A,
    /// §4.3) must be poppable by the next sibling worker's `get()`, not
    /// rejected as a `DrainError` from the first worker's own pop. The
    /// latch is about a caller observing stream end twice without an
    /// intervening `put_eos`, not about a queue that is still handing off
    /// its terminal marker internally.
    pub async fn put_eos(&self) {
        let mut state = self.inner.state.lock();
        state.eos_taken = false;
        state.items.push_back(StreamItem::Eos);
        drop(state);
        self.inner.item_ready.notify_waiters();
    }

    async fn put_item(&self, item: StreamItem<T>) {
        loop {
            {
                let mut state = self.inner.state.lock();
                let has_room = self
                    .inner
                    .capacity
                    .map_or(true, |cap| state.items.len() < cap);
                if has_room {
                    state.items.push_back(item);
                    drop(state);
                    self.inner.item_ready.notify_waiters();
                    return;
                }
            }
            self.inner.space_ready.notified().await;
        }
    }

    /// Remove and return the oldest item, suspending until one is available.
    ///
    /// Returns `DrainError` if this queue already yielded `Eos` to a
    /// previous caller — calling `get` again past stream end is a
    /// programmer error.
    pub async fn get(&self) -> Result<StreamItem<T>> {
        loop {
            {
                let mut state = self.inner.state.lock();
                if state.eos_taken {
                    return Err(PipelineError::drain(format!(
                        "get() called on queue {} after Eos",
                        self.display_name()
                    )));
                }
                if let Some(item) = state.items.pop_front() {
                    if item.is_eos() {
                        state.eos_taken = true;
                    }
                    drop(state);
                    self.inner.space_ready.notify_waiters();
                    return Ok(item);
                }
            }
            self.inner.item_ready.notified().await;
        }
    }

    /// Drain items until `Eos` or emptiness, returning the values seen
    /// (without `Eos`). Non-suspending; only meaningful outside the running
    /// phase (e.g. inspecting a queue the manager never started).
    pub fn flush(&self) -> Vec<T> {
        let mut state = self.inner.state.lock();
        let mut out = Vec::new();
        while let Some(item) = state.items.pop_front() {
            match item {
                StreamItem::Value(v) => out.push(v),
                StreamItem::Eos => {
                    state.eos_taken = true;
                    break;
                }
            }
        }
        out
    }

    fn display_name(&self) -> String {
        match &self.inner.name {
            Some(n) => n.clone(),
            None => format!("<anon:{}>", &self.inner.id.to_string()[..8]),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
