//! An in-process dataflow pipeline engine.
//!
//! Pipelines are built from typed [`Queue`] edges connecting [`task::Task`]
//! stages and the five control operators (split, merge, batch, unbatch,
//! filter) in [`op`]. A [`pipeline::PipelineManager`] owns the graph's
//! build/run/shutdown lifecycle; [`global`] offers the same surface as a
//! process-wide default for callers who don't want to carry a manager
//! around. [`snapshot::render`] turns a built graph into Graphviz DOT.

pub mod error;
pub mod global;
pub mod item;
pub mod node;
pub mod op;
pub mod pipeline;
pub mod queue;
pub mod snapshot;
pub mod task;

pub use error::{PipelineError, Result};
pub use item::StreamItem;
pub use node::{Graph, NodeId, NodeInfo, NodeKind};
pub use op::{BadValuePolicy, BatchOp, FilterOp, MergeOp, Operator, SplitOp, UnbatchOp};
pub use pipeline::{PipelineConfig, PipelineManager};
pub use queue::Queue;
pub use task::{Task, TaskFn};
