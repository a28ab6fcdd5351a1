use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Crate-wide error taxonomy.
///
/// Build-time violations ([`PipelineError::Graph`], [`PipelineError::Lifecycle`])
/// surface synchronously to the caller that made the offending builder call.
/// Runtime failures inside a task closure or a split predicate
/// ([`PipelineError::Task`], [`PipelineError::BadPredicateValue`]) never
/// propagate this way: they are logged and the offending item is dropped,
/// the stage continues.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("task {task_name:?} failed: {message}")]
    Task { task_name: String, message: String },

    #[error("split predicate returned unregistered value: {0}")]
    BadPredicateValue(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("drain error: {0}")]
    Drain(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn task(task_name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Task {
            task_name: task_name.into(),
            message: message.to_string(),
        }
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph(message.into())
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle(message.into())
    }

    pub fn drain(message: impl Into<String>) -> Self {
        Self::Drain(message.into())
    }
}
