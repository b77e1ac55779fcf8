use thiserror::Error;

/// Errors surfaced by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to (de)serialize job metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("unknown job kind {0:?} stored in row")]
    UnknownKind(String),
}

/// Errors surfaced by the AI fallback engine.
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no enabled models in chain")]
    NoEnabledModels,
    #[error("subtitle payload exceeds limits: {0}")]
    PayloadTooLarge(String),
    #[error("provider {provider} does not support task {task:?}")]
    UnsupportedTask { provider: String, task: Task },
    #[error("all models failed")]
    AllModelsFailed,
    #[error("{0}")]
    Provider(String),
}

/// The task an AI fallback chain is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Generate,
    Translate,
}

/// Errors surfaced by the queue manager's public API.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} is processing; pass force=true to remove it")]
    ProcessingRemovalRequiresForce(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("staging path rejected by the path-safety gate: {0}")]
    UnsafePath(String),
    #[error("unsupported job metadata: {0}")]
    InvalidMetadata(String),
}

/// Errors surfaced by the external toolchain wrapper.
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("toolchain binary not found on PATH")]
    BinaryNotFound,
    #[error("failed to spawn toolchain process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("toolchain exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("toolchain process was cancelled")]
    Cancelled,
}
