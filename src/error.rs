use thiserror::Error;

/// Errors surfaced by the engine's public operations.
///
/// Validation-level variants are returned without partial state change; every
/// multi-step mutation runs inside a single transaction that is rolled back
/// on error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input: empty or foreign post-id sets, an invitee identifier
    /// that cannot be interpreted, a title outside configured limits.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The acting user lacks visibility into the target topic.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Rejected by a business rule (e.g. invite uniqueness).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A targeted post was moved or deleted by a concurrent actor; the whole
    /// migration was aborted and nothing was applied.
    #[error("concurrent modification: posts {0:?} could not be updated")]
    ConcurrencyConflict(Vec<i64>),

    #[error("topic {0} not found")]
    TopicNotFound(i64),

    #[error("post {0} not found")]
    PostNotFound(i64),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(e.into())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
