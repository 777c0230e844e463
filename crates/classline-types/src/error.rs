use thiserror::Error;

/// Failure propagated verbatim from the record store. Never retried at
/// this layer.
#[derive(Debug, Clone, Error)]
#[error("store error: {message}")]
pub struct StoreError {
    pub message: String,
    /// SQLite extended result code, when the backend reported one.
    pub code: Option<i32>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// No actor could be resolved for the operation.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Rejected before any store call was made.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}
