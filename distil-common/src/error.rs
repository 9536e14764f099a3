//! Common error types for distil

use thiserror::Error;

/// Common result type for distil operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error set shared across the distil crates.
///
/// Transport, timeout and stall failures during a running search are never
/// retried; they escalate to an errored solution or request. `NoData` is the
/// only kind a summary caller is expected to recover from (empty histogram).
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("no data: {0}")]
    NoData(String),

    #[error("unsupported hyperparameter type for `{name}`: {value}")]
    UnsupportedHyperparameterType { name: String, value: String },

    #[error("reserved argument `{0}` may not be set by the caller")]
    ReservedArgument(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting on stream receive after {0:?}")]
    Timeout(std::time::Duration),

    #[error("stream stalled after {0} consecutive empty responses")]
    Stalled(u32),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("type change locked: {0}")]
    TypeChangeLocked(String),

    #[error("cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error is a terminal transport-class failure that must
    /// mark the owning solution or request as errored.
    pub fn is_transport_class(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout(_) | Error::Stalled(_) | Error::Storage(_)
        )
    }
}
