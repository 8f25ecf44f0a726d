//! Error types for the artifact store.

/// Errors that can occur during artifact operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No artifact with the given name exists.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// The name is not one the store could have allocated.
    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    /// A filesystem operation failed.
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}
