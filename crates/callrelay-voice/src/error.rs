use thiserror::Error;

/// Failure of a single stage request.
#[derive(Error, Debug)]
pub enum StageError {
    /// Backend unreachable, timed out, or answered with a non-success status.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Backend answered successfully but with nothing usable.
    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("invalid stage configuration: {0}")]
    Config(String),
}
