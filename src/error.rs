//! Error taxonomy for the evaluation pipeline.
//!
//! Every variant is fatal: errors propagate with `?` to the binary entry
//! point and abort the run. There is no retry or partial-result recovery.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    /// The model artifact could not be read or parsed.
    #[error("failed to load model artifact: {0}")]
    ModelLoad(String),

    /// The artifact declares a custom loss symbol the caller did not provide.
    #[error("model artifact declares custom object `{0}` but none was registered")]
    MissingCustomObject(String),

    /// No generator is registered under this name.
    #[error("unknown generator `{0}`")]
    UnknownGenerator(String),

    /// Array dimensions disagree with what the pipeline expects.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A statistic is undefined for its input (empty subset, zero variance).
    #[error("metric computation failed: {0}")]
    Computation(String),

    /// A coordinate row carries a tag other than '0' or '1'.
    #[error("invalid peak tag `{0}` (expected '0' or '1')")]
    InvalidPeakTag(String),

    /// Generator indexed past its last batch.
    #[error("batch index {index} out of range for generator of length {len}")]
    BatchIndex { index: usize, len: usize },

    /// A caller-supplied parameter is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    #[error(transparent)]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),
}
