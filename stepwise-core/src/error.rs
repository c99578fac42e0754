//! stepwise error types

use crate::dtypes::DataType;

/// stepwise result type
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while constructing, updating, checkpointing or
/// restoring a learner.
///
/// None of these are retried internally. A failure in the middle of an update
/// leaves the already visited parameters updated; the caller is expected to
/// reload the last checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid argument passed to an operation (e.g. an empty minibatch)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Learner hyperparameters or parameter list are unusable
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A parameter owned by the learner has no gradient in the minibatch
    #[error("no gradient was supplied for parameter '{parameter}'")]
    MissingGradient {
        /// Display name of the parameter
        parameter: String,
    },

    /// A required checkpoint entry is absent
    #[error("checkpoint is missing required entry '{key}'")]
    MissingCheckpointKey {
        /// The key that was looked up
        key: String,
    },

    /// A checkpoint entry exists but does not fit the live learner
    #[error("checkpoint mismatch: {reason}")]
    CheckpointMismatch {
        /// Description of what did not match
        reason: String,
    },

    /// Checkpoint written by a newer version of the format
    #[error("unsupported {what} version {found}, the newest supported version is {supported}")]
    UnsupportedVersion {
        /// Which structure carried the version
        what: &'static str,
        /// Version found in the payload
        found: u64,
        /// Newest version this build understands
        supported: u64,
    },

    /// NaN found while running with NaN checks enabled
    #[error("{what} of parameter '{parameter}' contains NaN")]
    NumericalAnomaly {
        /// Which buffer contained the NaN
        what: &'static str,
        /// Display name of the parameter
        parameter: String,
    },

    /// Element type of two buffers that must agree differs
    #[error("data type mismatch: expected {expected}, got {got}")]
    DataTypeMismatch {
        /// Expected element type
        expected: DataType,
        /// Actual element type
        got: DataType,
    },

    /// Internal invariant broken; indicates a bug in the caller or in stepwise
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("safetensors error: {0:?}")]
    SafeTensors(safetensors::SafeTensorError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<safetensors::SafeTensorError> for Error {
    fn from(err: safetensors::SafeTensorError) -> Self {
        Self::SafeTensors(err)
    }
}
