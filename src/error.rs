//! Error types for shard-merge jobs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MergeError>;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Manifest already configured for this job")]
    AlreadyConfigured,

    #[error("Manifest not configured")]
    NotConfigured,

    #[error("Shard {shard_id} out of range (num_shards = {num_shards})")]
    ShardOutOfRange { shard_id: u32, num_shards: u32 },

    #[error("Merge engine error on shard {shard_id}: {message}")]
    Engine { shard_id: u32, message: String },

    #[error("Invalid segment format: {0}")]
    InvalidFormat(String),

    #[error("Keys out of order: {0}")]
    OutOfOrder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shuffle error: {0}")]
    Shuffle(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Task {task} failed after {attempts} attempt(s): {source}")]
    TaskFailed {
        task: String,
        attempts: u32,
        #[source]
        source: Box<MergeError>,
    },
}

impl MergeError {
    /// Get error code for job reports
    pub fn code(&self) -> &'static str {
        match self {
            MergeError::Config(_) => "CONFIG",
            MergeError::AlreadyConfigured => "ALREADY_CONFIGURED",
            MergeError::NotConfigured => "NOT_CONFIGURED",
            MergeError::ShardOutOfRange { .. } => "SHARD_OUT_OF_RANGE",
            MergeError::Engine { .. } => "MERGE_ENGINE",
            MergeError::InvalidFormat(_) | MergeError::OutOfOrder(_) => "INVALID_SEGMENT",
            MergeError::Cancelled => "CANCELLED",
            MergeError::TaskFailed { .. } => "TASK_FAILED",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether the runner may restart the owning task after this error.
    ///
    /// Configuration problems and cancellation are final; everything else
    /// is re-derivable from the immutable manifest.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            MergeError::Config(_)
                | MergeError::AlreadyConfigured
                | MergeError::NotConfigured
                | MergeError::Cancelled
                | MergeError::TaskFailed { .. }
        )
    }
}
