use std::fmt;
use std::io;

use thiserror::Error;

use crate::types::SourceId;

/// Pipeline stage named by fatal errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Pulling a batch from a record source.
    Fetch,
    /// Merging partial accumulators into final groups.
    GlobalReduce,
    /// Writing final rows.
    Output,
}

impl Stage {
    /// Stable lowercase stage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::GlobalReduce => "global_reduce",
            Stage::Output => "output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for configuration, source, and pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be opened or read; retryable.
    #[error("record source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable {
        /// Source that failed.
        source_id: SourceId,
        /// Underlying cause.
        reason: String,
    },
    /// The source contradicted its own metadata or cursor.
    #[error("record source '{source_id}' returned inconsistent state: {details}")]
    SourceInconsistent {
        /// Source that failed.
        source_id: SourceId,
        /// What did not line up.
        details: String,
    },
    /// Rejected configuration; raised before any record is read.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Fatal failure attributed to one pipeline stage.
    #[error("fatal failure in stage '{stage}': {details}")]
    Stage {
        /// Stage that failed.
        stage: Stage,
        /// Failure description.
        details: String,
    },
    /// Filesystem error outside a named stage.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON encode or decode error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Build a fatal stage error.
    pub fn stage(stage: Stage, details: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage,
            details: details.into(),
        }
    }
}
