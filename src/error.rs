//! Error types for Motion Wrangle

use thiserror::Error;

/// Errors that abort a wrangling run.
///
/// Only structural violations end up here. Per-trial data-quality problems are
/// recorded as [`crate::types::OnsetFlag`]s on the affected trial instead.
#[derive(Debug, Error)]
pub enum WrangleError {
    #[error("Failed to parse subject records: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field '{field}' ({context})")]
    MissingField { field: String, context: String },

    #[error("Subject '{0}' not found in subject table")]
    SubjectNotFound(String),

    #[error("Batch contains no subjects")]
    EmptyBatch,

    #[error("Batch contains no trials")]
    NoTrials,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Column '{column}' holds a non-numeric value at row {row}")]
    ColumnType { column: String, row: usize },
}

impl WrangleError {
    pub(crate) fn missing(field: impl Into<String>, context: impl Into<String>) -> Self {
        WrangleError::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }
}
