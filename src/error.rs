//! Typed errors raised by the filter engine and the export pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with a filter expression, detected before any row is filtered.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("malformed filter clause '{clause}': {reason}")]
    Malformed { clause: String, reason: &'static str },

    #[error(
        "column {field} not known: possible columns to choose from: [{}]",
        .known.join(", ")
    )]
    UnknownField { field: String, known: Vec<String> },

    #[error("filter {field}>{value} needs a numeric value")]
    NonNumericComparison { field: String, value: String },

    #[error("invalid node field pattern '{token}': {source}")]
    Pattern {
        token: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("{table} table has no column '{column}'")]
    MissingColumn { table: &'static str, column: String },

    #[error("site reference row {row}: cannot read {column} coordinate '{value}'")]
    InvalidCoordinate {
        row: usize,
        column: String,
        value: String,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
