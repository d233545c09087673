//! Error types for sql-typegen.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("query header is missing a :name directive")]
    MissingQueryName,

    #[error("failed to parse SQL: {0}")]
    Parse(String),

    #[error("{0}")]
    Analysis(String),

    #[error("near line {line}: {message}")]
    AnalysisAt { line: u64, message: String },

    #[error("{message}")]
    Reconcile {
        message: String,
        /// The dotted model-property path the mismatch was found at,
        /// with original casing.
        path: Vec<String>,
    },
}

impl Error {
    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Error::Analysis(message.into())
    }

    /// Attach a source line to an analysis error that doesn't carry one yet.
    /// Errors that already have a location keep it, so the innermost known
    /// location wins.
    pub(crate) fn with_line(self, line: u64) -> Self {
        match self {
            Error::Analysis(message) => Error::AnalysisAt { line, message },
            other => other,
        }
    }
}
