use std::io;
use std::path::Path;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy shared by every layer. Leaf components raise the most
/// specific kind; upper layers preserve it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid input: {0}")]
    SchemaValidation(String),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("indexing failed: {0}")]
    Indexing(String),

    #[error("search failed: {0}")]
    Search(String),

    #[error("graph query failed: {0}")]
    Graph(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("tool failed: {0}")]
    Tool(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps an I/O failure on `path` to the taxonomy: a missing file is
    /// `NotFound`, everything else is a write-side failure.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            Error::Write(err)
        }
    }

    /// Only transient I/O, database, and timeout failures are retried by
    /// the execution policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Write(_) | Error::Database(_) | Error::Timeout(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Parse(_) => "parse_error",
            Error::SchemaValidation(_) => "schema_validation_error",
            Error::Write(_) => "write_error",
            Error::Database(_) => "database_error",
            Error::Indexing(_) => "indexing_error",
            Error::Search(_) => "search_error",
            Error::Graph(_) => "graph_error",
            Error::Timeout(_) => "timeout",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Tool(_) => "tool_error",
            Error::Integrity(_) => "integrity_error",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
