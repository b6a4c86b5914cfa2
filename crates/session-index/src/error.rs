use crate::types::ChunkKey;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionIndexError>;

#[derive(Error, Debug)]
pub enum SessionIndexError {
    #[error("Document '{doc_id}' is not indexed in session '{session_id}'")]
    NotIndexed { session_id: String, doc_id: String },

    #[error("Identifier collision on {identifier}: {incoming} would overwrite {existing}")]
    Collision {
        identifier: u64,
        existing: ChunkKey,
        incoming: ChunkKey,
    },

    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid vector for {doc_id}#{chunk_index}: contains NaN or infinite values")]
    InvalidVector { doc_id: String, chunk_index: usize },

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl SessionIndexError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Stable code for logs and API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotIndexed { .. } => "NOT_INDEXED",
            Self::Collision { .. } => "IDENTIFIER_COLLISION",
            Self::Persistence { .. } => "PERSISTENCE_IO",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Embedding(_) => "EMBEDDING",
            Self::InvalidDimension { .. } => "INVALID_DIMENSION",
            Self::InvalidVector { .. } => "INVALID_VECTOR",
            Self::InvalidSessionId(_) => "INVALID_SESSION_ID",
            Self::Config(_) => "CONFIG",
        }
    }

    /// `NotIndexed` is an ordinary "no results" answer; everything else
    /// means the requested operation did not happen.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotIndexed { .. })
    }
}

/// A persisted artifact could not be read back. The session was started
/// empty and the unreadable files were moved aside.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Corrupt session store at {}: {reason}", path.display())]
pub struct CorruptStoreWarning {
    pub path: PathBuf,
    pub reason: String,
    /// Where the unreadable artifacts were moved, if they were moved.
    pub quarantined: Vec<PathBuf>,
}
