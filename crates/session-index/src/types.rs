use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a chunk within its document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub doc_id: String,
    pub chunk_index: usize,
}

impl ChunkKey {
    pub fn new(doc_id: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            doc_id: doc_id.into(),
            chunk_index,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.doc_id, self.chunk_index)
    }
}

/// One indexed chunk. Records are never edited; re-ingestion removes and
/// re-inserts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub doc_id: String,
    pub chunk_index: usize,
    pub identifier: u64,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    #[must_use]
    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.doc_id.clone(), self.chunk_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub chunk_index: usize,
    pub text: String,
    /// `1 / (1 + distance)`, higher is closer.
    pub score: f32,
    /// Euclidean distance between the query and the chunk embedding.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub records: usize,
    pub vectors: usize,
    pub documents: usize,
    pub dimension: Option<usize>,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentHits {
    pub doc_id: String,
    pub hits: Vec<SearchHit>,
}
