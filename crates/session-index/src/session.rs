use crate::error::{Result, SessionIndexError};
use crate::ids::assign;
use crate::metadata::MetadataStore;
use crate::types::{ChunkKey, ChunkRecord, SessionStats};
use crate::vector_index::EmbeddingIndex;
use std::collections::{HashMap, HashSet};

/// Vectors and records of one session, always changed together.
#[derive(Debug, Clone, Default)]
pub struct SessionIndex {
    metadata: MetadataStore,
    index: EmbeddingIndex,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub removed: usize,
    pub inserted: usize,
}

impl SessionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        metadata: MetadataStore,
        index: EmbeddingIndex,
        generation: u64,
    ) -> Self {
        Self {
            metadata,
            index,
            generation,
        }
    }

    /// Index `chunks` of `doc_id` with their embeddings, replacing whatever
    /// the document had before. Everything is validated before the first
    /// change, so an error leaves the session untouched.
    pub fn replace_document(
        &mut self,
        doc_id: &str,
        chunks: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<ReplaceOutcome> {
        if chunks.len() != embeddings.len() {
            return Err(SessionIndexError::Embedding(format!(
                "expected {} embeddings for '{doc_id}', got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let mut dimension = self.index.dimension();
        let mut batch: HashMap<u64, usize> = HashMap::with_capacity(chunks.len());
        for (chunk_index, vector) in embeddings.iter().enumerate() {
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(SessionIndexError::InvalidVector {
                    doc_id: doc_id.to_string(),
                    chunk_index,
                });
            }
            match dimension {
                Some(expected) if expected != vector.len() => {
                    return Err(SessionIndexError::InvalidDimension {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(vector.len()),
            }

            let identifier = assign(doc_id, chunk_index);
            if let Some(&other) = batch.get(&identifier) {
                return Err(SessionIndexError::Collision {
                    identifier,
                    existing: ChunkKey::new(doc_id, other),
                    incoming: ChunkKey::new(doc_id, chunk_index),
                });
            }
            batch.insert(identifier, chunk_index);

            if let Some(existing) = self.metadata.get(identifier) {
                // The document's own old records are about to be replaced.
                if existing.doc_id != doc_id {
                    return Err(SessionIndexError::Collision {
                        identifier,
                        existing: existing.key(),
                        incoming: ChunkKey::new(doc_id, chunk_index),
                    });
                }
            }
        }

        let removed = self.remove_document(doc_id);
        let inserted = chunks.len();
        for (chunk_index, (text, embedding)) in chunks.into_iter().zip(embeddings).enumerate() {
            let identifier = assign(doc_id, chunk_index);
            self.index.add(identifier, &embedding)?;
            self.metadata.append(ChunkRecord {
                doc_id: doc_id.to_string(),
                chunk_index,
                identifier,
                text,
                embedding,
            });
        }

        Ok(ReplaceOutcome { removed, inserted })
    }

    /// Returns how many records were dropped; zero if the document was
    /// never indexed.
    pub fn remove_document(&mut self, doc_id: &str) -> usize {
        let identifiers = self.metadata.remove_by_doc(doc_id);
        let dropped = self.index.remove(&identifiers);
        debug_assert_eq!(dropped, identifiers.len());
        identifiers.len()
    }

    #[must_use]
    pub fn contains_doc(&self, doc_id: &str) -> bool {
        self.metadata.contains_doc(doc_id)
    }

    #[must_use]
    pub const fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    #[must_use]
    pub const fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            records: self.metadata.len(),
            vectors: self.index.len(),
            documents: self.metadata.documents().len(),
            dimension: self.index.dimension(),
            generation: self.generation,
        }
    }

    /// Checks that records and vectors describe the same chunks and that every
    /// identifier is the one [`assign`] gives its key.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.metadata.len() != self.index.len() {
            return Err(format!(
                "{} records but {} vectors",
                self.metadata.len(),
                self.index.len()
            ));
        }

        let mut seen_keys: HashSet<(&str, usize)> = HashSet::new();
        let mut seen_ids: HashSet<u64> = HashSet::new();
        for record in self.metadata.records() {
            if !seen_keys.insert((record.doc_id.as_str(), record.chunk_index)) {
                return Err(format!("duplicate record for {}", record.key()));
            }
            if !seen_ids.insert(record.identifier) {
                return Err(format!(
                    "identifier {} is bound to more than one record",
                    record.identifier
                ));
            }
            let expected = assign(&record.doc_id, record.chunk_index);
            if record.identifier != expected {
                return Err(format!(
                    "record {} has identifier {} (expected {expected})",
                    record.key(),
                    record.identifier
                ));
            }
            match self.index.get(record.identifier) {
                None => return Err(format!("record {} has no vector", record.key())),
                Some(vector) if vector != record.embedding.as_slice() => {
                    return Err(format!(
                        "record {} disagrees with its indexed vector",
                        record.key()
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
