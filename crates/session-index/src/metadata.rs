use crate::types::{ChunkRecord, DocumentSummary};
use std::collections::{BTreeSet, HashMap};

/// Ordered chunk records of one session.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    records: Vec<ChunkRecord>,
    by_identifier: HashMap<u64, usize>,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the store from persisted records, keeping their order.
    #[must_use]
    pub fn from_records(records: Vec<ChunkRecord>) -> Self {
        let mut store = Self {
            records,
            by_identifier: HashMap::new(),
        };
        store.reindex();
        store
    }

    pub fn append(&mut self, record: ChunkRecord) {
        self.by_identifier
            .insert(record.identifier, self.records.len());
        self.records.push(record);
    }

    pub fn find_by_doc<'a>(&'a self, doc_id: &'a str) -> impl Iterator<Item = &'a ChunkRecord> {
        self.records.iter().filter(move |r| r.doc_id == doc_id)
    }

    #[must_use]
    pub fn get(&self, identifier: u64) -> Option<&ChunkRecord> {
        self.by_identifier
            .get(&identifier)
            .and_then(|&pos| self.records.get(pos))
    }

    /// Drops every record of `doc_id` and returns the identifiers that went
    /// with them, so the caller can drop the matching vectors.
    pub fn remove_by_doc(&mut self, doc_id: &str) -> BTreeSet<u64> {
        let mut removed = BTreeSet::new();
        self.records.retain(|r| {
            if r.doc_id == doc_id {
                removed.insert(r.identifier);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.reindex();
        }
        removed
    }

    #[must_use]
    pub fn contains_doc(&self, doc_id: &str) -> bool {
        self.records.iter().any(|r| r.doc_id == doc_id)
    }

    /// Documents in first-ingestion order.
    #[must_use]
    pub fn documents(&self) -> Vec<DocumentSummary> {
        let mut out: Vec<DocumentSummary> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            match positions.get(record.doc_id.as_str()) {
                Some(&pos) => out[pos].chunk_count += 1,
                None => {
                    positions.insert(record.doc_id.as_str(), out.len());
                    out.push(DocumentSummary {
                        doc_id: record.doc_id.clone(),
                        chunk_count: 1,
                    });
                }
            }
        }
        out
    }

    #[must_use]
    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn reindex(&mut self) {
        self.by_identifier = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.identifier, pos))
            .collect();
    }
}
