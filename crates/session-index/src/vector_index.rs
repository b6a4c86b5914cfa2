use crate::error::{Result, SessionIndexError};
use std::collections::HashMap;

/// Exact vector index keyed by chunk identifier.
///
/// Distances are Euclidean (L2). Queries run over an explicit candidate set
/// through a [`CandidateView`] that lives only for the duration of the call.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingIndex {
    dimension: Option<usize>,
    vectors: HashMap<u64, Vec<f32>>,
}

impl EmbeddingIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dimension(dimension: Option<usize>) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
        }
    }

    /// Insert or overwrite the vector for `identifier`. The first vector
    /// added fixes the dimension of the index.
    pub fn add(&mut self, identifier: u64, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector.len())?;
        self.dimension.get_or_insert(vector.len());
        self.vectors.insert(identifier, vector.to_vec());
        Ok(())
    }

    /// Missing identifiers are ignored. Returns how many vectors were dropped.
    pub fn remove<'a>(&mut self, identifiers: impl IntoIterator<Item = &'a u64>) -> usize {
        identifiers
            .into_iter()
            .filter(|id| self.vectors.remove(*id).is_some())
            .count()
    }

    /// Up to `k` candidates ordered by ascending distance to `query`.
    /// Equal distances keep the order of `candidates`.
    pub fn search(&self, query: &[f32], candidates: &[u64], k: usize) -> Result<Vec<(u64, f32)>> {
        if candidates.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query.len())?;

        let view = CandidateView::new(self, candidates);
        Ok(view.nearest(query, k))
    }

    #[must_use]
    pub fn get(&self, identifier: u64) -> Option<&[f32]> {
        self.vectors.get(&identifier).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, identifier: u64) -> bool {
        self.vectors.contains_key(&identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = u64> + '_ {
        self.vectors.keys().copied()
    }

    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != actual => {
                Err(SessionIndexError::InvalidDimension { expected, actual })
            }
            _ => Ok(()),
        }
    }
}

/// Borrowed slice of the index restricted to one query's candidates.
struct CandidateView<'a> {
    rows: Vec<(u64, &'a [f32])>,
}

impl<'a> CandidateView<'a> {
    fn new(index: &'a EmbeddingIndex, candidates: &[u64]) -> Self {
        let rows = candidates
            .iter()
            .filter_map(|id| {
                let vector = index.get(*id);
                if vector.is_none() {
                    log::debug!("Candidate {id} has no vector, skipping");
                }
                vector.map(|v| (*id, v))
            })
            .collect();
        Self { rows }
    }

    fn nearest(self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        let mut scored: Vec<(u64, f32)> = self
            .rows
            .into_iter()
            .map(|(id, vector)| (id, euclidean_distance(query, vector)))
            .collect();
        // Stable sort: ties stay in candidate order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        scored
    }
}

#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
