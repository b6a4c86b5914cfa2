use crate::error::{Result, SessionIndexError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Text → fixed-length vector. The model behind it is outside this crate;
/// the index only relies on every call returning vectors of one dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        if embeddings.len() != 1 {
            return Err(SessionIndexError::Embedding(format!(
                "expected 1 embedding, got {}",
                embeddings.len()
            )));
        }
        embeddings
            .pop()
            .ok_or_else(|| SessionIndexError::Embedding("Empty embedding result".to_string()))
    }
}

/// Deterministic embedder for tests and offline tooling: hashes the text into
/// a unit vector. Equal texts give equal vectors; nothing else is promised.
#[derive(Debug)]
pub struct StubEmbedder {
    dimension: usize,
    batch_calls: AtomicUsize,
}

impl StubEmbedder {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::Relaxed)
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        Ok(texts
            .iter()
            .map(|text| hashed_unit_vector(text, self.dimension))
            .collect())
    }
}

/// Expands SHA-256 digests of `(block, dimension, text)` into `dimension`
/// components in [-1, 1], then scales the result to unit length.
fn hashed_unit_vector(text: &str, dimension: usize) -> Vec<f32> {
    let components = (0u32..)
        .flat_map(|block| {
            let digest = Sha256::new()
                .chain_update(block.to_le_bytes())
                .chain_update((dimension as u64).to_le_bytes())
                .chain_update(text.as_bytes())
                .finalize();
            digest
                .chunks_exact(4)
                .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
                .collect::<Vec<_>>()
        })
        .take(dimension)
        .map(|word| (f64::from(word) / f64::from(u32::MAX)).mul_add(2.0, -1.0) as f32);
    let raw: Vec<f32> = components.collect();

    let length = raw.iter().map(|c| c * c).sum::<f32>().sqrt();
    if length == 0.0 {
        return raw;
    }
    raw.into_iter().map(|c| c / length).collect()
}
