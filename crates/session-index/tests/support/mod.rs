#![allow(dead_code)]

use async_trait::async_trait;
use docmind_session_index::{Embedder, IndexConfig, Result, SessionStoreManager};
use std::path::Path;
use std::sync::Arc;

const VOCABULARY: [&str; 6] = ["refund", "policy", "shipping", "warranty", "invoice", "privacy"];

/// Counts vocabulary words, so queries land near the chunks that share them.
#[derive(Debug, Default)]
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        VOCABULARY
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

pub fn config(root: &Path) -> IndexConfig {
    let mut config = IndexConfig::new(root);
    // tmpfs in CI does not need the fsyncs; the protocol is the same.
    config.sync_writes = false;
    config
}

pub fn manager(root: &Path) -> SessionStoreManager<KeywordEmbedder> {
    SessionStoreManager::new(config(root), Arc::new(KeywordEmbedder)).expect("manager")
}

pub fn report_chunks() -> Vec<String> {
    vec![
        "Shipping is free for orders over fifty dollars.".to_string(),
        "Our refund policy allows a refund within 30 days.".to_string(),
        "The warranty covers manufacturing defects.".to_string(),
        "Each invoice is emailed after payment.".to_string(),
        "The privacy policy explains data retention.".to_string(),
    ]
}
