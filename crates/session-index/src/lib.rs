//! # DocMind Session Index
//!
//! Session-scoped vector index behind document search: deterministic chunk
//! identifiers, exact nearest-neighbour search restricted to one document,
//! and crash-safe persistence of every change.
//!
//! ## Architecture
//!
//! ```text
//! add_chunks(session, doc, chunks)
//!     │
//!     ├──> Embedder (external model)
//!     │      └─> Vec<f32> per chunk
//!     │
//!     ├──> SessionIndex (write-locked copy)
//!     │      ├─> ids::assign(doc, i)       identifier
//!     │      ├─> MetadataStore             ordered records
//!     │      └─> EmbeddingIndex            identifier → vector
//!     │
//!     └──> persistence::save
//!            └─> <root>/<session>/{vector_index,meta}.json
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use docmind_session_index::{IndexConfig, SessionStoreManager, StubEmbedder};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionStoreManager::new(
//!         IndexConfig::new("data/vector_store"),
//!         Arc::new(StubEmbedder::default()),
//!     )?;
//!
//!     let chunks = vec!["Refunds are issued within 30 days.".to_string()];
//!     manager.add_chunks("session-1", "report.pdf", chunks).await?;
//!
//!     for hit in manager.search_top_k("session-1", "report.pdf", "refund policy", 3).await? {
//!         println!("{}#{}: {:.3}", hit.doc_id, hit.chunk_index, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod embeddings;
mod error;
mod ids;
mod lock;
mod manager;
mod metadata;
mod paths;
mod persistence;
mod search;
mod session;
mod types;
mod vector_index;

pub use config::{IndexConfig, DEFAULT_INDEX_FILE_NAME, DEFAULT_K, DEFAULT_METADATA_FILE_NAME};
pub use embeddings::{Embedder, StubEmbedder};
pub use error::{CorruptStoreWarning, Result, SessionIndexError};
pub use ids::{assign, IDENTIFIER_MODULUS, IDENTIFIER_SCHEME};
pub use lock::{session_lock_wait_ms_last, session_lock_wait_ms_max};
pub use manager::{SessionSlot, SessionStoreManager};
pub use metadata::MetadataStore;
pub use paths::{validate_session_id, SessionPaths};
pub use persistence::{
    load, save, verify_session, LoadMode, LoadOutcome, Recovery, SESSION_STORE_SCHEMA_VERSION,
};
pub use session::{ReplaceOutcome, SessionIndex};
pub use types::{ChunkKey, ChunkRecord, DocumentHits, DocumentSummary, SearchHit, SessionStats};
pub use vector_index::{euclidean_distance, EmbeddingIndex};
