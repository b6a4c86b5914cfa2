use crate::config::IndexConfig;
use crate::embeddings::Embedder;
use crate::error::{CorruptStoreWarning, Result, SessionIndexError};
use crate::lock::{acquire_session_file_lock, SessionFileLock};
use crate::paths::SessionPaths;
use crate::persistence::{self, LoadMode};
use crate::search;
use crate::session::SessionIndex;
use crate::types::{DocumentHits, DocumentSummary, SearchHit, SessionStats};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard};

/// One loaded session: its index behind a reader-writer lock, plus whatever
/// went wrong while loading it.
#[derive(Debug)]
pub struct SessionSlot {
    session_id: String,
    paths: SessionPaths,
    index: RwLock<SessionIndex>,
    warning: Option<CorruptStoreWarning>,
}

impl SessionSlot {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub const fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    #[must_use]
    pub const fn load_warning(&self) -> Option<&CorruptStoreWarning> {
        self.warning.as_ref()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, SessionIndex> {
        self.index.read().await
    }
}

type SessionCell = Arc<OnceCell<Arc<SessionSlot>>>;

/// Entry point for the ingestion, query and API layers.
///
/// Sessions are loaded on first use and kept for the life of the manager.
/// Writes to a session are serialised by its `RwLock` and the session's file
/// lock, and are saved before either is released; different sessions never
/// wait on each other. A write first re-reads the committed generation, so a
/// change committed by another process (e.g. `docmind-index remove`) is
/// loaded rather than overwritten. Reads serve the in-memory copy until then.
pub struct SessionStoreManager<E: Embedder> {
    config: IndexConfig,
    embedder: Arc<E>,
    sessions: Mutex<HashMap<String, SessionCell>>,
}

impl<E: Embedder> SessionStoreManager<E> {
    pub fn new(config: IndexConfig, embedder: Arc<E>) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Session index root at {:?} (dimension {})",
            config.root,
            embedder.dimension()
        );
        Ok(Self {
            config,
            embedder,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Load-or-create the session, memoised for the life of the manager.
    pub async fn resolve(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        let paths = SessionPaths::resolve(&self.config, session_id)?;
        let cell = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let slot = cell
            .get_or_try_init(|| async {
                // Repairs rename files, so they wait for any other process
                // mid-commit. A session without a directory has nothing to repair.
                let _file_lock = if persistence::exists(&paths.dir).await? {
                    Some(acquire_session_file_lock(&paths).await?)
                } else {
                    log::debug!("New session '{session_id}'");
                    None
                };
                let outcome = persistence::load(&paths, LoadMode::Repair).await?;
                if let Some(recovery) = &outcome.recovery {
                    log::info!("Session '{session_id}' recovered on load: {recovery:?}");
                }
                Ok::<_, SessionIndexError>(Arc::new(SessionSlot {
                    session_id: session_id.to_string(),
                    paths: paths.clone(),
                    index: RwLock::new(outcome.session),
                    warning: outcome.warning,
                }))
            })
            .await?;
        Ok(slot.clone())
    }

    /// Embed and index `chunks` as the full content of `doc_id`, replacing
    /// any previous version of the document, then persist.
    pub async fn add_chunks(&self, session_id: &str, doc_id: &str, chunks: Vec<String>) -> Result<()> {
        let slot = self.resolve(session_id).await?;
        if chunks.is_empty() {
            log::debug!("No chunks for '{doc_id}' in session '{session_id}', nothing to index");
            return Ok(());
        }

        let embeddings = self.embedder.embed_batch(&chunks).await?;

        let mut guard = slot.index.write().await;
        let _file_lock = self.lock_current(&slot, &mut guard).await?;
        if document_unchanged(&guard, doc_id, &chunks, &embeddings) {
            log::debug!("'{doc_id}' already indexed with identical chunks in session '{session_id}'");
            return Ok(());
        }

        let mut next = guard.clone();
        let outcome = next.replace_document(doc_id, chunks, embeddings)?;
        next.set_generation(guard.generation() + 1);
        self.save(&slot, &next).await?;
        *guard = next;

        log::info!(
            "Indexed '{doc_id}' in session '{session_id}': {} chunks ({} replaced)",
            outcome.inserted,
            outcome.removed
        );
        Ok(())
    }

    /// Remove every chunk of `doc_id` and persist. Unknown documents are a
    /// no-op.
    pub async fn remove_doc(&self, session_id: &str, doc_id: &str) -> Result<()> {
        let slot = self.resolve(session_id).await?;
        let mut guard = slot.index.write().await;
        let _file_lock = self.lock_current(&slot, &mut guard).await?;
        if !guard.contains_doc(doc_id) {
            log::debug!("'{doc_id}' not indexed in session '{session_id}', nothing to remove");
            return Ok(());
        }

        let mut next = guard.clone();
        let removed = next.remove_document(doc_id);
        next.set_generation(guard.generation() + 1);
        self.save(&slot, &next).await?;
        *guard = next;

        log::info!("Removed '{doc_id}' from session '{session_id}' ({removed} chunks)");
        Ok(())
    }

    pub async fn search_top_k(
        &self,
        session_id: &str,
        doc_id: &str,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let slot = self.resolve(session_id).await?;
        search::search_top_k(
            session_id,
            &slot.index,
            self.embedder.as_ref(),
            doc_id,
            query_text,
            k,
        )
        .await
    }

    /// [`Self::search_top_k`] with the configured default `k`.
    pub async fn search(&self, session_id: &str, doc_id: &str, query_text: &str) -> Result<Vec<SearchHit>> {
        self.search_top_k(session_id, doc_id, query_text, self.config.default_k)
            .await
    }

    pub async fn search_documents(
        &self,
        session_id: &str,
        doc_ids: &[String],
        query_text: &str,
        k: usize,
    ) -> Result<Vec<DocumentHits>> {
        let slot = self.resolve(session_id).await?;
        search::search_documents(
            session_id,
            &slot.index,
            self.embedder.as_ref(),
            doc_ids,
            query_text,
            k,
        )
        .await
    }

    pub async fn is_document_indexed(&self, session_id: &str, doc_id: &str) -> Result<bool> {
        let slot = self.resolve(session_id).await?;
        let guard = slot.read().await;
        Ok(guard.contains_doc(doc_id))
    }

    pub async fn indexed_documents(&self, session_id: &str) -> Result<Vec<DocumentSummary>> {
        let slot = self.resolve(session_id).await?;
        let guard = slot.read().await;
        Ok(guard.metadata().documents())
    }

    pub async fn session_stats(&self, session_id: &str) -> Result<SessionStats> {
        let slot = self.resolve(session_id).await?;
        let guard = slot.read().await;
        Ok(guard.stats())
    }

    pub async fn load_warning(&self, session_id: &str) -> Result<Option<CorruptStoreWarning>> {
        let slot = self.resolve(session_id).await?;
        Ok(slot.load_warning().cloned())
    }

    /// Take the session's file lock and make sure `session` is the committed
    /// state, reloading it if another process has committed since.
    /// Called with the session's write lock held.
    async fn lock_current(
        &self,
        slot: &SessionSlot,
        session: &mut SessionIndex,
    ) -> Result<SessionFileLock> {
        let file_lock = acquire_session_file_lock(&slot.paths).await?;
        let committed = persistence::committed_generation(&slot.paths).await?;
        if committed != Some(session.generation()) {
            log::info!(
                "Session '{}' changed on disk (generation {committed:?}, held {}), reloading",
                slot.session_id,
                session.generation()
            );
            let outcome = persistence::load(&slot.paths, LoadMode::Repair).await?;
            if let Some(warning) = &outcome.warning {
                log::warn!("Session '{}' reset on reload: {warning}", slot.session_id);
            }
            *session = outcome.session;
        }
        Ok(file_lock)
    }

    /// Called with the session's write lock and file lock held.
    async fn save(&self, slot: &SessionSlot, next: &SessionIndex) -> Result<()> {
        persistence::save(&slot.paths, next, self.config.sync_writes)
            .await
            .map_err(|err| {
                log::warn!(
                    "Save of session '{}' failed, keeping generation {}: {err}",
                    slot.session_id,
                    next.generation().saturating_sub(1)
                );
                err
            })
    }
}

fn document_unchanged(
    session: &SessionIndex,
    doc_id: &str,
    chunks: &[String],
    embeddings: &[Vec<f32>],
) -> bool {
    let mut existing = session.metadata().find_by_doc(doc_id).peekable();
    if existing.peek().is_none() {
        return false;
    }
    let mut count = 0;
    for record in existing {
        let same = chunks.get(record.chunk_index) == Some(&record.text)
            && embeddings.get(record.chunk_index) == Some(&record.embedding);
        if !same {
            return false;
        }
        count += 1;
    }
    count == chunks.len()
}
