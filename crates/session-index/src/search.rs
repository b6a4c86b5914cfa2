use crate::embeddings::Embedder;
use crate::error::{Result, SessionIndexError};
use crate::session::SessionIndex;
use crate::types::{DocumentHits, SearchHit};
use tokio::sync::RwLock;

/// Candidate identifiers of `doc_id`, in record order.
#[must_use]
pub fn candidates(session: &SessionIndex, doc_id: &str) -> Vec<u64> {
    session
        .metadata()
        .find_by_doc(doc_id)
        .map(|r| r.identifier)
        .collect()
}

/// Rank the chunks of `doc_id` against an already embedded query.
///
/// Returns `None` when the document has no records in this session.
pub fn rank_document(
    session: &SessionIndex,
    doc_id: &str,
    query: &[f32],
    k: usize,
) -> Result<Option<Vec<SearchHit>>> {
    let candidates = candidates(session, doc_id);
    if candidates.is_empty() {
        return Ok(None);
    }

    let ranked = session.index().search(query, &candidates, k)?;
    let hits = ranked
        .into_iter()
        .filter_map(|(identifier, distance)| {
            session.metadata().get(identifier).map(|record| SearchHit {
                doc_id: record.doc_id.clone(),
                chunk_index: record.chunk_index,
                text: record.text.clone(),
                score: 1.0 / (1.0 + distance),
                distance,
            })
        })
        .collect();
    Ok(Some(hits))
}

/// Top-`k` chunks of one document for `query_text`.
///
/// The session is only read-locked around the lookups; the embedding call in
/// between runs unlocked so writers are not held up by the model. A document
/// removed meanwhile is reported as not indexed.
pub async fn search_top_k<E: Embedder + ?Sized>(
    session_id: &str,
    session: &RwLock<SessionIndex>,
    embedder: &E,
    doc_id: &str,
    query_text: &str,
    k: usize,
) -> Result<Vec<SearchHit>> {
    let not_indexed = || SessionIndexError::NotIndexed {
        session_id: session_id.to_string(),
        doc_id: doc_id.to_string(),
    };

    if !session.read().await.contains_doc(doc_id) {
        return Err(not_indexed());
    }

    let query = embedder.embed(query_text).await?;
    log::debug!("Searching '{doc_id}' in session '{session_id}' (k={k})");

    let guard = session.read().await;
    rank_document(&guard, doc_id, &query, k)?.ok_or_else(not_indexed)
}

/// Top-`k` chunks per document, embedding the query once. Documents without
/// records are skipped.
pub async fn search_documents<E: Embedder + ?Sized>(
    session_id: &str,
    session: &RwLock<SessionIndex>,
    embedder: &E,
    doc_ids: &[String],
    query_text: &str,
    k: usize,
) -> Result<Vec<DocumentHits>> {
    let indexed: Vec<&String> = {
        let guard = session.read().await;
        doc_ids
            .iter()
            .filter(|doc_id| {
                let known = guard.contains_doc(doc_id);
                if !known {
                    log::warn!(
                        "Document '{doc_id}' is not indexed in session '{session_id}', skipping"
                    );
                }
                known
            })
            .collect()
    };
    if indexed.is_empty() {
        return Ok(Vec::new());
    }

    let query = embedder.embed(query_text).await?;

    let guard = session.read().await;
    let mut out = Vec::with_capacity(indexed.len());
    for doc_id in indexed {
        if let Some(hits) = rank_document(&guard, doc_id, &query, k)? {
            out.push(DocumentHits {
                doc_id: doc_id.clone(),
                hits,
            });
        }
    }
    Ok(out)
}
