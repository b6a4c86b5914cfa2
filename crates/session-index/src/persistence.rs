//! Crash-safe persistence of a session's vectors and records.
//!
//! A save writes both artifacts to `<name>.tmp`, links the committed
//! metadata to `<name>.prev`, then renames the metadata file and the index
//! file into place. If the index rename fails the previous metadata is put
//! back, so a save reported as failed never becomes visible. Both artifacts
//! carry the same `generation`; on load a mismatch left by a crash between
//! the two renames is rolled forward from the surviving temp file. Anything
//! that cannot be reconciled is reported as a [`CorruptStoreWarning`] and
//! the session starts empty.

use crate::config::IndexConfig;
use crate::error::{CorruptStoreWarning, Result, SessionIndexError};
use crate::ids::IDENTIFIER_SCHEME;
use crate::metadata::MetadataStore;
use crate::paths::{backup_path, quarantine_path, temp_path, SessionPaths};
use crate::session::SessionIndex;
use crate::types::ChunkRecord;
use crate::vector_index::EmbeddingIndex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

pub const SESSION_STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedVectors {
    schema_version: u32,
    identifier_scheme: String,
    generation: u64,
    dimension: Option<usize>,
    vectors: Vec<PersistedVector>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedVector {
    identifier: u64,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecords {
    schema_version: u32,
    identifier_scheme: String,
    generation: u64,
    records: Vec<ChunkRecord>,
}

trait Versioned {
    fn schema_version(&self) -> u32;
    fn identifier_scheme(&self) -> &str;
    fn generation(&self) -> u64;
}

impl Versioned for PersistedVectors {
    fn schema_version(&self) -> u32 {
        self.schema_version
    }
    fn identifier_scheme(&self) -> &str {
        &self.identifier_scheme
    }
    fn generation(&self) -> u64 {
        self.generation
    }
}

impl Versioned for PersistedRecords {
    fn schema_version(&self) -> u32 {
        self.schema_version
    }
    fn identifier_scheme(&self) -> &str {
        &self.identifier_scheme
    }
    fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Roll forward interrupted commits, drop stale temp files and move
    /// corrupt artifacts aside.
    Repair,
    /// Report only; nothing on disk is touched.
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recovery {
    /// Temp files from a save that never reached its first rename were
    /// discarded.
    DiscardedStaleTemp { generation: Option<u64> },
    /// The second rename of an interrupted commit was completed.
    RolledForward { generation: u64 },
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub session: SessionIndex,
    pub warning: Option<CorruptStoreWarning>,
    pub recovery: Option<Recovery>,
}

impl LoadOutcome {
    fn empty() -> Self {
        Self {
            session: SessionIndex::new(),
            warning: None,
            recovery: None,
        }
    }
}

/// Write both artifacts for `session` and commit them. On error the
/// committed pair on disk is the one from before the call and no temp files
/// are left behind.
pub async fn save(paths: &SessionPaths, session: &SessionIndex, sync_writes: bool) -> Result<()> {
    let staged = stage(paths, session, sync_writes).await?;
    staged.commit().await
}

/// Both artifacts written to temp files, not yet visible.
pub(crate) struct StagedWrite {
    paths: SessionPaths,
    sync_writes: bool,
    generation: u64,
}

pub(crate) async fn stage(
    paths: &SessionPaths,
    session: &SessionIndex,
    sync_writes: bool,
) -> Result<StagedWrite> {
    tokio::fs::create_dir_all(&paths.dir)
        .await
        .map_err(|err| SessionIndexError::persistence(&paths.dir, err))?;

    let generation = session.generation();
    let index = session.index();
    let mut vectors: Vec<PersistedVector> = index
        .identifiers()
        .filter_map(|identifier| {
            index.get(identifier).map(|v| PersistedVector {
                identifier,
                embedding: v.to_vec(),
            })
        })
        .collect();
    vectors.sort_by_key(|v| v.identifier);

    let vectors = PersistedVectors {
        schema_version: SESSION_STORE_SCHEMA_VERSION,
        identifier_scheme: IDENTIFIER_SCHEME.to_string(),
        generation,
        dimension: index.dimension(),
        vectors,
    };
    let records = PersistedRecords {
        schema_version: SESSION_STORE_SCHEMA_VERSION,
        identifier_scheme: IDENTIFIER_SCHEME.to_string(),
        generation,
        records: session.metadata().records().to_vec(),
    };

    let staged = StagedWrite {
        paths: paths.clone(),
        sync_writes,
        generation,
    };
    let written = async {
        write_file(&temp_path(&paths.index), &serde_json::to_vec(&vectors)?, sync_writes).await?;
        write_file(&temp_path(&paths.metadata), &serde_json::to_vec(&records)?, sync_writes).await
    }
    .await;
    if let Err(err) = written {
        staged.abort().await;
        return Err(err);
    }
    Ok(staged)
}

impl StagedWrite {
    pub(crate) async fn commit(self) -> Result<()> {
        let backup = backup_path(&self.paths.metadata);
        let had_previous = match keep_previous(&self.paths.metadata, &backup).await {
            Ok(had_previous) => had_previous,
            Err(err) => {
                self.abort().await;
                return Err(err);
            }
        };

        if let Err(err) = rename(&temp_path(&self.paths.metadata), &self.paths.metadata).await {
            self.abort().await;
            let _ = tokio::fs::remove_file(&backup).await;
            return Err(err);
        }
        if let Err(err) = rename(&temp_path(&self.paths.index), &self.paths.index).await {
            self.restore_previous(&backup, had_previous).await;
            self.abort().await;
            return Err(err);
        }

        // Both renames landed: the new pair is committed. What follows only
        // tidies up, so failures are logged rather than returned.
        if let Err(err) = remove_if_exists(&backup).await {
            log::warn!("Could not remove {}: {err}", backup.display());
        }
        if self.sync_writes {
            if let Err(err) = sync_dir(&self.paths.dir).await {
                log::warn!("Committed generation {} but {err}", self.generation);
            }
        }
        log::debug!(
            "Committed generation {} to {}",
            self.generation,
            self.paths.dir.display()
        );
        Ok(())
    }

    pub(crate) async fn abort(&self) {
        for path in [temp_path(&self.paths.index), temp_path(&self.paths.metadata)] {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }

    /// Undo the metadata rename after the index rename failed.
    async fn restore_previous(&self, backup: &Path, had_previous: bool) {
        let restored = if had_previous {
            rename(backup, &self.paths.metadata).await
        } else {
            remove_if_exists(&self.paths.metadata).await
        };
        match restored {
            Ok(()) => log::warn!(
                "Rolled back generation {} in {}",
                self.generation,
                self.paths.dir.display()
            ),
            // The index temp file is still there for `load` to finish the commit.
            Err(err) => log::error!(
                "Could not roll back generation {} in {}: {err}",
                self.generation,
                self.paths.dir.display()
            ),
        }
    }
}

/// Link (or copy) the committed metadata to `backup`. Returns whether there
/// was anything to keep.
async fn keep_previous(metadata: &Path, backup: &Path) -> Result<bool> {
    remove_if_exists(backup).await?;
    match tokio::fs::hard_link(metadata, backup).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => {
            log::debug!("Hard link to {} failed ({err}), copying", backup.display());
            tokio::fs::copy(metadata, backup)
                .await
                .map_err(|err| SessionIndexError::persistence(backup, err))?;
            Ok(true)
        }
    }
}

/// Read a session back. Missing artifacts are an empty session; corrupt ones
/// produce a warning and an empty session. Only I/O failures other than
/// "not found" are errors, since the files may be fine and merely unreadable
/// right now.
pub async fn load(paths: &SessionPaths, mode: LoadMode) -> Result<LoadOutcome> {
    let index_tmp = temp_path(&paths.index);
    let metadata_tmp = temp_path(&paths.metadata);

    let index_raw = read_optional(&paths.index).await?;
    let metadata_raw = read_optional(&paths.metadata).await?;
    let index_tmp_raw = read_optional(&index_tmp).await?;
    let metadata_tmp_raw = read_optional(&metadata_tmp).await?;

    let stale_generation = |raw: &Option<Vec<u8>>| {
        raw.as_deref()
            .and_then(|bytes| parse::<PersistedVectors>(bytes).ok())
            .map(|v| v.generation)
    };

    let (vectors, records, recovery) = match (index_raw, metadata_raw) {
        (None, None) => {
            let recovery = if index_tmp_raw.is_some() || metadata_tmp_raw.is_some() {
                Some(Recovery::DiscardedStaleTemp {
                    generation: stale_generation(&index_tmp_raw),
                })
            } else {
                None
            };
            let mut outcome = LoadOutcome::empty();
            outcome.recovery = recovery;
            finish_recovery(paths, mode, outcome.recovery.as_ref()).await?;
            return Ok(outcome);
        }
        (index_raw, metadata_raw) => {
            let records = match metadata_raw.as_deref().map(parse::<PersistedRecords>) {
                Some(Ok(records)) => records,
                Some(Err(reason)) => {
                    return corrupt(paths, mode, &paths.metadata, reason).await;
                }
                None => {
                    return corrupt(paths, mode, &paths.metadata, "metadata artifact is missing".into())
                        .await;
                }
            };

            let committed = index_raw.as_deref().map(parse::<PersistedVectors>);
            match committed {
                Some(Ok(vectors)) if vectors.generation == records.generation => {
                    let recovery = (index_tmp_raw.is_some() || metadata_tmp_raw.is_some())
                        .then(|| Recovery::DiscardedStaleTemp {
                            generation: stale_generation(&index_tmp_raw),
                        });
                    (vectors, records, recovery)
                }
                Some(Err(reason)) if index_tmp_raw.is_none() => {
                    return corrupt(paths, mode, &paths.index, reason).await;
                }
                _ => {
                    // Index missing, unreadable or behind: only a complete temp
                    // file at the metadata's generation can finish the commit.
                    let pending = index_tmp_raw
                        .as_deref()
                        .map(parse::<PersistedVectors>)
                        .and_then(std::result::Result::ok)
                        .filter(|v| v.generation == records.generation);
                    match pending {
                        Some(vectors) => {
                            let generation = vectors.generation;
                            (vectors, records, Some(Recovery::RolledForward { generation }))
                        }
                        None => {
                            let reason = format!(
                                "index artifact does not match metadata generation {}",
                                records.generation
                            );
                            return corrupt(paths, mode, &paths.index, reason).await;
                        }
                    }
                }
            }
        }
    };

    let generation = records.generation;
    let session = match build_session(vectors, records) {
        Ok(session) => session,
        Err(reason) => return corrupt(paths, mode, &paths.dir, reason).await,
    };

    finish_recovery(paths, mode, recovery.as_ref()).await?;
    log::info!(
        "Loaded session {} (generation {generation}, {} records)",
        paths.dir.display(),
        session.metadata().len()
    );
    Ok(LoadOutcome {
        session,
        warning: None,
        recovery,
    })
}

/// Read-only load of `session_id` for diagnostics: reports what a repairing
/// load would find without changing anything on disk.
pub async fn verify_session(config: &IndexConfig, session_id: &str) -> Result<LoadOutcome> {
    let paths = SessionPaths::resolve(config, session_id)?;
    load(&paths, LoadMode::ReadOnly).await
}

/// Generation of the committed metadata without building the session:
/// `Some(0)` when nothing is committed yet, `None` when the file does not
/// parse as metadata.
pub(crate) async fn committed_generation(paths: &SessionPaths) -> Result<Option<u64>> {
    Ok(match read_optional(&paths.metadata).await? {
        None => Some(0),
        Some(bytes) => parse::<PersistedRecords>(&bytes)
            .ok()
            .map(|records| records.generation),
    })
}

fn build_session(
    vectors: PersistedVectors,
    records: PersistedRecords,
) -> std::result::Result<SessionIndex, String> {
    let mut index = EmbeddingIndex::with_dimension(vectors.dimension);
    for vector in vectors.vectors {
        if index.contains(vector.identifier) {
            return Err(format!("identifier {} stored twice", vector.identifier));
        }
        index
            .add(vector.identifier, &vector.embedding)
            .map_err(|err| format!("vector {}: {err}", vector.identifier))?;
    }
    let session = SessionIndex::from_parts(
        MetadataStore::from_records(records.records),
        index,
        records.generation,
    );
    session.check_consistency()?;
    Ok(session)
}

async fn finish_recovery(
    paths: &SessionPaths,
    mode: LoadMode,
    recovery: Option<&Recovery>,
) -> Result<()> {
    if mode == LoadMode::ReadOnly {
        return Ok(());
    }
    // A backup outlives its commit only when the process died mid-commit.
    remove_if_exists(&backup_path(&paths.metadata)).await?;
    match recovery {
        None => {}
        Some(Recovery::RolledForward { generation }) => {
            rename(&temp_path(&paths.index), &paths.index).await?;
            remove_if_exists(&temp_path(&paths.metadata)).await?;
            log::warn!(
                "Completed interrupted commit of generation {generation} in {}",
                paths.dir.display()
            );
        }
        Some(Recovery::DiscardedStaleTemp { .. }) => {
            remove_if_exists(&temp_path(&paths.index)).await?;
            remove_if_exists(&temp_path(&paths.metadata)).await?;
            log::warn!(
                "Discarded temp files of an unfinished save in {}",
                paths.dir.display()
            );
        }
    }
    Ok(())
}

async fn corrupt(
    paths: &SessionPaths,
    mode: LoadMode,
    culprit: &Path,
    reason: String,
) -> Result<LoadOutcome> {
    let mut quarantined = Vec::new();
    if mode == LoadMode::Repair {
        let stamp = unix_now_ms();
        for path in [
            paths.index.clone(),
            paths.metadata.clone(),
            temp_path(&paths.index),
            temp_path(&paths.metadata),
            backup_path(&paths.metadata),
        ] {
            if exists(&path).await? {
                let target = quarantine_path(&path, stamp);
                rename(&path, &target).await?;
                quarantined.push(target);
            }
        }
    }
    let warning = CorruptStoreWarning {
        path: culprit.to_path_buf(),
        reason,
        quarantined,
    };
    log::warn!("{warning}; starting session empty");
    Ok(LoadOutcome {
        session: SessionIndex::new(),
        warning: Some(warning),
        recovery: None,
    })
}

fn parse<T: DeserializeOwned + Versioned>(bytes: &[u8]) -> std::result::Result<T, String> {
    let value: T = serde_json::from_slice(bytes).map_err(|err| format!("unreadable JSON: {err}"))?;
    if value.schema_version() != SESSION_STORE_SCHEMA_VERSION {
        return Err(format!(
            "unsupported schema_version {} (expected {SESSION_STORE_SCHEMA_VERSION})",
            value.schema_version()
        ));
    }
    if value.identifier_scheme() != IDENTIFIER_SCHEME {
        return Err(format!(
            "identifier scheme '{}' (expected '{IDENTIFIER_SCHEME}')",
            value.identifier_scheme()
        ));
    }
    log::trace!("parsed artifact at generation {}", value.generation());
    Ok(value)
}

pub(crate) async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|err| SessionIndexError::persistence(path, err))
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SessionIndexError::persistence(path, err)),
    }
}

async fn write_file(path: &Path, bytes: &[u8], sync_writes: bool) -> Result<()> {
    let io = async {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        if sync_writes {
            file.sync_all().await?;
        }
        Ok::<_, std::io::Error>(())
    };
    io.await.map_err(|err| SessionIndexError::persistence(path, err))
}

async fn rename(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|err| SessionIndexError::persistence(to, err))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SessionIndexError::persistence(path, err)),
    }
}

async fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let handle = tokio::fs::File::open(dir)
            .await
            .map_err(|err| SessionIndexError::persistence(dir, err))?;
        handle
            .sync_all()
            .await
            .map_err(|err| SessionIndexError::persistence(dir, err))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn session_with(doc: &str, n: usize, generation: u64) -> SessionIndex {
        let mut session = SessionIndex::new();
        let texts = (0..n).map(|i| format!("{doc} {i}")).collect();
        let vectors = (0..n).map(|i| vec![i as f32, 0.5, -0.25]).collect();
        session.replace_document(doc, texts, vectors).unwrap();
        session.set_generation(generation);
        session
    }

    fn paths(tmp: &TempDir) -> SessionPaths {
        SessionPaths::resolve(&IndexConfig::new(tmp.path()), "s1").unwrap()
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        let session = session_with("report.pdf", 4, 1);
        save(&paths, &session, true).await.unwrap();

        let outcome = load(&paths, LoadMode::Repair).await.unwrap();
        assert!(outcome.warning.is_none());
        assert!(outcome.recovery.is_none());
        assert_eq!(
            outcome.session.metadata().records(),
            session.metadata().records()
        );
        assert_eq!(outcome.session.generation(), 1);
        assert_eq!(outcome.session.index().dimension(), Some(3));
        assert!(!temp_path(&paths.index).exists());
        assert!(!temp_path(&paths.metadata).exists());
    }

    #[tokio::test]
    async fn missing_artifacts_load_empty() {
        let tmp = TempDir::new().unwrap();
        let outcome = load(&paths(&tmp), LoadMode::Repair).await.unwrap();
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.session.metadata().len(), 0);
    }

    #[tokio::test]
    async fn crash_before_rename_keeps_committed_pair() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        let committed = session_with("a.pdf", 2, 1);
        save(&paths, &committed, false).await.unwrap();

        // Stage the next generation and "crash" before committing it.
        let next = session_with("b.pdf", 3, 2);
        let staged = stage(&paths, &next, false).await.unwrap();
        drop(staged);
        assert!(temp_path(&paths.index).exists());

        let outcome = load(&paths, LoadMode::Repair).await.unwrap();
        assert!(outcome.warning.is_none());
        assert_eq!(
            outcome.recovery,
            Some(Recovery::DiscardedStaleTemp {
                generation: Some(2)
            })
        );
        assert!(outcome.session.contains_doc("a.pdf"));
        assert!(!outcome.session.contains_doc("b.pdf"));
        assert!(!temp_path(&paths.index).exists());
        assert!(!temp_path(&paths.metadata).exists());
    }

    #[tokio::test]
    async fn crash_between_renames_rolls_forward() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 2, 1), false)
            .await
            .unwrap();

        let next = session_with("b.pdf", 3, 2);
        let _staged = stage(&paths, &next, false).await.unwrap();
        // First rename of the commit happened, the second did not.
        rename(&temp_path(&paths.metadata), &paths.metadata)
            .await
            .unwrap();

        let outcome = load(&paths, LoadMode::Repair).await.unwrap();
        assert!(outcome.warning.is_none());
        assert_eq!(
            outcome.recovery,
            Some(Recovery::RolledForward { generation: 2 })
        );
        assert!(outcome.session.contains_doc("b.pdf"));
        assert_eq!(outcome.session.index().len(), 3);

        // The roll-forward is durable: a second load sees a clean pair.
        let again = load(&paths, LoadMode::Repair).await.unwrap();
        assert!(again.recovery.is_none());
        assert_eq!(again.session.generation(), 2);
    }

    #[tokio::test]
    async fn read_only_load_reports_without_touching_disk() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 1, 1), false)
            .await
            .unwrap();
        tokio::fs::write(&paths.index, b"{ not json").await.unwrap();

        let outcome = load(&paths, LoadMode::ReadOnly).await.unwrap();
        let warning = outcome.warning.expect("warning");
        assert_eq!(warning.path, paths.index);
        assert!(warning.quarantined.is_empty());
        assert!(paths.index.exists());
        assert!(paths.metadata.exists());
    }

    #[tokio::test]
    async fn corrupt_artifact_is_quarantined() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 2, 1), false)
            .await
            .unwrap();
        tokio::fs::write(&paths.metadata, b"[1, 2").await.unwrap();

        let outcome = load(&paths, LoadMode::Repair).await.unwrap();
        let warning = outcome.warning.expect("warning");
        assert_eq!(outcome.session.metadata().len(), 0);
        assert_eq!(warning.quarantined.len(), 2);
        assert!(!paths.index.exists());
        assert!(!paths.metadata.exists());
        for moved in &warning.quarantined {
            assert!(moved.exists(), "{}", moved.display());
        }
    }

    #[tokio::test]
    async fn mismatched_generations_without_temp_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 2, 1), false)
            .await
            .unwrap();
        let index_v1 = tokio::fs::read(&paths.index).await.unwrap();
        save(&paths, &session_with("a.pdf", 2, 2), false)
            .await
            .unwrap();
        tokio::fs::write(&paths.index, index_v1).await.unwrap();

        let outcome = load(&paths, LoadMode::ReadOnly).await.unwrap();
        assert!(outcome.warning.is_some());
        assert_eq!(outcome.session.metadata().len(), 0);
    }

    #[tokio::test]
    async fn foreign_schema_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 1, 1), false)
            .await
            .unwrap();
        let raw = tokio::fs::read_to_string(&paths.metadata).await.unwrap();
        let patched = raw.replace(IDENTIFIER_SCHEME, "md5-hex12-mod1e9");
        tokio::fs::write(&paths.metadata, patched).await.unwrap();

        let outcome = load(&paths, LoadMode::ReadOnly).await.unwrap();
        let warning = outcome.warning.expect("warning");
        assert!(warning.reason.contains("identifier scheme"), "{}", warning.reason);
    }

    #[tokio::test]
    async fn failed_write_leaves_committed_pair() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 2, 1), false)
            .await
            .unwrap();

        // A directory squatting on the temp path makes the write fail.
        tokio::fs::create_dir_all(temp_path(&paths.metadata))
            .await
            .unwrap();
        let err = save(&paths, &session_with("b.pdf", 1, 2), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionIndexError::Persistence { .. }));
        assert!(!temp_path(&paths.index).exists());

        tokio::fs::remove_dir(temp_path(&paths.metadata))
            .await
            .unwrap();
        let outcome = load(&paths, LoadMode::Repair).await.unwrap();
        assert!(outcome.session.contains_doc("a.pdf"));
        assert_eq!(outcome.session.generation(), 1);
    }

    #[tokio::test]
    async fn failed_index_rename_restores_previous_pair() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 2, 1), false)
            .await
            .unwrap();
        let index_v1 = tokio::fs::read(&paths.index).await.unwrap();

        // A non-empty directory where the index goes fails the second rename.
        tokio::fs::remove_file(&paths.index).await.unwrap();
        tokio::fs::create_dir_all(paths.index.join("blocker"))
            .await
            .unwrap();
        let err = save(&paths, &session_with("b.pdf", 1, 2), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionIndexError::Persistence { .. }));

        assert!(!temp_path(&paths.index).exists());
        assert!(!temp_path(&paths.metadata).exists());
        assert!(!backup_path(&paths.metadata).exists());
        let raw = tokio::fs::read(&paths.metadata).await.unwrap();
        assert_eq!(parse::<PersistedRecords>(&raw).unwrap().generation, 1);

        tokio::fs::remove_dir_all(&paths.index).await.unwrap();
        tokio::fs::write(&paths.index, index_v1).await.unwrap();
        let outcome = load(&paths, LoadMode::Repair).await.unwrap();
        assert!(outcome.warning.is_none());
        assert!(outcome.recovery.is_none());
        assert!(outcome.session.contains_doc("a.pdf"));
        assert!(!outcome.session.contains_doc("b.pdf"));
    }

    #[tokio::test]
    async fn failed_first_save_leaves_nothing_committed() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        tokio::fs::create_dir_all(paths.index.join("blocker"))
            .await
            .unwrap();

        save(&paths, &session_with("a.pdf", 1, 1), false)
            .await
            .unwrap_err();
        assert!(!paths.metadata.exists());
        assert!(!temp_path(&paths.index).exists());
        assert!(!temp_path(&paths.metadata).exists());
    }

    #[tokio::test]
    async fn leftover_backup_is_removed_on_load() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        save(&paths, &session_with("a.pdf", 1, 1), false)
            .await
            .unwrap();
        tokio::fs::copy(&paths.metadata, backup_path(&paths.metadata))
            .await
            .unwrap();

        let outcome = load(&paths, LoadMode::ReadOnly).await.unwrap();
        assert!(outcome.session.contains_doc("a.pdf"));
        assert!(backup_path(&paths.metadata).exists());

        load(&paths, LoadMode::Repair).await.unwrap();
        assert!(!backup_path(&paths.metadata).exists());
    }

    #[tokio::test]
    async fn committed_generation_tracks_saves() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        assert_eq!(committed_generation(&paths).await.unwrap(), Some(0));

        save(&paths, &session_with("a.pdf", 1, 4), false)
            .await
            .unwrap();
        assert_eq!(committed_generation(&paths).await.unwrap(), Some(4));

        tokio::fs::write(&paths.metadata, b"garbage").await.unwrap();
        assert_eq!(committed_generation(&paths).await.unwrap(), None);
    }
}
