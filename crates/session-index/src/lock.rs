use crate::error::{Result, SessionIndexError};
use crate::paths::SessionPaths;
use fs2::FileExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static SESSION_LOCK_WAIT_MS_LAST: AtomicU64 = AtomicU64::new(0);
static SESSION_LOCK_WAIT_MS_MAX: AtomicU64 = AtomicU64::new(0);

pub fn session_lock_wait_ms_last() -> u64 {
    SESSION_LOCK_WAIT_MS_LAST.load(Ordering::Relaxed)
}

pub fn session_lock_wait_ms_max() -> u64 {
    SESSION_LOCK_WAIT_MS_MAX.load(Ordering::Relaxed)
}

fn update_lock_wait_ms(wait_ms: u64) {
    SESSION_LOCK_WAIT_MS_LAST.store(wait_ms, Ordering::Relaxed);
    SESSION_LOCK_WAIT_MS_MAX.fetch_max(wait_ms, Ordering::Relaxed);
}

/// Advisory lock on one session directory, held across a whole
/// read-check-save cycle. Writers re-read the committed generation under it,
/// so two processes sharing a store take turns instead of racing renames.
pub(crate) struct SessionFileLock {
    file: std::fs::File,
}

impl Drop for SessionFileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) async fn acquire_session_file_lock(paths: &SessionPaths) -> Result<SessionFileLock> {
    tokio::fs::create_dir_all(&paths.dir)
        .await
        .map_err(|err| SessionIndexError::persistence(&paths.dir, err))?;
    let path = paths.lock_file();

    tokio::task::spawn_blocking(move || -> Result<SessionFileLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| SessionIndexError::persistence(&path, err))?;

        let start = Instant::now();
        file.lock_exclusive()
            .map_err(|err| SessionIndexError::persistence(&path, err))?;
        update_lock_wait_ms(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX));

        Ok(SessionFileLock { file })
    })
    .await
    .map_err(|err| {
        SessionIndexError::persistence(
            paths.lock_file(),
            std::io::Error::other(format!("join session lock task: {err}")),
        )
    })?
}
