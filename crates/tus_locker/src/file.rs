use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tus_errors::ErrorMetadata;
use tus_storage::{Lock, Locker};

const DEFAULT_HOLDER_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_ACQUIRER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Cross-process locker backed by sidecar files next to the upload
/// directory: `<id>.lock` marks exclusive ownership, `<id>.stop` is a
/// cooperative "please release" request an acquirer leaves for the current
/// holder. Unlike [`crate::memory::InMemoryLocker`], a blocked acquirer
/// polls rather than failing immediately, since the holder may be a
/// different process that releases shortly.
pub struct FileLocker {
    dir: PathBuf,
    holder_poll_interval: Duration,
    acquirer_poll_interval: Duration,
}

impl FileLocker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            holder_poll_interval: DEFAULT_HOLDER_POLL_INTERVAL,
            acquirer_poll_interval: DEFAULT_ACQUIRER_POLL_INTERVAL,
        }
    }

    pub fn with_poll_intervals(mut self, holder: Duration, acquirer: Duration) -> Self {
        self.holder_poll_interval = holder;
        self.acquirer_poll_interval = acquirer;
        self
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }

    fn stop_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.stop"))
    }
}

impl Locker for FileLocker {
    fn new_lock(&self, id: &str) -> anyhow::Result<Box<dyn Lock>> {
        Ok(Box::new(FileLock {
            id: id.to_string(),
            lock_path: self.lock_path(id),
            stop_path: self.stop_path(id),
            holder_poll_interval: self.holder_poll_interval,
            acquirer_poll_interval: self.acquirer_poll_interval,
            poller: Mutex::new(None),
        }))
    }
}

struct FileLock {
    id: String,
    lock_path: PathBuf,
    stop_path: PathBuf,
    holder_poll_interval: Duration,
    acquirer_poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Lock for FileLock {
    async fn lock(
        &self,
        cancel: CancellationToken,
        release_requested: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            match create_exclusive(&self.lock_path).await {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    // Ask whoever holds it to wrap up, then wait our turn.
                    let _ = fs::write(&self.stop_path, b"").await;
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(ErrorMetadata::lock_timeout(format!(
                                "timed out waiting for lock on upload {}",
                                self.id
                            ))
                            .into());
                        },
                        _ = tokio::time::sleep(self.acquirer_poll_interval) => continue,
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }

        let stop_path = self.stop_path.clone();
        let holder_poll_interval = self.holder_poll_interval;
        let id = self.id.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(holder_poll_interval).await;
                if fs::try_exists(&stop_path).await.unwrap_or(false) {
                    debug!(upload_id = %id, "release requested via stop file");
                    release_requested.cancel();
                    return;
                }
            }
        });
        *self.poller.lock().expect("poller mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn unlock(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.poller.lock().expect("poller mutex poisoned").take() {
            handle.abort();
        }
        let _ = fs::remove_file(&self.stop_path).await;
        fs::remove_file(&self.lock_path).await?;
        Ok(())
    }
}

async fn create_exclusive(path: &std::path::Path) -> io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn lock_then_unlock_round_trips() {
        let dir = tempdir().unwrap();
        let locker = FileLocker::new(dir.path());
        let lock = locker.new_lock("abc123de").unwrap();
        lock.lock(CancellationToken::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(dir.path().join("abc123de.lock").exists());
        lock.unlock().await.unwrap();
        assert!(!dir.path().join("abc123de.lock").exists());
    }

    #[tokio::test]
    async fn blocked_acquirer_times_out_via_cancellation() {
        let dir = tempdir().unwrap();
        let locker = FileLocker::new(dir.path()).with_poll_intervals(
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let holder = locker.new_lock("abc123de").unwrap();
        holder
            .lock(CancellationToken::new(), CancellationToken::new())
            .await
            .unwrap();

        let acquirer = locker.new_lock("abc123de").unwrap();
        let cancel = CancellationToken::new();
        let deadline_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            deadline_cancel.cancel();
        });
        let err = acquirer
            .lock(cancel, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ErrorMetadata>().unwrap().code,
            tus_errors::ErrorCode::LockTimeout
        );
        // Acquirer's stop request must have reached the holder's directory.
        assert!(dir.path().join("abc123de.stop").exists());
    }
}
