use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tus_errors::ErrorMetadata;
use tus_storage::{Lock, Locker};

/// Non-blocking, single-process locker: a second `lock()` call for the same
/// id fails immediately with `FileLocked` rather than waiting, matching
/// tusd's in-memory locker (there's no other holder to ask to release).
#[derive(Default)]
pub struct InMemoryLocker {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for InMemoryLocker {
    fn new_lock(&self, id: &str) -> anyhow::Result<Box<dyn Lock>> {
        Ok(Box::new(InMemoryLock {
            id: id.to_string(),
            held: self.held.clone(),
        }))
    }
}

struct InMemoryLock {
    id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl Lock for InMemoryLock {
    async fn lock(
        &self,
        _cancel: CancellationToken,
        _release_requested: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut held = self.held.lock().expect("lock poisoned");
        if !held.insert(self.id.clone()) {
            return Err(ErrorMetadata::file_locked(format!(
                "upload {} is locked by another request",
                self.id
            ))
            .into());
        }
        Ok(())
    }

    async fn unlock(&self) -> anyhow::Result<()> {
        self.held.lock().expect("lock poisoned").remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_lock_attempt_fails_immediately() {
        let locker = InMemoryLocker::new();
        let a = locker.new_lock("upload1").unwrap();
        let b = locker.new_lock("upload1").unwrap();
        a.lock(CancellationToken::new(), CancellationToken::new())
            .await
            .unwrap();
        let err = b
            .lock(CancellationToken::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ErrorMetadata>().unwrap().code, tus_errors::ErrorCode::FileLocked);
    }

    #[tokio::test]
    async fn unlock_allows_reacquisition() {
        let locker = InMemoryLocker::new();
        let a = locker.new_lock("upload1").unwrap();
        a.lock(CancellationToken::new(), CancellationToken::new())
            .await
            .unwrap();
        a.unlock().await.unwrap();
        let b = locker.new_lock("upload1").unwrap();
        b.lock(CancellationToken::new(), CancellationToken::new())
            .await
            .unwrap();
    }
}
