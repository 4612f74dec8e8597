use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::file_info::FileInfo;

pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Core backend contract: create and look up uploads. Every concrete store
/// (filesystem, S3, GCS, Azure) implements this; everything else (locking,
/// termination, concatenation, ...) is an optional capability a store may
/// additionally implement and register with a [`crate::composer::StoreComposer`].
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Creates a new upload record and returns a handle to it. `info.id` is
    /// populated by the caller before this is invoked; a store that detects
    /// a collision with an existing id must return an error rather than
    /// silently overwrite it.
    async fn create_upload(&self, info: FileInfo) -> anyhow::Result<Box<dyn Upload>>;

    /// Looks up an existing upload by id. Returns [`tus_errors::ErrorCode::UploadNotFound`]
    /// (as an attached [`tus_errors::ErrorMetadata`]) when no such upload exists.
    async fn get_upload(&self, id: &str) -> anyhow::Result<Box<dyn Upload>>;
}

/// A single in-progress or completed upload.
#[async_trait]
pub trait Upload: Send + Sync {
    /// Appends bytes read from `src` starting at `offset`, returning the
    /// number of bytes actually written. Implementations must not write
    /// past `info.size` when the size is known, and must treat a client
    /// disconnect mid-stream as a short, successful write of whatever
    /// arrived rather than an error. `cancel` fires when the caller wants
    /// the write cut short (e.g. a lock holder yielding to a waiting
    /// acquirer); implementations must durably persist whatever has already
    /// been read before `cancel` fired and return that byte count rather
    /// than erroring or losing buffered-but-unuploaded data.
    async fn write_chunk(
        &mut self,
        offset: i64,
        src: &mut (dyn AsyncRead + Send + Unpin),
        cancel: CancellationToken,
    ) -> anyhow::Result<i64>;

    async fn get_info(&self) -> anyhow::Result<FileInfo>;
}

/// Capability: permanently delete an upload and any partial data it holds.
#[async_trait]
pub trait Terminater: Send + Sync {
    async fn terminate(&self, id: &str) -> anyhow::Result<()>;
}

/// Capability: combine a set of `IsPartial` uploads into one final upload.
#[async_trait]
pub trait Concater: Send + Sync {
    /// Returns `Some(size)` when the store can report the combined size of
    /// the given partial upload ids without fetching their full bodies.
    async fn concat_size(&self, partial_ids: &[String]) -> anyhow::Result<i64>;

    async fn concat(&self, id: &str, partial_ids: &[String]) -> anyhow::Result<()>;
}

/// Capability: accept uploads whose final size isn't known up front.
#[async_trait]
pub trait LengthDeferrer: Send + Sync {
    async fn declare_length(&self, id: &str, length: i64) -> anyhow::Result<()>;
}

/// Capability: finalize backend-specific bookkeeping once an upload's bytes
/// are all written (e.g. S3's `CompleteMultipartUpload`). Stores that write
/// directly to their final location (filesystem) have nothing to do here.
#[async_trait]
pub trait Finisher: Send + Sync {
    async fn finish_upload(&self, id: &str) -> anyhow::Result<()>;
}

/// Capability: stream an upload's bytes back out, for GET support.
#[async_trait]
pub trait ServeContent: Send + Sync {
    async fn get_reader(&self, id: &str) -> anyhow::Result<BoxAsyncRead>;
}

/// A held, exclusive advisory lock on one upload id. Dropping the guard
/// without calling [`Lock::unlock`] must still release the lock (on a
/// best-effort basis) so a panicking handler can't wedge an id forever.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Blocks until the lock is held, the deadline carried by `cancel` fires,
    /// or cancellation is observed. While waiting, implementations that
    /// detect a cooperative release request from the current holder (tusd's
    /// `.stop` file convention) cancel `release_requested` so the caller can
    /// act on it instead of blocking further.
    async fn lock(
        &self,
        cancel: CancellationToken,
        release_requested: CancellationToken,
    ) -> anyhow::Result<()>;

    async fn unlock(&self) -> anyhow::Result<()>;
}

/// Capability: mint [`Lock`] handles for upload ids. Locking is orthogonal
/// to storage; a store is usable without one (handlers then skip locking
/// entirely, same as tusd's `nil` locker).
pub trait Locker: Send + Sync {
    fn new_lock(&self, id: &str) -> anyhow::Result<Box<dyn Lock>>;
}
