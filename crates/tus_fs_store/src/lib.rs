//! Filesystem-backed data store: each upload is a `<dir>/<id>` data file
//! alongside a `<dir>/<id>.info` JSON sidecar holding its [`FileInfo`].
//! Concatenation and termination are plain file operations; there's no
//! equivalent of S3's incomplete-part bookkeeping because writes land
//! directly in the final file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tus_errors::ErrorMetadata;
use tus_storage::{BoxAsyncRead, Concater, DataStore, FileInfo, Finisher, LengthDeferrer, Locker, ServeContent, Terminater, Upload};

pub struct LocalDirStore {
    dir: PathBuf,
    locker: Option<Arc<dyn Locker>>,
}

impl LocalDirStore {
    pub async fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir, locker: None })
    }

    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    pub fn locker(&self) -> Option<Arc<dyn Locker>> {
        self.locker.clone()
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn info_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.info"))
    }

    async fn read_info(&self, id: &str) -> anyhow::Result<FileInfo> {
        let bytes = fs::read(self.info_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ErrorMetadata::upload_not_found(format!("no upload with id {id}")).into()
            } else {
                anyhow::Error::from(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_info(&self, info: &FileInfo) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(info)?;
        fs::write(self.info_path(&info.id), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for LocalDirStore {
    async fn create_upload(&self, info: FileInfo) -> anyhow::Result<Box<dyn Upload>> {
        let data_path = self.data_path(&info.id);
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&data_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    anyhow::anyhow!("upload id {} already exists", info.id)
                } else {
                    e.into()
                }
            })?;
        self.write_info(&info).await?;
        Ok(Box::new(LocalDirUpload {
            dir: self.dir.clone(),
            info,
        }))
    }

    async fn get_upload(&self, id: &str) -> anyhow::Result<Box<dyn Upload>> {
        let info = self.read_info(id).await?;
        Ok(Box::new(LocalDirUpload {
            dir: self.dir.clone(),
            info,
        }))
    }
}

#[async_trait]
impl Terminater for LocalDirStore {
    async fn terminate(&self, id: &str) -> anyhow::Result<()> {
        for path in [self.data_path(id), self.info_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LengthDeferrer for LocalDirStore {
    async fn declare_length(&self, id: &str, length: i64) -> anyhow::Result<()> {
        let mut info = self.read_info(id).await?;
        info.size = length;
        info.size_is_deferred = false;
        self.write_info(&info).await
    }
}

#[async_trait]
impl Finisher for LocalDirStore {
    async fn finish_upload(&self, _id: &str) -> anyhow::Result<()> {
        // Writes already land in the final file; nothing to finalize.
        Ok(())
    }
}

#[async_trait]
impl ServeContent for LocalDirStore {
    async fn get_reader(&self, id: &str) -> anyhow::Result<BoxAsyncRead> {
        let file = fs::File::open(self.data_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::Error::from(ErrorMetadata::upload_not_found(format!(
                    "no upload with id {id}"
                )))
            } else {
                e.into()
            }
        })?;
        Ok(Box::pin(file))
    }
}

#[async_trait]
impl Concater for LocalDirStore {
    async fn concat_size(&self, partial_ids: &[String]) -> anyhow::Result<i64> {
        let mut total = 0;
        for id in partial_ids {
            total += self.read_info(id).await?.offset;
        }
        Ok(total)
    }

    async fn concat(&self, id: &str, partial_ids: &[String]) -> anyhow::Result<()> {
        let mut info = self.read_info(id).await?;
        let data_path = self.data_path(id);
        let mut dest = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&data_path)
            .await?;
        let mut total: i64 = 0;
        for partial_id in partial_ids {
            let mut src = fs::File::open(self.data_path(partial_id)).await?;
            total += tokio::io::copy(&mut src, &mut dest).await? as i64;
        }
        dest.flush().await?;
        info.offset = total;
        info.is_final = true;
        self.write_info(&info).await
    }
}

pub struct LocalDirUpload {
    dir: PathBuf,
    info: FileInfo,
}

impl LocalDirUpload {
    fn info_path(&self) -> PathBuf {
        self.dir.join(format!("{}.info", self.info.id))
    }

    fn data_path(&self) -> PathBuf {
        self.dir.join(&self.info.id)
    }
}

#[async_trait]
impl Upload for LocalDirUpload {
    async fn write_chunk(
        &mut self,
        offset: i64,
        src: &mut (dyn AsyncRead + Send + Unpin),
        cancel: CancellationToken,
    ) -> anyhow::Result<i64> {
        if cancel.is_cancelled() {
            return Ok(0);
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(self.data_path())
            .await?;
        file.seek(std::io::SeekFrom::Start(offset as u64)).await?;
        let written = tokio::io::copy(src, &mut file).await? as i64;
        file.flush().await?;
        self.info.offset = offset + written;
        let bytes = serde_json::to_vec(&self.info)?;
        fs::write(self.info_path(), bytes).await?;
        Ok(written)
    }

    async fn get_info(&self) -> anyhow::Result<FileInfo> {
        Ok(self.info.clone())
    }
}

pub fn data_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(id)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let dir = tempdir().unwrap();
        let store = LocalDirStore::new(dir.path()).await.unwrap();
        let info = FileInfo::new("abc123de", Some(5));
        let mut upload = store.create_upload(info).await.unwrap();
        let mut src = Cursor::new(b"hello".to_vec());
        let written = upload.write_chunk(0, &mut src, CancellationToken::new()).await.unwrap();
        assert_eq!(written, 5);
        let info = upload.get_info().await.unwrap();
        assert!(info.is_complete());

        let mut reader = store.get_reader("abc123de").await.unwrap();
        let mut out = Vec::new();
        tokio::io::copy(&mut reader, &mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn resumed_write_appends_at_offset() {
        let dir = tempdir().unwrap();
        let store = LocalDirStore::new(dir.path()).await.unwrap();
        let info = FileInfo::new("abc123de", Some(10));
        let mut upload = store.create_upload(info).await.unwrap();
        let mut first = Cursor::new(b"hello".to_vec());
        upload.write_chunk(0, &mut first, CancellationToken::new()).await.unwrap();
        let mut second = Cursor::new(b"world".to_vec());
        upload.write_chunk(5, &mut second, CancellationToken::new()).await.unwrap();

        let mut reader = store.get_reader("abc123de").await.unwrap();
        let mut out = Vec::new();
        tokio::io::copy(&mut reader, &mut out).await.unwrap();
        assert_eq!(out, b"helloworld");
    }

    #[tokio::test]
    async fn terminate_removes_both_files() {
        let dir = tempdir().unwrap();
        let store = LocalDirStore::new(dir.path()).await.unwrap();
        store.create_upload(FileInfo::new("abc123de", Some(1))).await.unwrap();
        store.terminate("abc123de").await.unwrap();
        assert!(store.get_upload("abc123de").await.is_err());
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalDirStore::new(dir.path()).await.unwrap();
        store.create_upload(FileInfo::new("abc123de", Some(1))).await.unwrap();
        store.terminate("abc123de").await.unwrap();
        store.terminate("abc123de").await.unwrap();
    }

    #[tokio::test]
    async fn concat_combines_partials_in_order() {
        let dir = tempdir().unwrap();
        let store = LocalDirStore::new(dir.path()).await.unwrap();

        let mut a = store.create_upload(FileInfo::new("partA0001", Some(5))).await.unwrap();
        a.write_chunk(0, &mut Cursor::new(b"hello".to_vec()), CancellationToken::new())
            .await
            .unwrap();
        let mut b = store.create_upload(FileInfo::new("partB0001", Some(5))).await.unwrap();
        b.write_chunk(0, &mut Cursor::new(b"world".to_vec()), CancellationToken::new())
            .await
            .unwrap();

        let mut final_info = FileInfo::new("final0001", Some(0));
        final_info.is_final = true;
        final_info.partial_uploads = Some(vec!["partA0001".into(), "partB0001".into()]);
        store.create_upload(final_info).await.unwrap();

        store
            .concat("final0001", &["partA0001".into(), "partB0001".into()])
            .await
            .unwrap();

        let mut reader = store.get_reader("final0001").await.unwrap();
        let mut out = Vec::new();
        tokio::io::copy(&mut reader, &mut out).await.unwrap();
        assert_eq!(out, b"helloworld");
    }
}
