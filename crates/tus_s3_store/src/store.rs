use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tus_errors::{ErrorMetadata, MultiError};
use tus_storage::{
    BoxAsyncRead,
    Concater,
    DataStore,
    FileInfo,
    Finisher,
    LengthDeferrer,
    ServeContent,
    Terminater,
    Upload,
};

use crate::chain_reader::ChainReader;
use crate::part_size::{MIN_PART_SIZE, PartSizeConfig, optimal_part_size};

/// Owned, `'static` view of the fields a spawned part-upload task needs,
/// cloned out of [`S3Upload`] so each concurrently-uploading part can run on
/// its own task independently of the `&mut self` borrow `write_chunk` holds.
#[derive(Clone)]
struct PartUploadContext {
    client: Client,
    http_client: reqwest::Client,
    bucket: String,
    object_id: String,
    multipart_id: String,
    disable_content_hashes: bool,
}

impl PartUploadContext {
    async fn upload_part(&self, part_number: i32, body: Vec<u8>) -> anyhow::Result<CompletedPart> {
        if self.disable_content_hashes {
            self.upload_part_presigned(part_number, body).await
        } else {
            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&self.object_id)
                .upload_id(&self.multipart_id)
                .part_number(part_number)
                .body(ByteStream::from(body))
                .send()
                .await?;
            Ok(CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(resp.e_tag().map(str::to_string))
                .build())
        }
    }

    /// Bypasses the SDK's default body content-hashing by presigning the
    /// `UploadPart` request and sending the bytes as a plain PUT with an
    /// explicit `Content-Length`, for deployments that trust their transport
    /// (TLS) rather than wanting S3 to verify a request checksum.
    async fn upload_part_presigned(&self, part_number: i32, body: Vec<u8>) -> anyhow::Result<CompletedPart> {
        let len = body.len();
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.object_id)
            .upload_id(&self.multipart_id)
            .part_number(part_number)
            .presigned(PresigningConfig::expires_in(Duration::from_secs(900))?)
            .await
            .context("presigning UploadPart")?;

        let mut req = self.http_client.put(presigned.uri()).header("content-length", len);
        for (name, value) in presigned.headers() {
            req = req.header(name, value);
        }
        let resp = req
            .body(body)
            .send()
            .await
            .context("presigned UploadPart PUT failed")?
            .error_for_status()
            .context("presigned UploadPart PUT returned an error status")?;

        let e_tag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(CompletedPart::builder().part_number(part_number).set_e_tag(e_tag).build())
    }
}

/// Buffers `buf` to a fresh temp file and returns its path, so a queued part
/// doesn't have to stay resident in memory while it waits for an upload
/// permit.
async fn write_part_to_temp_file(buf: Vec<u8>) -> anyhow::Result<std::path::PathBuf> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<std::path::PathBuf> {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().context("creating part buffer file")?;
        tmp.write_all(&buf).context("writing part buffer file")?;
        let (_file, path) = tmp.keep().context("persisting part buffer file")?;
        Ok(path)
    })
    .await?
}

fn info_key(object_id: &str) -> String {
    format!("{object_id}.info")
}

fn part_key(object_id: &str) -> String {
    format!("{object_id}.part")
}

/// Recovers `(object_id, multipart_id)` from a tus id. tusd encodes both in
/// the id the client sees; the filesystem and cloud backends have no
/// equivalent split because they have no second identifier to carry.
pub fn split_id(id: &str) -> anyhow::Result<(&str, &str)> {
    id.split_once('+')
        .ok_or_else(|| anyhow::anyhow!("malformed S3 upload id: {id}"))
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
    E: std::fmt::Debug,
{
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(_)
    ) && format!("{err:?}").contains("NotFound")
}

pub struct S3Store {
    client: Client,
    http_client: reqwest::Client,
    bucket: String,
    part_size_cfg: PartSizeConfig,
    concurrent_part_uploads: usize,
    disable_content_hashes: bool,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            http_client: reqwest::Client::new(),
            bucket: bucket.into(),
            part_size_cfg: PartSizeConfig::default(),
            concurrent_part_uploads: 10,
            disable_content_hashes: false,
        }
    }

    pub fn with_part_size_config(mut self, cfg: PartSizeConfig) -> Self {
        self.part_size_cfg = cfg;
        self
    }

    pub fn with_concurrent_part_uploads(mut self, n: usize) -> Self {
        self.concurrent_part_uploads = n;
        self
    }

    /// Skips the SDK's request-body content hashing for `UploadPart` calls,
    /// instead presigning the request and PUTting the body directly. Trades
    /// S3-side integrity verification of the request body for throughput on
    /// large uploads where hashing is the bottleneck.
    pub fn with_disable_content_hashes(mut self, disable: bool) -> Self {
        self.disable_content_hashes = disable;
        self
    }

    async fn write_info(&self, object_id: &str, info: &FileInfo) -> anyhow::Result<()> {
        let body = serde_json::to_vec(info)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(info_key(object_id))
            .body(ByteStream::from(body))
            .send()
            .await?;
        Ok(())
    }

    async fn read_info(&self, object_id: &str) -> anyhow::Result<FileInfo> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(info_key(object_id))
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    anyhow::Error::from(ErrorMetadata::upload_not_found(format!(
                        "no upload with id {object_id}"
                    )))
                } else {
                    e.into()
                }
            })?;
        let bytes = resp.body.collect().await?.into_bytes();
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl DataStore for S3Store {
    async fn create_upload(&self, mut info: FileInfo) -> anyhow::Result<Box<dyn Upload>> {
        let object_id = info.id.clone();
        let part_size = optimal_part_size(
            if info.size_is_deferred { None } else { Some(info.size) },
            &self.part_size_cfg,
        )?;

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&object_id)
            .send()
            .await?;
        let multipart_id = created
            .upload_id()
            .context("CreateMultipartUpload response missing upload id")?
            .to_string();

        info.id = format!("{object_id}+{multipart_id}");
        self.write_info(&object_id, &info).await?;

        Ok(Box::new(S3Upload {
            client: self.client.clone(),
            http_client: self.http_client.clone(),
            bucket: self.bucket.clone(),
            object_id,
            multipart_id,
            info,
            part_size,
            disable_content_hashes: self.disable_content_hashes,
            concurrency: Arc::new(Semaphore::new(self.concurrent_part_uploads)),
        }))
    }

    async fn get_upload(&self, id: &str) -> anyhow::Result<Box<dyn Upload>> {
        let (object_id, multipart_id) = split_id(id)?;
        let mut info = self.read_info(object_id).await?;

        let (parts, incomplete_size) = tokio::join!(
            list_all_parts(&self.client, &self.bucket, object_id, multipart_id),
            head_incomplete_part(&self.client, &self.bucket, object_id),
        );

        match parts {
            Ok(parts) => {
                let parts_total: i64 = parts.iter().map(|p| p.size().unwrap_or(0)).sum();
                info.offset = parts_total + incomplete_size.unwrap_or(0);
            },
            Err(e) if is_no_such_upload(&e) => {
                // The multipart was completed or aborted elsewhere; a
                // present info object with no live multipart means done.
                info.offset = info.size;
            },
            Err(e) => return Err(e),
        }

        let part_size = optimal_part_size(
            if info.size_is_deferred { None } else { Some(info.size) },
            &self.part_size_cfg,
        )?;

        Ok(Box::new(S3Upload {
            client: self.client.clone(),
            http_client: self.http_client.clone(),
            bucket: self.bucket.clone(),
            object_id: object_id.to_string(),
            multipart_id: multipart_id.to_string(),
            info,
            part_size,
            disable_content_hashes: self.disable_content_hashes,
            concurrency: Arc::new(Semaphore::new(self.concurrent_part_uploads)),
        }))
    }
}

async fn list_all_parts(
    client: &Client,
    bucket: &str,
    object_id: &str,
    multipart_id: &str,
) -> anyhow::Result<Vec<aws_sdk_s3::types::Part>> {
    let mut parts = Vec::new();
    let mut marker: Option<i32> = None;
    loop {
        let mut req = client
            .list_parts()
            .bucket(bucket)
            .key(object_id)
            .upload_id(multipart_id);
        if let Some(m) = marker {
            req = req.part_number_marker(m.to_string());
        }
        let resp = req.send().await?;
        parts.extend(resp.parts().to_vec());
        if resp.is_truncated().unwrap_or(false) {
            marker = resp.next_part_number_marker().and_then(|s| s.parse().ok());
        } else {
            break;
        }
    }
    Ok(parts)
}

fn is_no_such_upload(err: &anyhow::Error) -> bool {
    err.to_string().contains("NoSuchUpload")
}

async fn head_incomplete_part(client: &Client, bucket: &str, object_id: &str) -> anyhow::Result<i64> {
    match client
        .head_object()
        .bucket(bucket)
        .key(part_key(object_id))
        .send()
        .await
    {
        Ok(head) => Ok(head.content_length().unwrap_or(0)),
        Err(e) if is_not_found(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub struct S3Upload {
    client: Client,
    http_client: reqwest::Client,
    bucket: String,
    object_id: String,
    multipart_id: String,
    info: FileInfo,
    part_size: i64,
    disable_content_hashes: bool,
    concurrency: Arc<Semaphore>,
}

impl S3Upload {
    fn part_upload_context(&self) -> PartUploadContext {
        PartUploadContext {
            client: self.client.clone(),
            http_client: self.http_client.clone(),
            bucket: self.bucket.clone(),
            object_id: self.object_id.clone(),
            multipart_id: self.multipart_id.clone(),
            disable_content_hashes: self.disable_content_hashes,
        }
    }
}

#[async_trait]
impl Upload for S3Upload {
    async fn write_chunk(
        &mut self,
        offset: i64,
        src: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        cancel: CancellationToken,
    ) -> anyhow::Result<i64> {
        let part_key_name = part_key(&self.object_id);
        let (prefix, effective_offset) = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&part_key_name)
            .send()
            .await
        {
            Ok(head) => {
                let size = head.content_length().unwrap_or(0);
                let resp = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&part_key_name)
                    .send()
                    .await?;
                let bytes = resp.body.collect().await?.into_bytes().to_vec();
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&part_key_name)
                    .send()
                    .await?;
                (bytes, offset - size)
            },
            Err(e) if is_not_found(&e) => (Vec::new(), offset),
            Err(e) => return Err(e.into()),
        };
        let prefix_len = prefix.len() as i64;

        let existing_parts = list_all_parts(
            &self.client,
            &self.bucket,
            &self.object_id,
            &self.multipart_id,
        )
        .await?;
        let mut next_part_number = existing_parts.len() as i32 + 1;
        let mut total_uploaded: i64 = 0;

        let ctx = self.part_upload_context();
        let mut reader = ChainReader::new(prefix, src);
        // Each iteration acquires a permit *before* reading the next part's
        // bytes off the wire, bounding how many parts can be produced (and
        // thus buffered on disk) ahead of what concurrent_part_uploads can
        // actually keep uploaded at once.
        let mut uploads = tokio::task::JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                debug!(upload_id = %self.info.id, "write cancelled, draining in-flight parts");
                break;
            }

            let permit = match self.concurrency.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let mut buf = Vec::new();
            {
                let mut limited = (&mut reader).take(self.part_size as u64);
                limited.read_to_end(&mut buf).await?;
            }
            if buf.is_empty() {
                drop(permit);
                break;
            }
            let n = buf.len() as i64;
            let reaches_declared_end =
                !self.info.size_is_deferred && effective_offset + total_uploaded + n == self.info.size;

            if n >= MIN_PART_SIZE || reaches_declared_end {
                let part_number = next_part_number;
                next_part_number += 1;
                total_uploaded += n;
                let is_last = reaches_declared_end;

                let path = write_part_to_temp_file(buf).await?;
                let ctx = ctx.clone();
                uploads.spawn(async move {
                    let bytes = tokio::fs::read(&path).await.context("reading buffered part")?;
                    let result = ctx.upload_part(part_number, bytes).await;
                    let _ = tokio::fs::remove_file(&path).await;
                    drop(permit);
                    result.map(|_| ())
                });

                if is_last {
                    break;
                }
            } else {
                drop(permit);
                debug!(upload_id = %self.info.id, size = n, "buffering incomplete part");
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&part_key_name)
                    .body(ByteStream::from(buf))
                    .send()
                    .await?;
                total_uploaded += n;
                break;
            }
        }

        while let Some(result) = uploads.join_next().await {
            result.context("part upload task panicked")??;
        }

        let new_offset = effective_offset + total_uploaded;
        self.info.offset = new_offset;
        let body = serde_json::to_vec(&self.info)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(info_key(&self.object_id))
            .body(ByteStream::from(body))
            .send()
            .await?;

        Ok(total_uploaded - prefix_len)
    }

    async fn get_info(&self) -> anyhow::Result<FileInfo> {
        Ok(self.info.clone())
    }
}

#[async_trait]
impl Finisher for S3Store {
    async fn finish_upload(&self, id: &str) -> anyhow::Result<()> {
        let (object_id, multipart_id) = split_id(id)?;
        let mut parts = list_all_parts(&self.client, &self.bucket, object_id, multipart_id).await?;

        if parts.is_empty() {
            // S3 requires at least one part even for a zero-length upload.
            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(object_id)
                .upload_id(multipart_id)
                .part_number(1)
                .body(ByteStream::from(Vec::new()))
                .send()
                .await?;
            parts.push(
                aws_sdk_s3::types::Part::builder()
                    .part_number(1)
                    .set_e_tag(resp.e_tag().map(str::to_string))
                    .size(0)
                    .build(),
            );
        }

        parts.sort_by_key(|p| p.part_number().unwrap_or(0));
        let completed = parts
            .into_iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number().unwrap_or(0))
                    .set_e_tag(p.e_tag().map(str::to_string))
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(object_id)
            .upload_id(multipart_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Terminater for S3Store {
    async fn terminate(&self, id: &str) -> anyhow::Result<()> {
        let (object_id, multipart_id) = split_id(id)?;
        let mut errors = MultiError::new();

        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(object_id)
            .upload_id(multipart_id)
            .send()
            .await
        {
            if !format!("{e:?}").contains("NoSuchUpload") {
                errors.push(e.into());
            }
        }

        for key in [object_id.to_string(), part_key(object_id), info_key(object_id)] {
            if let Err(e) = self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                if !format!("{e:?}").contains("NoSuchKey") {
                    warn!(key = %key, error = %e, "failed to delete object during terminate");
                    errors.push(e.into());
                }
            }
        }

        errors.into_result()
    }
}

#[async_trait]
impl LengthDeferrer for S3Store {
    async fn declare_length(&self, id: &str, length: i64) -> anyhow::Result<()> {
        let (object_id, _) = split_id(id)?;
        let mut info = self.read_info(object_id).await?;
        info.size = length;
        info.size_is_deferred = false;
        self.write_info(object_id, &info).await
    }
}

#[async_trait]
impl ServeContent for S3Store {
    async fn get_reader(&self, id: &str) -> anyhow::Result<BoxAsyncRead> {
        let (object_id, _) = split_id(id)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_id)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    anyhow::Error::from(ErrorMetadata::upload_not_found(format!(
                        "no upload with id {object_id}"
                    )))
                } else {
                    e.into()
                }
            })?;
        Ok(Box::pin(resp.body.into_async_read()))
    }
}

#[async_trait]
impl Concater for S3Store {
    async fn concat_size(&self, partial_ids: &[String]) -> anyhow::Result<i64> {
        let mut total = 0;
        for id in partial_ids {
            let (object_id, _) = split_id(id)?;
            total += self.read_info(object_id).await?.offset;
        }
        Ok(total)
    }

    async fn concat(&self, id: &str, partial_ids: &[String]) -> anyhow::Result<()> {
        let (final_object_id, final_multipart_id) = split_id(id)?;

        let mut sizes = Vec::with_capacity(partial_ids.len());
        for pid in partial_ids {
            let (object_id, _) = split_id(pid)?;
            sizes.push(self.read_info(object_id).await?.offset);
        }
        let all_large_enough = sizes.iter().all(|s| *s >= crate::part_size::MIN_PART_SIZE);

        if all_large_enough {
            self.concat_server_side(final_object_id, final_multipart_id, partial_ids)
                .await
        } else {
            self.concat_client_side(final_object_id, partial_ids).await
        }
    }
}

impl S3Store {
    async fn concat_server_side(
        &self,
        final_object_id: &str,
        final_multipart_id: &str,
        partial_ids: &[String],
    ) -> anyhow::Result<()> {
        let mut joins = Vec::new();
        for (i, pid) in partial_ids.iter().enumerate() {
            let (object_id, _) = split_id(pid)?;
            let part_number = (i + 1) as i32;
            joins.push(async move {
                self.client
                    .upload_part_copy()
                    .bucket(&self.bucket)
                    .key(final_object_id)
                    .upload_id(final_multipart_id)
                    .part_number(part_number)
                    .copy_source(format!("{}/{object_id}", self.bucket))
                    .send()
                    .await
                    .map(|resp| {
                        CompletedPart::builder()
                            .part_number(part_number)
                            .set_e_tag(resp.copy_part_result().and_then(|r| r.e_tag()).map(str::to_string))
                            .build()
                    })
                    .context("UploadPartCopy failed")
            });
        }
        let completed = futures::future::try_join_all(joins).await?;

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(final_object_id)
            .upload_id(final_multipart_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await?;
        Ok(())
    }

    async fn concat_client_side(&self, final_object_id: &str, partial_ids: &[String]) -> anyhow::Result<()> {
        let mut tmp = tokio::task::spawn_blocking(tempfile::tempfile)
            .await?
            .context("creating temp file for client-side concat")?;
        for pid in partial_ids {
            let (object_id, _) = split_id(pid)?;
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(object_id)
                .send()
                .await?;
            let bytes = resp.body.collect().await?.into_bytes();
            tmp = tokio::task::spawn_blocking(move || -> anyhow::Result<std::fs::File> {
                use std::io::Write;
                tmp.write_all(&bytes)?;
                Ok(tmp)
            })
            .await??;
        }
        let tmp = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            use std::io::{Read, Seek, SeekFrom};
            let mut tmp = tmp;
            tmp.seek(SeekFrom::Start(0))?;
            let mut buf = Vec::new();
            tmp.read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await??;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(final_object_id)
            .body(ByteStream::from(tmp))
            .send()
            .await?;
        Ok(())
    }
}
