use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use tokio::io::AsyncReadExt;
use tokio_stream::StreamExt as _;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tus_errors::ErrorMetadata;
use tus_hooks::{HttpRequestInfo, UploadEvent};
use tus_storage::{FileInfo, encode_upload_metadata, generate_upload_id, parse_upload_metadata};

use crate::body::TrackedBody;
use crate::checksum::UploadChecksum;
use crate::error::AppError;
use crate::headers::{UploadConcat, check_tus_version, header_i64, header_str, parse_upload_concat};
use crate::state::{AppState, advertised_extensions};

const MAX_IN_MEMORY_CHUNK: usize = 1024 * 1024 * 1024;

fn http_request_info(headers: &HeaderMap, method: &str, uri: &str) -> HttpRequestInfo {
    let mut out = tus_hooks::HttpRequestInfo {
        method: method.to_string(),
        uri: uri.to_string(),
        remote_addr: None,
        headers: Default::default(),
    };
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.headers.insert(name.to_string(), v.to_string());
        }
    }
    out
}

/// Builds the `Location` header value for a newly created upload. When
/// `behind_proxy` is set, honors `X-Forwarded-Proto`/`X-Forwarded-Host` (or
/// `Host` as a fallback) so the client sees the URL it should actually use
/// through the reverse proxy rather than a path relative to this process.
fn location_for(state: &AppState, headers: &HeaderMap, upload_id: &str) -> String {
    let path = format!("{}/{}", state.config.base_path, upload_id);
    if !state.config.behind_proxy {
        return path;
    }
    let scheme = header_str(headers, "X-Forwarded-Proto").unwrap_or("https");
    let host = header_str(headers, "X-Forwarded-Host").or_else(|| header_str(headers, "Host"));
    match host {
        Some(host) => format!("{scheme}://{host}{path}"),
        None => path,
    }
}

fn common_headers(resp: &mut Response) {
    resp.headers_mut().insert(
        "Tus-Resumable",
        HeaderValue::from_static(crate::headers::TUS_RESUMABLE),
    );
}

pub async fn options(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut resp = StatusCode::NO_CONTENT.into_response();
    common_headers(&mut resp);
    resp.headers_mut()
        .insert("Tus-Version", HeaderValue::from_static("1.0.0"));
    resp.headers_mut().insert(
        "Tus-Extension",
        HeaderValue::from_str(&advertised_extensions(&state.composer)).unwrap(),
    );
    resp.headers_mut()
        .insert("Tus-Checksum-Algorithm", HeaderValue::from_static("sha256"));
    if let Some(max) = state.config.max_size {
        resp.headers_mut()
            .insert("Tus-Max-Size", HeaderValue::from_str(&max.to_string()).unwrap());
    }
    resp
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;

    let upload_length = header_i64(&headers, "Upload-Length")?;
    let defer_length = header_str(&headers, "Upload-Defer-Length") == Some("1");
    if upload_length.is_none() && !defer_length {
        return Err(anyhow::anyhow!(tus_errors::ErrorMetadata::invalid_metadata(
            "either Upload-Length or Upload-Defer-Length is required"
        ))
        .into());
    }
    if let (Some(max), Some(len)) = (state.config.max_size, upload_length) {
        if len > max {
            return Err(anyhow::anyhow!(ErrorMetadata::upload_too_large(format!(
                "Upload-Length {len} exceeds the configured maximum of {max} bytes"
            )))
            .into());
        }
    }

    let metadata = match header_str(&headers, "Upload-Metadata") {
        Some(v) => parse_upload_metadata(v)?,
        None => Default::default(),
    };

    let concat = header_str(&headers, "Upload-Concat")
        .map(parse_upload_concat)
        .transpose()?;

    let id = generate_upload_id();
    let mut info = FileInfo::new(&id, upload_length);
    info.metadata = metadata;

    if let Some(UploadConcat::Partial) = concat {
        info.is_partial = true;
    }
    let mut final_partial_ids = None;
    if let Some(UploadConcat::Final(ids)) = &concat {
        info.is_final = true;
        info.partial_uploads = Some(ids.clone());
        final_partial_ids = Some(ids.clone());
        if let Some(concater) = &state.composer.concater {
            info.size = concater.concat_size(ids).await?;
            info.size_is_deferred = false;
        }
    }

    let gate_event = UploadEvent {
        upload: info.clone(),
        http_request: http_request_info(&headers, "POST", &state.config.base_path),
    };
    let hook_resp = state.hooks.pre_create(gate_event).await?;
    if hook_resp.reject_upload {
        return Err(match hook_resp.http_response {
            Some(over) => AppError::HookRejected(over),
            None => anyhow::anyhow!(ErrorMetadata::upload_rejected(
                StatusCode::BAD_REQUEST,
                "pre-create hook rejected this upload"
            ))
            .into(),
        });
    }
    if let Some(changes) = hook_resp.change_file_info {
        if let Some(new_id) = changes.id {
            info.id = new_id;
        }
        if let Some(m) = changes.metadata {
            info.metadata = m;
        }
        if let Some(s) = changes.storage {
            info.storage = Some(s);
        }
    }

    let mut upload = state.composer.data_store.create_upload(info.clone()).await?;

    if let Some(ids) = final_partial_ids {
        if let Some(concater) = &state.composer.concater {
            let concat_id = upload.get_info().await?.id;
            concater.concat(&concat_id, &ids).await?;
            let concatenated = upload.get_info().await?;
            finish_upload_gated(&state, &concatenated).await?;
        }
    }

    let info = upload.get_info().await?;

    // Creation-with-upload: a body arrived alongside POST.
    let content_type_offset = header_str(&headers, "Content-Type") == Some("application/offset+octet-stream");
    let final_info = if content_type_offset && !info.is_final {
        let stream = body.into_data_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(stream);
        write_chunk_and_advance(&state, upload.as_mut(), info, None, &mut reader, CancellationToken::new()).await?
    } else {
        info
    };

    state
        .hooks
        .notify_created(UploadEvent {
            upload: final_info.clone(),
            http_request: http_request_info(&headers, "POST", &state.config.base_path),
        })
        .await;

    let location = location_for(&state, &headers, &final_info.id);
    let mut resp = StatusCode::CREATED.into_response();
    common_headers(&mut resp);
    resp.headers_mut()
        .insert("Location", HeaderValue::from_str(&location).unwrap());
    resp.headers_mut().insert(
        "Upload-Offset",
        HeaderValue::from_str(&final_info.offset.to_string()).unwrap(),
    );
    Ok(resp)
}

pub async fn head(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;
    let upload = state.composer.data_store.get_upload(&id).await?;
    let info = upload.get_info().await?;

    let mut resp = StatusCode::OK.into_response();
    common_headers(&mut resp);
    resp.headers_mut().insert("Cache-Control", HeaderValue::from_static("no-store"));
    resp.headers_mut()
        .insert("Upload-Offset", HeaderValue::from_str(&info.offset.to_string()).unwrap());
    if info.size_is_deferred {
        resp.headers_mut()
            .insert("Upload-Defer-Length", HeaderValue::from_static("1"));
    } else {
        resp.headers_mut()
            .insert("Upload-Length", HeaderValue::from_str(&info.size.to_string()).unwrap());
    }
    if !info.metadata.is_empty() {
        resp.headers_mut().insert(
            "Upload-Metadata",
            HeaderValue::from_str(&encode_upload_metadata(&info.metadata)).unwrap(),
        );
    }
    Ok(resp)
}

pub async fn patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;

    if header_str(&headers, "Content-Type") != Some("application/offset+octet-stream") {
        return Err(anyhow::anyhow!(tus_errors::ErrorMetadata::invalid_content_type(
            "PATCH requires Content-Type: application/offset+octet-stream"
        ))
        .into());
    }
    let client_offset = header_i64(&headers, "Upload-Offset")?
        .ok_or_else(|| tus_errors::ErrorMetadata::invalid_metadata("missing Upload-Offset header"))?;

    let lock = state
        .composer
        .locker
        .as_ref()
        .map(|locker| locker.new_lock(&id))
        .transpose()?;
    // Cancelled by the lock implementation once a waiting acquirer asks us
    // to wrap up (tusd's `.stop` file convention); threaded through to the
    // in-flight write so it can cut the body read short instead of holding
    // the lock until the whole chunk lands.
    let release_requested = CancellationToken::new();
    if let Some(lock) = &lock {
        let cancel = CancellationToken::new();
        let cancel_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            cancel_deadline.cancel();
        });
        lock.lock(cancel, release_requested.clone()).await?;
    }

    let result = patch_inner(&state, &id, client_offset, headers.clone(), body, release_requested).await;

    if let Some(lock) = &lock {
        let _ = lock.unlock().await;
    }

    result
}

async fn patch_inner(
    state: &AppState,
    id: &str,
    client_offset: i64,
    headers: HeaderMap,
    body: Body,
    cancel: CancellationToken,
) -> Result<Response, AppError> {
    if state.hooks.is_stopped(id) {
        state.hooks.clear_stopped(id);
        return Err(anyhow::anyhow!(tus_errors::ErrorMetadata::upload_stopped(
            "a previous post-receive hook requested this upload stop"
        ))
        .into());
    }

    let mut upload = state.composer.data_store.get_upload(id).await?;
    let mut info = upload.get_info().await?;

    if info.is_final {
        return Err(anyhow::anyhow!(tus_errors::ErrorMetadata::modify_final(
            "cannot PATCH a concatenated final upload"
        ))
        .into());
    }
    if info.offset != client_offset {
        return Err(anyhow::anyhow!(tus_errors::ErrorMetadata::offset_mismatch(format!(
            "stored offset {} does not match Upload-Offset {client_offset}",
            info.offset
        )))
        .into());
    }

    if info.size_is_deferred {
        if let Some(len) = header_i64(&headers, "Upload-Length")? {
            if let Some(max) = state.config.max_size {
                if len > max {
                    return Err(anyhow::anyhow!(ErrorMetadata::upload_too_large(format!(
                        "Upload-Length {len} exceeds the configured maximum of {max} bytes"
                    )))
                    .into());
                }
            }
            if let Some(deferrer) = &state.composer.length_deferrer {
                deferrer.declare_length(id, len).await?;
                info = upload.get_info().await?;
            }
        }
    }

    let checksum = header_str(&headers, "Upload-Checksum")
        .map(UploadChecksum::parse)
        .transpose()?;

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);

    let updated = write_chunk_and_advance(state, upload.as_mut(), info, checksum, &mut reader, cancel).await?;

    let mut resp = StatusCode::NO_CONTENT.into_response();
    common_headers(&mut resp);
    resp.headers_mut()
        .insert("Upload-Offset", HeaderValue::from_str(&updated.offset.to_string()).unwrap());
    Ok(resp)
}

/// Reads the available body (bounded by the upload's remaining declared
/// size when known), optionally checksums it, and on success commits it via
/// `writeChunk`. A checksum mismatch returns an error without touching
/// storage, so the stored offset is left exactly where it was.
async fn write_chunk_and_advance(
    state: &AppState,
    upload: &mut (dyn tus_storage::Upload),
    info: FileInfo,
    checksum: Option<UploadChecksum>,
    reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
    cancel: CancellationToken,
) -> anyhow::Result<FileInfo> {
    let remaining = info.remaining();
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(1);
    let info_for_progress = info.clone();
    let hooks = state.hooks.clone();
    let progress_task = tokio::spawn(async move {
        while let Some(bytes_so_far) = progress_rx.recv().await {
            let mut snapshot = info_for_progress.clone();
            snapshot.offset += bytes_so_far;
            hooks
                .notify_progress(UploadEvent {
                    upload: snapshot,
                    http_request: Default::default(),
                })
                .await;
        }
    });

    let mut tracked = TrackedBody::new(reader).with_progress(
        progress_tx,
        Duration::from_millis(state.config.progress_hooks_interval_ms),
    );
    if let Some(checksum) = checksum {
        tracked = tracked.with_checksum(checksum);
    }

    let cap = remaining
        .map(|r| r.min(MAX_IN_MEMORY_CHUNK as i64) as usize)
        .unwrap_or(MAX_IN_MEMORY_CHUNK);
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        if buf.len() >= cap || cancel.is_cancelled() {
            break;
        }
        let to_read = chunk.len().min(cap - buf.len());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = tracked.read(&mut chunk[..to_read]) => match result {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                // A client disconnect mid-body is a short, successful write.
                Err(_) => break,
            },
        }
    }
    drop(progress_task);

    if let Some(checksum) = tracked.into_checksum() {
        checksum.verify()?;
    }

    let mut cursor = std::io::Cursor::new(buf);
    let written = upload.write_chunk(info.offset, &mut cursor, cancel).await?;
    let mut updated = upload.get_info().await?;
    updated.offset = info.offset + written;

    state
        .hooks
        .notify_progress(UploadEvent {
            upload: updated.clone(),
            http_request: Default::default(),
        })
        .await;

    if updated.is_complete() {
        finish_upload_gated(state, &updated).await?;
        state
            .hooks
            .notify_completed(UploadEvent {
                upload: updated.clone(),
                http_request: Default::default(),
            })
            .await;
    }

    Ok(updated)
}

/// Runs the `pre-finish` gate hook before handing off to the `Finisher`
/// backend, mirroring the `pre-create`/`pre-terminate` gate pattern. Unlike
/// those two, this runs from contexts that only carry an `anyhow::Error`
/// (no axum response to attach a hook-supplied override to), so a rejection
/// always surfaces as a plain `ErrorMetadata`.
async fn finish_upload_gated(state: &AppState, info: &FileInfo) -> anyhow::Result<()> {
    let Some(finisher) = &state.composer.finisher else {
        return Ok(());
    };
    let hook_resp = state
        .hooks
        .pre_finish(UploadEvent {
            upload: info.clone(),
            http_request: Default::default(),
        })
        .await?;
    if hook_resp.reject_finish {
        let status = hook_resp
            .http_response
            .as_ref()
            .and_then(|over| over.status_code)
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::BAD_REQUEST);
        return Err(anyhow::anyhow!(ErrorMetadata::finish_rejected(
            status,
            "pre-finish hook rejected this upload"
        )));
    }
    finisher.finish_upload(&info.id).await
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_tus_version(&headers)?;
    let upload = state.composer.data_store.get_upload(&id).await?;
    let info = upload.get_info().await?;

    let hook_resp = state
        .hooks
        .pre_terminate(UploadEvent {
            upload: info.clone(),
            http_request: http_request_info(&headers, "DELETE", &id),
        })
        .await?;
    if hook_resp.reject_termination {
        return Err(match hook_resp.http_response {
            Some(over) => AppError::HookRejected(over),
            None => anyhow::anyhow!(ErrorMetadata::termination_rejected(
                StatusCode::BAD_REQUEST,
                "pre-terminate hook rejected this request"
            ))
            .into(),
        });
    }

    let Some(terminater) = &state.composer.terminater else {
        return Err(anyhow::anyhow!(tus_errors::ErrorMetadata::upload_not_found(
            "this backend does not support termination"
        ))
        .into());
    };
    terminater.terminate(&id).await?;

    state
        .hooks
        .notify_terminated(UploadEvent {
            upload: info,
            http_request: Default::default(),
        })
        .await;

    let mut resp = StatusCode::NO_CONTENT.into_response();
    common_headers(&mut resp);
    Ok(resp)
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if !state.config.enable_get {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let Some(serve_content) = &state.composer.serve_content else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let info = state.composer.data_store.get_upload(&id).await?.get_info().await?;
    if !info.is_complete() {
        return Err(anyhow::anyhow!(tus_errors::ErrorMetadata::upload_not_found(
            "upload is not yet finished"
        ))
        .into());
    }
    let mut reader = serve_content.get_reader(&id).await?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;

    let mut resp = (StatusCode::OK, bytes).into_response();
    resp.headers_mut().insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static("application/octet-stream"),
    );
    common_headers(&mut resp);
    Ok(resp)
}
