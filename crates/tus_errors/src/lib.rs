//! Stable error taxonomy for the tus protocol handler.
//!
//! [`ErrorMetadata`] is attached to an `anyhow` error chain via
//! `.context(e /* ErrorMetadata */)`. Each [`ErrorCode`] maps to a fixed HTTP
//! status and carries a `short_msg` that's stable across wording changes, so
//! callers (and tests) can match on it instead of parsing prose.

use std::borrow::Cow;

use http::StatusCode;

#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No upload with the given id. 404.
    UploadNotFound,
    /// Another handler holds the lock (in-memory locker only). 423.
    FileLocked,
    /// Acquiring the lock exceeded the deadline. 500.
    LockTimeout,
    /// `Upload-Offset` does not equal stored offset. 409.
    OffsetMismatch,
    /// Size exceeds `maxSize` or backend maximum. 413.
    UploadTooLarge,
    /// PATCH would exceed declared size. 413.
    SizeExceeded,
    /// Missing/wrong `Content-Type`. 415.
    InvalidContentType,
    /// Supplied checksum disagrees with bytes. 460.
    ChecksumMismatch,
    /// Unknown checksum algorithm. 400.
    UnsupportedChecksumAlgorithm,
    /// `post-receive` hook requested a stop. 400.
    UploadStopped,
    /// `pre-create` hook rejected the upload; status comes from the hook.
    UploadRejected,
    /// `pre-terminate` hook rejected termination; status comes from the hook.
    TerminationRejected,
    /// PATCH against a concatenated-final upload. 403.
    ModifyFinal,
    /// Malformed `Upload-Concat`. 400.
    InvalidConcat,
    /// Malformed `Upload-Metadata`. 400.
    InvalidMetadata,
    /// `Tus-Resumable` not supported. 412.
    VersionMismatch,
    /// Caller-supplied status for a hook-driven rejection.
    HookStatus(u16),
    /// Catch-all server fault. 500.
    Internal,
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// ScreamingCamelCase, stable across copy changes. Eg `OffsetMismatch`.
    pub short_msg: Cow<'static, str>,
    /// Human readable, sent to the client as the response body.
    pub msg: Cow<'static, str>,
}

macro_rules! ctor {
    ($name:ident, $code:ident) => {
        pub fn $name(msg: impl Into<Cow<'static, str>>) -> Self {
            Self {
                code: ErrorCode::$code,
                short_msg: stringify!($code).into(),
                msg: msg.into(),
            }
        }
    };
}

impl ErrorMetadata {
    ctor!(upload_not_found, UploadNotFound);
    ctor!(file_locked, FileLocked);
    ctor!(lock_timeout, LockTimeout);
    ctor!(offset_mismatch, OffsetMismatch);
    ctor!(upload_too_large, UploadTooLarge);
    ctor!(size_exceeded, SizeExceeded);
    ctor!(invalid_content_type, InvalidContentType);
    ctor!(checksum_mismatch, ChecksumMismatch);
    ctor!(unsupported_checksum_algorithm, UnsupportedChecksumAlgorithm);
    ctor!(upload_stopped, UploadStopped);
    ctor!(modify_final, ModifyFinal);
    ctor!(invalid_concat, InvalidConcat);
    ctor!(invalid_metadata, InvalidMetadata);
    ctor!(version_mismatch, VersionMismatch);

    pub fn upload_rejected(status: StatusCode, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::HookStatus(status.as_u16()),
            short_msg: "UploadRejected".into(),
            msg: msg.into(),
        }
    }

    pub fn termination_rejected(status: StatusCode, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::HookStatus(status.as_u16()),
            short_msg: "TerminationRejected".into(),
            msg: msg.into(),
        }
    }

    pub fn finish_rejected(status: StatusCode, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::HookStatus(status.as_u16()),
            short_msg: "FinishRejected".into(),
            msg: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Internal,
            short_msg: "InternalServerError".into(),
            msg: msg.into(),
        }
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status_code()
    }
}

impl ErrorCode {
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ErrorCode::UploadNotFound => StatusCode::NOT_FOUND,
            ErrorCode::FileLocked => StatusCode::from_u16(423).expect("valid status"),
            ErrorCode::LockTimeout => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::OffsetMismatch => StatusCode::CONFLICT,
            ErrorCode::UploadTooLarge | ErrorCode::SizeExceeded => {
                StatusCode::PAYLOAD_TOO_LARGE
            },
            ErrorCode::InvalidContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            // Tus uses the non-standard 460 for checksum mismatches.
            ErrorCode::ChecksumMismatch => StatusCode::from_u16(460).expect("valid status"),
            ErrorCode::UnsupportedChecksumAlgorithm => StatusCode::BAD_REQUEST,
            ErrorCode::UploadStopped => StatusCode::BAD_REQUEST,
            ErrorCode::ModifyFinal => StatusCode::FORBIDDEN,
            ErrorCode::InvalidConcat | ErrorCode::InvalidMetadata => StatusCode::BAD_REQUEST,
            ErrorCode::VersionMismatch => StatusCode::PRECONDITION_FAILED,
            ErrorCode::HookStatus(code) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            },
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenience accessors for `anyhow::Error` chains that may or may not carry
/// an [`ErrorMetadata`].
pub trait ErrorMetadataAnyhowExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;
    fn http_status(&self) -> StatusCode;
    fn short_msg(&self) -> &str;
    /// Message shown to the client. Falls back to a fixed string so internal
    /// error text (SDK errors, file paths, ...) never leaks to callers.
    fn user_facing_message(&self) -> String;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.downcast_ref::<ErrorMetadata>()
    }

    fn http_status(&self) -> StatusCode {
        self.error_metadata()
            .map(|e| e.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn short_msg(&self) -> &str {
        self.error_metadata()
            .map(|e| e.short_msg.as_ref())
            .unwrap_or("InternalServerError")
    }

    fn user_facing_message(&self) -> String {
        match self.error_metadata() {
            Some(e) => e.to_string(),
            None => "Your request couldn't be completed. Try again later.".to_string(),
        }
    }
}

/// Aggregates several independent failures (e.g. per-object termination
/// errors) into one reportable error, matching tusd's `MultiError`.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<anyhow::Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: anyhow::Error) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> anyhow::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::Error::new(self))
        }
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.errors.len() == 1 {
            return write!(f, "{}", self.errors[0]);
        }
        writeln!(f, "{} errors occurred:", self.errors.len())?;
        for e in &self.errors {
            writeln!(f, "  * {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for ErrorMetadata {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            any::<ErrorCode>()
                .prop_filter_map("hook status codes need a real status", |code| {
                    if let ErrorCode::HookStatus(v) = code {
                        if StatusCode::from_u16(v).is_err() {
                            return None;
                        }
                    }
                    Some(ErrorMetadata {
                        code,
                        short_msg: "Test".into(),
                        msg: "test".into(),
                    })
                })
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn every_error_code_maps_to_a_status(err in any::<ErrorMetadata>()) {
            // Must not panic; every code has a defined mapping.
            let _ = err.http_status();
        }
    }

    #[test]
    fn checksum_mismatch_is_460() {
        assert_eq!(
            ErrorMetadata::checksum_mismatch("bad digest").http_status(),
            StatusCode::from_u16(460).unwrap()
        );
    }

    #[test]
    fn multi_error_aggregates() {
        let mut me = MultiError::new();
        assert!(me.is_empty());
        me.push(anyhow::anyhow!("a"));
        me.push(anyhow::anyhow!("b"));
        let err = me.into_result().unwrap_err();
        assert!(err.to_string().contains("2 errors"));
    }
}
