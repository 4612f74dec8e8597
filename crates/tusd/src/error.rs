use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tus_errors::ErrorMetadataAnyhowExt;
use tus_hooks::HttpResponseOverride;

/// Everything a handler can fail with: a tagged protocol/internal error, or
/// an explicit override a gate hook supplied when it rejected the request.
pub enum AppError {
    Upstream(anyhow::Error),
    HookRejected(HttpResponseOverride),
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Upstream(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Upstream(e) => {
                let status = e.http_status();
                let status =
                    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %e, "request failed");
                }
                (status, e.user_facing_message()).into_response()
            },
            AppError::HookRejected(over) => {
                let status = over
                    .status_code
                    .and_then(|c| StatusCode::from_u16(c).ok())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let mut resp = (status, over.body.unwrap_or_default()).into_response();
                for (k, v) in over.headers {
                    if let (Ok(name), Ok(value)) = (
                        axum::http::HeaderName::try_from(k),
                        axum::http::HeaderValue::try_from(v),
                    ) {
                        resp.headers_mut().insert(name, value);
                    }
                }
                resp
            },
        }
    }
}
