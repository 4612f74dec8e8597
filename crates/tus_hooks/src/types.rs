use indexmap::IndexMap;
use tus_storage::FileInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    PreCreate,
    PreFinish,
    PreTerminate,
    PostCreate,
    PostReceive,
    PostFinish,
    PostTerminate,
}

impl HookType {
    pub fn name(&self) -> &'static str {
        match self {
            HookType::PreCreate => "pre-create",
            HookType::PreFinish => "pre-finish",
            HookType::PreTerminate => "pre-terminate",
            HookType::PostCreate => "post-create",
            HookType::PostReceive => "post-receive",
            HookType::PostFinish => "post-finish",
            HookType::PostTerminate => "post-terminate",
        }
    }

    /// Synchronous hooks gate the request and can reject or rewrite it;
    /// asynchronous hooks are fire-and-forget notifications.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, HookType::PreCreate | HookType::PreFinish | HookType::PreTerminate)
    }
}

/// A stripped-down view of the triggering HTTP request, enough for hook
/// handlers to make a decision or log context without exposing the whole
/// axum request type outside this crate.
#[derive(Debug, Clone, Default)]
pub struct HttpRequestInfo {
    pub method: String,
    pub uri: String,
    pub remote_addr: Option<String>,
    pub headers: IndexMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct UploadEvent {
    pub upload: FileInfo,
    pub http_request: HttpRequestInfo,
}

#[derive(Debug, Clone)]
pub struct HookRequest {
    pub hook_type: HookType,
    pub event: UploadEvent,
}

/// Overrides the response the protocol handler would otherwise send, used
/// by gate hooks to reject a request with a custom status and body.
#[derive(Debug, Clone, Default)]
pub struct HttpResponseOverride {
    pub status_code: Option<u16>,
    pub body: Option<String>,
    pub headers: IndexMap<String, String>,
}

/// Fields a `pre-create` hook may override before the upload is allocated.
#[derive(Debug, Clone, Default)]
pub struct FileInfoChanges {
    pub id: Option<String>,
    pub metadata: Option<IndexMap<String, String>>,
    pub storage: Option<IndexMap<String, String>>,
}

#[derive(Debug, Clone, Default)]
pub struct HookResponse {
    pub http_response: Option<HttpResponseOverride>,
    pub reject_upload: bool,
    pub change_file_info: Option<FileInfoChanges>,
    pub stop_upload: bool,
    pub reject_termination: bool,
    pub reject_finish: bool,
}

impl HookResponse {
    pub fn allow() -> Self {
        Self::default()
    }
}
