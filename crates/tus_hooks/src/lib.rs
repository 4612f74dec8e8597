//! Hook contract and dispatcher. `HookHandler` is the only thing a
//! concrete hook transport (HTTP callback, gRPC, subprocess, plugin) needs
//! to implement; [`dispatcher::HookDispatcher`] handles the synchronous vs.
//! asynchronous split and per-hook-type metrics.

pub mod dispatcher;
pub mod handler;
pub mod types;

pub use dispatcher::HookDispatcher;
pub use handler::{HookHandler, NoopHookHandler};
pub use types::{
    FileInfoChanges,
    HookRequest,
    HookResponse,
    HookType,
    HttpRequestInfo,
    HttpResponseOverride,
    UploadEvent,
};
