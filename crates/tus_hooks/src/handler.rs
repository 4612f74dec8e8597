use async_trait::async_trait;

use crate::types::{HookRequest, HookResponse};

/// User-supplied hook transport. The concrete transports (HTTP callback,
/// gRPC, subprocess, plugin) live outside this crate; this trait is the
/// entire contract the dispatcher needs from any of them.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Called once at startup; handlers that need to establish a connection
    /// or validate configuration do it here rather than on first use.
    async fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn invoke_hook(&self, request: HookRequest) -> anyhow::Result<HookResponse>;
}

/// A handler that allows every request and ignores every notification.
/// The default when no hook transport is configured.
pub struct NoopHookHandler;

#[async_trait]
impl HookHandler for NoopHookHandler {
    async fn invoke_hook(&self, _request: HookRequest) -> anyhow::Result<HookResponse> {
        Ok(HookResponse::allow())
    }
}
