use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{error, warn};
use tus_metrics::{log_labeled_counter, register_counter_vec};

use crate::handler::HookHandler;
use crate::types::{HookRequest, HookResponse, HookType, UploadEvent};

register_counter_vec!(HOOK_INVOCATIONS_TOTAL, "hook invocations by type", &["hook"]);
register_counter_vec!(HOOK_ERRORS_TOTAL, "hook invocation errors by type", &["hook"]);

/// Dispatches gate hooks synchronously and notification hooks through
/// unbuffered (capacity-1) channels drained by a single background task, so
/// the protocol handler never blocks on a slow notification hook beyond the
/// rendezvous handoff. `post-receive`'s `stopUpload` verdict is recorded in
/// `stopped` rather than fed back through a direct callback, avoiding a
/// cycle between the dispatcher and the handler.
pub struct HookDispatcher {
    handler: Arc<dyn HookHandler>,
    created: mpsc::Sender<UploadEvent>,
    progress: mpsc::Sender<UploadEvent>,
    completed: mpsc::Sender<UploadEvent>,
    terminated: mpsc::Sender<UploadEvent>,
    stopped: Arc<Mutex<HashSet<String>>>,
}

impl HookDispatcher {
    pub fn new(handler: Arc<dyn HookHandler>) -> Self {
        let stopped = Arc::new(Mutex::new(HashSet::new()));

        let (created_tx, created_rx) = mpsc::channel(1);
        let (progress_tx, progress_rx) = mpsc::channel(1);
        let (completed_tx, completed_rx) = mpsc::channel(1);
        let (terminated_tx, terminated_rx) = mpsc::channel(1);

        spawn_consumer(handler.clone(), HookType::PostCreate, created_rx, stopped.clone());
        spawn_consumer(handler.clone(), HookType::PostReceive, progress_rx, stopped.clone());
        spawn_consumer(handler.clone(), HookType::PostFinish, completed_rx, stopped.clone());
        spawn_consumer(handler.clone(), HookType::PostTerminate, terminated_rx, stopped.clone());

        Self {
            handler,
            created: created_tx,
            progress: progress_tx,
            completed: completed_tx,
            terminated: terminated_tx,
            stopped,
        }
    }

    pub async fn setup(&self) -> anyhow::Result<()> {
        self.handler.setup().await
    }

    async fn invoke_gate(&self, hook_type: HookType, event: UploadEvent) -> anyhow::Result<HookResponse> {
        log_labeled_counter(&HOOK_INVOCATIONS_TOTAL, &[hook_type.name()]);
        let result = self.handler.invoke_hook(HookRequest { hook_type, event }).await;
        if result.is_err() {
            log_labeled_counter(&HOOK_ERRORS_TOTAL, &[hook_type.name()]);
        }
        result
    }

    pub async fn pre_create(&self, event: UploadEvent) -> anyhow::Result<HookResponse> {
        self.invoke_gate(HookType::PreCreate, event).await
    }

    pub async fn pre_finish(&self, event: UploadEvent) -> anyhow::Result<HookResponse> {
        self.invoke_gate(HookType::PreFinish, event).await
    }

    pub async fn pre_terminate(&self, event: UploadEvent) -> anyhow::Result<HookResponse> {
        self.invoke_gate(HookType::PreTerminate, event).await
    }

    pub async fn notify_created(&self, event: UploadEvent) {
        let _ = self.created.send(event).await;
    }

    pub async fn notify_progress(&self, event: UploadEvent) {
        let _ = self.progress.send(event).await;
    }

    pub async fn notify_completed(&self, event: UploadEvent) {
        let _ = self.completed.send(event).await;
    }

    pub async fn notify_terminated(&self, event: UploadEvent) {
        let _ = self.terminated.send(event).await;
    }

    /// Checked by the protocol handler before the next PATCH write; true
    /// once a `post-receive` hook has asked to stop this upload.
    pub fn is_stopped(&self, id: &str) -> bool {
        self.stopped.lock().expect("stopped set poisoned").contains(id)
    }

    pub fn clear_stopped(&self, id: &str) {
        self.stopped.lock().expect("stopped set poisoned").remove(id);
    }
}

fn spawn_consumer(
    handler: Arc<dyn HookHandler>,
    hook_type: HookType,
    mut rx: mpsc::Receiver<UploadEvent>,
    stopped: Arc<Mutex<HashSet<String>>>,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let upload_id = event.upload.id.clone();
            log_labeled_counter(&HOOK_INVOCATIONS_TOTAL, &[hook_type.name()]);
            let request = HookRequest { hook_type, event };
            match handler.invoke_hook(request).await {
                Ok(resp) if resp.stop_upload => {
                    warn!(upload_id = %upload_id, "post-receive hook requested stop");
                    stopped.lock().expect("stopped set poisoned").insert(upload_id);
                },
                Ok(_) => {},
                Err(e) => {
                    log_labeled_counter(&HOOK_ERRORS_TOTAL, &[hook_type.name()]);
                    error!(upload_id = %upload_id, hook = hook_type.name(), error = %e, "hook invocation failed");
                },
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tus_storage::FileInfo;

    use super::*;
    use crate::types::HttpRequestInfo;

    struct StoppingHandler;

    #[async_trait]
    impl HookHandler for StoppingHandler {
        async fn invoke_hook(&self, request: HookRequest) -> anyhow::Result<HookResponse> {
            Ok(HookResponse {
                stop_upload: request.hook_type == HookType::PostReceive,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn post_receive_stop_is_recorded_by_id() {
        let dispatcher = HookDispatcher::new(Arc::new(StoppingHandler));
        let event = UploadEvent {
            upload: FileInfo::new("abc123de", Some(10)),
            http_request: HttpRequestInfo::default(),
        };
        dispatcher.notify_progress(event).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(dispatcher.is_stopped("abc123de"));
        dispatcher.clear_stopped("abc123de");
        assert!(!dispatcher.is_stopped("abc123de"));
    }

    #[tokio::test]
    async fn gate_hook_returns_handler_response_directly() {
        let dispatcher = HookDispatcher::new(Arc::new(StoppingHandler));
        let event = UploadEvent {
            upload: FileInfo::new("abc123de", Some(10)),
            http_request: HttpRequestInfo::default(),
        };
        let resp = dispatcher.pre_create(event).await.unwrap();
        assert!(!resp.stop_upload);
    }
}
