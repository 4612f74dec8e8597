use std::sync::Arc;

use tus_hooks::HookDispatcher;
use tus_storage::StoreComposer;

use crate::config::Config;

pub struct AppState {
    pub composer: StoreComposer,
    pub hooks: Arc<HookDispatcher>,
    pub config: Config,
}

/// Maps registered storage capabilities to the tus extension names
/// advertised in `Tus-Extension`.
pub fn advertised_extensions(composer: &StoreComposer) -> String {
    let mut exts = vec!["creation", "creation-with-upload"];
    if composer.length_deferrer.is_some() {
        exts.push("creation-defer-length");
    }
    if composer.terminater.is_some() {
        exts.push("termination");
    }
    if composer.concater.is_some() {
        exts.push("concatenation");
    }
    exts.push("checksum");
    exts.join(",")
}
