use std::sync::Arc;

use crate::traits::{Concater, DataStore, Finisher, LengthDeferrer, Locker, ServeContent, Terminater};

/// Bundles a [`DataStore`] with whichever optional capabilities its backend
/// actually supports. Handlers consult the `Option` slots rather than
/// downcasting a single trait object, mirroring the way the teacher's
/// `Storage` trait exposes each extension as its own method on one type, but
/// generalized here to multiple independently pluggable backends.
#[derive(Clone)]
pub struct StoreComposer {
    pub data_store: Arc<dyn DataStore>,
    pub terminater: Option<Arc<dyn Terminater>>,
    pub concater: Option<Arc<dyn Concater>>,
    pub length_deferrer: Option<Arc<dyn LengthDeferrer>>,
    pub finisher: Option<Arc<dyn Finisher>>,
    pub serve_content: Option<Arc<dyn ServeContent>>,
    pub locker: Option<Arc<dyn Locker>>,
}

impl StoreComposer {
    pub fn new(data_store: Arc<dyn DataStore>) -> Self {
        Self {
            data_store,
            terminater: None,
            concater: None,
            length_deferrer: None,
            finisher: None,
            serve_content: None,
            locker: None,
        }
    }

    pub fn with_terminater(mut self, t: Arc<dyn Terminater>) -> Self {
        self.terminater = Some(t);
        self
    }

    pub fn with_concater(mut self, c: Arc<dyn Concater>) -> Self {
        self.concater = Some(c);
        self
    }

    pub fn with_length_deferrer(mut self, l: Arc<dyn LengthDeferrer>) -> Self {
        self.length_deferrer = Some(l);
        self
    }

    pub fn with_finisher(mut self, f: Arc<dyn Finisher>) -> Self {
        self.finisher = Some(f);
        self
    }

    pub fn with_serve_content(mut self, s: Arc<dyn ServeContent>) -> Self {
        self.serve_content = Some(s);
        self
    }

    pub fn with_locker(mut self, l: Arc<dyn Locker>) -> Self {
        self.locker = Some(l);
        self
    }

    /// Summarizes the registered capabilities, e.g. for startup logging.
    pub fn capabilities(&self) -> String {
        let mut caps = vec!["core"];
        if self.terminater.is_some() {
            caps.push("termination");
        }
        if self.concater.is_some() {
            caps.push("concatenation");
        }
        if self.length_deferrer.is_some() {
            caps.push("creation-defer-length");
        }
        if self.finisher.is_some() {
            caps.push("finisher");
        }
        if self.serve_content.is_some() {
            caps.push("serve-content");
        }
        if self.locker.is_some() {
            caps.push("locking");
        }
        caps.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::file_info::FileInfo;
    use crate::traits::Upload;

    struct NullStore;

    #[async_trait]
    impl DataStore for NullStore {
        async fn create_upload(&self, info: FileInfo) -> anyhow::Result<Box<dyn Upload>> {
            let _ = info;
            unimplemented!()
        }

        async fn get_upload(&self, _id: &str) -> anyhow::Result<Box<dyn Upload>> {
            unimplemented!()
        }
    }

    #[test]
    fn reports_only_registered_capabilities() {
        let composer = StoreComposer::new(Arc::new(NullStore));
        assert_eq!(composer.capabilities(), "core");
    }
}
