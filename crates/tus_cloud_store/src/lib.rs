//! Thin GCS and Azure Blob Storage adapters. Their shape follows the S3
//! backend's object-plus-`.info`-sidecar layout directly; neither needs S3's
//! incomplete-part machinery because neither enforces a minimum chunk size.

pub mod azure;
pub mod gcs;

pub use azure::AzureStore;
pub use gcs::GcsStore;
