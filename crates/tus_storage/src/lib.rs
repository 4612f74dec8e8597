//! Storage-agnostic core: the [`file_info::FileInfo`] wire type, the
//! `Upload-Metadata` codec, upload id generation, and the trait seams
//! (`DataStore`, `Upload`, and the optional capability traits) that every
//! concrete backend crate (`tus_fs_store`, `tus_s3_store`, `tus_cloud_store`)
//! implements and a [`composer::StoreComposer`] wires together for the
//! protocol handler.

pub mod composer;
pub mod file_info;
pub mod id;
pub mod metadata;
pub mod traits;

pub use composer::StoreComposer;
pub use file_info::FileInfo;
pub use id::generate_upload_id;
pub use metadata::{encode_upload_metadata, parse_upload_metadata};
pub use traits::{
    BoxAsyncRead,
    Concater,
    DataStore,
    Finisher,
    LengthDeferrer,
    Lock,
    Locker,
    ServeContent,
    Terminater,
    Upload,
};
