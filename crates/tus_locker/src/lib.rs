//! Lock registry implementations: an in-process [`memory::InMemoryLocker`]
//! for single-instance deployments and a sidecar-file [`file::FileLocker`]
//! for deployments that share a filesystem across processes.

pub mod file;
pub mod memory;

pub use file::FileLocker;
pub use memory::InMemoryLocker;
