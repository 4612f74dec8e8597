//! The tus protocol handler: header parsing, the PATCH body pipeline, and
//! the axum router tying it to a [`tus_storage::StoreComposer`] and a
//! [`tus_hooks::HookDispatcher`].

pub mod body;
pub mod checksum;
pub mod config;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod router;
pub mod state;

pub use config::Config;
pub use router::build_router;
pub use state::AppState;
