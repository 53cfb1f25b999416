//! Stream files into a bundler as they arrive and get the bundle back out
//!
//! A run is started with [`orchestrator::bundle`]. Files pushed into the
//! returned [`bridge::StreamBridge`] answer the bundler's module lookups, even
//! when the bundler asks for a path before it has arrived. Once intake ends,
//! lookups for paths that never arrived resolve to `None`. The bridge then
//! yields a single bundled file, or the bundling error.

pub mod bridge;
pub mod concat_bundler;
pub mod config;
pub mod entry_tracker;
pub mod file_registry;
pub mod loader;
pub mod orchestrator;
pub mod pending_requests;
pub mod plugin;
pub mod run_state;
pub mod types;

pub use bridge::{FileSink, ResultStream, StreamBridge};
pub use orchestrator::{BundleConfig, bundle, bundle_files};
pub use types::File;
