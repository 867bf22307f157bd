//! Chat sync library - client-side cache and synchronization engine for a
//! realtime chat backed by a hierarchical keyed store
//!
//! `AppState` is the single process-scoped resource: build it once over a
//! `RemoteStore`, pass the `Arc` to the services, call `shutdown` on teardown.

pub mod cache;
pub mod core;
pub mod dtos;
pub mod entities;
pub mod repositories;
pub mod services;
pub mod sync;

// Re-export dei tipi principali per facilitare l'import
pub use core::{AppState, Config, ErrorKind, IdStrategy, SyncError};
pub use repositories::{MemoryStore, RemoteStore};
