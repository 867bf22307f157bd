//! Core Module - infrastructure shared by every service
//!
//! - Configuration
//! - Error handling
//! - Deadlines for remote calls
//! - Advisory permission checks
//! - Process-scoped state

pub mod config;
pub mod deadline;
pub mod error;
pub mod permissions;
pub mod state;

// Re-exports per facilitare l'import
pub use config::{Config, IdStrategy};
pub use deadline::{best_effort, with_deadline};
pub use error::{ErrorKind, SyncError};
pub use permissions::{require_group, require_participant, require_role};
pub use state::AppState;
