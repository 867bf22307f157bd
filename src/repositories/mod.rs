//! Repositories module - access to the remote store
//!
//! `traits` defines the store contract, `paths` the layout of the tree and
//! `memory` the in-process store. Every other file is a typed repository that
//! turns raw snapshots into entities for one area of the tree.

pub mod chat;
pub mod memory;
pub mod message;
pub mod paths;
pub mod presence;
pub mod traits;
pub mod user;

// Re-esportazione dei tipi del contratto per facilitare l'import
pub use memory::{MemoryStore, WriteOp, WriteRecord};
pub use paths::StorePath;
pub use traits::{
    Bound, Limit, Query, RangeQuery, RemoteStore, Snapshot, SnapshotStream, StoreError, StoreResult,
};

// Re-esportazione delle struct dei repository
pub use chat::ChatRepository;
pub use message::MessageRepository;
pub use presence::PresenceRepository;
pub use user::UserRepository;
