//! Entities module - typed domain records
//!
//! These are the only shapes the cache and the services work with. Raw store
//! payloads are coerced into them at the adapter boundary (see `dtos`).

pub mod chat;
pub mod enums;
pub mod message;
pub mod presence;
pub mod user;

// Re-exports per facilitare l'import
pub use chat::{Chat, GroupInfo, LastMessageSummary};
pub use enums::{ChatKind, DeliveryState, MessageType, PresenceStatus, UserRole};
pub use message::{DELETED_PLACEHOLDER, ForwardedFrom, Message, MessageBody, SYSTEM_SENDER, generate_id};
pub use presence::PresenceRecord;
pub use user::User;
