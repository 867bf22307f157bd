//! DTOs module - serialization boundary with the remote store
//!
//! Records coming from the store are loosely shaped (missing fields, legacy
//! aliases, participants as array or map). Everything is coerced here into the
//! strongly typed entities; nothing unvalidated reaches the cache.

pub mod chat;
pub mod message;
pub mod presence;
pub mod user;
pub mod wire;

pub use chat::{
    ChatRecord, GroupDraftDTO, GroupInfoPatchDTO, GroupInfoRecord, LastMessageRecord, decode_chat,
    decode_chat_ids,
};
pub use message::{MessageRecord, OutgoingTextDTO, decode_message, decode_message_map};
pub use presence::{PresenceRecordDTO, decode_presence, decode_typing};
pub use user::{UserRecord, decode_user};
pub use wire::IdSet;
