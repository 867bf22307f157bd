//! Cache module - local state observed by the UI
//!
//! Everything here is synchronous and lock-scoped; network work happens in
//! `services` and `sync`, which feed results in through these types.

pub mod board;
pub mod messages;
pub mod pending;
pub mod typing;
pub mod window;

pub use board::{ChatBoard, PresenceBoard, UserChatsBoard, WatchBoard};
pub use messages::MessageCache;
pub use pending::{PendingMutation, PendingMutations};
pub use typing::TypingBoard;
pub use window::{CachedMessage, ChatMessageWindow, Origin, WindowView};
