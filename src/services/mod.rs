//! Services module - the operations exposed to the UI layer
//!
//! Each file covers one area. Services read through the repositories, write
//! through `FanOut` when more than one location changes, and update the caches
//! only with results the store has accepted (optimistic sends excepted).

pub mod chat;
pub mod fanout;
pub mod history;
pub mod membership;
pub mod messaging;
pub mod presence;
pub mod typing;
pub mod user;

// Re-exports per facilitare l'import
pub use chat::{ChatView, create_direct_chat, create_group_chat, get_chat, get_user_chats, open_chat};
pub use fanout::FanOut;
pub use history::{load_initial, load_older};
pub use membership::{add_admin, add_members, leave_group, remove_admin, remove_members, update_group_info};
pub use messaging::{
    SendTicket, delete_for_everyone, delete_for_me, discard_failed, forward_message, mark_chat_read,
    mark_delivered, mark_read, resend, send_draft, send_file, send_image, send_text,
};
pub use presence::{PresenceSession, app_background, app_foreground, connection_lost, get_presence, go_online, logout};
pub use typing::{TypingTimers, clear_typing, set_typing};
pub use user::{display_name, fetch_user};
