//! Sync module - live subscriptions and the merge engine
//!
//! Replaces the push side of a websocket server: instead of fanning messages
//! out to sockets, feeds pull snapshots from the store and fold them into the
//! caches that the UI observes.

mod feeds;
pub mod guard;
mod merge;
pub mod registry;
pub mod watch;

pub use guard::{SubscriptionGuard, Watched};
pub use registry::{SubscriptionKey, SubscriptionRegistry};
pub use watch::{watch_chat_meta, watch_messages, watch_presence, watch_typing, watch_user_chats};
