//! Public watch functions
//!
//! Each call joins (or starts) the feed for its key and returns a
//! [`Watched`] over the cache cell that feed writes into.

use super::feeds::{chat_meta_feed, message_feed, presence_feed, typing_feed, user_chats_feed};
use super::guard::{SubscriptionGuard, Watched};
use super::registry::SubscriptionKey;
use crate::cache::WindowView;
use crate::core::{AppState, SyncError};
use crate::entities::{Chat, PresenceRecord};
use crate::repositories::RemoteStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

fn guard<S: RemoteStore>(state: &AppState<S>, key: SubscriptionKey, generation: u64) -> SubscriptionGuard {
    SubscriptionGuard::new(state.subscriptions.clone(), key, generation)
}

/// Live "newest `page_size`" range of a chat merged into its window.
///
/// A second watcher of the same chat shares the running feed and its page size.
#[instrument(skip(state), fields(chat_id = %chat_id))]
pub fn watch_messages<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    chat_id: &str,
    page_size: usize,
) -> Result<Watched<Arc<WindowView>>, SyncError> {
    let key = SubscriptionKey::Messages(chat_id.to_string());
    let query = state.msg.live_query(chat_id, page_size)?;
    let generation = state.subscriptions.acquire(key.clone(), |shutdown| {
        let stream = state.store.subscribe(query)?;
        Ok(tokio::spawn(message_feed(
            state.clone(),
            chat_id.to_string(),
            page_size,
            stream,
            shutdown,
        )))
    })?;
    Ok(Watched::new(state.messages.subscribe(chat_id), guard(state, key, generation)))
}

#[instrument(skip(state), fields(chat_id = %chat_id))]
pub fn watch_chat_meta<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    chat_id: &str,
) -> Result<Watched<Option<Chat>>, SyncError> {
    let key = SubscriptionKey::ChatMeta(chat_id.to_string());
    let query = state.chat.meta_query(chat_id)?;
    let generation = state.subscriptions.acquire(key.clone(), |shutdown| {
        let stream = state.store.subscribe(query)?;
        Ok(tokio::spawn(chat_meta_feed(state.clone(), chat_id.to_string(), stream, shutdown)))
    })?;
    Ok(Watched::new(state.chats.subscribe(chat_id), guard(state, key, generation)))
}

/// Users typing in a chat, stale flags already dropped.
#[instrument(skip(state), fields(chat_id = %chat_id))]
pub fn watch_typing<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    chat_id: &str,
) -> Result<Watched<BTreeSet<String>>, SyncError> {
    let key = SubscriptionKey::Typing(chat_id.to_string());
    let query = state.presence.typing_query(chat_id)?;
    let generation = state.subscriptions.acquire(key.clone(), |shutdown| {
        let stream = state.store.subscribe(query)?;
        Ok(tokio::spawn(typing_feed(state.clone(), chat_id.to_string(), stream, shutdown)))
    })?;
    Ok(Watched::new(state.typing.subscribe(chat_id), guard(state, key, generation)))
}

#[instrument(skip(state), fields(uid = %uid))]
pub fn watch_presence<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    uid: &str,
) -> Result<Watched<Option<PresenceRecord>>, SyncError> {
    let key = SubscriptionKey::Presence(uid.to_string());
    let query = state.presence.presence_query(uid)?;
    let generation = state.subscriptions.acquire(key.clone(), |shutdown| {
        let stream = state.store.subscribe(query)?;
        Ok(tokio::spawn(presence_feed(state.clone(), uid.to_string(), stream, shutdown)))
    })?;
    Ok(Watched::new(state.presence_board.subscribe(uid), guard(state, key, generation)))
}

/// Chat ids of `uid` from the reverse index. Eventually consistent with fan-out writes.
#[instrument(skip(state), fields(uid = %uid))]
pub fn watch_user_chats<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    uid: &str,
) -> Result<Watched<BTreeSet<String>>, SyncError> {
    let key = SubscriptionKey::UserChats(uid.to_string());
    let query = state.chat.user_chats_query(uid)?;
    let generation = state.subscriptions.acquire(key.clone(), |shutdown| {
        let stream = state.store.subscribe(query)?;
        Ok(tokio::spawn(user_chats_feed(state.clone(), uid.to_string(), stream, shutdown)))
    })?;
    Ok(Watched::new(state.user_chats.subscribe(uid), guard(state, key, generation)))
}
