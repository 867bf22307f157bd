//! Chat services - chat screens, chat list and chat creation

use crate::cache::{Origin, WindowView};
use crate::core::{AppState, SyncError, with_deadline};
use crate::dtos::{ChatRecord, GroupDraftDTO};
use crate::entities::{Chat, ChatKind, GroupInfo, LastMessageSummary, Message, generate_id};
use crate::repositories::{RemoteStore, paths};
use crate::services::fanout::FanOut;
use crate::services::{history, user};
use crate::sync::{Watched, watch_chat_meta, watch_messages, watch_typing};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// An open chat screen: the message window, the chat record and who is typing,
/// all kept live until the view is closed or dropped.
pub struct ChatView<S: RemoteStore> {
    state: Arc<AppState<S>>,
    chat_id: String,
    messages: Watched<Arc<WindowView>>,
    meta: Watched<Option<Chat>>,
    typing: Watched<BTreeSet<String>>,
}

impl<S: RemoteStore> ChatView<S> {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn window(&self) -> Arc<WindowView> {
        self.messages.get()
    }

    pub fn chat(&self) -> Option<Chat> {
        self.meta.get()
    }

    /// Users typing, without `viewer`.
    pub fn typing_users(&self, viewer: &str) -> Vec<String> {
        self.typing.get().into_iter().filter(|uid| uid != viewer).collect()
    }

    /// Next change of the message window.
    pub async fn changed(&mut self) -> Option<Arc<WindowView>> {
        self.messages.changed().await
    }

    /// Waits until the window satisfies `predicate`.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&Arc<WindowView>) -> bool) -> Option<Arc<WindowView>> {
        self.messages.wait_for(predicate).await
    }

    pub async fn load_older(&self) -> Result<usize, SyncError> {
        history::load_older(&self.state, &self.chat_id).await
    }

    /// Stops the live feeds of this screen. In-flight sends keep going.
    pub fn close(&self) {
        self.messages.unsubscribe();
        self.meta.unsubscribe();
        self.typing.unsubscribe();
        debug!(chat_id = %self.chat_id, "Chat view closed");
    }
}

/// Opens a chat screen: first page, then the live feeds.
///
/// A failed first page is not fatal; the live range fills the window once the
/// store answers.
#[instrument(skip(state), fields(chat_id = %chat_id))]
pub async fn open_chat<S: RemoteStore>(state: &Arc<AppState<S>>, chat_id: &str) -> Result<ChatView<S>, SyncError> {
    paths::chat(chat_id)?;

    let loaded = state.messages.read(chat_id, |window| window.initial_loaded());
    if !loaded {
        if let Err(e) = history::load_initial(state, chat_id).await {
            warn!(error = %e, "First page not loaded, relying on the live feed");
        }
    }

    let messages = watch_messages(state, chat_id, state.config.page_size)?;
    let meta = watch_chat_meta(state, chat_id)?;
    let typing = watch_typing(state, chat_id)?;
    info!("Chat opened");

    Ok(ChatView {
        state: state.clone(),
        chat_id: chat_id.to_string(),
        messages,
        meta,
        typing,
    })
}

/// Chat record, from the cache when loaded.
#[instrument(skip(state), fields(chat_id = %chat_id))]
pub async fn get_chat<S: RemoteStore>(state: &AppState<S>, chat_id: &str) -> Result<Option<Chat>, SyncError> {
    if let Some(chat) = state.chats.get(chat_id) {
        return Ok(Some(chat));
    }
    let chat = with_deadline("load chat", state.config.read_timeout, state.chat.find_by_id(chat_id)).await?;
    if let Some(chat) = &chat {
        state.chats.publish(chat_id, Some(chat.clone()));
    }
    Ok(chat)
}

/// Chat ids of `uid`, read once from the reverse index.
#[instrument(skip(state), fields(uid = %uid))]
pub async fn get_user_chats<S: RemoteStore>(state: &AppState<S>, uid: &str) -> Result<BTreeSet<String>, SyncError> {
    let ids = with_deadline(
        "load user chats",
        state.config.read_timeout,
        state.chat.find_ids_by_user(uid),
    )
    .await?;
    debug!(count = ids.len(), "User chats loaded");
    state.user_chats.publish(uid, ids.clone());
    Ok(ids)
}

/// Direct chat between two users. Idempotent: the id is derived from the
/// sorted pair, and a second call returns the chat the first one created.
#[instrument(skip(state), fields(uid_a = %uid_a, uid_b = %uid_b))]
pub async fn create_direct_chat<S: RemoteStore>(state: &AppState<S>, uid_a: &str, uid_b: &str) -> Result<Chat, SyncError> {
    if uid_a == uid_b {
        return Err(SyncError::bad_request("Cannot create a direct chat with yourself"));
    }
    let chat_id = Chat::direct_id(uid_a, uid_b);
    paths::chat(&chat_id)?;

    if let Some(existing) = get_chat(state, &chat_id).await? {
        if existing.kind != ChatKind::Direct {
            warn!("Chat id already used by a group");
            return Err(SyncError::conflict("Chat id already in use").with_details(chat_id));
        }
        debug!("Direct chat already exists");
        return Ok(existing);
    }

    // Field-level writes: a racing creator lands on the same fields and an
    // existing lastMessage is never clobbered.
    let now = Utc::now().timestamp_millis();
    let mut fan = FanOut::new("create direct chat");
    fan.set(paths::chat_field(&chat_id, "id")?, chat_id.as_str())
        .set(paths::chat_field(&chat_id, "type")?, "direct")
        .set(paths::chat_participant(&chat_id, uid_a)?, true)
        .set(paths::chat_participant(&chat_id, uid_b)?, true)
        .set(paths::chat_field(&chat_id, "createdAt")?, now)
        .set(paths::chat_field(&chat_id, "updatedAt")?, now)
        .set(paths::user_chat(uid_a, &chat_id)?, true)
        .set(paths::user_chat(uid_b, &chat_id)?, true);
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    let stored = with_deadline("reload chat", state.config.read_timeout, state.chat.find_by_id(&chat_id))
        .await
        .ok()
        .flatten();
    let chat = stored.unwrap_or_else(|| Chat {
        id: chat_id.clone(),
        kind: ChatKind::Direct,
        participant_ids: BTreeSet::from([uid_a.to_string(), uid_b.to_string()]),
        group_info: None,
        last_message: None,
        last_message_time: None,
        created_at: now,
        updated_at: now,
    });

    state.chats.publish(&chat_id, Some(chat.clone()));
    info!(chat_id = %chat_id, "Direct chat created");
    Ok(chat)
}

/// New group owned by `owner_id`. The chat record, one reverse-index entry per
/// member and the "created" system message go out in one fan-out.
#[instrument(skip(state, draft), fields(owner_id = %owner_id, name = %draft.name))]
pub async fn create_group_chat<S: RemoteStore>(
    state: &AppState<S>,
    owner_id: &str,
    draft: GroupDraftDTO,
) -> Result<Chat, SyncError> {
    debug!("Creating group chat");
    draft.validate()?;

    // owner first, duplicates dropped
    let mut member_ids = vec![owner_id.to_string()];
    for uid in &draft.member_ids {
        if !member_ids.contains(uid) {
            member_ids.push(uid.clone());
        }
    }
    if member_ids.len() < 2 {
        return Err(SyncError::bad_request("A group needs at least one other member"));
    }

    let now = Utc::now().timestamp_millis();
    let chat_id = generate_id("group", now);
    let owner_name = user::display_name(state, owner_id).await;
    let system = Message::system(&chat_id, format!("{owner_name} created the group {}", draft.name.trim()), now);

    let chat = Chat {
        id: chat_id.clone(),
        kind: ChatKind::Group,
        participant_ids: member_ids.iter().cloned().collect(),
        group_info: Some(GroupInfo {
            name: draft.name.trim().to_string(),
            description: draft.description.filter(|d| !d.trim().is_empty()),
            photo_ref: draft.photo_ref,
            owner_id: owner_id.to_string(),
            admin_ids: BTreeSet::from([owner_id.to_string()]),
            member_ids: member_ids.clone(),
        }),
        last_message: Some(LastMessageSummary::from(&system)),
        last_message_time: Some(now),
        created_at: now,
        updated_at: now,
    };

    let mut fan = FanOut::new("create group chat");
    fan.set(paths::chat(&chat_id)?, ChatRecord::from(&chat).to_value()?);
    for uid in &member_ids {
        fan.set(paths::user_chat(uid, &chat_id)?, true);
    }
    fan.stage_message(&system)?;
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    state.chats.publish(&chat_id, Some(chat.clone()));
    state.messages.upsert_batch(&chat_id, vec![system], Origin::Remote);
    info!(chat_id = %chat_id, members = member_ids.len(), "Group chat created");
    Ok(chat)
}
