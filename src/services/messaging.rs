//! Messaging services - optimistic sends, deletions and receipts
//!
//! A send is visible in the window before this module touches the network:
//! the placeholder is inserted synchronously, the write runs on its own task
//! and settles the entry to `Sent` or `Failed`. Sends are never cancelled by
//! closing a chat, so a reopened window sees the settled state.

use crate::cache::PendingMutation;
use crate::core::{AppState, IdStrategy, SyncError, best_effort, with_deadline};
use crate::dtos::{LastMessageRecord, OutgoingTextDTO};
use crate::entities::{
    DELETED_PLACEHOLDER, DeliveryState, ForwardedFrom, LastMessageSummary, Message, MessageBody, MessageType,
    generate_id,
};
use crate::repositories::{RemoteStore, paths};
use crate::services::fanout::FanOut;
use crate::services::typing;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

/// Handle of an optimistic send. `local_id` is already in the window.
#[derive(Debug)]
pub struct SendTicket {
    pub local_id: String,
    delivery: JoinHandle<DeliveryState>,
}

impl SendTicket {
    /// Waits for the write to settle. Dropping the ticket does not cancel it.
    pub async fn outcome(self) -> DeliveryState {
        self.delivery.await.unwrap_or(DeliveryState::Failed)
    }
}

// ============================================================================
// Sending
// ============================================================================

#[instrument(skip(state, text), fields(chat_id = %chat_id, sender_id = %sender_id))]
pub fn send_text<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    chat_id: &str,
    sender_id: &str,
    text: &str,
    reply_to_id: Option<&str>,
) -> Result<SendTicket, SyncError> {
    let dto = OutgoingTextDTO::new(text, reply_to_id);
    dto.validate()?;

    let now = Utc::now().timestamp_millis();
    let mut draft = Message::new(
        generate_id("local", now),
        chat_id,
        sender_id,
        MessageBody::Text { text: dto.text },
        now,
    );
    draft.reply_to_id = dto.reply_to_id;
    send_draft(state, draft)
}

#[instrument(skip(state), fields(chat_id = %chat_id, sender_id = %sender_id))]
pub fn send_image<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    chat_id: &str,
    sender_id: &str,
    image_ref: &str,
) -> Result<SendTicket, SyncError> {
    if image_ref.trim().is_empty() {
        return Err(SyncError::bad_request("Image reference is required"));
    }
    let now = Utc::now().timestamp_millis();
    let body = MessageBody::Image {
        image_ref: image_ref.to_string(),
    };
    send_draft(state, Message::new(generate_id("local", now), chat_id, sender_id, body, now))
}

#[instrument(skip(state), fields(chat_id = %chat_id, sender_id = %sender_id))]
pub fn send_file<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    chat_id: &str,
    sender_id: &str,
    file_ref: &str,
    name: &str,
    mime_type: &str,
) -> Result<SendTicket, SyncError> {
    if file_ref.trim().is_empty() || name.trim().is_empty() {
        return Err(SyncError::bad_request("File reference and name are required"));
    }
    let now = Utc::now().timestamp_millis();
    let body = MessageBody::File {
        file_ref: file_ref.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
    };
    send_draft(state, Message::new(generate_id("local", now), chat_id, sender_id, body, now))
}

/// Sends a copy of `original` to `target_chat_id`, keeping its provenance.
#[instrument(skip(state, original), fields(message_id = %original.id, target_chat_id = %target_chat_id))]
pub fn forward_message<S: RemoteStore>(
    state: &Arc<AppState<S>>,
    original: &Message,
    target_chat_id: &str,
    sender_id: &str,
) -> Result<SendTicket, SyncError> {
    if original.deleted_for_all {
        return Err(SyncError::bad_request("Deleted messages cannot be forwarded").with_details(original.id.clone()));
    }
    if original.message_type == MessageType::System {
        return Err(SyncError::bad_request("System messages cannot be forwarded"));
    }

    // a forward of a forward points at the first author
    let provenance = match &original.forwarded_from {
        Some(from) => from.clone(),
        None => ForwardedFrom {
            source_chat_id: original.chat_id.clone(),
            source_message_id: original.id.clone(),
            original_sender_id: original.sender_id.clone(),
        },
    };

    let now = Utc::now().timestamp_millis();
    let mut draft = Message::new(
        generate_id("local", now),
        target_chat_id,
        sender_id,
        original.body.clone(),
        now,
    );
    draft.forwarded_from = Some(provenance);
    send_draft(state, draft)
}

/// Sends a fully built message. `draft.id` becomes the local id.
///
/// The placeholder is in the window when this returns; the write settles in
/// the background.
#[instrument(skip(state, draft), fields(chat_id = %draft.chat_id, local_id = %draft.id))]
pub fn send_draft<S: RemoteStore>(state: &Arc<AppState<S>>, draft: Message) -> Result<SendTicket, SyncError> {
    paths::message(&draft.chat_id, &draft.id)?;
    paths::typing_entry(&draft.chat_id, &draft.sender_id)?;
    let attempt = state.pending.begin(&draft)?;
    let local_id = draft.id.clone();

    let inserted = state
        .messages
        .update(&draft.chat_id, |window| window.insert_optimistic(draft.clone()));
    if !inserted {
        // the store already holds this id
        state.pending.complete(&local_id);
        return Err(SyncError::conflict("Message already sent").with_details(local_id));
    }

    // sending ends the sender's typing state
    if let Err(e) = typing::clear_typing(state, &draft.chat_id, &draft.sender_id) {
        warn!(error = %e, "Typing state not cleared");
    }

    debug!(attempt, "Optimistic entry inserted");
    let delivery = tokio::spawn(deliver(state.clone(), draft));
    Ok(SendTicket { local_id, delivery })
}

/// Resends a failed entry under the same local id.
#[instrument(skip(state), fields(chat_id = %chat_id, local_id = %local_id))]
pub fn resend<S: RemoteStore>(state: &Arc<AppState<S>>, chat_id: &str, local_id: &str) -> Result<SendTicket, SyncError> {
    let pending = failed_draft(state, chat_id, local_id)?;
    info!(attempts = pending.attempts, "Resending failed message");
    send_draft(state, pending.draft)
}

/// Drops a failed entry from the window without sending it.
#[instrument(skip(state), fields(chat_id = %chat_id, local_id = %local_id))]
pub fn discard_failed<S: RemoteStore>(state: &AppState<S>, chat_id: &str, local_id: &str) -> Result<(), SyncError> {
    failed_draft(state, chat_id, local_id)?;
    state.pending.remove(local_id);
    state.messages.update(chat_id, |window| window.remove(local_id));
    info!("Failed message discarded");
    Ok(())
}

fn failed_draft<S: RemoteStore>(state: &AppState<S>, chat_id: &str, local_id: &str) -> Result<PendingMutation, SyncError> {
    let local_state = state
        .messages
        .read(chat_id, |window| window.get(local_id).map(|m| m.state));
    match local_state {
        Some(DeliveryState::Failed) => {}
        Some(_) => {
            return Err(SyncError::conflict("Message is not in a failed state").with_details(local_id.to_string()));
        }
        None => return Err(SyncError::not_found("Message not found").with_details(local_id.to_string())),
    }
    state
        .pending
        .get(local_id)
        .filter(|p| p.chat_id == chat_id)
        .ok_or_else(|| SyncError::not_found("No draft to resend").with_details(local_id.to_string()))
}

async fn deliver<S: RemoteStore>(state: Arc<AppState<S>>, draft: Message) -> DeliveryState {
    let local_id = draft.id.clone();
    let chat_id = draft.chat_id.clone();

    match write_message(&state, draft).await {
        Ok(confirmed) => {
            state.pending.complete(&local_id);
            let store_id = confirmed.id.clone();
            state.messages.update(&chat_id, |window| {
                if confirmed.id == local_id {
                    window.mark_state(&local_id, DeliveryState::Sent);
                } else {
                    window.reconcile(&local_id, confirmed);
                }
            });
            info!(chat_id = %chat_id, local_id = %local_id, store_id = %store_id, "Message sent");
            DeliveryState::Sent
        }
        Err(e) => {
            state.pending.fail(&local_id);
            // a push may have confirmed it meanwhile; never downgrade that
            state.messages.update(&chat_id, |window| {
                if window.get(&local_id).is_some_and(|m| m.state == DeliveryState::Pending) {
                    window.mark_state(&local_id, DeliveryState::Failed);
                }
            });
            error!(chat_id = %chat_id, local_id = %local_id, error = %e, "Message send failed");
            DeliveryState::Failed
        }
    }
}

/// Writes the record and the chat's last-message fields in one fan-out.
/// Returns the message as stored (its id differs under store-assigned ids).
async fn write_message<S: RemoteStore>(state: &AppState<S>, draft: Message) -> Result<Message, SyncError> {
    let deadline = Instant::now() + state.config.write_timeout;
    let mut message = draft;

    if state.config.id_strategy == IdStrategy::StoreAssigned {
        let known = state.pending.get(&message.id).and_then(|p| p.target_id);
        let store_id = match known {
            Some(id) => id,
            None => {
                let limit = deadline.saturating_duration_since(Instant::now());
                let id = with_deadline("allocate message id", limit, state.msg.allocate_id(&message.chat_id)).await?;
                state.pending.set_target(&message.id, &id);
                id
            }
        };
        let local_id = std::mem::replace(&mut message.id, store_id);
        message.client_ref = Some(local_id);
    }

    let mut fan = FanOut::new("send message");
    fan.stage_message(&message)?;
    fan.stage_last_message(&message)?;
    fan.commit(state.store.as_ref(), deadline.saturating_duration_since(Instant::now()))
        .await?;
    Ok(message)
}

// ============================================================================
// Deletion
// ============================================================================

/// Local state of a message, if it is in the window.
fn local_state<S: RemoteStore>(state: &AppState<S>, chat_id: &str, message_id: &str) -> Option<DeliveryState> {
    state
        .messages
        .read(chat_id, |window| window.get(message_id).map(|m| m.state))
}

fn require_sent(local: Option<DeliveryState>, message_id: &str) -> Result<(), SyncError> {
    match local {
        Some(DeliveryState::Pending) | Some(DeliveryState::Failed) => {
            Err(SyncError::conflict("Message has not been sent yet").with_details(message_id.to_string()))
        }
        _ => Ok(()),
    }
}

/// Hides a message for `uid` only.
#[instrument(skip(state), fields(chat_id = %chat_id, message_id = %message_id, uid = %uid))]
pub async fn delete_for_me<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    message_id: &str,
    uid: &str,
) -> Result<(), SyncError> {
    require_sent(local_state(state, chat_id, message_id), message_id)?;

    with_deadline(
        "delete for me",
        state.config.write_timeout,
        state.msg.hide_for(chat_id, message_id, uid),
    )
    .await?;

    state.messages.update(chat_id, |window| {
        window.patch(message_id, |m| {
            m.deleted_for.insert(uid.to_string());
        })
    });
    info!("Message hidden for user");
    Ok(())
}

/// Replaces a message with the placeholder for every participant.
#[instrument(skip(state), fields(chat_id = %chat_id, message_id = %message_id))]
pub async fn delete_for_everyone<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    message_id: &str,
) -> Result<(), SyncError> {
    debug!("Deleting message for everyone");
    // 1. Locate the message: window first, store otherwise
    // 2. Only a stored message can be tombstoned
    // 3. One fan-out: tombstone fields, payload removed, preview updated if it is the last message
    // 4. Apply the tombstone locally after the write succeeded

    let local = local_state(state, chat_id, message_id);
    require_sent(local, message_id)?;

    let cached = state
        .messages
        .read(chat_id, |window| window.get(message_id).map(|m| m.message.clone()));
    let message = match cached {
        Some(message) => message,
        None => with_deadline(
            "load message",
            state.config.read_timeout,
            state.msg.find_by_id(chat_id, message_id),
        )
        .await?
        .ok_or_else(|| SyncError::not_found("Message not found").with_details(message_id.to_string()))?,
    };

    if message.deleted_for_all {
        debug!("Message already deleted for everyone");
        return Ok(());
    }

    let mut fan = FanOut::new("delete for everyone");
    fan.set(paths::message_field(chat_id, message_id, "deletedForAll")?, true)
        .set(paths::message_field(chat_id, message_id, "text")?, DELETED_PLACEHOLDER)
        .set(paths::message_field(chat_id, message_id, "type")?, "text");
    for field in ["imageRef", "fileRef", "fileName", "mimeType"] {
        fan.delete(paths::message_field(chat_id, message_id, field)?);
    }

    // the cached record may predate the latest send, prefer the store's
    let chat = match best_effort("load chat", state.config.read_timeout, state.chat.find_by_id(chat_id)).await {
        Some(stored) => stored,
        None => state.chats.get(chat_id),
    };
    let is_last = chat
        .as_ref()
        .and_then(|c| c.last_message.as_ref())
        .is_some_and(|last| last.message_id == message_id);
    let mut tombstoned = message.clone();
    tombstoned.tombstone();
    let summary = LastMessageSummary::from(&tombstoned);
    if is_last {
        fan.set(
            paths::chat_field(chat_id, "lastMessage")?,
            LastMessageRecord::from(&summary).to_value()?,
        );
    }

    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    state
        .messages
        .update(chat_id, |window| window.patch(message_id, |m| m.tombstone()));
    if is_last {
        state.chats.modify(chat_id, |c| c.last_message = Some(summary));
    }
    info!("Message deleted for everyone");
    Ok(())
}

// ============================================================================
// Receipts
// ============================================================================

#[instrument(skip(state), fields(chat_id = %chat_id, message_id = %message_id, uid = %uid))]
pub async fn mark_read<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    message_id: &str,
    uid: &str,
) -> Result<(), SyncError> {
    let already = state.messages.read(chat_id, |window| {
        window
            .get(message_id)
            .map(|m| m.message.sender_id == uid || m.message.read_by.contains_key(uid))
    });
    if already == Some(true) {
        debug!("Nothing to mark");
        return Ok(());
    }

    let now = Utc::now().timestamp_millis();
    let read_at = with_deadline(
        "mark read",
        state.config.write_timeout,
        state.msg.mark_read(chat_id, message_id, uid, now),
    )
    .await?;

    state.messages.update(chat_id, |window| {
        window.patch(message_id, |m| {
            m.read_by.entry(uid.to_string()).or_insert(read_at);
        })
    });
    Ok(())
}

#[instrument(skip(state), fields(chat_id = %chat_id, message_id = %message_id, uid = %uid))]
pub async fn mark_delivered<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    message_id: &str,
    uid: &str,
) -> Result<(), SyncError> {
    let already = state.messages.read(chat_id, |window| {
        window
            .get(message_id)
            .map(|m| m.message.sender_id == uid || m.message.delivered_to.contains(uid))
    });
    if already == Some(true) {
        return Ok(());
    }

    with_deadline(
        "mark delivered",
        state.config.write_timeout,
        state.msg.mark_delivered(chat_id, message_id, uid),
    )
    .await?;

    state.messages.update(chat_id, |window| {
        window.patch(message_id, |m| {
            m.delivered_to.insert(uid.to_string());
        })
    });
    Ok(())
}

/// Marks every loaded message of others as read by `uid`. Returns how many were marked.
#[instrument(skip(state), fields(chat_id = %chat_id, uid = %uid))]
pub async fn mark_chat_read<S: RemoteStore>(state: &AppState<S>, chat_id: &str, uid: &str) -> Result<usize, SyncError> {
    let unread: Vec<String> = state.messages.read(chat_id, |window| {
        window
            .view()
            .messages
            .into_iter()
            .filter(|m| m.state == DeliveryState::Sent)
            .filter(|m| m.message.sender_id != uid && !m.message.read_by.contains_key(uid))
            .map(|m| m.message.id)
            .collect()
    });

    let results = join_all(unread.iter().map(|id| mark_read(state, chat_id, id, uid))).await;
    let marked = results.iter().filter(|r| r.is_ok()).count();
    if let Some(Err(e)) = results.into_iter().find(|r| r.is_err()) {
        warn!(marked, error = %e, "Some read receipts were not written");
        return Err(e);
    }
    debug!(marked, "Chat marked as read");
    Ok(marked)
}
