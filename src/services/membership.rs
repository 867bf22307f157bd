//! Membership services - group members, admins and group info
//!
//! Every operation follows the same shape: advisory role check against the
//! loaded chat record, one fan-out write, and only after it succeeded the
//! local chat record and the system message are applied. Nothing is updated
//! optimistically here.

use crate::cache::Origin;
use crate::core::{AppState, SyncError, require_group, require_participant, require_role};
use crate::dtos::{GroupInfoPatchDTO, IdSet};
use crate::entities::{Chat, LastMessageSummary, Message, UserRole};
use crate::repositories::{RemoteStore, paths};
use crate::services::chat::get_chat;
use crate::services::fanout::FanOut;
use crate::services::user::{display_name, display_names};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

const MANAGERS: &[UserRole] = &[UserRole::Owner, UserRole::Admin];

async fn load_chat<S: RemoteStore>(state: &AppState<S>, chat_id: &str) -> Result<Chat, SyncError> {
    get_chat(state, chat_id).await?.ok_or_else(|| {
        warn!("Chat not found: {}", chat_id);
        SyncError::not_found("Chat not found").with_details(chat_id.to_string())
    })
}

fn admins_value(admins: &BTreeSet<String>) -> Result<Value, SyncError> {
    Ok(serde_json::to_value(IdSet::from_ids(admins))?)
}

/// Applies a committed change locally: the chat record and its system message.
fn apply_committed<S: RemoteStore>(state: &AppState<S>, mut chat: Chat, system: Message) {
    chat.last_message = Some(LastMessageSummary::from(&system));
    chat.last_message_time = Some(system.timestamp);
    chat.updated_at = system.timestamp;
    state.chats.publish(&chat.id, Some(chat.clone()));
    state.messages.upsert_batch(&chat.id, vec![system], Origin::Remote);
}

fn forget_chat_for<S: RemoteStore>(state: &AppState<S>, uid: &str, chat_id: &str) {
    let mut ids = state.user_chats.get(uid);
    if ids.remove(chat_id) {
        state.user_chats.publish(uid, ids);
    }
}

/// Adds users to a group. Ids already in the group are skipped; returns the
/// ids actually added.
#[instrument(skip(state, new_member_ids), fields(chat_id = %chat_id, actor_id = %actor_id))]
pub async fn add_members<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    new_member_ids: &[String],
    actor_id: &str,
) -> Result<Vec<String>, SyncError> {
    debug!("Adding members to group");
    // 1. Advisory check: actor must be owner or admin of the loaded chat
    // 2. Drop ids already in the group
    // 3. One fan-out: participants, member list, reverse index, system message, last message
    // 4. Apply locally once the store accepted it

    let chat = load_chat(state, chat_id).await?;
    let info = require_group(&chat)?;
    require_role(&chat, actor_id, MANAGERS)?;

    let mut added: Vec<String> = Vec::new();
    for uid in new_member_ids {
        paths::validate_key(uid)?;
        if !chat.is_participant(uid) && !added.contains(uid) {
            added.push(uid.clone());
        }
    }
    if added.is_empty() {
        debug!("Every user is already a member");
        return Ok(added);
    }

    let mut member_ids = info.member_ids.clone();
    member_ids.extend(added.iter().cloned());

    let actor_name = display_name(state, actor_id).await;
    let names = display_names(state, &added).await;
    let now = Utc::now().timestamp_millis();
    let system = Message::system(chat_id, format!("{actor_name} added {}", names.join(", ")), now);

    let mut fan = FanOut::new("add members");
    for uid in &added {
        fan.set(paths::chat_participant(chat_id, uid)?, true)
            .set(paths::user_chat(uid, chat_id)?, true);
    }
    fan.set(paths::group_field(chat_id, "members")?, member_ids.clone());
    fan.stage_message(&system)?.stage_last_message(&system)?;
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    let mut updated = chat.clone();
    updated.participant_ids.extend(added.iter().cloned());
    if let Some(info) = updated.group_info.as_mut() {
        info.member_ids = member_ids;
    }
    apply_committed(state, updated, system);
    info!(added = added.len(), "Members added");
    Ok(added)
}

/// Removes users from a group. The owner can never be removed, and an admin
/// can only remove plain members. Returns the ids actually removed.
#[instrument(skip(state, member_ids), fields(chat_id = %chat_id, actor_id = %actor_id))]
pub async fn remove_members<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    member_ids: &[String],
    actor_id: &str,
) -> Result<Vec<String>, SyncError> {
    let chat = load_chat(state, chat_id).await?;
    let info = require_group(&chat)?;
    let actor_role = require_role(&chat, actor_id, MANAGERS)?;

    let mut removed: Vec<String> = Vec::new();
    for uid in member_ids {
        if uid == actor_id {
            return Err(SyncError::bad_request("Use leave to exit a group"));
        }
        match chat.role_of(uid) {
            None => debug!(uid = %uid, "Not a member, skipping"),
            Some(UserRole::Owner) => {
                warn!("Attempted to remove the owner of the group");
                return Err(SyncError::forbidden("You cannot remove the owner of the group"));
            }
            Some(UserRole::Admin) if actor_role != UserRole::Owner => {
                warn!("Admin attempted to remove another admin");
                return Err(SyncError::forbidden("Only the owner can remove an admin"));
            }
            Some(_) => {
                if !removed.contains(uid) {
                    removed.push(uid.clone());
                }
            }
        }
    }
    if removed.is_empty() {
        return Ok(removed);
    }

    let member_list: Vec<String> = info
        .member_ids
        .iter()
        .filter(|uid| !removed.contains(uid))
        .cloned()
        .collect();
    let admins: BTreeSet<String> = info
        .admin_ids
        .iter()
        .filter(|uid| !removed.contains(uid))
        .cloned()
        .collect();

    let actor_name = display_name(state, actor_id).await;
    let names = display_names(state, &removed).await;
    let now = Utc::now().timestamp_millis();
    let system = Message::system(chat_id, format!("{actor_name} removed {}", names.join(", ")), now);

    let mut fan = FanOut::new("remove members");
    for uid in &removed {
        fan.delete(paths::chat_participant(chat_id, uid)?)
            .delete(paths::user_chat(uid, chat_id)?);
    }
    fan.set(paths::group_field(chat_id, "members")?, member_list.clone());
    if admins != info.admin_ids {
        fan.set(paths::group_field(chat_id, "admins")?, admins_value(&admins)?);
    }
    fan.stage_message(&system)?.stage_last_message(&system)?;
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    let mut updated = chat.clone();
    updated.participant_ids.retain(|uid| !removed.contains(uid));
    if let Some(info) = updated.group_info.as_mut() {
        info.member_ids = member_list;
        info.admin_ids = admins;
    }
    apply_committed(state, updated, system);
    info!(removed = removed.len(), "Members removed");
    Ok(removed)
}

/// Promotes a member to admin. Owner or admin only.
#[instrument(skip(state), fields(chat_id = %chat_id, target_id = %target_id, actor_id = %actor_id))]
pub async fn add_admin<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    target_id: &str,
    actor_id: &str,
) -> Result<(), SyncError> {
    let chat = load_chat(state, chat_id).await?;
    let info = require_group(&chat)?;
    require_role(&chat, actor_id, MANAGERS)?;

    match chat.role_of(target_id) {
        Some(UserRole::Member) => {}
        Some(UserRole::Admin) => return Err(SyncError::conflict("User is already an admin")),
        Some(UserRole::Owner) => return Err(SyncError::bad_request("The owner is already privileged")),
        None => {
            return Err(SyncError::not_found("User is not a member of this chat").with_details(target_id.to_string()));
        }
    }

    let mut admins = info.admin_ids.clone();
    admins.insert(target_id.to_string());

    let actor_name = display_name(state, actor_id).await;
    let target_name = display_name(state, target_id).await;
    let now = Utc::now().timestamp_millis();
    let system = Message::system(chat_id, format!("{actor_name} made {target_name} an admin"), now);

    let mut fan = FanOut::new("add admin");
    fan.set(paths::group_field(chat_id, "admins")?, admins_value(&admins)?);
    fan.stage_message(&system)?.stage_last_message(&system)?;
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    let mut updated = chat.clone();
    if let Some(info) = updated.group_info.as_mut() {
        info.admin_ids = admins;
    }
    apply_committed(state, updated, system);
    info!("Admin added");
    Ok(())
}

/// Demotes an admin back to member. Owner only.
#[instrument(skip(state), fields(chat_id = %chat_id, target_id = %target_id, actor_id = %actor_id))]
pub async fn remove_admin<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    target_id: &str,
    actor_id: &str,
) -> Result<(), SyncError> {
    let chat = load_chat(state, chat_id).await?;
    let info = require_group(&chat)?;
    require_role(&chat, actor_id, &[UserRole::Owner])?;

    if chat.role_of(target_id) != Some(UserRole::Admin) {
        warn!("Target is not an admin");
        return Err(SyncError::bad_request("User is not an admin").with_details(target_id.to_string()));
    }

    let mut admins = info.admin_ids.clone();
    admins.remove(target_id);

    let actor_name = display_name(state, actor_id).await;
    let target_name = display_name(state, target_id).await;
    let now = Utc::now().timestamp_millis();
    let system = Message::system(chat_id, format!("{actor_name} removed {target_name} as admin"), now);

    let mut fan = FanOut::new("remove admin");
    fan.set(paths::group_field(chat_id, "admins")?, admins_value(&admins)?);
    fan.stage_message(&system)?.stage_last_message(&system)?;
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    let mut updated = chat.clone();
    if let Some(info) = updated.group_info.as_mut() {
        info.admin_ids = admins;
    }
    apply_committed(state, updated, system);
    info!("Admin removed");
    Ok(())
}

/// Edits name, description or photo. Owner or admin only.
#[instrument(skip(state, patch), fields(chat_id = %chat_id, actor_id = %actor_id))]
pub async fn update_group_info<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    actor_id: &str,
    patch: GroupInfoPatchDTO,
) -> Result<Chat, SyncError> {
    patch.validate()?;
    let chat = load_chat(state, chat_id).await?;
    require_group(&chat)?;
    require_role(&chat, actor_id, MANAGERS)?;

    if patch.is_empty() {
        debug!("Nothing to update");
        return Ok(chat);
    }

    let actor_name = display_name(state, actor_id).await;
    let now = Utc::now().timestamp_millis();
    let text = match &patch.name {
        Some(name) => format!("{actor_name} renamed the group to {}", name.trim()),
        None => format!("{actor_name} updated the group info"),
    };
    let system = Message::system(chat_id, text, now);

    let mut fan = FanOut::new("update group info");
    if let Some(name) = &patch.name {
        fan.set(paths::group_field(chat_id, "name")?, name.trim());
    }
    // an empty description or photo clears the field
    match patch.description.as_deref().map(str::trim) {
        Some("") => {
            fan.delete(paths::group_field(chat_id, "description")?);
        }
        Some(description) => {
            fan.set(paths::group_field(chat_id, "description")?, description);
        }
        None => {}
    }
    match patch.photo_ref.as_deref().map(str::trim) {
        Some("") => {
            fan.delete(paths::group_field(chat_id, "photoRef")?);
        }
        Some(photo_ref) => {
            fan.set(paths::group_field(chat_id, "photoRef")?, photo_ref);
        }
        None => {}
    }
    fan.stage_message(&system)?.stage_last_message(&system)?;
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    let mut updated = chat.clone();
    if let Some(info) = updated.group_info.as_mut() {
        if let Some(name) = &patch.name {
            info.name = name.trim().to_string();
        }
        if let Some(description) = patch.description.as_deref().map(str::trim) {
            info.description = Some(description.to_string()).filter(|d| !d.is_empty());
        }
        if let Some(photo_ref) = patch.photo_ref.as_deref().map(str::trim) {
            info.photo_ref = Some(photo_ref.to_string()).filter(|p| !p.is_empty());
        }
    }
    apply_committed(state, updated, system);
    info!("Group info updated");
    state.chats.get(chat_id).ok_or_else(|| SyncError::not_found("Chat not found"))
}

/// `uid` leaves a group.
///
/// The owner cannot leave while other members remain. An owner alone in the
/// group deletes it: record, reverse index and history.
#[instrument(skip(state), fields(chat_id = %chat_id, uid = %uid))]
pub async fn leave_group<S: RemoteStore>(state: &AppState<S>, chat_id: &str, uid: &str) -> Result<(), SyncError> {
    debug!("User leaving group");
    let chat = load_chat(state, chat_id).await?;
    let info = require_group(&chat)?;
    require_participant(&chat, uid)?;

    if info.owner_id == uid {
        if chat.participant_ids.len() > 1 {
            warn!("Owner attempted to leave group with other members present");
            return Err(SyncError::conflict(
                "The owner cannot leave the group while other members remain",
            ));
        }
        debug!("Owner is the only member, deleting the group");
        let mut fan = FanOut::new("delete group");
        fan.delete(paths::chat(chat_id)?)
            .delete(paths::user_chat(uid, chat_id)?)
            .delete(paths::messages(chat_id)?);
        fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

        state.chats.publish(chat_id, None);
        state.messages.evict(chat_id);
        forget_chat_for(state, uid, chat_id);
        info!("Group deleted");
        return Ok(());
    }

    let member_list: Vec<String> = info.member_ids.iter().filter(|m| *m != uid).cloned().collect();
    let mut admins = info.admin_ids.clone();
    let was_admin = admins.remove(uid);

    let name = display_name(state, uid).await;
    let now = Utc::now().timestamp_millis();
    let system = Message::system(chat_id, format!("{name} left the group"), now);

    let mut fan = FanOut::new("leave group");
    fan.delete(paths::chat_participant(chat_id, uid)?)
        .delete(paths::user_chat(uid, chat_id)?)
        .set(paths::group_field(chat_id, "members")?, member_list.clone());
    if was_admin {
        fan.set(paths::group_field(chat_id, "admins")?, admins_value(&admins)?);
    }
    fan.stage_message(&system)?.stage_last_message(&system)?;
    fan.commit(state.store.as_ref(), state.config.write_timeout).await?;

    let mut updated = chat.clone();
    updated.participant_ids.remove(uid);
    if let Some(info) = updated.group_info.as_mut() {
        info.member_ids = member_list;
        info.admin_ids = admins;
    }
    apply_committed(state, updated, system);
    state.messages.evict(chat_id);
    forget_chat_for(state, uid, chat_id);
    info!("User left the group");
    Ok(())
}
