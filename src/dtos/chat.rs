//! Chat DTOs - wire record for `chats/{chatId}` and the group drafts

use super::message::{message_type_name, parse_message_type};
use super::wire::{IdSet, lenient_millis};
use crate::core::SyncError;
use crate::entities::{Chat, ChatKind, GroupInfo, LastMessageSummary, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", alias = "kind", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub participants: IdSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_info: Option<GroupInfoRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageRecord>,
    #[serde(default, deserialize_with = "lenient_millis", skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_millis", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_millis", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfoRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "photoURL", alias = "photoUrl", skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    #[serde(default, alias = "createdBy", alias = "owner", skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "IdSet::is_empty")]
    pub admins: IdSet,
    #[serde(default, skip_serializing_if = "IdSet::is_empty")]
    pub members: IdSet,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageRecord {
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, deserialize_with = "lenient_millis", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl From<&LastMessageSummary> for LastMessageRecord {
    fn from(summary: &LastMessageSummary) -> Self {
        Self {
            message_id: Some(summary.message_id.clone()),
            sender_id: Some(summary.sender_id.clone()),
            message_type: Some(message_type_name(summary.message_type).to_string()),
            preview: Some(summary.preview.clone()),
            timestamp: Some(summary.timestamp),
        }
    }
}

impl LastMessageRecord {
    fn into_summary(self) -> Option<LastMessageSummary> {
        Some(LastMessageSummary {
            message_id: self.message_id?,
            sender_id: self.sender_id.unwrap_or_default(),
            message_type: parse_message_type(self.message_type.as_deref()).unwrap_or(MessageType::Text),
            preview: self.preview.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or(0),
        })
    }

    pub fn to_value(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl From<&GroupInfo> for GroupInfoRecord {
    fn from(info: &GroupInfo) -> Self {
        Self {
            name: Some(info.name.clone()),
            description: info.description.clone(),
            photo_ref: info.photo_ref.clone(),
            owner_id: Some(info.owner_id.clone()),
            admins: IdSet::from_ids(&info.admin_ids),
            members: IdSet::list(&info.member_ids),
        }
    }
}

impl ChatRecord {
    pub fn into_chat(self, key: &str) -> Result<Chat, SyncError> {
        let participant_ids = self.participants.to_set();
        let kind = match self.kind.as_deref().map(str::trim) {
            Some("group") => ChatKind::Group,
            Some("direct") | Some("private") => ChatKind::Direct,
            Some(other) => {
                return Err(SyncError::malformed("Unknown chat type").with_details(format!("{key}: {other}")));
            }
            None if self.group_info.is_some() => ChatKind::Group,
            None => ChatKind::Direct,
        };

        let group_info = match kind {
            ChatKind::Direct => None,
            ChatKind::Group => {
                let record = self.group_info.unwrap_or_default();
                let mut member_ids = record.members.to_vec();
                if member_ids.is_empty() {
                    member_ids = participant_ids.iter().cloned().collect();
                }
                Some(GroupInfo {
                    name: record.name.unwrap_or_default(),
                    description: record.description,
                    photo_ref: record.photo_ref,
                    owner_id: record.owner_id.unwrap_or_default(),
                    admin_ids: record.admins.to_set(),
                    member_ids,
                })
            }
        };

        let created_at = self.created_at.unwrap_or(0);
        Ok(Chat {
            id: self.id.filter(|id| !id.is_empty()).unwrap_or_else(|| key.to_string()),
            kind,
            participant_ids,
            group_info,
            last_message: self.last_message.and_then(LastMessageRecord::into_summary),
            last_message_time: self.last_message_time,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        })
    }

    pub fn to_value(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl From<&Chat> for ChatRecord {
    fn from(chat: &Chat) -> Self {
        Self {
            id: Some(chat.id.clone()),
            kind: Some(
                match chat.kind {
                    ChatKind::Direct => "direct",
                    ChatKind::Group => "group",
                }
                .to_string(),
            ),
            participants: IdSet::from_ids(&chat.participant_ids),
            group_info: chat.group_info.as_ref().map(GroupInfoRecord::from),
            last_message: chat.last_message.as_ref().map(LastMessageRecord::from),
            last_message_time: chat.last_message_time,
            created_at: Some(chat.created_at),
            updated_at: Some(chat.updated_at),
        }
    }
}

/// Decodes a chat snapshot. Malformed records are logged and read as absent.
pub fn decode_chat(chat_id: &str, snapshot: Option<Value>) -> Option<Chat> {
    let value = snapshot?;
    let decoded = serde_json::from_value::<ChatRecord>(value)
        .map_err(SyncError::from)
        .and_then(|record| record.into_chat(chat_id));
    match decoded {
        Ok(chat) => Some(chat),
        Err(e) => {
            warn!(chat_id, error = %e, "Skipping malformed chat record");
            None
        }
    }
}

/// Chat ids of a `userChats/{uid}` snapshot.
pub fn decode_chat_ids(snapshot: Option<Value>) -> BTreeSet<String> {
    snapshot
        .and_then(|value| serde_json::from_value::<IdSet>(value).ok())
        .map(|ids| ids.to_set())
        .unwrap_or_default()
}

/// New group as requested by its creator.
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct GroupDraftDTO {
    #[validate(length(min = 1, max = 100, message = "Group name must be between 1 and 100 characters"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,

    pub photo_ref: Option<String>,

    #[validate(length(min = 1, message = "A group needs at least one other member"))]
    pub member_ids: Vec<String>,
}

/// Editable group fields. `None` leaves the field untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Validate)]
pub struct GroupInfoPatchDTO {
    #[validate(length(min = 1, max = 100, message = "Group name must be between 1 and 100 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,

    pub photo_ref: Option<String>,
}

impl GroupInfoPatchDTO {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.photo_ref.is_none()
    }
}
