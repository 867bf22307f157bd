//! Chat entity

use super::enums::{ChatKind, MessageType, UserRole};
use super::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub description: Option<String>,
    pub photo_ref: Option<String>,
    pub owner_id: String,
    pub admin_ids: BTreeSet<String>,
    /// Denormalized copy of the participant set, for display.
    pub member_ids: Vec<String>,
}

/// Denormalized view of the most recent message, kept on the chat record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LastMessageSummary {
    pub message_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub preview: String,
    pub timestamp: i64,
}

impl From<&Message> for LastMessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            message_type: message.message_type,
            preview: message.body.preview(),
            timestamp: message.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: String,
    pub kind: ChatKind,
    pub participant_ids: BTreeSet<String>,
    pub group_info: Option<GroupInfo>,
    pub last_message: Option<LastMessageSummary>,
    pub last_message_time: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Chat {
    /// Deterministic id of the direct chat between two users: sorted uids joined by `_`.
    pub fn direct_id(uid_a: &str, uid_b: &str) -> String {
        let (first, second) = if uid_a <= uid_b {
            (uid_a, uid_b)
        } else {
            (uid_b, uid_a)
        };
        format!("{first}_{second}")
    }

    pub fn is_participant(&self, uid: &str) -> bool {
        self.participant_ids.contains(uid)
    }

    /// Role of `uid` in a group chat. Direct chats have no roles.
    pub fn role_of(&self, uid: &str) -> Option<UserRole> {
        let info = self.group_info.as_ref()?;
        if info.owner_id == uid {
            Some(UserRole::Owner)
        } else if info.admin_ids.contains(uid) {
            Some(UserRole::Admin)
        } else if self.participant_ids.contains(uid) {
            Some(UserRole::Member)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_id_is_order_independent() {
        assert_eq!(Chat::direct_id("bob", "alice"), "alice_bob");
        assert_eq!(Chat::direct_id("alice", "bob"), "alice_bob");
    }
}
