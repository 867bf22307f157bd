//! Message entity

use super::enums::MessageType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Text shown in place of a message deleted for everyone.
pub const DELETED_PLACEHOLDER: &str = "Message deleted";

/// Sender id used for synthesized system messages.
pub const SYSTEM_SENDER: &str = "system";

/// Exactly one payload per message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text {
        text: String,
    },
    Image {
        image_ref: String,
    },
    File {
        file_ref: String,
        name: String,
        mime_type: String,
    },
}

impl MessageBody {
    /// Short human readable form, used for the chat's last-message summary.
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Text { text } => text.chars().take(100).collect(),
            MessageBody::Image { .. } => "Photo".to_string(),
            MessageBody::File { name, .. } => name.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ForwardedFrom {
    pub source_chat_id: String,
    pub source_message_id: String,
    pub original_sender_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub body: MessageBody,
    // client-assigned, epoch millis
    pub timestamp: i64,
    pub read_by: BTreeMap<String, i64>,
    pub delivered_to: BTreeSet<String>,
    pub deleted_for: BTreeSet<String>,
    pub deleted_for_all: bool,
    pub reply_to_id: Option<String>,
    pub forwarded_from: Option<ForwardedFrom>,
    /// Local id of the optimistic entry this record confirms, when the store assigned a different id.
    pub client_ref: Option<String>,
}

impl Message {
    pub fn new(
        id: String,
        chat_id: &str,
        sender_id: &str,
        body: MessageBody,
        timestamp: i64,
    ) -> Self {
        let message_type = match &body {
            MessageBody::Text { .. } => MessageType::Text,
            MessageBody::Image { .. } => MessageType::Image,
            MessageBody::File { .. } => MessageType::File,
        };
        Self {
            id,
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            message_type,
            body,
            timestamp,
            read_by: BTreeMap::new(),
            delivered_to: BTreeSet::new(),
            deleted_for: BTreeSet::new(),
            deleted_for_all: false,
            reply_to_id: None,
            forwarded_from: None,
            client_ref: None,
        }
    }

    /// Builds a system message ("Alice added Bob") authored by [`SYSTEM_SENDER`].
    pub fn system(chat_id: &str, text: String, timestamp: i64) -> Self {
        let mut message = Self::new(
            generate_id("system", timestamp),
            chat_id,
            SYSTEM_SENDER,
            MessageBody::Text { text },
            timestamp,
        );
        message.message_type = MessageType::System;
        message
    }

    /// Ordering key inside a chat window: timestamp, ties broken by id.
    pub fn order_key(&self) -> (i64, &str) {
        (self.timestamp, self.id.as_str())
    }

    pub fn is_visible_to(&self, uid: &str) -> bool {
        !self.deleted_for.contains(uid)
    }

    /// Hard tombstone. The body becomes the placeholder and is frozen.
    pub fn tombstone(&mut self) {
        self.deleted_for_all = true;
        self.message_type = MessageType::Text;
        self.body = MessageBody::Text {
            text: DELETED_PLACEHOLDER.to_string(),
        };
    }

    /// Folds a newer copy of the same message into `self`.
    ///
    /// `timestamp` and `sender_id` are immutable once persisted, receipts and
    /// per-user deletions only grow, and a tombstone is never undone.
    pub fn absorb(&mut self, incoming: Message) {
        for (uid, at) in incoming.read_by {
            let entry = self.read_by.entry(uid).or_insert(at);
            if at > *entry {
                *entry = at;
            }
        }
        self.delivered_to.extend(incoming.delivered_to);
        self.deleted_for.extend(incoming.deleted_for);

        if self.deleted_for_all || incoming.deleted_for_all {
            self.tombstone();
        } else {
            self.body = incoming.body;
            self.message_type = incoming.message_type;
        }

        if incoming.reply_to_id.is_some() {
            self.reply_to_id = incoming.reply_to_id;
        }
        if incoming.forwarded_from.is_some() {
            self.forwarded_from = incoming.forwarded_from;
        }
        if incoming.client_ref.is_some() {
            self.client_ref = incoming.client_ref;
        }
    }
}

/// Globally unique, roughly time-ordered id: `{prefix}_{millis}_{random}`.
pub fn generate_id(prefix: &str, timestamp: i64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{timestamp:013}_{}", &random[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(id: &str, ts: i64, body: &str) -> Message {
        Message::new(
            id.to_string(),
            "c1",
            "alice",
            MessageBody::Text { text: body.to_string() },
            ts,
        )
    }

    #[test]
    fn absorb_keeps_receipts_append_only() {
        let mut cached = text("m1", 10, "hi");
        cached.read_by.insert("bob".into(), 50);
        cached.deleted_for.insert("carol".into());

        let mut stale = text("m1", 10, "hi");
        stale.read_by.insert("dave".into(), 40);
        cached.absorb(stale);

        assert_eq!(cached.read_by.get("bob"), Some(&50));
        assert_eq!(cached.read_by.get("dave"), Some(&40));
        assert!(cached.deleted_for.contains("carol"));
    }

    #[test]
    fn tombstone_is_never_undone() {
        let mut cached = text("m1", 10, "secret");
        cached.tombstone();

        cached.absorb(text("m1", 10, "secret"));
        assert!(cached.deleted_for_all);
        assert_eq!(
            cached.body,
            MessageBody::Text { text: DELETED_PLACEHOLDER.to_string() }
        );
    }

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = generate_id("local", 100);
        let b = generate_id("local", 100);
        assert_ne!(a, b);
        assert!(a.starts_with("local_0000000000100_"));
    }
}
