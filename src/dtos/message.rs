//! Message DTOs - wire record and validated outgoing drafts

use super::wire::{IdSet, is_truthy, lenient_millis, millis_of};
use crate::core::SyncError;
use crate::entities::{ForwardedFrom, Message, MessageBody, MessageType, SYSTEM_SENDER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use validator::Validate;

/// Message as stored under `messages/{chatId}/{messageId}`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, alias = "imageURL", alias = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, alias = "fileURL", alias = "fileUrl", skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, alias = "fileType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_millis", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub read_by: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "IdSet::is_empty")]
    pub delivered_to: IdSet,
    #[serde(default, skip_serializing_if = "IdSet::is_empty")]
    pub deleted_for: IdSet,
    #[serde(default, alias = "deletedForEveryone", alias = "deleted", skip_serializing_if = "std::ops::Not::not")]
    pub deleted_for_all: bool,
    #[serde(default, alias = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<ForwardedRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedRecord {
    #[serde(default, alias = "chatId")]
    pub source_chat_id: Option<String>,
    #[serde(default, alias = "messageId")]
    pub source_message_id: Option<String>,
    #[serde(default, alias = "senderId")]
    pub original_sender_id: Option<String>,
}

pub fn parse_message_type(raw: Option<&str>) -> Option<MessageType> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "text" => Some(MessageType::Text),
        "image" => Some(MessageType::Image),
        "file" => Some(MessageType::File),
        "system" => Some(MessageType::System),
        _ => None,
    }
}

pub fn message_type_name(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Text => "text",
        MessageType::Image => "image",
        MessageType::File => "file",
        MessageType::System => "system",
    }
}

impl MessageRecord {
    /// Coerces the record into a `Message`. `key` is the store key, used when `id` is absent.
    pub fn into_message(self, chat_id: &str, key: &str) -> Result<Message, SyncError> {
        let timestamp = self
            .timestamp
            .ok_or_else(|| SyncError::malformed("Message without timestamp").with_details(key.to_string()))?;
        let sender_id = self
            .sender_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::malformed("Message without sender").with_details(key.to_string()))?;

        let declared = parse_message_type(self.message_type.as_deref());
        let message_type = declared.unwrap_or(if self.image_ref.is_some() {
            MessageType::Image
        } else if self.file_ref.is_some() {
            MessageType::File
        } else {
            MessageType::Text
        });

        let body = match message_type {
            MessageType::Image => MessageBody::Image {
                image_ref: self
                    .image_ref
                    .ok_or_else(|| SyncError::malformed("Image message without reference").with_details(key.to_string()))?,
            },
            MessageType::File => MessageBody::File {
                file_ref: self
                    .file_ref
                    .ok_or_else(|| SyncError::malformed("File message without reference").with_details(key.to_string()))?,
                name: self.file_name.unwrap_or_else(|| "file".to_string()),
                mime_type: self
                    .mime_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            },
            MessageType::Text | MessageType::System => MessageBody::Text {
                text: self.text.unwrap_or_default(),
            },
        };

        let id = self.id.filter(|id| !id.is_empty()).unwrap_or_else(|| key.to_string());
        let mut message = Message::new(id, chat_id, &sender_id, body, timestamp);
        message.message_type = message_type;
        message.read_by = self
            .read_by
            .iter()
            .filter(|(_, at)| is_truthy(at))
            .map(|(uid, at)| (uid.clone(), millis_of(at).unwrap_or(0)))
            .collect();
        message.delivered_to = self.delivered_to.to_set();
        message.deleted_for = self.deleted_for.to_set();
        message.reply_to_id = self.reply_to_id.filter(|id| !id.is_empty());
        message.forwarded_from = self.forwarded_from.and_then(|f| {
            Some(ForwardedFrom {
                source_chat_id: f.source_chat_id?,
                source_message_id: f.source_message_id?,
                original_sender_id: f.original_sender_id.unwrap_or_default(),
            })
        });
        message.client_ref = self.client_ref;
        if self.deleted_for_all {
            message.tombstone();
        }
        Ok(message)
    }

    pub fn to_value(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        let mut record = MessageRecord {
            id: Some(message.id.clone()),
            chat_id: Some(message.chat_id.clone()),
            sender_id: Some(message.sender_id.clone()),
            message_type: Some(message_type_name(message.message_type).to_string()),
            timestamp: Some(message.timestamp),
            read_by: message
                .read_by
                .iter()
                .map(|(uid, at)| (uid.clone(), Value::from(*at)))
                .collect(),
            delivered_to: IdSet::from_ids(&message.delivered_to),
            deleted_for: IdSet::from_ids(&message.deleted_for),
            deleted_for_all: message.deleted_for_all,
            reply_to_id: message.reply_to_id.clone(),
            forwarded_from: message.forwarded_from.as_ref().map(|f| ForwardedRecord {
                source_chat_id: Some(f.source_chat_id.clone()),
                source_message_id: Some(f.source_message_id.clone()),
                original_sender_id: Some(f.original_sender_id.clone()),
            }),
            client_ref: message.client_ref.clone(),
            ..Default::default()
        };
        match &message.body {
            MessageBody::Text { text } => record.text = Some(text.clone()),
            MessageBody::Image { image_ref } => record.image_ref = Some(image_ref.clone()),
            MessageBody::File {
                file_ref,
                name,
                mime_type,
            } => {
                record.file_ref = Some(file_ref.clone());
                record.file_name = Some(name.clone());
                record.mime_type = Some(mime_type.clone());
            }
        }
        record
    }
}

/// Decodes one stored message. Unusable records are logged and skipped.
pub fn decode_message(chat_id: &str, key: &str, value: Value) -> Option<Message> {
    let decoded = serde_json::from_value::<MessageRecord>(value)
        .map_err(SyncError::from)
        .and_then(|record| record.into_message(chat_id, key));
    match decoded {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(chat_id, key, error = %e, "Skipping malformed message record");
            None
        }
    }
}

/// Decodes every child of a `messages/{chatId}` snapshot (absent = empty).
pub fn decode_message_map(chat_id: &str, snapshot: Option<Value>) -> Vec<Message> {
    match snapshot {
        Some(Value::Object(children)) => children
            .into_iter()
            .filter_map(|(key, value)| decode_message(chat_id, &key, value))
            .collect(),
        Some(other) => {
            warn!(chat_id, snapshot = %other, "Message snapshot is not an object, ignoring");
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Outgoing text as typed by the user.
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct OutgoingTextDTO {
    #[validate(length(min = 1, max = 5000, message = "Message content must be between 1 and 5000 characters"))]
    pub text: String,

    pub reply_to_id: Option<String>,
}

impl OutgoingTextDTO {
    pub fn new(text: &str, reply_to_id: Option<&str>) -> Self {
        Self {
            text: text.trim().to_string(),
            reply_to_id: reply_to_id.map(str::to_string),
        }
    }
}
