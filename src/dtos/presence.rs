//! Ephemeral state DTOs - presence and typing records

use super::wire::{is_truthy, lenient_millis, millis_of};
use crate::entities::PresenceRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Stored under `presence/{uid}`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecordDTO {
    #[serde(default)]
    pub online: bool,
    #[serde(default, alias = "lastSeenAt", deserialize_with = "lenient_millis")]
    pub last_seen: Option<i64>,
}

impl PresenceRecordDTO {
    pub fn new(online: bool, last_seen: i64) -> Self {
        Self {
            online,
            last_seen: Some(last_seen),
        }
    }

    pub fn into_record(self, uid: &str) -> PresenceRecord {
        PresenceRecord {
            uid: uid.to_string(),
            online: self.online,
            last_seen_at: self.last_seen.unwrap_or(0),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "online": self.online, "lastSeen": self.last_seen })
    }
}

pub fn decode_presence(uid: &str, snapshot: Option<Value>) -> Option<PresenceRecord> {
    let value = snapshot?;
    match serde_json::from_value::<PresenceRecordDTO>(value) {
        Ok(dto) => Some(dto.into_record(uid)),
        Err(e) => {
            warn!(uid, error = %e, "Skipping malformed presence record");
            None
        }
    }
}

/// Typing entries of one chat: uid -> last keystroke (millis) when the writer sent one.
///
/// Older writers store a bare `true`; that is read as typing with no timestamp.
pub fn decode_typing(snapshot: Option<Value>) -> BTreeMap<String, Option<i64>> {
    match snapshot {
        Some(Value::Object(entries)) => entries
            .into_iter()
            .filter(|(_, value)| is_truthy(value))
            .map(|(uid, value)| (uid, millis_of(&value)))
            .collect(),
        _ => BTreeMap::new(),
    }
}
