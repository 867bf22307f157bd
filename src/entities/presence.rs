//! Presence entity

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub uid: String,
    pub online: bool,
    pub last_seen_at: i64,
}
