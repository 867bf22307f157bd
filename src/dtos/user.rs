//! User DTOs - profile records, read-only for this crate

use crate::entities::User;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "phoneNumber")]
    pub phone: Option<String>,
    #[serde(default, alias = "photoURL", alias = "photoUrl")]
    pub photo_ref: Option<String>,
}

impl UserRecord {
    pub fn into_user(self, key: &str) -> User {
        User {
            uid: self.uid.filter(|u| !u.is_empty()).unwrap_or_else(|| key.to_string()),
            display_name: self.display_name,
            email: self.email,
            username: self.username,
            phone: self.phone,
            photo_ref: self.photo_ref,
        }
    }
}

pub fn decode_user(uid: &str, snapshot: Option<Value>) -> Option<User> {
    let value = snapshot?;
    match serde_json::from_value::<UserRecord>(value) {
        Ok(record) => Some(record.into_user(uid)),
        Err(e) => {
            warn!(uid, error = %e, "Skipping malformed user profile");
            None
        }
    }
}
