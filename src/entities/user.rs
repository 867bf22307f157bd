//! User entity - read-only here, owned by the profile subsystem

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub photo_ref: Option<String>,
}

impl User {
    /// Best label for system messages: display name, username, email, phone.
    pub fn label(&self) -> &str {
        [&self.display_name, &self.username, &self.email, &self.phone]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("User")
    }
}
