//! Role checks for group operations
//!
//! These checks run against the locally loaded chat record and are advisory
//! only. A modified client can skip them; enforcement belongs to the store's
//! security rules, which this crate does not manage.

use crate::core::SyncError;
use crate::entities::{Chat, ChatKind, GroupInfo, UserRole};
use tracing::{debug, warn};

/// Group section of a chat, or `BadRequest` for direct chats.
pub fn require_group(chat: &Chat) -> Result<&GroupInfo, SyncError> {
    match (chat.kind, chat.group_info.as_ref()) {
        (ChatKind::Group, Some(info)) => Ok(info),
        _ => {
            warn!(chat_id = %chat.id, "Group operation on a direct chat");
            Err(SyncError::bad_request("Operation is only available for group chats").with_details(chat.id.clone()))
        }
    }
}

pub fn require_participant(chat: &Chat, uid: &str) -> Result<(), SyncError> {
    if chat.is_participant(uid) {
        Ok(())
    } else {
        warn!(chat_id = %chat.id, uid, "User is not a participant");
        Err(SyncError::forbidden("User is not a member of this chat").with_details(uid.to_string()))
    }
}

/// Role of `actor` if it is one of `allowed_roles`.
pub fn require_role(chat: &Chat, actor: &str, allowed_roles: &[UserRole]) -> Result<UserRole, SyncError> {
    debug!("Checking role requirements for user {} in chat {}", actor, chat.id);
    let role = chat.role_of(actor).ok_or_else(|| {
        warn!("User {} has no role in chat {}", actor, chat.id);
        SyncError::forbidden("User role not found in chat")
    })?;

    if !allowed_roles.contains(&role) {
        warn!(
            "User {} has insufficient role {:?}, required one of: {:?}",
            actor, role, allowed_roles
        );
        return Err(SyncError::forbidden("Insufficient role").with_details(format!(
            "This action requires one of the following roles: {:?}",
            allowed_roles
        )));
    }

    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use std::collections::BTreeSet;

    fn group() -> Chat {
        Chat {
            id: "g1".into(),
            kind: ChatKind::Group,
            participant_ids: ["alice", "bob", "carol"].into_iter().map(String::from).collect(),
            group_info: Some(GroupInfo {
                name: "Team".into(),
                description: None,
                photo_ref: None,
                owner_id: "alice".into(),
                admin_ids: BTreeSet::from(["bob".to_string()]),
                member_ids: vec!["alice".into(), "bob".into(), "carol".into()],
            }),
            last_message: None,
            last_message_time: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn roles_are_derived_from_group_info() {
        let chat = group();
        let managers = [UserRole::Owner, UserRole::Admin];
        assert_eq!(require_role(&chat, "alice", &managers).unwrap(), UserRole::Owner);
        assert_eq!(require_role(&chat, "bob", &managers).unwrap(), UserRole::Admin);
        assert_eq!(require_role(&chat, "carol", &managers).unwrap_err().kind(), ErrorKind::Forbidden);
        assert_eq!(require_role(&chat, "mallory", &managers).unwrap_err().kind(), ErrorKind::Forbidden);
    }
}
