//! Integration tests per la creazione delle chat e la gestione dei gruppi

mod common;

#[cfg(test)]
mod membership_tests {
    use super::common::{
        bounded, create_test_state, direct_chat, group_chat, second_device, seed_chat, seed_user, test_config,
    };
    use chat_sync::dtos::{GroupDraftDTO, GroupInfoPatchDTO};
    use chat_sync::entities::{ChatKind, MessageBody, MessageType, UserRole};
    use chat_sync::repositories::paths;
    use chat_sync::services::{
        add_admin, add_members, create_direct_chat, create_group_chat, get_chat, get_user_chats, leave_group,
        remove_admin, remove_members, update_group_info,
    };
    use chat_sync::{ErrorKind, MemoryStore};

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn system_texts(store: &MemoryStore, chat_id: &str) -> Vec<String> {
        let Some(serde_json::Value::Object(messages)) = store.snapshot(&paths::messages(chat_id).unwrap()) else {
            return Vec::new();
        };
        messages
            .values()
            .filter(|m| m.get("type").and_then(|t| t.as_str()) == Some("system"))
            .filter_map(|m| m.get("text").and_then(|t| t.as_str()).map(str::to_string))
            .collect()
    }

    fn seed_people(store: &MemoryStore) {
        for (uid, name) in [
            ("alice", "Alice"),
            ("bob", "Bob"),
            ("carol", "Carol"),
            ("dave", "Dave"),
            ("xavier", "Xavier"),
            ("yvonne", "Yvonne"),
        ] {
            seed_user(store, uid, name);
        }
    }

    // ============================================================
    // Chat dirette
    // ============================================================

    #[tokio::test]
    async fn test_create_direct_chat_is_idempotent() {
        let (store, state) = create_test_state();

        let first = create_direct_chat(&state, "bob", "alice").await.unwrap();
        assert_eq!(first.id, "alice_bob");
        assert_eq!(first.kind, ChatKind::Direct);
        assert!(first.is_participant("alice") && first.is_participant("bob"));

        store.clear_write_log();
        let second = create_direct_chat(&state, "alice", "bob").await.unwrap();
        assert_eq!(second.id, first.id);
        assert!(store.write_log().is_empty(), "an existing chat is not rewritten");

        assert!(get_user_chats(&state, "alice").await.unwrap().contains("alice_bob"));
        assert!(get_user_chats(&state, "bob").await.unwrap().contains("alice_bob"));
    }

    #[tokio::test]
    async fn test_concurrent_direct_chat_creation_converges() {
        let (store, alice) = create_test_state();
        let bob = second_device(&store, test_config());

        let (a, b) = tokio::join!(
            create_direct_chat(&alice, "alice", "bob"),
            create_direct_chat(&bob, "bob", "alice"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);

        let Some(serde_json::Value::Object(chats)) = store.snapshot(&paths::chats_root()) else {
            panic!("chats root missing");
        };
        assert_eq!(chats.len(), 1);
        let stored = alice.chat.find_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(stored.participant_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_direct_chat_does_not_clobber_last_message() {
        let (store, state) = create_test_state();
        let mut chat = direct_chat("alice", "bob");
        chat.last_message_time = Some(50);
        seed_chat(&store, &chat);
        store.seed(
            &paths::chat_field(&chat.id, "lastMessage").unwrap(),
            serde_json::json!({ "messageId": "m1", "senderId": "bob", "type": "text", "preview": "hey", "timestamp": 50 }),
        );

        let loaded = create_direct_chat(&state, "alice", "bob").await.unwrap();
        assert_eq!(loaded.last_message.unwrap().preview, "hey");
    }

    #[tokio::test]
    async fn test_direct_chat_with_self_is_rejected() {
        let (_store, state) = create_test_state();
        let err = create_direct_chat(&state, "alice", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    // ============================================================
    // Creazione gruppi
    // ============================================================

    #[tokio::test]
    async fn test_create_group_writes_record_index_and_system_message() {
        let (store, state) = create_test_state();
        seed_people(&store);

        let draft = GroupDraftDTO {
            name: "  Weekend ".to_string(),
            description: None,
            photo_ref: None,
            member_ids: ids(&["bob", "carol", "bob"]),
        };
        let chat = create_group_chat(&state, "alice", draft).await.unwrap();

        assert_eq!(store.write_log().len(), 1);
        let info = chat.group_info.as_ref().unwrap();
        assert_eq!(info.name, "Weekend");
        assert_eq!(info.member_ids, ids(&["alice", "bob", "carol"]));
        assert_eq!(chat.role_of("alice"), Some(UserRole::Owner));
        assert_eq!(chat.role_of("bob"), Some(UserRole::Member));

        for uid in ["alice", "bob", "carol"] {
            assert!(get_user_chats(&state, uid).await.unwrap().contains(&chat.id));
        }
        assert_eq!(system_texts(&store, &chat.id), vec!["Alice created the group Weekend"]);

        let stored = state.chat.find_by_id(&chat.id).await.unwrap().unwrap();
        assert_eq!(stored.kind, ChatKind::Group);
        assert_eq!(stored.group_info.unwrap().owner_id, "alice");
    }

    #[tokio::test]
    async fn test_create_group_needs_another_member() {
        let (store, state) = create_test_state();
        let draft = GroupDraftDTO {
            name: "Solo".to_string(),
            description: None,
            photo_ref: None,
            member_ids: ids(&["alice"]),
        };
        let err = create_group_chat(&state, "alice", draft).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(store.write_log().is_empty());
    }

    // ============================================================
    // Aggiunta e rimozione membri
    // ============================================================

    #[tokio::test]
    async fn test_add_members_is_all_or_nothing() {
        let (store, state) = create_test_state();
        seed_people(&store);
        seed_chat(&store, &group_chat("g1", "alice", &[], &["bob"]));

        store.fail_next_writes(1);
        let err = add_members(&state, "g1", &ids(&["xavier", "yvonne"]), "alice").await.unwrap_err();
        assert!(err.is_transient());

        assert!(store.write_log().is_empty());
        for uid in ["xavier", "yvonne"] {
            assert!(store.snapshot(&paths::chat_participant("g1", uid).unwrap()).is_none());
            assert!(store.snapshot(&paths::user_chat(uid, "g1").unwrap()).is_none());
        }
        assert!(system_texts(&store, "g1").is_empty());
        assert!(!state.chats.get("g1").unwrap().is_participant("xavier"));

        let added = add_members(&state, "g1", &ids(&["xavier", "yvonne"]), "alice").await.unwrap();
        assert_eq!(added, ids(&["xavier", "yvonne"]));
        assert_eq!(store.write_log().len(), 1);
        assert_eq!(system_texts(&store, "g1"), vec!["Alice added Xavier, Yvonne"]);
        for uid in ["xavier", "yvonne"] {
            assert!(store.snapshot(&paths::user_chat(uid, "g1").unwrap()).is_some());
        }

        let local = state.chats.get("g1").unwrap();
        assert!(local.is_participant("xavier"));
        assert_eq!(local.last_message.unwrap().message_type, MessageType::System);
        let window = state.messages.view("g1");
        let system = &window.messages.last().unwrap().message;
        assert_eq!(system.body, MessageBody::Text { text: "Alice added Xavier, Yvonne".into() });
    }

    #[tokio::test]
    async fn test_add_members_skips_existing_members() {
        let (store, state) = create_test_state();
        seed_people(&store);
        seed_chat(&store, &group_chat("g1", "alice", &[], &["bob"]));

        let added = add_members(&state, "g1", &ids(&["bob", "carol"]), "alice").await.unwrap();
        assert_eq!(added, ids(&["carol"]));

        store.clear_write_log();
        let added = add_members(&state, "g1", &ids(&["bob", "carol"]), "alice").await.unwrap();
        assert!(added.is_empty());
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_plain_member_cannot_add_members() {
        let (store, state) = create_test_state();
        seed_chat(&store, &group_chat("g1", "alice", &[], &["bob"]));

        let err = add_members(&state, "g1", &ids(&["carol"]), "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_group_operations_on_direct_chat_are_rejected() {
        let (store, state) = create_test_state();
        seed_chat(&store, &direct_chat("alice", "bob"));

        let err = add_members(&state, "alice_bob", &ids(&["carol"]), "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_remove_members_rules() {
        let (store, state) = create_test_state();
        seed_people(&store);
        seed_chat(&store, &group_chat("g1", "alice", &["bob"], &["carol", "dave"]));

        // admin cannot remove the owner or another admin, nor themselves
        let err = remove_members(&state, "g1", &ids(&["alice"]), "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = remove_members(&state, "g1", &ids(&["bob"]), "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let removed = remove_members(&state, "g1", &ids(&["carol", "zoe"]), "bob").await.unwrap();
        assert_eq!(removed, ids(&["carol"]));
        assert!(store.snapshot(&paths::chat_participant("g1", "carol").unwrap()).is_none());
        assert!(store.snapshot(&paths::user_chat("carol", "g1").unwrap()).is_none());
        assert!(system_texts(&store, "g1").contains(&"Bob removed Carol".to_string()));

        // the owner may remove an admin, which also drops the admin flag
        remove_members(&state, "g1", &ids(&["bob"]), "alice").await.unwrap();
        let stored = state.chat.find_by_id("g1").await.unwrap().unwrap();
        let info = stored.group_info.unwrap();
        assert!(info.admin_ids.is_empty());
        assert_eq!(info.member_ids, ids(&["alice", "dave"]));
    }

    #[tokio::test]
    async fn test_admin_cannot_remove_other_admin() {
        let (store, state) = create_test_state();
        seed_chat(&store, &group_chat("g1", "alice", &["bob", "carol"], &[]));
        let err = remove_members(&state, "g1", &ids(&["carol"]), "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    // ============================================================
    // Amministratori
    // ============================================================

    #[tokio::test]
    async fn test_add_and_remove_admin() {
        let (store, state) = create_test_state();
        seed_people(&store);
        seed_chat(&store, &group_chat("g1", "alice", &[], &["bob", "carol"]));

        add_admin(&state, "g1", "bob", "alice").await.unwrap();
        assert_eq!(state.chats.get("g1").unwrap().role_of("bob"), Some(UserRole::Admin));

        let err = add_admin(&state, "g1", "bob", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = add_admin(&state, "g1", "alice", "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let err = add_admin(&state, "g1", "zoe", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // only the owner demotes
        let err = remove_admin(&state, "g1", "bob", "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = remove_admin(&state, "g1", "carol", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        remove_admin(&state, "g1", "bob", "alice").await.unwrap();
        let stored = state.chat.find_by_id("g1").await.unwrap().unwrap();
        assert_eq!(stored.role_of("bob"), Some(UserRole::Member));
        let texts = system_texts(&store, "g1");
        assert!(texts.contains(&"Alice made Bob an admin".to_string()));
        assert!(texts.contains(&"Alice removed Bob as admin".to_string()));
    }

    // ============================================================
    // Info gruppo
    // ============================================================

    #[tokio::test]
    async fn test_update_group_info() {
        let (store, state) = create_test_state();
        seed_people(&store);
        let mut chat = group_chat("g1", "alice", &["bob"], &["carol"]);
        if let Some(info) = chat.group_info.as_mut() {
            info.description = Some("old".to_string());
        }
        seed_chat(&store, &chat);

        let patch = GroupInfoPatchDTO {
            name: Some(" Trip ".to_string()),
            description: Some(String::new()),
            photo_ref: Some("img/trip.png".to_string()),
        };
        let updated = update_group_info(&state, "g1", "bob", patch).await.unwrap();
        let info = updated.group_info.unwrap();
        assert_eq!(info.name, "Trip");
        assert_eq!(info.description, None);
        assert_eq!(info.photo_ref.as_deref(), Some("img/trip.png"));

        let stored = state.chat.find_by_id("g1").await.unwrap().unwrap().group_info.unwrap();
        assert_eq!(stored.name, "Trip");
        assert_eq!(stored.description, None);
        assert_eq!(system_texts(&store, "g1"), vec!["Bob renamed the group to Trip"]);

        let err = update_group_info(&state, "g1", "carol", GroupInfoPatchDTO::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        store.clear_write_log();
        update_group_info(&state, "g1", "alice", GroupInfoPatchDTO::default()).await.unwrap();
        assert!(store.write_log().is_empty());
    }

    // ============================================================
    // Uscita dal gruppo
    // ============================================================

    #[tokio::test]
    async fn test_member_leaves_group() {
        let (store, state) = create_test_state();
        seed_people(&store);
        seed_chat(&store, &group_chat("g1", "alice", &["bob"], &["carol"]));
        get_user_chats(&state, "bob").await.unwrap();

        leave_group(&state, "g1", "bob").await.unwrap();

        let stored = state.chat.find_by_id("g1").await.unwrap().unwrap();
        assert!(!stored.is_participant("bob"));
        assert!(stored.group_info.unwrap().admin_ids.is_empty());
        assert!(store.snapshot(&paths::user_chat("bob", "g1").unwrap()).is_none());
        assert!(!state.user_chats.get("bob").contains("g1"));
        assert_eq!(system_texts(&store, "g1"), vec!["Bob left the group"]);
    }

    #[tokio::test]
    async fn test_owner_cannot_leave_populated_group() {
        let (store, state) = create_test_state();
        seed_chat(&store, &group_chat("g1", "alice", &[], &["bob"]));

        let err = leave_group(&state, "g1", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(store.write_log().is_empty());

        let err = leave_group(&state, "g1", "zoe").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_sole_owner_leaving_deletes_group() {
        let (store, state) = create_test_state();
        seed_people(&store);
        seed_chat(&store, &group_chat("g1", "alice", &[], &["bob"]));
        leave_group(&state, "g1", "bob").await.unwrap();

        bounded(leave_group(&state, "g1", "alice")).await.unwrap();

        assert!(store.snapshot(&paths::chat("g1").unwrap()).is_none());
        assert!(store.snapshot(&paths::messages("g1").unwrap()).is_none());
        assert!(store.snapshot(&paths::user_chat("alice", "g1").unwrap()).is_none());
        assert!(get_chat(&state, "g1").await.unwrap().is_none());
        assert!(state.messages.view("g1").is_empty());
    }
}
