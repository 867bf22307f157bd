#![allow(dead_code)]

use chat_sync::dtos::{ChatRecord, MessageRecord};
use chat_sync::entities::{Chat, ChatKind, GroupInfo, Message, MessageBody};
use chat_sync::repositories::paths;
use chat_sync::{AppState, Config, MemoryStore};
use serde_json::json;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Crea un AppState per i test su uno store nuovo
///
/// # Returns
/// La coppia (store, state): lo store resta accessibile per failure injection e ispezione
pub fn create_test_state() -> (Arc<MemoryStore>, Arc<AppState<MemoryStore>>) {
    create_test_state_with(test_config())
}

pub fn create_test_state_with(config: Config) -> (Arc<MemoryStore>, Arc<AppState<MemoryStore>>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store.clone(), config);
    (store, state)
}

/// Second device on the same store.
pub fn second_device(store: &Arc<MemoryStore>, config: Config) -> Arc<AppState<MemoryStore>> {
    AppState::new(store.clone(), config)
}

/// Default configuration with a page size small enough for pagination tests.
pub fn test_config() -> Config {
    Config {
        page_size: 10,
        ..Config::default()
    }
}

pub fn text_message(chat_id: &str, id: &str, sender: &str, text: &str, ts: i64) -> Message {
    Message::new(
        id.to_string(),
        chat_id,
        sender,
        MessageBody::Text { text: text.to_string() },
        ts,
    )
}

/// Writes `message` straight into the store, as another client would.
pub fn seed_message(store: &MemoryStore, message: &Message) {
    let path = paths::message(&message.chat_id, &message.id).expect("valid message path");
    let value = MessageRecord::from(message).to_value().expect("encodable message");
    store.seed(&path, value);
}

/// Seeds `count` messages `m01..` with timestamps `1..=count`.
pub fn seed_history(store: &MemoryStore, chat_id: &str, count: i64) -> Vec<String> {
    (1..=count)
        .map(|ts| {
            let id = format!("m{ts:02}");
            seed_message(store, &text_message(chat_id, &id, "alice", &format!("message {ts}"), ts));
            id
        })
        .collect()
}

pub fn seed_user(store: &MemoryStore, uid: &str, display_name: &str) {
    store.seed(&paths::user(uid).expect("valid uid"), json!({ "displayName": display_name }));
}

/// Seeds a chat record plus the reverse index of every participant.
pub fn seed_chat(store: &MemoryStore, chat: &Chat) {
    let value = ChatRecord::from(chat).to_value().expect("encodable chat");
    store.seed(&paths::chat(&chat.id).expect("valid chat id"), value);
    for uid in &chat.participant_ids {
        store.seed(&paths::user_chat(uid, &chat.id).expect("valid path"), json!(true));
    }
}

pub fn direct_chat(uid_a: &str, uid_b: &str) -> Chat {
    Chat {
        id: Chat::direct_id(uid_a, uid_b),
        kind: ChatKind::Direct,
        participant_ids: BTreeSet::from([uid_a.to_string(), uid_b.to_string()]),
        group_info: None,
        last_message: None,
        last_message_time: None,
        created_at: 1,
        updated_at: 1,
    }
}

/// Group `id` owned by `owner`, with `admins` and plain `members`.
pub fn group_chat(id: &str, owner: &str, admins: &[&str], members: &[&str]) -> Chat {
    let mut member_ids = vec![owner.to_string()];
    member_ids.extend(admins.iter().map(|s| s.to_string()));
    member_ids.extend(members.iter().map(|s| s.to_string()));
    Chat {
        id: id.to_string(),
        kind: ChatKind::Group,
        participant_ids: member_ids.iter().cloned().collect(),
        group_info: Some(GroupInfo {
            name: "Team".to_string(),
            description: None,
            photo_ref: None,
            owner_id: owner.to_string(),
            admin_ids: admins.iter().map(|s| s.to_string()).collect(),
            member_ids,
        }),
        last_message: None,
        last_message_time: None,
        created_at: 1,
        updated_at: 1,
    }
}

/// Polls `condition` until it holds. Feeds and teardown run on other tasks,
/// so tests wait for them instead of assuming an order.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(condition(), "condition not reached in time");
}

/// Awaits `fut` with a generous bound so a hang fails the test instead of blocking it.
pub async fn bounded<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation did not complete in time")
}
