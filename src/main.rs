use chat_sync::dtos::GroupDraftDTO;
use chat_sync::repositories::paths;
use chat_sync::services::{self, messaging, presence};
use chat_sync::{AppState, Config, MemoryStore};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Scripted session against the in-memory store: two devices, a direct chat,
/// a group, typing and presence.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Inizializza il logging (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_sync=debug,warn")))
        .init();

    let config = Config::from_env()?;
    config.log_summary();

    // Un solo store condiviso, due dispositivi
    let store = Arc::new(MemoryStore::new());
    for (uid, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
        store.seed(&paths::user(uid)?, json!({ "displayName": name }));
    }
    let alice = AppState::new(store.clone(), config.clone());
    let bob = AppState::new(store.clone(), config);

    presence::go_online(&alice, "alice").await;
    presence::go_online(&bob, "bob").await;

    let direct = services::create_direct_chat(&alice, "alice", "bob").await?;
    let mut alice_view = services::open_chat(&alice, &direct.id).await?;
    let bob_view = services::open_chat(&bob, &direct.id).await?;

    services::set_typing(&alice, &direct.id, "alice")?;
    let hi = messaging::send_text(&alice, &direct.id, "alice", "hi", None)?;
    info!(local_id = %hi.local_id, "Sent, visible before the write settles");
    let hi_id = hi.local_id.clone();
    info!(outcome = ?hi.outcome().await, "First message settled");

    let yo = messaging::send_text(&bob, &direct.id, "bob", "yo", Some(&hi_id))?;
    yo.outcome().await;
    let window = alice_view
        .wait_for(|view| view.len() >= 2)
        .await
        .ok_or("window closed")?;
    for entry in &window.messages {
        let reply = window
            .reply_target(&entry.message)
            .map(|target| target.message.id.as_str())
            .unwrap_or("-");
        info!(sender = %entry.message.sender_id, state = ?entry.state, reply_to = reply, "{:?}", entry.message.body);
    }

    let group = services::create_group_chat(
        &alice,
        "alice",
        GroupDraftDTO {
            name: "Weekend".into(),
            description: None,
            photo_ref: None,
            member_ids: vec!["bob".into()],
        },
    )
    .await?;
    services::add_members(&alice, &group.id, &["carol".to_string()], "alice").await?;
    let chats = services::get_user_chats(&bob, "bob").await?;
    info!(chats = ?chats, "Bob's chat list");

    alice_view.close();
    bob_view.close();
    presence::logout(&alice, "alice").await;
    presence::app_background(&bob, "bob").await;
    info!(writes = store.write_log().len(), "Session finished");

    alice.shutdown();
    bob.shutdown();
    Ok(())
}
