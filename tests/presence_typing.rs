//! Integration tests per presenza e indicatori di scrittura
//!
//! Tutti i test girano con il clock di tokio in pausa, così i tempi sono
//! deterministici.

mod common;

#[cfg(test)]
mod presence_typing_tests {
    use super::common::{bounded, create_test_state, wait_until};
    use chat_sync::entities::PresenceStatus;
    use chat_sync::repositories::{WriteRecord, paths};
    use chat_sync::services::{
        app_background, app_foreground, clear_typing, connection_lost, get_presence, go_online, logout, open_chat,
        set_typing,
    };
    use chat_sync::sync::watch_typing;
    use std::time::Duration;
    use tokio::time::{Instant, advance, sleep};

    fn is_delete(record: &WriteRecord) -> bool {
        record.op.touched().iter().all(|(_, value)| value.is_none())
    }

    // ============================================================
    // Scrittura dell'indicatore
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_typing_clears_itself_once_after_ttl() {
        let (store, state) = create_test_state();
        let entry = paths::typing_entry("c1", "alice").unwrap();
        let start = Instant::now();

        set_typing(&state, "c1", "alice").unwrap();
        sleep(Duration::from_secs(4)).await;

        let writes = store.writes_under(&entry);
        let deletes: Vec<&WriteRecord> = writes.iter().filter(|w| is_delete(w)).collect();
        assert_eq!(writes.len(), 2, "one set, one clear");
        assert_eq!(deletes.len(), 1);
        let elapsed = deletes[0].at.duration_since(start);
        assert!(elapsed >= Duration::from_millis(2000) && elapsed <= Duration::from_millis(3000));
        assert!(store.snapshot(&entry).is_none());
        assert!(!state.typing_timers.is_armed("c1", "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_rearm_the_timer_and_throttle_writes() {
        let (store, state) = create_test_state();
        let entry = paths::typing_entry("c1", "alice").unwrap();
        let start = Instant::now();

        for _ in 0..4 {
            set_typing(&state, "c1", "alice").unwrap();
            sleep(Duration::from_millis(500)).await;
        }
        // last keystroke at 1500ms
        sleep(Duration::from_secs(4)).await;

        let writes = store.writes_under(&entry);
        let sets = writes.iter().filter(|w| !is_delete(w)).count();
        let deletes: Vec<&WriteRecord> = writes.iter().filter(|w| is_delete(w)).collect();
        assert_eq!(sets, 2, "rewritten once half the TTL has passed");
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].at.duration_since(start) >= Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_typing_writes_immediately_and_cancels_timer() {
        let (store, state) = create_test_state();
        let entry = paths::typing_entry("c1", "alice").unwrap();

        set_typing(&state, "c1", "alice").unwrap();
        clear_typing(&state, "c1", "alice").unwrap();
        wait_until(|| store.writes_under(&entry).len() == 2).await;
        assert!(is_delete(store.writes_under(&entry).last().unwrap()));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(store.writes_under(&entry).len(), 2, "the cancelled timer never fires");

        // clearing when not typing writes nothing
        clear_typing(&state, "c1", "alice").unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(store.writes_under(&entry).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sending_a_message_clears_typing() {
        let (store, state) = create_test_state();
        let entry = paths::typing_entry("c1", "alice").unwrap();

        set_typing(&state, "c1", "alice").unwrap();
        let ticket = chat_sync::services::send_text(&state, "c1", "alice", "done typing", None).unwrap();
        bounded(ticket.outcome()).await;
        wait_until(|| store.writes_under(&entry).len() == 2).await;
        assert!(store.snapshot(&entry).is_none());
        assert!(!state.typing_timers.is_armed("c1", "alice"));
    }

    // ============================================================
    // Lettura dell'indicatore
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_stale_flag_disappears_without_a_clear() {
        let (store, state) = create_test_state();
        let mut typing = watch_typing(&state, "c1").unwrap();

        // a client that crashed mid-typing never clears its entry
        store.seed(&paths::typing_entry("c1", "bob").unwrap(), serde_json::json!(123));
        let users = bounded(typing.wait_for(|users| users.contains("bob"))).await.unwrap();
        assert_eq!(users.len(), 1);

        let seen_at = Instant::now();
        bounded(typing.wait_for(|users| users.is_empty())).await.unwrap();
        let elapsed = Instant::now().duration_since(seen_at);
        assert!(elapsed >= Duration::from_millis(2000) && elapsed <= Duration::from_millis(3000));
        assert!(store.snapshot(&paths::typing_entry("c1", "bob").unwrap()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_flag_stays_visible() {
        let (store, state) = create_test_state();
        let typing = watch_typing(&state, "c1").unwrap();
        let entry = paths::typing_entry("c1", "bob").unwrap();

        store.seed(&entry, serde_json::json!(1));
        wait_until(|| typing.get().contains("bob")).await;
        advance(Duration::from_millis(1500)).await;
        store.seed(&entry, serde_json::json!(2));
        advance(Duration::from_millis(1500)).await;
        // an unrefreshed flag would have expired at 2.5s
        wait_until(|| typing.get().contains("bob")).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_view_hides_own_typing() {
        let (store, state) = create_test_state();
        let view = open_chat(&state, "c1").await.unwrap();

        store.seed(&paths::typing_entry("c1", "alice").unwrap(), serde_json::json!(5));
        store.seed(&paths::typing_entry("c1", "bob").unwrap(), serde_json::json!(5));
        wait_until(|| view.typing_users("nobody").len() == 2).await;
        assert_eq!(view.typing_users("alice"), vec!["bob".to_string()]);
        view.close();
    }

    // ============================================================
    // Presenza
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_slow_presence_write_is_not_fatal() {
        let (store, state) = create_test_state();
        store.set_write_delay(Some(Duration::from_secs(30)));
        let start = Instant::now();

        let status = go_online(&state, "alice").await;

        assert_eq!(status, PresenceStatus::Online);
        assert_eq!(state.session.status(), PresenceStatus::Online);
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_store_still_goes_online_locally() {
        let (store, state) = create_test_state();
        store.set_offline(true);
        assert_eq!(go_online(&state, "alice").await, PresenceStatus::Online);
        assert!(store.disconnect_hooks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_hook_marks_user_offline() {
        let (store, state) = create_test_state();
        go_online(&state, "alice").await;
        assert_eq!(store.disconnect_hooks().len(), 1);
        assert!(get_presence(&state, "alice").await.unwrap().unwrap().online);

        store.simulate_disconnect();
        assert_eq!(connection_lost(&state), PresenceStatus::Offline);

        let record = get_presence(&state, "alice").await.unwrap().unwrap();
        assert!(!record.online);
        assert_eq!(state.presence_board.get("alice"), Some(record));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_refreshes_and_background_goes_offline() {
        let (store, state) = create_test_state();
        let presence = paths::presence("alice").unwrap();

        assert_eq!(app_foreground(&state, "alice").await, PresenceStatus::Online);
        let after_connect = store.writes_under(&presence).len();

        assert_eq!(app_foreground(&state, "alice").await, PresenceStatus::Online);
        assert_eq!(store.writes_under(&presence).len(), after_connect + 1);

        assert_eq!(app_background(&state, "alice").await, PresenceStatus::Offline);
        assert!(!get_presence(&state, "alice").await.unwrap().unwrap().online);

        // back from background registers again
        assert_eq!(app_foreground(&state, "alice").await, PresenceStatus::Online);
        assert!(get_presence(&state, "alice").await.unwrap().unwrap().online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_typing_and_session() {
        let (store, state) = create_test_state();
        go_online(&state, "alice").await;
        set_typing(&state, "c1", "alice").unwrap();
        set_typing(&state, "c2", "alice").unwrap();

        assert_eq!(logout(&state, "alice").await, PresenceStatus::Offline);
        wait_until(|| {
            store.snapshot(&paths::typing_entry("c1", "alice").unwrap()).is_none()
                && store.snapshot(&paths::typing_entry("c2", "alice").unwrap()).is_none()
        })
        .await;
        assert!(!state.typing_timers.is_armed("c1", "alice"));
        assert_eq!(state.session.uid(), None);
        assert_eq!(state.session.status(), PresenceStatus::Offline);
        assert!(!get_presence(&state, "alice").await.unwrap().unwrap().online);
    }
}
