//! Typing services - the writer side of typing indicators
//!
//! Each (chat, uid) pair typed on this device has one timer. A keystroke
//! re-arms it; when it fires after `TYPING_TTL_MS` of quiet the entry is
//! deleted. The stored value is the keystroke time, rewritten at most every
//! half TTL so readers keep seeing it change while typing continues. Writes of
//! one pair are chained so a clear can never land before the set it follows.

use crate::core::{AppState, SyncError, best_effort};
use crate::repositories::{RemoteStore, paths};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument};

type TimerKey = (String, String);

struct TypingTimer {
    generation: u64,
    last_write: Instant,
    expiry: JoinHandle<()>,
}

#[derive(Default)]
pub struct TypingTimers {
    timers: DashMap<TimerKey, TypingTimer>,
    // last write task per pair, awaited by the next write
    writes: DashMap<TimerKey, JoinHandle<()>>,
    next_generation: AtomicU64,
}

impl TypingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self, chat_id: &str, uid: &str) -> bool {
        self.timers.contains_key(&(chat_id.to_string(), uid.to_string()))
    }

    /// Aborts every timer without writing. Returns how many were armed.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<TimerKey> = self.timers.iter().map(|t| t.key().clone()).collect();
        keys.iter()
            .filter_map(|key| self.timers.remove(key))
            .map(|(_, timer)| timer.expiry.abort())
            .count()
    }

    fn keys_of(&self, uid: &str) -> Vec<TimerKey> {
        self.timers
            .iter()
            .filter(|t| t.key().1 == uid)
            .map(|t| t.key().clone())
            .collect()
    }
}

/// Queues a typing write after the previous write of the same pair.
fn chain_write<S: RemoteStore>(state: &Arc<AppState<S>>, key: TimerKey, value: Option<i64>) {
    let previous = state.typing_timers.writes.remove(&key).map(|(_, handle)| handle);
    let task_state = state.clone();
    let (chat_id, uid) = key.clone();
    let handle = tokio::spawn(async move {
        if let Some(previous) = previous {
            // a failed or aborted predecessor does not block this write
            let _ = previous.await;
        }
        let limit = task_state.config.presence_timeout;
        match value {
            Some(at) => {
                best_effort("typing set", limit, task_state.presence.set_typing(&chat_id, &uid, at)).await;
            }
            None => {
                best_effort("typing clear", limit, task_state.presence.clear_typing(&chat_id, &uid)).await;
            }
        }
    });
    state.typing_timers.writes.insert(key, handle);
}

/// A keystroke of `uid` in `chat_id`.
#[instrument(skip(state), fields(chat_id = %chat_id, uid = %uid))]
pub fn set_typing<S: RemoteStore>(state: &Arc<AppState<S>>, chat_id: &str, uid: &str) -> Result<(), SyncError> {
    paths::typing_entry(chat_id, uid)?;
    let key: TimerKey = (chat_id.to_string(), uid.to_string());
    let now = Instant::now();
    let ttl = state.config.typing_ttl;
    let generation = state.typing_timers.next_generation.fetch_add(1, Ordering::Relaxed);

    let previous = state.typing_timers.timers.remove(&key).map(|(_, t)| t);
    let should_write = match &previous {
        None => true,
        Some(timer) => now.duration_since(timer.last_write) >= ttl / 2,
    };
    if let Some(timer) = &previous {
        timer.expiry.abort();
    }

    let expiry_state = state.clone();
    let expiry_key = key.clone();
    let expiry = tokio::spawn(async move {
        sleep(ttl).await;
        let fired = expiry_state
            .typing_timers
            .timers
            .remove_if(&expiry_key, |_, timer| timer.generation == generation)
            .is_some();
        if fired {
            debug!(chat_id = %expiry_key.0, uid = %expiry_key.1, "Typing timed out, clearing");
            chain_write(&expiry_state, expiry_key, None);
        }
    });

    let last_write = match (&previous, should_write) {
        (Some(timer), false) => timer.last_write,
        _ => now,
    };
    state.typing_timers.timers.insert(
        key.clone(),
        TypingTimer {
            generation,
            last_write,
            expiry,
        },
    );

    if should_write {
        chain_write(state, key, Some(Utc::now().timestamp_millis()));
    }
    Ok(())
}

/// Input emptied or message sent: clear immediately and cancel the timer.
/// Nothing is written if `uid` was not typing in `chat_id`.
#[instrument(skip(state), fields(chat_id = %chat_id, uid = %uid))]
pub fn clear_typing<S: RemoteStore>(state: &Arc<AppState<S>>, chat_id: &str, uid: &str) -> Result<(), SyncError> {
    paths::typing_entry(chat_id, uid)?;
    let key: TimerKey = (chat_id.to_string(), uid.to_string());
    if let Some((_, timer)) = state.typing_timers.timers.remove(&key) {
        timer.expiry.abort();
        chain_write(state, key, None);
    }
    Ok(())
}

/// Clears every chat `uid` is typing in (logout).
pub fn clear_all_for<S: RemoteStore>(state: &Arc<AppState<S>>, uid: &str) {
    for (chat_id, uid) in state.typing_timers.keys_of(uid) {
        // keys come from validated writes
        let _ = clear_typing(state, &chat_id, &uid);
    }
}
