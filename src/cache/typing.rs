//! TypingBoard - who is typing, with a reader-side stale timeout
//!
//! The board never trusts the absence of a clear: an entry counts as typing
//! only for `ttl` after it was last seen to change, measured on the local
//! clock at receipt.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct TypingEntry {
    keystroke_at: Option<i64>,
    received_at: Instant,
}

struct TypingSlot {
    entries: Mutex<BTreeMap<String, TypingEntry>>,
    tx: watch::Sender<BTreeSet<String>>,
}

pub struct TypingBoard {
    ttl: Duration,
    chats: DashMap<String, Arc<TypingSlot>>,
}

impl TypingBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            chats: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, chat_id: &str) -> Arc<TypingSlot> {
        self.chats
            .entry(chat_id.to_string())
            .or_insert_with(|| {
                Arc::new(TypingSlot {
                    entries: Mutex::new(BTreeMap::new()),
                    tx: watch::channel(BTreeSet::new()).0,
                })
            })
            .value()
            .clone()
    }

    fn active(&self, entries: &BTreeMap<String, TypingEntry>, now: Instant) -> BTreeSet<String> {
        entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.received_at) < self.ttl)
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    fn publish(slot: &TypingSlot, active: BTreeSet<String>) {
        slot.tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
    }

    /// Folds a full `typing/{chatId}` snapshot. Unchanged entries keep their receipt time.
    pub fn apply_snapshot(&self, chat_id: &str, snapshot: BTreeMap<String, Option<i64>>, now: Instant) {
        let slot = self.slot(chat_id);
        let mut entries = slot.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|uid, _| snapshot.contains_key(uid));
        for (uid, keystroke_at) in snapshot {
            let refreshed = match entries.get(&uid) {
                Some(existing) => existing.keystroke_at != keystroke_at,
                None => true,
            };
            if refreshed {
                entries.insert(
                    uid,
                    TypingEntry {
                        keystroke_at,
                        received_at: now,
                    },
                );
            }
        }
        let active = self.active(&entries, now);
        Self::publish(&slot, active);
    }

    /// Re-evaluates staleness. Called by the typing feed when the next entry expires.
    pub fn expire(&self, chat_id: &str, now: Instant) {
        let slot = self.slot(chat_id);
        let entries = slot.entries.lock().unwrap_or_else(|e| e.into_inner());
        let active = self.active(&entries, now);
        Self::publish(&slot, active);
    }

    /// When the oldest still-active entry goes stale.
    pub fn next_expiry(&self, chat_id: &str, now: Instant) -> Option<Instant> {
        let slot = self.slot(chat_id);
        let entries = slot.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .map(|e| e.received_at + self.ttl)
            .filter(|deadline| *deadline > now)
            .min()
    }

    /// Fresh read: users typing in `chat_id` right now, stale flags excluded.
    pub fn typing_users(&self, chat_id: &str, now: Instant) -> BTreeSet<String> {
        let slot = self.slot(chat_id);
        let entries = slot.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.active(&entries, now)
    }

    pub fn subscribe(&self, chat_id: &str) -> watch::Receiver<BTreeSet<String>> {
        self.slot(chat_id).tx.subscribe()
    }

    pub fn remove(&self, chat_id: &str) {
        self.chats.remove(chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stale_flag_expires_without_a_clear() {
        let board = TypingBoard::new(Duration::from_millis(2500));
        let t0 = Instant::now();
        board.apply_snapshot("c1", [("bob".to_string(), None)].into(), t0);
        assert!(board.typing_users("c1", t0).contains("bob"));
        assert_eq!(board.next_expiry("c1", t0), Some(t0 + Duration::from_millis(2500)));

        let later = t0 + Duration::from_millis(2600);
        assert!(board.typing_users("c1", later).is_empty());
        board.expire("c1", later);
        assert!(board.subscribe("c1").borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_keystroke_rearms_the_timeout() {
        let board = TypingBoard::new(Duration::from_millis(2500));
        let t0 = Instant::now();
        board.apply_snapshot("c1", [("bob".to_string(), Some(100))].into(), t0);

        let t1 = t0 + Duration::from_millis(2000);
        board.apply_snapshot("c1", [("bob".to_string(), Some(1300))].into(), t1);
        assert!(board.typing_users("c1", t0 + Duration::from_millis(4000)).contains("bob"));

        // same value delivered again does not refresh
        board.apply_snapshot("c1", [("bob".to_string(), Some(1300))].into(), t0 + Duration::from_millis(4000));
        assert!(board.typing_users("c1", t0 + Duration::from_millis(4600)).is_empty());
    }
}
