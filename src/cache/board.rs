//! WatchBoard - keyed last-value cells for the small feeds
//!
//! Chat metadata, the user's chat list and presence records are each a single
//! value per key that is fully replaced on every snapshot.

use crate::entities::{Chat, PresenceRecord};
use dashmap::DashMap;
use std::collections::BTreeSet;
use tokio::sync::watch;

pub struct WatchBoard<T> {
    cells: DashMap<String, watch::Sender<T>>,
}

/// Chat records by chat id.
pub type ChatBoard = WatchBoard<Option<Chat>>;
/// Reverse index (chat ids) by uid.
pub type UserChatsBoard = WatchBoard<BTreeSet<String>>;
/// Presence by uid.
pub type PresenceBoard = WatchBoard<Option<PresenceRecord>>;

impl<T> Default for WatchBoard<T> {
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }
}

impl<T: Clone + Default + PartialEq> WatchBoard<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, key: &str) -> watch::Sender<T> {
        self.cells
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(T::default()).0)
            .value()
            .clone()
    }

    /// Replaces the value. Observers are woken only on an actual change.
    pub fn publish(&self, key: &str, value: T) -> bool {
        self.sender(key).send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub fn get(&self, key: &str) -> T {
        match self.cells.get(key) {
            Some(cell) => cell.value().borrow().clone(),
            None => T::default(),
        }
    }

    pub fn subscribe(&self, key: &str) -> watch::Receiver<T> {
        self.sender(key).subscribe()
    }

    pub fn remove(&self, key: &str) {
        self.cells.remove(key);
    }
}

impl ChatBoard {
    /// Applies a local mutation to a cached chat, if present.
    pub fn modify(&self, chat_id: &str, f: impl FnOnce(&mut Chat)) {
        if let Some(cell) = self.cells.get(chat_id) {
            cell.value().send_if_modified(|current| match current {
                Some(chat) => {
                    let before = chat.clone();
                    f(chat);
                    *chat != before
                }
                None => false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_only_wakes_on_change() {
        let board: UserChatsBoard = WatchBoard::new();
        let mut rx = board.subscribe("alice");
        let ids: BTreeSet<String> = ["c1".to_string()].into();

        assert!(board.publish("alice", ids.clone()));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!board.publish("alice", ids.clone()));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(board.get("alice"), ids);
        assert!(board.get("bob").is_empty());
    }
}
