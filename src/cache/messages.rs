//! MessageCache - one serialized window per chat, observable by the UI
//!
//! Every mutation of a chat's window goes through [`MessageCache::update`],
//! which holds that chat's lock for the duration of a synchronous closure and
//! publishes the resulting view before releasing it. Different chats never
//! contend. No lock is ever held across an `.await`.

use super::window::{ChatMessageWindow, Origin, WindowView};
use crate::entities::Message;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, instrument};

struct WindowSlot {
    window: Mutex<ChatMessageWindow>,
    tx: watch::Sender<Arc<WindowView>>,
}

impl WindowSlot {
    fn new(chat_id: &str) -> Self {
        let window = ChatMessageWindow::new(chat_id);
        let (tx, _) = watch::channel(Arc::new(window.view()));
        Self {
            window: Mutex::new(window),
            tx,
        }
    }
}

#[derive(Default)]
pub struct MessageCache {
    windows: DashMap<String, Arc<WindowSlot>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    fn slot(&self, chat_id: &str) -> Arc<WindowSlot> {
        if let Some(slot) = self.windows.get(chat_id) {
            return slot.value().clone();
        }
        self.windows
            .entry(chat_id.to_string())
            .or_insert_with(|| {
                debug!(chat_id, "Creating message window");
                Arc::new(WindowSlot::new(chat_id))
            })
            .value()
            .clone()
    }

    /// Runs `f` with exclusive access to the window of `chat_id`, then publishes
    /// the new view if anything visible changed.
    pub fn update<R>(&self, chat_id: &str, f: impl FnOnce(&mut ChatMessageWindow) -> R) -> R {
        let slot = self.slot(chat_id);
        // a panic inside a closure leaves the window consistent, recover it
        let mut window = slot.window.lock().unwrap_or_else(|e| e.into_inner());
        let result = f(&mut window);
        let view = window.view();
        slot.tx.send_if_modified(|current| {
            if **current == view {
                false
            } else {
                *current = Arc::new(view);
                true
            }
        });
        result
    }

    pub fn read<R>(&self, chat_id: &str, f: impl FnOnce(&ChatMessageWindow) -> R) -> R {
        let slot = self.slot(chat_id);
        let window = slot.window.lock().unwrap_or_else(|e| e.into_inner());
        f(&window)
    }

    /// Current view, `getWindow` for the UI. No side effects beyond creating an empty window.
    pub fn view(&self, chat_id: &str) -> Arc<WindowView> {
        self.slot(chat_id).tx.borrow().clone()
    }

    pub fn subscribe(&self, chat_id: &str) -> watch::Receiver<Arc<WindowView>> {
        self.slot(chat_id).tx.subscribe()
    }

    #[instrument(skip(self, batch), fields(chat_id = %chat_id, count = batch.len()))]
    pub fn upsert_batch(&self, chat_id: &str, batch: Vec<Message>, origin: Origin) -> usize {
        self.update(chat_id, |window| window.upsert_batch(batch, origin))
    }

    #[instrument(skip(self, batch), fields(chat_id = %chat_id, count = batch.len()))]
    pub fn prepend_older_page(&self, chat_id: &str, batch: Vec<Message>, has_more: bool) {
        self.update(chat_id, |window| window.prepend_older_page(batch, has_more));
    }

    /// Drops the window of a chat that is no longer relevant (left group).
    pub fn evict(&self, chat_id: &str) {
        if self.windows.remove(chat_id).is_some() {
            debug!(chat_id, "Message window evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DeliveryState, MessageBody};

    fn msg(id: &str, ts: i64) -> Message {
        Message::new(id.into(), "c1", "alice", MessageBody::Text { text: "x".into() }, ts)
    }

    #[tokio::test]
    async fn observers_see_changes_but_not_noops() {
        let cache = MessageCache::new();
        let mut rx = cache.subscribe("c1");
        rx.borrow_and_update();

        cache.upsert_batch("c1", vec![msg("a", 1)], Origin::Remote);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().ids(), vec!["a"]);

        cache.upsert_batch("c1", vec![msg("a", 1)], Origin::Remote);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn concurrent_merges_never_duplicate() {
        let cache = Arc::new(MessageCache::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let ts = (i + worker) % 50;
                    cache.upsert_batch("c1", vec![msg(&format!("m{ts:02}"), ts)], Origin::Remote);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let view = cache.view("c1");
        assert_eq!(view.len(), 50);
        assert!(view.messages.windows(2).all(|w| w[0].message.order_key() < w[1].message.order_key()));
        assert!(view.messages.iter().all(|m| m.state == DeliveryState::Sent));
    }
}
