//! ChatMessageWindow - ordered, deduplicated messages of one chat
//!
//! Entries are keyed by `(timestamp, id)` so iteration is always the render
//! order and a pagination cursor is a strict boundary even when timestamps
//! collide. A side index maps ids to their key for dedup.

use crate::entities::{DeliveryState, Message};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

type EntryKey = (i64, String);

/// Where a batch comes from. Decides who wins on id collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Authoritative copy from the store (push, first page, older page).
    Remote,
    /// Optimistic placeholder authored on this device.
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedMessage {
    pub message: Message,
    pub state: DeliveryState,
}

/// Immutable snapshot of a window, published to observers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowView {
    pub chat_id: String,
    pub messages: Vec<CachedMessage>,
    pub has_more_older: bool,
    pub loading_older: bool,
}

impl WindowView {
    pub fn find(&self, message_id: &str) -> Option<&CachedMessage> {
        self.messages.iter().find(|m| m.message.id == message_id)
    }

    pub fn state_of(&self, message_id: &str) -> Option<DeliveryState> {
        self.find(message_id).map(|m| m.state)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.message.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages `uid` should see (per-user deletions filtered out).
    pub fn visible_to(&self, uid: &str) -> Vec<&CachedMessage> {
        self.messages.iter().filter(|m| m.message.is_visible_to(uid)).collect()
    }

    /// The quoted message, if it is loaded. Absent targets are not fetched.
    pub fn reply_target(&self, message: &Message) -> Option<&CachedMessage> {
        message.reply_to_id.as_deref().and_then(|id| self.find(id))
    }
}

#[derive(Debug)]
pub struct ChatMessageWindow {
    chat_id: String,
    entries: BTreeMap<EntryKey, CachedMessage>,
    index: HashMap<String, EntryKey>,
    has_more_older: bool,
    initial_loaded: bool,
    loading_older: bool,
}

impl ChatMessageWindow {
    pub fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            entries: BTreeMap::new(),
            index: HashMap::new(),
            has_more_older: false,
            initial_loaded: false,
            loading_older: false,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&CachedMessage> {
        self.index.get(message_id).and_then(|key| self.entries.get(key))
    }

    pub fn has_more_older(&self) -> bool {
        self.has_more_older
    }

    pub fn initial_loaded(&self) -> bool {
        self.initial_loaded
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    /// Claims the "loading older" flag. Returns false if a load is already running.
    pub fn begin_loading_older(&mut self) -> bool {
        if self.loading_older {
            return false;
        }
        self.loading_older = true;
        true
    }

    pub fn end_loading_older(&mut self) {
        self.loading_older = false;
    }

    /// Oldest message that came from the store; the cursor for the next older page.
    pub fn oldest_cursor(&self) -> Option<(i64, String)> {
        self.entries
            .iter()
            .find(|(_, m)| m.state == DeliveryState::Sent)
            .map(|(key, _)| key.clone())
    }

    /// Newest message that came from the store.
    pub fn newest_confirmed(&self) -> Option<(i64, String)> {
        self.entries
            .iter()
            .rev()
            .find(|(_, m)| m.state == DeliveryState::Sent)
            .map(|(key, _)| key.clone())
    }

    fn insert(&mut self, message: Message, state: DeliveryState) {
        let key = (message.timestamp, message.id.clone());
        self.index.insert(message.id.clone(), key.clone());
        self.entries.insert(key, CachedMessage { message, state });
    }

    pub fn remove(&mut self, message_id: &str) -> Option<CachedMessage> {
        let key = self.index.remove(message_id)?;
        self.entries.remove(&key)
    }

    /// Merges one record. Returns true if the window changed.
    fn upsert_one(&mut self, incoming: Message, origin: Origin) -> bool {
        match origin {
            Origin::Local => {
                if let Some(existing) = self.get(&incoming.id) {
                    if existing.state == DeliveryState::Sent {
                        debug!(message_id = %incoming.id, "Placeholder already confirmed, ignoring");
                        return false;
                    }
                    self.remove(&incoming.id);
                }
                self.insert(incoming, DeliveryState::Pending);
                true
            }
            Origin::Remote => {
                // store-assigned id confirming a local placeholder
                if let Some(local_id) = incoming.client_ref.clone() {
                    let unconfirmed = self
                        .get(&local_id)
                        .is_some_and(|m| m.state != DeliveryState::Sent);
                    if local_id != incoming.id && unconfirmed {
                        self.remove(&local_id);
                    }
                }

                let Some(key) = self.index.get(&incoming.id).cloned() else {
                    self.insert(incoming, DeliveryState::Sent);
                    return true;
                };
                let Some(existing) = self.entries.get_mut(&key) else {
                    warn!(message_id = %incoming.id, "Index out of sync with entries, repairing");
                    self.index.remove(&incoming.id);
                    self.insert(incoming, DeliveryState::Sent);
                    return true;
                };
                if existing.message.timestamp != incoming.timestamp
                    || existing.message.sender_id != incoming.sender_id
                {
                    warn!(
                        message_id = %incoming.id,
                        "Remote copy changed timestamp or sender, keeping the original"
                    );
                }
                let before = existing.clone();
                existing.message.absorb(incoming);
                existing.state = DeliveryState::Sent;
                *existing != before
            }
        }
    }

    /// Merges a batch. Dedup is by id; order is restored by the key.
    pub fn upsert_batch(&mut self, batch: Vec<Message>, origin: Origin) -> usize {
        let mut changed = 0;
        for message in batch {
            if message.chat_id == self.chat_id && self.upsert_one(message, origin) {
                changed += 1;
            }
        }
        changed
    }

    /// First page of history. `has_more` is the page-full flag.
    pub fn set_initial_page(&mut self, batch: Vec<Message>, has_more: bool) {
        self.upsert_batch(batch, Origin::Remote);
        if !self.initial_loaded {
            self.has_more_older = has_more;
        }
        self.initial_loaded = true;
    }

    /// Older page from pagination. Newer entries and placeholders are left alone.
    pub fn prepend_older_page(&mut self, batch: Vec<Message>, has_more: bool) {
        let boundary = self.oldest_cursor();
        let stray = batch
            .iter()
            .filter(|m| boundary.as_ref().is_some_and(|b| (m.timestamp, m.id.as_str()) >= (b.0, b.1.as_str())))
            .count();
        if stray > 0 {
            warn!(chat_id = %self.chat_id, stray, "Older page overlaps loaded messages");
        }
        self.upsert_batch(batch, Origin::Remote);
        self.has_more_older = has_more;
        self.loading_older = false;
    }

    /// Inserts an optimistic entry. False if the id is already confirmed.
    pub fn insert_optimistic(&mut self, message: Message) -> bool {
        self.upsert_one(message, Origin::Local)
    }

    pub fn mark_state(&mut self, message_id: &str, state: DeliveryState) -> bool {
        let Some(key) = self.index.get(message_id) else {
            return false;
        };
        match self.entries.get_mut(key) {
            Some(entry) if entry.state != state => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    /// Replaces a placeholder with the confirmed record, which may carry a new id.
    pub fn reconcile(&mut self, local_id: &str, confirmed: Message) {
        if confirmed.id != local_id {
            self.remove(local_id);
        }
        self.upsert_one(confirmed, Origin::Remote);
    }

    /// Mutates a message in place. Identity fields are restored afterwards.
    pub fn patch(&mut self, message_id: &str, f: impl FnOnce(&mut Message)) -> bool {
        let Some(key) = self.index.get(message_id) else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        let (id, timestamp, sender_id) = (
            entry.message.id.clone(),
            entry.message.timestamp,
            entry.message.sender_id.clone(),
        );
        let before = entry.message.clone();
        f(&mut entry.message);
        entry.message.id = id;
        entry.message.timestamp = timestamp;
        entry.message.sender_id = sender_id;
        entry.message != before
    }

    pub fn view(&self) -> WindowView {
        WindowView {
            chat_id: self.chat_id.clone(),
            messages: self.entries.values().cloned().collect(),
            has_more_older: self.has_more_older,
            loading_older: self.loading_older,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MessageBody;

    fn msg(id: &str, ts: i64) -> Message {
        Message::new(
            id.to_string(),
            "c1",
            "alice",
            MessageBody::Text { text: format!("text {id}") },
            ts,
        )
    }

    fn ids(window: &ChatMessageWindow) -> Vec<String> {
        window.view().messages.into_iter().map(|m| m.message.id).collect()
    }

    #[test]
    fn overlapping_batches_keep_one_copy_sorted() {
        let mut window = ChatMessageWindow::new("c1");
        window.upsert_batch(vec![msg("b", 2), msg("a", 1), msg("c", 3)], Origin::Remote);
        window.upsert_batch(vec![msg("c", 3), msg("d", 4), msg("a", 1)], Origin::Remote);
        assert_eq!(ids(&window), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn batch_counts_only_changed_entries() {
        let mut window = ChatMessageWindow::new("c1");
        let mut foreign = msg("x", 9);
        foreign.chat_id = "c2".into();
        assert_eq!(window.upsert_batch(vec![msg("a", 1), foreign, msg("b", 2)], Origin::Remote), 2);
        assert_eq!(window.upsert_batch(vec![msg("a", 1), msg("b", 2), msg("c", 3)], Origin::Remote), 1);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let mut window = ChatMessageWindow::new("c1");
        window.upsert_batch(vec![msg("z", 5), msg("m", 5), msg("a", 5)], Origin::Remote);
        assert_eq!(ids(&window), vec!["a", "m", "z"]);
        assert_eq!(window.oldest_cursor(), Some((5, "a".to_string())));
    }

    #[test]
    fn messages_of_other_chats_are_ignored() {
        let mut window = ChatMessageWindow::new("c1");
        let mut foreign = msg("x", 1);
        foreign.chat_id = "c2".into();
        assert_eq!(window.upsert_batch(vec![foreign], Origin::Remote), 0);
        assert!(window.is_empty());
    }

    #[test]
    fn remote_copy_confirms_placeholder() {
        let mut window = ChatMessageWindow::new("c1");
        assert!(window.insert_optimistic(msg("local_1", 10)));
        assert_eq!(window.get("local_1").unwrap().state, DeliveryState::Pending);

        window.upsert_batch(vec![msg("local_1", 10)], Origin::Remote);
        assert_eq!(window.len(), 1);
        assert_eq!(window.get("local_1").unwrap().state, DeliveryState::Sent);

        // a late placeholder must not downgrade the confirmed entry
        assert!(!window.insert_optimistic(msg("local_1", 10)));
        assert_eq!(window.get("local_1").unwrap().state, DeliveryState::Sent);
    }

    #[test]
    fn client_ref_replaces_placeholder_with_store_id() {
        let mut window = ChatMessageWindow::new("c1");
        window.insert_optimistic(msg("local_1", 10));
        let mut confirmed = msg("k000123", 10);
        confirmed.client_ref = Some("local_1".into());

        window.upsert_batch(vec![confirmed], Origin::Remote);
        assert_eq!(ids(&window), vec!["k000123"]);
    }

    #[test]
    fn older_page_leaves_newer_entries_alone() {
        let mut window = ChatMessageWindow::new("c1");
        window.set_initial_page(vec![msg("m3", 3), msg("m4", 4)], true);
        window.insert_optimistic(msg("local", 9));
        assert!(window.begin_loading_older());
        assert!(!window.begin_loading_older());

        window.prepend_older_page(vec![msg("m1", 1), msg("m2", 2)], false);
        assert_eq!(ids(&window), vec!["m1", "m2", "m3", "m4", "local"]);
        assert!(!window.has_more_older());
        assert!(!window.is_loading_older());
        assert_eq!(window.get("local").unwrap().state, DeliveryState::Pending);
    }

    #[test]
    fn patch_cannot_move_a_message() {
        let mut window = ChatMessageWindow::new("c1");
        window.upsert_batch(vec![msg("a", 1), msg("b", 2)], Origin::Remote);
        window.patch("a", |m| {
            m.timestamp = 99;
            m.read_by.insert("bob".into(), 5);
        });
        assert_eq!(ids(&window), vec!["a", "b"]);
        assert_eq!(window.get("a").unwrap().message.read_by.get("bob"), Some(&5));
    }

    #[test]
    fn failed_entry_can_be_resent_without_duplicate() {
        let mut window = ChatMessageWindow::new("c1");
        window.insert_optimistic(msg("local_1", 10));
        window.mark_state("local_1", DeliveryState::Failed);
        assert!(window.insert_optimistic(msg("local_1", 10)));
        assert_eq!(window.len(), 1);
        assert_eq!(window.get("local_1").unwrap().state, DeliveryState::Pending);
    }
}
