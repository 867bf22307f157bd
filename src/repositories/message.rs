//! MessageRepository - typed access to `messages/{chatId}`

use super::paths;
use super::traits::{Bound, Query, RangeQuery, RemoteStore};
use crate::core::SyncError;
use crate::dtos::wire::{is_truthy, millis_of};
use crate::dtos::{decode_message, decode_message_map};
use crate::entities::Message;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Field every message range is ordered by.
pub const ORDER_FIELD: &str = "timestamp";

pub struct MessageRepository<S: RemoteStore> {
    store: Arc<S>,
}

fn decode_page(chat_id: &str, children: Vec<(String, Value)>) -> Vec<Message> {
    let mut messages: Vec<Message> = children
        .into_iter()
        .filter_map(|(key, value)| decode_message(chat_id, &key, value))
        .collect();
    messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    messages
}

impl<S: RemoteStore> MessageRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The newest `limit` messages, ascending.
    #[instrument(skip(self), fields(chat_id = %chat_id))]
    pub async fn find_latest(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>, SyncError> {
        let path = paths::messages(chat_id)?;
        let children = self
            .store
            .range_query(&path, &RangeQuery::last(ORDER_FIELD, limit))
            .await?;
        debug!("Fetched {} raw records", children.len());
        Ok(decode_page(chat_id, children))
    }

    /// Up to `limit` messages strictly older than `(timestamp, id)`, ascending.
    #[instrument(skip(self), fields(chat_id = %chat_id))]
    pub async fn find_before(
        &self,
        chat_id: &str,
        cursor: (i64, &str),
        limit: usize,
    ) -> Result<Vec<Message>, SyncError> {
        let path = paths::messages(chat_id)?;
        let range = RangeQuery::last(ORDER_FIELD, limit).end_before(Bound::at(cursor.0, cursor.1));
        let children = self.store.range_query(&path, &range).await?;
        Ok(decode_page(chat_id, children))
    }

    /// Up to `limit` messages strictly newer than `(timestamp, id)`, ascending.
    #[instrument(skip(self), fields(chat_id = %chat_id))]
    pub async fn find_after(
        &self,
        chat_id: &str,
        cursor: (i64, &str),
        limit: usize,
    ) -> Result<Vec<Message>, SyncError> {
        let path = paths::messages(chat_id)?;
        let range = RangeQuery::first(ORDER_FIELD, limit).start_after(Bound::at(cursor.0, cursor.1));
        let children = self.store.range_query(&path, &range).await?;
        Ok(decode_page(chat_id, children))
    }

    pub async fn find_by_id(&self, chat_id: &str, message_id: &str) -> Result<Option<Message>, SyncError> {
        let value = self.store.get(&paths::message(chat_id, message_id)?).await?;
        Ok(value.and_then(|v| decode_message(chat_id, message_id, v)))
    }

    /// Every message of the chat, ascending. Used for full-range comparisons.
    pub async fn find_all(&self, chat_id: &str) -> Result<Vec<Message>, SyncError> {
        let value = self.store.get(&paths::messages(chat_id)?).await?;
        let mut messages = decode_message_map(chat_id, value);
        messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Ok(messages)
    }

    /// Store-generated message id.
    pub async fn allocate_id(&self, chat_id: &str) -> Result<String, SyncError> {
        Ok(self.store.allocate_key(&paths::messages(chat_id)?).await?)
    }

    /// Live view of the newest `limit` messages.
    pub fn live_query(&self, chat_id: &str, limit: usize) -> Result<Query, SyncError> {
        Ok(Query::ranged(
            paths::messages(chat_id)?,
            RangeQuery::last(ORDER_FIELD, limit),
        ))
    }

    #[instrument(skip(self), fields(chat_id = %chat_id, message_id = %message_id, uid = %uid))]
    /// Writes `readBy/{uid}` unless a receipt is already stored. Returns the
    /// receipt time that ends up in the store.
    pub async fn mark_read(&self, chat_id: &str, message_id: &str, uid: &str, at: i64) -> Result<i64, SyncError> {
        let path = paths::message_entry(chat_id, message_id, "readBy", uid)?;
        if let Some(existing) = self.store.get(&path).await?.filter(is_truthy) {
            debug!("Read receipt already stored");
            return Ok(millis_of(&existing).unwrap_or(at));
        }
        self.store.set(&path, Value::from(at)).await?;
        Ok(at)
    }

    #[instrument(skip(self), fields(chat_id = %chat_id, message_id = %message_id, uid = %uid))]
    pub async fn mark_delivered(&self, chat_id: &str, message_id: &str, uid: &str) -> Result<(), SyncError> {
        let path = paths::message_entry(chat_id, message_id, "deliveredTo", uid)?;
        self.store.set(&path, Value::Bool(true)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(chat_id = %chat_id, message_id = %message_id, uid = %uid))]
    pub async fn hide_for(&self, chat_id: &str, message_id: &str, uid: &str) -> Result<(), SyncError> {
        let path = paths::message_entry(chat_id, message_id, "deletedFor", uid)?;
        self.store.set(&path, Value::Bool(true)).await?;
        Ok(())
    }
}
