//! FanOut - builder for multi-path atomic writes
//!
//! Collects every location an operation must touch and submits them as a
//! single `multi_update`: the store applies all of them or none.

use crate::core::{SyncError, with_deadline};
use crate::dtos::{LastMessageRecord, MessageRecord};
use crate::entities::{LastMessageSummary, Message};
use crate::repositories::{RemoteStore, StorePath, paths};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info};

pub struct FanOut {
    label: &'static str,
    updates: BTreeMap<StorePath, Option<Value>>,
}

impl FanOut {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            updates: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, path: StorePath, value: impl Into<Value>) -> &mut Self {
        self.updates.insert(path, Some(value.into()));
        self
    }

    pub fn delete(&mut self, path: StorePath) -> &mut Self {
        self.updates.insert(path, None);
        self
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Adds the full record of `message` under `messages/{chatId}/{id}`.
    pub fn stage_message(&mut self, message: &Message) -> Result<&mut Self, SyncError> {
        let record = MessageRecord::from(message).to_value()?;
        Ok(self.set(paths::message(&message.chat_id, &message.id)?, record))
    }

    /// Adds the chat's denormalized last-message fields for `message`.
    pub fn stage_last_message(&mut self, message: &Message) -> Result<&mut Self, SyncError> {
        let chat_id = &message.chat_id;
        let summary = LastMessageRecord::from(&LastMessageSummary::from(message)).to_value()?;
        self.set(paths::chat_field(chat_id, "lastMessage")?, summary)
            .set(paths::chat_field(chat_id, "lastMessageTime")?, message.timestamp)
            .set(paths::chat_field(chat_id, "updatedAt")?, message.timestamp);
        Ok(self)
    }

    /// Overlapping locations make the write ambiguous; reject them before any network call.
    fn check_disjoint(&self) -> Result<(), SyncError> {
        let paths: Vec<&StorePath> = self.updates.keys().collect();
        for (i, a) in paths.iter().enumerate() {
            if let Some(b) = paths[i + 1..].iter().find(|b| a.overlaps(b)) {
                return Err(SyncError::bad_request("Fan-out paths overlap").with_details(format!("{a} and {b}")));
            }
        }
        Ok(())
    }

    /// Submits every location in one atomic update, bounded by `limit`.
    pub async fn commit<S: RemoteStore>(self, store: &S, limit: Duration) -> Result<(), SyncError> {
        if self.updates.is_empty() {
            return Ok(());
        }
        self.check_disjoint()?;

        let label = self.label;
        let locations = self.updates.len();
        debug!(operation = label, locations, "Submitting fan-out write");
        let result = with_deadline(label, limit, async {
            store.multi_update(self.updates).await.map_err(SyncError::from)
        })
        .await;

        match &result {
            Ok(()) => info!(operation = label, locations, "Fan-out write applied"),
            Err(e) => error!(operation = label, locations, error = %e, "Fan-out write failed, nothing applied"),
        }
        result
    }
}
