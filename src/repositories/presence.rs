//! PresenceRepository - `presence/{uid}` and `typing/{chatId}/{uid}`

use super::paths;
use super::traits::{Query, RemoteStore};
use crate::core::SyncError;
use crate::dtos::{PresenceRecordDTO, decode_presence};
use crate::entities::PresenceRecord;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

pub struct PresenceRepository<S: RemoteStore> {
    store: Arc<S>,
}

impl<S: RemoteStore> PresenceRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(uid = %uid))]
    pub async fn write(&self, uid: &str, online: bool, last_seen: i64) -> Result<(), SyncError> {
        let value = PresenceRecordDTO::new(online, last_seen).to_value();
        self.store.set(&paths::presence(uid)?, value).await?;
        Ok(())
    }

    /// Registers the server-side `online = false` write for an ungraceful disconnect.
    #[instrument(skip(self), fields(uid = %uid))]
    pub async fn register_offline_hook(&self, uid: &str, last_seen: i64) -> Result<(), SyncError> {
        let value = PresenceRecordDTO::new(false, last_seen).to_value();
        self.store.on_disconnect_set(&paths::presence(uid)?, value).await?;
        Ok(())
    }

    pub async fn find(&self, uid: &str) -> Result<Option<PresenceRecord>, SyncError> {
        let value = self.store.get(&paths::presence(uid)?).await?;
        Ok(decode_presence(uid, value))
    }

    pub fn presence_query(&self, uid: &str) -> Result<Query, SyncError> {
        Ok(Query::path(paths::presence(uid)?))
    }

    pub fn typing_query(&self, chat_id: &str) -> Result<Query, SyncError> {
        Ok(Query::path(paths::typing(chat_id)?))
    }

    /// Writes the keystroke time of `uid` in `chat_id`.
    pub async fn set_typing(&self, chat_id: &str, uid: &str, at: i64) -> Result<(), SyncError> {
        self.store
            .set(&paths::typing_entry(chat_id, uid)?, Value::from(at))
            .await?;
        Ok(())
    }

    pub async fn clear_typing(&self, chat_id: &str, uid: &str) -> Result<(), SyncError> {
        self.store.set(&paths::typing_entry(chat_id, uid)?, Value::Null).await?;
        Ok(())
    }
}
