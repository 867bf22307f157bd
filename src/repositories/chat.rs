//! ChatRepository - typed access to `chats/` and the `userChats/` reverse index

use super::paths;
use super::traits::{Query, RemoteStore};
use crate::core::SyncError;
use crate::dtos::{decode_chat, decode_chat_ids};
use crate::entities::Chat;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

pub struct ChatRepository<S: RemoteStore> {
    store: Arc<S>,
}

impl<S: RemoteStore> ChatRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(chat_id = %chat_id))]
    pub async fn find_by_id(&self, chat_id: &str) -> Result<Option<Chat>, SyncError> {
        let value = self.store.get(&paths::chat(chat_id)?).await?;
        Ok(decode_chat(chat_id, value))
    }

    /// Chat ids in the reverse index of `uid`. Possibly stale while fan-outs are in flight.
    #[instrument(skip(self), fields(uid = %uid))]
    pub async fn find_ids_by_user(&self, uid: &str) -> Result<BTreeSet<String>, SyncError> {
        let value = self.store.get(&paths::user_chats(uid)?).await?;
        Ok(decode_chat_ids(value))
    }

    pub fn meta_query(&self, chat_id: &str) -> Result<Query, SyncError> {
        Ok(Query::path(paths::chat(chat_id)?))
    }

    pub fn user_chats_query(&self, uid: &str) -> Result<Query, SyncError> {
        Ok(Query::path(paths::user_chats(uid)?))
    }
}
