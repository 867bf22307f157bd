//! UserRepository - read-only access to `users/{uid}`

use super::paths;
use super::traits::RemoteStore;
use crate::core::SyncError;
use crate::dtos::decode_user;
use crate::entities::User;
use std::sync::Arc;
use tracing::instrument;

pub struct UserRepository<S: RemoteStore> {
    store: Arc<S>,
}

impl<S: RemoteStore> UserRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(uid = %uid))]
    pub async fn find_by_id(&self, uid: &str) -> Result<Option<User>, SyncError> {
        let value = self.store.get(&paths::user(uid)?).await?;
        Ok(decode_user(uid, value))
    }
}
