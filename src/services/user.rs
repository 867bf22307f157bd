//! User services - best-effort profile prefetch
//!
//! Profiles only decorate the UI and system messages, so every failure here
//! degrades to a fallback label instead of an error.

use crate::core::{AppState, best_effort};
use crate::entities::User;
use crate::repositories::RemoteStore;
use futures::future::join_all;
use tracing::{debug, instrument};

/// Label used when a profile cannot be loaded.
pub const UNKNOWN_USER_LABEL: &str = "User";

/// Cached profile of `uid`, fetched with `READ_TIMEOUT_MS` on a miss.
#[instrument(skip(state), fields(uid = %uid))]
pub async fn fetch_user<S: RemoteStore>(state: &AppState<S>, uid: &str) -> Option<User> {
    if let Some(cached) = state.profiles.get(uid) {
        return Some(cached.value().clone());
    }

    let user = best_effort("profile prefetch", state.config.read_timeout, state.user.find_by_id(uid))
        .await
        .flatten()?;
    debug!("Profile cached");
    state.profiles.insert(uid.to_string(), user.clone());
    Some(user)
}

pub async fn display_name<S: RemoteStore>(state: &AppState<S>, uid: &str) -> String {
    fetch_user(state, uid)
        .await
        .map(|u| u.label().to_string())
        .unwrap_or_else(|| UNKNOWN_USER_LABEL.to_string())
}

/// Labels for several users, fetched concurrently, in input order.
pub async fn display_names<S: RemoteStore>(state: &AppState<S>, uids: &[String]) -> Vec<String> {
    join_all(uids.iter().map(|uid| display_name(state, uid))).await
}
