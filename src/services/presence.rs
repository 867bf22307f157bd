//! Presence services - online/offline state machine of the local session
//!
//! ```text
//! unknown --connect--> online --background/logout--> offline
//!                        |  ^                           |
//!                        |  +--------foreground---------+
//!                        +--foreground: refresh lastSeen
//! ```
//!
//! Every presence write is best-effort, bounded by `PRESENCE_TIMEOUT_MS`: a
//! hanging write is logged and the transition still happens. Ungraceful
//! termination is covered by the disconnect hook registered on connect.

use crate::core::{AppState, SyncError, best_effort, with_deadline};
use crate::entities::{PresenceRecord, PresenceStatus};
use crate::repositories::RemoteStore;
use crate::services::typing;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

#[derive(Debug)]
struct SessionState {
    uid: Option<String>,
    status: PresenceStatus,
}

pub struct PresenceSession {
    inner: Mutex<SessionState>,
}

impl Default for PresenceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionState {
                uid: None,
                status: PresenceStatus::Unknown,
            }),
        }
    }

    pub fn status(&self) -> PresenceStatus {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    pub fn uid(&self) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).uid.clone()
    }

    fn set(&self, uid: Option<&str>, status: PresenceStatus) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.uid = uid.map(str::to_string);
        inner.status = status;
    }
}

/// Connect: unknown/offline -> online. Registers the disconnect hook.
#[instrument(skip(state), fields(uid = %uid))]
pub async fn go_online<S: RemoteStore>(state: &Arc<AppState<S>>, uid: &str) -> PresenceStatus {
    let now = Utc::now().timestamp_millis();
    let limit = state.config.presence_timeout;

    // hook first, so a crash right after the online write is still recorded
    if best_effort("presence disconnect hook", limit, state.presence.register_offline_hook(uid, now))
        .await
        .is_none()
    {
        warn!("Disconnect hook not registered, offline state relies on explicit transitions");
    }
    best_effort("presence online", limit, state.presence.write(uid, true, now)).await;

    state.session.set(Some(uid), PresenceStatus::Online);
    info!("Presence online");
    PresenceStatus::Online
}

/// App returned to foreground. Refreshes `lastSeen` when already online.
#[instrument(skip(state), fields(uid = %uid))]
pub async fn app_foreground<S: RemoteStore>(state: &Arc<AppState<S>>, uid: &str) -> PresenceStatus {
    let same_user = state.session.uid().as_deref() == Some(uid);
    if state.session.status() == PresenceStatus::Online && same_user {
        let now = Utc::now().timestamp_millis();
        best_effort("presence refresh", state.config.presence_timeout, state.presence.write(uid, true, now)).await;
        debug!("Presence refreshed");
        return PresenceStatus::Online;
    }
    go_online(state, uid).await
}

/// App moved to background: online -> offline.
#[instrument(skip(state), fields(uid = %uid))]
pub async fn app_background<S: RemoteStore>(state: &Arc<AppState<S>>, uid: &str) -> PresenceStatus {
    go_offline(state, uid).await;
    state.session.set(Some(uid), PresenceStatus::Offline);
    info!("Presence offline (background)");
    PresenceStatus::Offline
}

/// Explicit logout: offline, typing cleared, session forgotten.
#[instrument(skip(state), fields(uid = %uid))]
pub async fn logout<S: RemoteStore>(state: &Arc<AppState<S>>, uid: &str) -> PresenceStatus {
    typing::clear_all_for(state, uid);
    go_offline(state, uid).await;
    state.session.set(None, PresenceStatus::Offline);
    info!("Presence offline (logout)");
    PresenceStatus::Offline
}

/// The connection dropped. The store fires the disconnect hook on its side,
/// so only the local state changes here.
pub fn connection_lost<S: RemoteStore>(state: &AppState<S>) -> PresenceStatus {
    let uid = state.session.uid();
    state.session.set(uid.as_deref(), PresenceStatus::Offline);
    warn!(uid = ?uid, "Connection lost, presence offline");
    PresenceStatus::Offline
}

async fn go_offline<S: RemoteStore>(state: &AppState<S>, uid: &str) {
    let now = Utc::now().timestamp_millis();
    best_effort("presence offline", state.config.presence_timeout, state.presence.write(uid, false, now)).await;
}

/// One-shot read of another user's presence.
#[instrument(skip(state), fields(uid = %uid))]
pub async fn get_presence<S: RemoteStore>(state: &AppState<S>, uid: &str) -> Result<Option<PresenceRecord>, SyncError> {
    let record = with_deadline("presence read", state.config.read_timeout, state.presence.find(uid)).await?;
    state.presence_board.publish(uid, record.clone());
    Ok(record)
}
