//! Application State - the process-scoped resource of the sync engine
//!
//! Owns the store handle, the repositories, every cache and the live
//! subscriptions. Created once per session and passed by `Arc` to every
//! service; nothing in the crate reaches for global state.

use crate::cache::{ChatBoard, MessageCache, PendingMutations, PresenceBoard, TypingBoard, UserChatsBoard};
use crate::core::Config;
use crate::entities::User;
use crate::repositories::{ChatRepository, MessageRepository, PresenceRepository, RemoteStore, UserRepository};
use crate::services::presence::PresenceSession;
use crate::services::typing::TypingTimers;
use crate::sync::SubscriptionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

pub struct AppState<S: RemoteStore> {
    /// Handle al remote store condiviso
    pub store: Arc<S>,

    pub config: Config,

    /// Repository per i messaggi
    pub msg: MessageRepository<S>,

    /// Repository per chat e indice inverso
    pub chat: ChatRepository<S>,

    /// Repository per presence e typing
    pub presence: PresenceRepository<S>,

    /// Repository per i profili utente
    pub user: UserRepository<S>,

    /// Finestre di messaggi per chat
    pub messages: MessageCache,

    pub chats: ChatBoard,
    pub user_chats: UserChatsBoard,
    pub presence_board: PresenceBoard,
    pub typing: TypingBoard,

    /// Invii ottimistici in corso o falliti
    pub pending: PendingMutations,

    /// Sottoscrizioni live attive
    pub subscriptions: Arc<SubscriptionRegistry>,

    /// Writer-side typing timers of this device
    pub typing_timers: TypingTimers,

    pub session: PresenceSession,

    /// Profili già scaricati
    pub profiles: DashMap<String, User>,
}

impl<S: RemoteStore> AppState<S> {
    pub fn new(store: Arc<S>, config: Config) -> Arc<Self> {
        info!(app_env = %config.app_env, "Initializing sync engine state");
        Arc::new(Self {
            msg: MessageRepository::new(store.clone()),
            chat: ChatRepository::new(store.clone()),
            presence: PresenceRepository::new(store.clone()),
            user: UserRepository::new(store.clone()),
            messages: MessageCache::new(),
            chats: ChatBoard::new(),
            user_chats: UserChatsBoard::new(),
            presence_board: PresenceBoard::new(),
            typing: TypingBoard::new(config.typing_ttl),
            pending: PendingMutations::new(),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            typing_timers: TypingTimers::new(),
            session: PresenceSession::new(),
            profiles: DashMap::new(),
            store,
            config,
        })
    }

    /// Tears down every live subscription and typing timer.
    /// In-flight sends are left to finish on their own.
    pub fn shutdown(&self) {
        let released = self.subscriptions.release_all();
        let timers = self.typing_timers.cancel_all();
        info!(subscriptions = released, typing_timers = timers, "Sync engine shut down");
    }
}
