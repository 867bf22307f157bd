//! SubscriptionRegistry - at most one live feed per (purpose, path)
//!
//! Each key maps to one running feed task with a reference count. A second
//! watcher of the same key shares the running feed; the feed is torn down
//! when the last guard is released.

use crate::core::SyncError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Messages(String),
    ChatMeta(String),
    Typing(String),
    Presence(String),
    UserChats(String),
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKey::Messages(id) => write!(f, "messages:{id}"),
            SubscriptionKey::ChatMeta(id) => write!(f, "chat:{id}"),
            SubscriptionKey::Typing(id) => write!(f, "typing:{id}"),
            SubscriptionKey::Presence(uid) => write!(f, "presence:{uid}"),
            SubscriptionKey::UserChats(uid) => write!(f, "user-chats:{uid}"),
        }
    }
}

struct ActiveFeed {
    generation: u64,
    refs: usize,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ActiveFeed {
    fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            // feed already gone if this fails
            let _ = tx.send(());
        }
        self.task.abort();
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    active: DashMap<SubscriptionKey, ActiveFeed>,
    next_generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the feed for `key`, starting it with `start` if none is running.
    /// Returns the generation of the feed, needed to release it.
    #[instrument(skip(self, start), fields(key = %key))]
    pub fn acquire<F>(&self, key: SubscriptionKey, start: F) -> Result<u64, SyncError>
    where
        F: FnOnce(oneshot::Receiver<()>) -> Result<JoinHandle<()>, SyncError>,
    {
        match self.active.entry(key) {
            Entry::Occupied(mut occupied) if !occupied.get().task.is_finished() => {
                let feed = occupied.get_mut();
                feed.refs += 1;
                debug!(refs = feed.refs, "Reusing live subscription");
                Ok(feed.generation)
            }
            Entry::Occupied(mut occupied) => {
                // feed ended on its own (stream closed); restart it in place
                let (tx, rx) = oneshot::channel();
                let task = start(rx)?;
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let stale = std::mem::replace(
                    occupied.get_mut(),
                    ActiveFeed {
                        generation,
                        refs: 1,
                        shutdown: Some(tx),
                        task,
                    },
                );
                stale.stop();
                info!("Restarted finished subscription");
                Ok(generation)
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                let task = start(rx)?;
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                vacant.insert(ActiveFeed {
                    generation,
                    refs: 1,
                    shutdown: Some(tx),
                    task,
                });
                info!("Subscription started");
                Ok(generation)
            }
        }
    }

    /// Drops one reference. Returns true when this tore the feed down.
    /// Releasing a generation that is no longer active is a no-op.
    #[instrument(skip(self), fields(key = %key))]
    pub fn release(&self, key: &SubscriptionKey, generation: u64) -> bool {
        let Entry::Occupied(mut occupied) = self.active.entry(key.clone()) else {
            return false;
        };
        let feed = occupied.get_mut();
        if feed.generation != generation {
            debug!("Stale release ignored");
            return false;
        }
        feed.refs = feed.refs.saturating_sub(1);
        if feed.refs > 0 {
            debug!(refs = feed.refs, "Subscription still shared");
            return false;
        }
        occupied.remove().stop();
        info!("Subscription torn down");
        true
    }

    /// Stops every feed regardless of reference counts.
    pub fn release_all(&self) -> usize {
        let keys: Vec<SubscriptionKey> = self.active.iter().map(|e| e.key().clone()).collect();
        keys.iter()
            .filter_map(|key| self.active.remove(key))
            .map(|(_, feed)| feed.stop())
            .count()
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.active.contains_key(key)
    }

    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.active.get(key).map(|f| f.refs).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
