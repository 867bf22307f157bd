//! Feed loops - one task per live subscription
//!
//! Every loop selects between the shutdown signal and the next snapshot.
//! Snapshots of one feed are processed strictly in order, so merges into a
//! chat window are never interleaved.

use super::merge::merge_live_messages;
use super::registry::SubscriptionKey;
use crate::core::AppState;
use crate::dtos::{decode_chat, decode_chat_ids, decode_presence, decode_typing};
use crate::repositories::{RemoteStore, Snapshot, SnapshotStream};
use futures::StreamExt;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, warn};

/// Runs `on_snapshot` for every snapshot until shutdown or end of stream.
async fn drive<F>(key: SubscriptionKey, mut stream: SnapshotStream, mut shutdown: oneshot::Receiver<()>, mut on_snapshot: F)
where
    F: FnMut(Snapshot),
{
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!(key = %key, "Shutdown signal received");
                break;
            }
            next = stream.next() => match next {
                Some(snapshot) => on_snapshot(snapshot),
                None => {
                    warn!(key = %key, "Snapshot stream closed by the store");
                    break;
                }
            }
        }
    }
    info!(key = %key, "Feed terminated");
}

#[instrument(skip(state, stream, shutdown), fields(chat_id = %chat_id))]
pub(crate) async fn message_feed<S: RemoteStore>(
    state: Arc<AppState<S>>,
    chat_id: String,
    page_size: usize,
    mut stream: SnapshotStream,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Shutdown signal received");
                break;
            }
            next = stream.next() => match next {
                // the gap fill inside the merge is cancelled along with the task
                Some(snapshot) => merge_live_messages(&state, &chat_id, page_size, snapshot).await,
                None => {
                    warn!("Message stream closed by the store");
                    break;
                }
            }
        }
    }
    info!("Message feed terminated");
}

pub(crate) async fn chat_meta_feed<S: RemoteStore>(
    state: Arc<AppState<S>>,
    chat_id: String,
    stream: SnapshotStream,
    shutdown: oneshot::Receiver<()>,
) {
    let key = SubscriptionKey::ChatMeta(chat_id.clone());
    drive(key, stream, shutdown, |snapshot| {
        let chat = decode_chat(&chat_id, snapshot);
        if chat.is_none() {
            debug!(chat_id = %chat_id, "Chat record absent");
        }
        state.chats.publish(&chat_id, chat);
    })
    .await;
}

pub(crate) async fn presence_feed<S: RemoteStore>(
    state: Arc<AppState<S>>,
    uid: String,
    stream: SnapshotStream,
    shutdown: oneshot::Receiver<()>,
) {
    let key = SubscriptionKey::Presence(uid.clone());
    drive(key, stream, shutdown, |snapshot| {
        state.presence_board.publish(&uid, decode_presence(&uid, snapshot));
    })
    .await;
}

pub(crate) async fn user_chats_feed<S: RemoteStore>(
    state: Arc<AppState<S>>,
    uid: String,
    stream: SnapshotStream,
    shutdown: oneshot::Receiver<()>,
) {
    let key = SubscriptionKey::UserChats(uid.clone());
    drive(key, stream, shutdown, |snapshot| {
        state.user_chats.publish(&uid, decode_chat_ids(snapshot));
    })
    .await;
}

/// Typing feed. Besides snapshots it wakes up when the oldest flag goes
/// stale, so observers see the flag drop even if no clear is ever written.
#[instrument(skip(state, stream, shutdown), fields(chat_id = %chat_id))]
pub(crate) async fn typing_feed<S: RemoteStore>(
    state: Arc<AppState<S>>,
    chat_id: String,
    mut stream: SnapshotStream,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let next_expiry = state.typing.next_expiry(&chat_id, Instant::now());
        let expiry = async move {
            match next_expiry {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown => {
                debug!("Shutdown signal received");
                break;
            }
            next = stream.next() => match next {
                Some(snapshot) => state.typing.apply_snapshot(&chat_id, decode_typing(snapshot), Instant::now()),
                None => {
                    warn!("Typing stream closed by the store");
                    break;
                }
            },
            _ = expiry => state.typing.expire(&chat_id, Instant::now()),
        }
    }
    info!("Typing feed terminated");
}
