//! History services - first page and backward pagination
//!
//! The first page is the newest `SYNC_PAGE_SIZE` messages. Each older page
//! is the `SYNC_PAGE_SIZE` messages strictly before the oldest loaded
//! `(timestamp, id)`, so the boundary message is never fetched twice and equal
//! timestamps cannot hide a message. A short page means history is exhausted.

use crate::cache::WindowView;
use crate::core::{AppState, SyncError, with_deadline};
use crate::repositories::RemoteStore;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[instrument(skip(state), fields(chat_id = %chat_id))]
pub async fn load_initial<S: RemoteStore>(state: &AppState<S>, chat_id: &str) -> Result<Arc<WindowView>, SyncError> {
    let page_size = state.config.page_size;
    let batch = with_deadline(
        "initial page",
        state.config.read_timeout,
        state.msg.find_latest(chat_id, page_size),
    )
    .await?;

    let has_more = batch.len() == page_size;
    let count = batch.len();
    state
        .messages
        .update(chat_id, |window| window.set_initial_page(batch, has_more));
    info!(count, has_more, "Initial page loaded");
    Ok(state.messages.view(chat_id))
}

/// Loads the next older page. Returns how many messages the page had; 0 when
/// there is nothing more or another load is already running.
#[instrument(skip(state), fields(chat_id = %chat_id))]
pub async fn load_older<S: RemoteStore>(state: &AppState<S>, chat_id: &str) -> Result<usize, SyncError> {
    enum Step {
        Initial,
        Skip(&'static str),
        Fetch((i64, String)),
    }

    let step = state.messages.update(chat_id, |window| {
        if !window.initial_loaded() {
            return Step::Initial;
        }
        if !window.has_more_older() {
            return Step::Skip("No older messages");
        }
        if !window.begin_loading_older() {
            return Step::Skip("Older page already loading");
        }
        match window.oldest_cursor() {
            Some(cursor) => Step::Fetch(cursor),
            None => {
                window.end_loading_older();
                Step::Skip("Window has no confirmed messages")
            }
        }
    });

    let cursor = match step {
        Step::Initial => {
            let view = load_initial(state, chat_id).await?;
            return Ok(view.len());
        }
        Step::Skip(reason) => {
            debug!(reason, "Nothing to load");
            return Ok(0);
        }
        Step::Fetch(cursor) => cursor,
    };

    let page_size = state.config.page_size;
    let fetched = with_deadline(
        "older page",
        state.config.read_timeout,
        state.msg.find_before(chat_id, (cursor.0, &cursor.1), page_size),
    )
    .await;

    let batch = match fetched {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, "Older page failed, window left as is");
            state.messages.update(chat_id, |window| window.end_loading_older());
            return Err(e);
        }
    };

    let count = batch.len();
    let has_more = count == page_size;
    state.messages.prepend_older_page(chat_id, batch, has_more);
    info!(count, has_more, "Older page loaded");
    Ok(count)
}
