//! Merging live message snapshots into the cache
//!
//! A live snapshot is the full "newest N" range. It is folded into the window
//! with a remote upsert, which never removes paginated history or optimistic
//! entries. If the snapshot is a full page that starts after the newest
//! message already confirmed in the window, the messages in between were
//! pushed out of the range while we were not looking: fetch them.

use crate::cache::Origin;
use crate::core::{AppState, with_deadline};
use crate::dtos::decode_message_map;
use crate::repositories::{RemoteStore, Snapshot};
use tracing::{debug, instrument, warn};

/// Upper bound on pages fetched for one gap.
const MAX_GAP_PAGES: usize = 10;

#[instrument(skip(state, snapshot), fields(chat_id = %chat_id))]
pub(crate) async fn merge_live_messages<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    page_size: usize,
    snapshot: Snapshot,
) {
    let batch = decode_message_map(chat_id, snapshot);
    let oldest_in_batch = batch
        .iter()
        .map(|m| (m.timestamp, m.id.clone()))
        .min();

    let gap_start = match &oldest_in_batch {
        Some(oldest) if batch.len() >= page_size => state
            .messages
            .read(chat_id, |w| w.newest_confirmed())
            .filter(|newest| newest < oldest),
        _ => None,
    };

    let changed = state.messages.upsert_batch(chat_id, batch, Origin::Remote);
    debug!(changed, "Live snapshot merged");

    if let (Some(from), Some(until)) = (gap_start, oldest_in_batch) {
        fill_gap(state, chat_id, page_size, from, until).await;
    }
}

async fn fill_gap<S: RemoteStore>(
    state: &AppState<S>,
    chat_id: &str,
    page_size: usize,
    mut cursor: (i64, String),
    until: (i64, String),
) {
    debug!(from = ?cursor, until = ?until, "Filling gap between cached and live messages");
    for _ in 0..MAX_GAP_PAGES {
        let page = with_deadline(
            "gap fill",
            state.config.read_timeout,
            state.msg.find_after(chat_id, (cursor.0, &cursor.1), page_size),
        )
        .await;

        let page = match page {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Gap fill failed, window may miss messages until reload");
                return;
            }
        };

        let full = page.len() == page_size;
        let Some(last) = page.last().map(|m| (m.timestamp, m.id.clone())) else {
            return;
        };
        state.messages.upsert_batch(chat_id, page, Origin::Remote);
        if !full || last >= until {
            return;
        }
        cursor = last;
    }
    warn!("Gap larger than the fill limit, older part left to pagination");
}
