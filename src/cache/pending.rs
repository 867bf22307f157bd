//! PendingMutations - bookkeeping for optimistic sends
//!
//! Maps the local id shown in the window to the id the store knows the
//! message by, and tracks whether a write is in flight so the same logical
//! send is never issued twice concurrently.

use crate::core::SyncError;
use crate::entities::Message;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub chat_id: String,
    /// Id of the record in the store. Equals the local id under client-assigned ids.
    pub target_id: Option<String>,
    pub attempts: u32,
    pub in_flight: bool,
    /// Message as first built, used for resend.
    pub draft: Message,
}

#[derive(Default)]
pub struct PendingMutations {
    entries: DashMap<String, PendingMutation>,
}

impl PendingMutations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a send of `draft` as in flight. Fails if one is already running.
    pub fn begin(&self, draft: &Message) -> Result<u32, SyncError> {
        match self.entries.entry(draft.id.clone()) {
            Entry::Occupied(mut occupied) => {
                let pending = occupied.get_mut();
                if pending.in_flight {
                    return Err(SyncError::conflict("Send already in flight").with_details(draft.id.clone()));
                }
                pending.in_flight = true;
                pending.attempts += 1;
                debug!(local_id = %draft.id, attempts = pending.attempts, "Retrying send");
                Ok(pending.attempts)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingMutation {
                    chat_id: draft.chat_id.clone(),
                    target_id: None,
                    attempts: 1,
                    in_flight: true,
                    draft: draft.clone(),
                });
                Ok(1)
            }
        }
    }

    pub fn set_target(&self, local_id: &str, target_id: &str) {
        if let Some(mut pending) = self.entries.get_mut(local_id) {
            pending.target_id = Some(target_id.to_string());
        }
    }

    /// The write was confirmed; nothing left to track.
    pub fn complete(&self, local_id: &str) {
        self.entries.remove(local_id);
    }

    /// The write failed; keep the draft for a user-initiated resend.
    pub fn fail(&self, local_id: &str) {
        if let Some(mut pending) = self.entries.get_mut(local_id) {
            pending.in_flight = false;
        }
    }

    pub fn get(&self, local_id: &str) -> Option<PendingMutation> {
        self.entries.get(local_id).map(|p| p.value().clone())
    }

    pub fn remove(&self, local_id: &str) -> Option<PendingMutation> {
        self.entries.remove(local_id).map(|(_, p)| p)
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries.iter().filter(|p| p.in_flight).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::entities::MessageBody;

    #[test]
    fn one_in_flight_write_per_local_id() {
        let pending = PendingMutations::new();
        let draft = Message::new("local_1".into(), "c1", "alice", MessageBody::Text { text: "hi".into() }, 1);

        assert_eq!(pending.begin(&draft).unwrap(), 1);
        assert_eq!(pending.begin(&draft).unwrap_err().kind(), ErrorKind::Conflict);

        pending.fail("local_1");
        assert_eq!(pending.begin(&draft).unwrap(), 2);
        pending.complete("local_1");
        assert!(pending.get("local_1").is_none());
    }
}
