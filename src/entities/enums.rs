//! Enumerations shared by the entities

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
}

/// Role of a participant inside a group. Derived from `GroupInfo`, never stored.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Owner,
    Admin,
    Member,
}

/// Local lifecycle of a cached message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistic entry, write in flight.
    Pending,
    /// Confirmed by the store (either by the write callback or by a push).
    Sent,
    /// Write failed; waiting for a user-initiated resend or discard.
    Failed,
}

/// Presence state machine of the local session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Unknown,
    Online,
    Offline,
}
