//! Store paths and the layout of the remote tree
//!
//! ```text
//! chats/{chatId}                  chat record
//! userChats/{uid}/{chatId}        reverse index, `true`
//! messages/{chatId}/{messageId}   message record
//! presence/{uid}                  {online, lastSeen}
//! typing/{chatId}/{uid}           last keystroke time
//! users/{uid}                     profile (read-only here)
//! ```

use super::traits::{StoreError, StoreResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    // characters the backing store forbids inside a key
    static ref KEY_PATTERN: Regex = Regex::new(r"^[^.#$\[\]/]+$").expect("static key pattern");
}

/// Slash-separated location in the store. Every segment is a validated key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the tree.
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parses `a/b/c`. Empty segments are ignored.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let mut path = Self::root();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    pub fn child(&self, key: &str) -> StoreResult<Self> {
        validate_key(key)?;
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Ok(Self { segments })
    }

    /// Appends a relative, slash-separated path.
    pub fn descend(&self, relative: &str) -> StoreResult<Self> {
        let mut path = self.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// True when one path is a prefix of the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

pub fn validate_key(key: &str) -> StoreResult<()> {
    if KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(key.to_string()))
    }
}

fn build(parts: &[&str]) -> StoreResult<StorePath> {
    parts.iter().try_fold(StorePath::root(), |path, part| path.child(part))
}

pub fn chats_root() -> StorePath {
    StorePath {
        segments: vec!["chats".to_string()],
    }
}

pub fn chat(chat_id: &str) -> StoreResult<StorePath> {
    build(&["chats", chat_id])
}

pub fn chat_field(chat_id: &str, field: &str) -> StoreResult<StorePath> {
    build(&["chats", chat_id, field])
}

pub fn chat_participant(chat_id: &str, uid: &str) -> StoreResult<StorePath> {
    build(&["chats", chat_id, "participants", uid])
}

pub fn group_field(chat_id: &str, field: &str) -> StoreResult<StorePath> {
    build(&["chats", chat_id, "groupInfo", field])
}

pub fn user_chats(uid: &str) -> StoreResult<StorePath> {
    build(&["userChats", uid])
}

pub fn user_chat(uid: &str, chat_id: &str) -> StoreResult<StorePath> {
    build(&["userChats", uid, chat_id])
}

pub fn messages(chat_id: &str) -> StoreResult<StorePath> {
    build(&["messages", chat_id])
}

pub fn message(chat_id: &str, message_id: &str) -> StoreResult<StorePath> {
    build(&["messages", chat_id, message_id])
}

pub fn message_field(chat_id: &str, message_id: &str, field: &str) -> StoreResult<StorePath> {
    build(&["messages", chat_id, message_id, field])
}

pub fn message_entry(chat_id: &str, message_id: &str, field: &str, uid: &str) -> StoreResult<StorePath> {
    build(&["messages", chat_id, message_id, field, uid])
}

pub fn presence(uid: &str) -> StoreResult<StorePath> {
    build(&["presence", uid])
}

pub fn typing(chat_id: &str) -> StoreResult<StorePath> {
    build(&["typing", chat_id])
}

pub fn typing_entry(chat_id: &str, uid: &str) -> StoreResult<StorePath> {
    build(&["typing", chat_id, uid])
}

pub fn user(uid: &str) -> StoreResult<StorePath> {
    build(&["users", uid])
}
