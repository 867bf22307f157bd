//! Remote store contract
//!
//! This module defines the interface to the hosted hierarchical store. The
//! sync engine depends only on this trait; `MemoryStore` is the in-process
//! implementation used by tests and the demo binary.

use super::paths::StorePath;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;

/// Errors reported by a store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection lost or request rejected at the transport level.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The adapter gave up waiting for the server.
    #[error("Store request timed out")]
    Timeout,

    /// Security rules or a malformed request refused the write.
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// A path segment contains a forbidden character.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Convenience alias used by adapters.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One full snapshot of a subscribed path. `None` means absent.
pub type Snapshot = Option<Value>;

/// Stream of snapshots. Dropping it unsubscribes.
pub type SnapshotStream = BoxStream<'static, Snapshot>;

/// Exclusive bound of a range query: order value, optionally refined by child key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub value: i64,
    pub key: Option<String>,
}

impl Bound {
    pub fn at(value: i64, key: impl Into<String>) -> Self {
        Self {
            value,
            key: Some(key.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    First(usize),
    Last(usize),
}

/// Children of a path ordered by a numeric field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub order_by: String,
    pub limit: Limit,
    pub start_after: Option<Bound>,
    pub end_before: Option<Bound>,
}

impl RangeQuery {
    /// The newest `n` children by `order_by`.
    pub fn last(order_by: &str, n: usize) -> Self {
        Self {
            order_by: order_by.to_string(),
            limit: Limit::Last(n),
            start_after: None,
            end_before: None,
        }
    }

    /// The oldest `n` children by `order_by`.
    pub fn first(order_by: &str, n: usize) -> Self {
        Self {
            order_by: order_by.to_string(),
            limit: Limit::First(n),
            start_after: None,
            end_before: None,
        }
    }

    pub fn end_before(mut self, bound: Bound) -> Self {
        self.end_before = Some(bound);
        self
    }

    pub fn start_after(mut self, bound: Bound) -> Self {
        self.start_after = Some(bound);
        self
    }
}

/// What a subscription observes: a whole path, or a ranged view of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub path: StorePath,
    pub range: Option<RangeQuery>,
}

impl Query {
    pub fn path(path: StorePath) -> Self {
        Self { path, range: None }
    }

    pub fn ranged(path: StorePath, range: RangeQuery) -> Self {
        Self {
            path,
            range: Some(range),
        }
    }
}

/// Hierarchical, push-subscribable keyed store.
///
/// Implementations must be cheap to share (`Arc<S>`) and every returned future
/// must be `Send` so the engine can drive them from spawned tasks.
pub trait RemoteStore: Send + Sync + 'static {
    /// Point read.
    fn get(&self, path: &StorePath) -> impl Future<Output = StoreResult<Option<Value>>> + Send;

    /// Point write. `Value::Null` deletes.
    fn set(&self, path: &StorePath, value: Value) -> impl Future<Output = StoreResult<()>> + Send;

    /// Shallow merge of `partial` into the object at `path`.
    fn update(
        &self,
        path: &StorePath,
        partial: Map<String, Value>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// All-or-nothing write of several paths. `None` deletes. Paths must not overlap.
    fn multi_update(
        &self,
        updates: BTreeMap<StorePath, Option<Value>>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// A fresh, unique child key under `parent`.
    fn allocate_key(&self, parent: &StorePath) -> impl Future<Output = StoreResult<String>> + Send;

    /// Ordered slice of the children of `path`, ascending by `(order value, key)`.
    fn range_query(
        &self,
        path: &StorePath,
        range: &RangeQuery,
    ) -> impl Future<Output = StoreResult<Vec<(String, Value)>>> + Send;

    /// Standing registration. Delivers the current snapshot, then one per change.
    fn subscribe(&self, query: Query) -> StoreResult<SnapshotStream>;

    /// Server-side write to perform when this connection drops.
    fn on_disconnect_set(
        &self,
        path: &StorePath,
        value: Value,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}
