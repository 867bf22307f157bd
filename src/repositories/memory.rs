//! MemoryStore - in-process implementation of `RemoteStore`
//!
//! Behaves like the hosted store as far as the engine can observe: null and
//! empty objects are pruned, multi-path updates are atomic, subscriptions get
//! an initial snapshot plus one snapshot per change. On top of that it offers
//! failure injection, a timestamped write log and disconnect simulation.

use super::paths::StorePath;
use super::traits::{
    Bound, Limit, Query, RangeQuery, RemoteStore, Snapshot, SnapshotStream, StoreError, StoreResult,
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

/// A write that reached the store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { path: StorePath, value: Value },
    Update { path: StorePath, partial: Map<String, Value> },
    MultiUpdate { updates: BTreeMap<StorePath, Option<Value>> },
    /// A disconnect hook fired by [`MemoryStore::simulate_disconnect`].
    DisconnectHook { path: StorePath, value: Value },
}

impl WriteOp {
    /// Every path this write touched, with the value written there (`None` = delete).
    pub fn touched(&self) -> Vec<(StorePath, Option<Value>)> {
        match self {
            WriteOp::Set { path, value } | WriteOp::DisconnectHook { path, value } => {
                vec![(path.clone(), normalize(value.clone()))]
            }
            WriteOp::Update { path, partial } => partial
                .iter()
                .filter_map(|(k, v)| path.descend(k).ok().map(|p| (p, normalize(v.clone()))))
                .collect(),
            WriteOp::MultiUpdate { updates } => updates
                .iter()
                .map(|(p, v)| (p.clone(), v.clone().and_then(normalize)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub at: Instant,
    pub op: WriteOp,
}

#[derive(Debug, Default)]
struct FailurePlan {
    failing_writes: usize,
    failing_reads: usize,
    offline: bool,
    write_delay: Option<Duration>,
    read_delay: Option<Duration>,
}

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<Snapshot>,
    last: Snapshot,
}

struct Inner {
    root: Map<String, Value>,
    listeners: Vec<Listener>,
    disconnect_hooks: Vec<(StorePath, Value)>,
    failures: FailurePlan,
    write_log: Vec<WriteRecord>,
    key_counter: u64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                root: Map::new(),
                listeners: Vec::new(),
                disconnect_hooks: Vec::new(),
                failures: FailurePlan::default(),
                write_log: Vec::new(),
                key_counter: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- failure injection ----

    /// The next `n` writes fail with `StoreError::Unavailable` and change nothing.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().failures.failing_writes = n;
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.lock().failures.failing_reads = n;
    }

    /// While offline every request fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().failures.offline = offline;
    }

    /// Delay applied before each write is committed.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.lock().failures.write_delay = delay;
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock().failures.read_delay = delay;
    }

    // ---- inspection ----

    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.lock().write_log.clone()
    }

    /// Log entries that wrote at or below `path`.
    pub fn writes_under(&self, path: &StorePath) -> Vec<WriteRecord> {
        self.lock()
            .write_log
            .iter()
            .filter(|r| r.op.touched().iter().any(|(p, _)| p.overlaps(path)))
            .cloned()
            .collect()
    }

    pub fn clear_write_log(&self) {
        self.lock().write_log.clear();
    }

    /// Current value at `path`, bypassing failure injection.
    pub fn snapshot(&self, path: &StorePath) -> Option<Value> {
        lookup(&self.lock().root, path).cloned()
    }

    /// Writes without logging or failure injection. Listeners are notified.
    pub fn seed(&self, path: &StorePath, value: Value) {
        let mut inner = self.lock();
        write_at(&mut inner.root, path.segments(), normalize(value));
        inner.notify(std::slice::from_ref(path));
    }

    /// Number of live subscriptions (dropped streams are not counted).
    pub fn listener_count(&self) -> usize {
        let mut inner = self.lock();
        inner.listeners.retain(|l| !l.tx.is_closed());
        inner.listeners.len()
    }

    pub fn disconnect_hooks(&self) -> Vec<(StorePath, Value)> {
        self.lock().disconnect_hooks.clone()
    }

    /// Fires every registered disconnect hook, as the server would after an
    /// ungraceful termination of this connection.
    pub fn simulate_disconnect(&self) {
        let mut inner = self.lock();
        let hooks = std::mem::take(&mut inner.disconnect_hooks);
        debug!(hooks = hooks.len(), "Simulating connection drop");
        for (path, value) in hooks {
            inner.commit(WriteOp::DisconnectHook { path, value });
        }
    }

    // ---- gates ----

    fn admit_write(&self) -> StoreResult<Option<Duration>> {
        let mut inner = self.lock();
        if inner.failures.offline {
            return Err(StoreError::Unavailable("offline".to_string()));
        }
        if inner.failures.failing_writes > 0 {
            inner.failures.failing_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(inner.failures.write_delay)
    }

    fn admit_read(&self) -> StoreResult<Option<Duration>> {
        let mut inner = self.lock();
        if inner.failures.offline {
            return Err(StoreError::Unavailable("offline".to_string()));
        }
        if inner.failures.failing_reads > 0 {
            inner.failures.failing_reads -= 1;
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(inner.failures.read_delay)
    }

    async fn gate_write(&self) -> StoreResult<()> {
        if let Some(delay) = self.admit_write()? {
            sleep(delay).await;
        }
        Ok(())
    }

    async fn gate_read(&self) -> StoreResult<()> {
        if let Some(delay) = self.admit_read()? {
            sleep(delay).await;
        }
        Ok(())
    }
}

impl Inner {
    /// Applies a write, logs it and pushes fresh snapshots to affected listeners.
    fn commit(&mut self, op: WriteOp) {
        let touched = op.touched();
        for (path, value) in &touched {
            write_at(&mut self.root, path.segments(), value.clone());
        }
        trace!(?op, "Write committed");
        self.write_log.push(WriteRecord { at: Instant::now(), op });
        let paths: Vec<StorePath> = touched.into_iter().map(|(p, _)| p).collect();
        self.notify(&paths);
    }

    fn notify(&mut self, touched: &[StorePath]) {
        self.listeners.retain(|l| !l.tx.is_closed());
        let root = &self.root;
        for listener in &mut self.listeners {
            if !touched.iter().any(|p| p.overlaps(&listener.query.path)) {
                continue;
            }
            let fresh = evaluate(root, &listener.query);
            if fresh != listener.last {
                listener.last = fresh.clone();
                // receiver gone: pruned on the next pass
                let _ = listener.tx.send(fresh);
            }
        }
    }
}

impl RemoteStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.gate_read().await?;
        Ok(lookup(&self.lock().root, path).cloned())
    }

    async fn set(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        self.gate_write().await?;
        self.lock().commit(WriteOp::Set {
            path: path.clone(),
            value,
        });
        Ok(())
    }

    async fn update(&self, path: &StorePath, partial: Map<String, Value>) -> StoreResult<()> {
        for key in partial.keys() {
            path.descend(key)?;
        }
        self.gate_write().await?;
        self.lock().commit(WriteOp::Update {
            path: path.clone(),
            partial,
        });
        Ok(())
    }

    async fn multi_update(&self, updates: BTreeMap<StorePath, Option<Value>>) -> StoreResult<()> {
        let paths: Vec<&StorePath> = updates.keys().collect();
        for (i, a) in paths.iter().enumerate() {
            if let Some(b) = paths[i + 1..].iter().find(|b| a.overlaps(b)) {
                return Err(StoreError::Rejected(format!("overlapping paths {a} and {b}")));
            }
        }
        self.gate_write().await?;
        self.lock().commit(WriteOp::MultiUpdate { updates });
        Ok(())
    }

    async fn allocate_key(&self, parent: &StorePath) -> StoreResult<String> {
        let mut inner = self.lock();
        if inner.failures.offline {
            return Err(StoreError::Unavailable("offline".to_string()));
        }
        inner.key_counter += 1;
        let key = format!("k{:013}{:06}", Utc::now().timestamp_millis(), inner.key_counter);
        trace!(parent = %parent, key = %key, "Allocated key");
        Ok(key)
    }

    async fn range_query(&self, path: &StorePath, range: &RangeQuery) -> StoreResult<Vec<(String, Value)>> {
        self.gate_read().await?;
        Ok(select_children(&self.lock().root, path, range))
    }

    fn subscribe(&self, query: Query) -> StoreResult<SnapshotStream> {
        let mut inner = self.lock();
        if inner.failures.offline {
            return Err(StoreError::Unavailable("offline".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = evaluate(&inner.root, &query);
        // the receiver is alive, send cannot fail
        let _ = tx.send(initial.clone());
        debug!(path = %query.path, ranged = query.range.is_some(), "Listener registered");
        inner.listeners.push(Listener {
            query,
            tx,
            last: initial,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn on_disconnect_set(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        self.gate_write().await?;
        let mut inner = self.lock();
        inner.disconnect_hooks.retain(|(p, _)| p != path);
        inner.disconnect_hooks.push((path.clone(), value));
        Ok(())
    }
}

// ---- value tree helpers ----

/// Drops nulls and empty objects, the way the hosted store does.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            (!cleaned.is_empty()).then_some(Value::Object(cleaned))
        }
        other => Some(other),
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, path: &StorePath) -> Option<&'a Value> {
    let (head, rest) = path.segments().split_first()?;
    rest.iter()
        .try_fold(root.get(head)?, |node, segment| node.get(segment.as_str()))
}

fn write_at(node: &mut Map<String, Value>, segments: &[String], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        // root write
        *node = match value {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        return;
    };

    if rest.is_empty() {
        match value {
            Some(v) => {
                node.insert(head.clone(), v);
            }
            None => {
                node.remove(head);
            }
        }
        return;
    }

    if value.is_none() {
        if let Some(Value::Object(child)) = node.get_mut(head) {
            write_at(child, rest, None);
            if child.is_empty() {
                node.remove(head);
            }
        }
        return;
    }

    let child = node
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    if let Value::Object(child) = child {
        write_at(child, rest, value);
    }
}

fn order_value(child: &Value, field: &str) -> i64 {
    match child.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(i64::MIN),
        // children without the field sort first
        _ => i64::MIN,
    }
}

fn after(value: i64, key: &str, bound: &Bound) -> bool {
    match &bound.key {
        Some(bound_key) => (value, key) > (bound.value, bound_key.as_str()),
        None => value > bound.value,
    }
}

fn before(value: i64, key: &str, bound: &Bound) -> bool {
    match &bound.key {
        Some(bound_key) => (value, key) < (bound.value, bound_key.as_str()),
        None => value < bound.value,
    }
}

fn select_children(root: &Map<String, Value>, path: &StorePath, range: &RangeQuery) -> Vec<(String, Value)> {
    let Some(Value::Object(children)) = lookup(root, path) else {
        return Vec::new();
    };

    let mut ordered: Vec<(i64, &String, &Value)> = children
        .iter()
        .map(|(k, v)| (order_value(v, &range.order_by), k, v))
        .filter(|(value, key, _)| {
            range.start_after.as_ref().is_none_or(|b| after(*value, key, b))
                && range.end_before.as_ref().is_none_or(|b| before(*value, key, b))
        })
        .collect();
    ordered.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let window = match range.limit {
        Limit::First(n) => &ordered[..n.min(ordered.len())],
        Limit::Last(n) => &ordered[ordered.len().saturating_sub(n)..],
    };
    window
        .iter()
        .map(|(_, k, v)| ((*k).clone(), (*v).clone()))
        .collect()
}

fn evaluate(root: &Map<String, Value>, query: &Query) -> Snapshot {
    match &query.range {
        None => lookup(root, &query.path).cloned(),
        Some(range) => {
            let children: Map<String, Value> = select_children(root, &query.path, range).into_iter().collect();
            (!children.is_empty()).then_some(Value::Object(children))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::paths;
    use serde_json::json;

    fn seed_messages(store: &MemoryStore, n: i64) {
        for ts in 1..=n {
            let id = format!("m{ts:02}");
            store.seed(&paths::message("c1", &id).unwrap(), json!({"id": id, "timestamp": ts}));
        }
    }

    #[tokio::test]
    async fn null_deletes_and_prunes_parents() {
        let store = MemoryStore::new();
        let entry = paths::typing_entry("c1", "alice").unwrap();
        store.set(&entry, json!(123)).await.unwrap();
        assert_eq!(store.snapshot(&entry), Some(json!(123)));

        store.set(&entry, Value::Null).await.unwrap();
        assert_eq!(store.snapshot(&entry), None);
        assert_eq!(store.snapshot(&paths::typing("c1").unwrap()), None);
    }

    #[tokio::test]
    async fn multi_update_is_all_or_nothing() {
        let store = MemoryStore::new();
        let mut updates = BTreeMap::new();
        updates.insert(paths::user_chat("x", "g1").unwrap(), Some(json!(true)));
        updates.insert(paths::user_chat("y", "g1").unwrap(), Some(json!(true)));

        store.fail_next_writes(1);
        assert!(store.multi_update(updates.clone()).await.is_err());
        assert_eq!(store.snapshot(&paths::user_chats("x").unwrap()), None);

        store.multi_update(updates).await.unwrap();
        assert_eq!(store.snapshot(&paths::user_chat("y", "g1").unwrap()), Some(json!(true)));
    }

    #[tokio::test]
    async fn overlapping_multi_update_is_rejected() {
        let store = MemoryStore::new();
        let mut updates = BTreeMap::new();
        updates.insert(paths::chat("g1").unwrap(), Some(json!({"type": "group"})));
        updates.insert(paths::chat_field("g1", "updatedAt").unwrap(), Some(json!(5)));
        assert!(matches!(store.multi_update(updates).await, Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn range_query_respects_limits_and_exclusive_bounds() {
        let store = MemoryStore::new();
        seed_messages(&store, 25);
        let path = paths::messages("c1").unwrap();

        let last = store.range_query(&path, &RangeQuery::last("timestamp", 10)).await.unwrap();
        let keys: Vec<_> = last.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys.first(), Some(&"m16"));
        assert_eq!(keys.last(), Some(&"m25"));

        let older = store
            .range_query(&path, &RangeQuery::last("timestamp", 10).end_before(Bound::at(16, "m16")))
            .await
            .unwrap();
        assert_eq!(older.len(), 10);
        assert_eq!(older[0].0, "m06");
        assert_eq!(older[9].0, "m15");

        let newer = store
            .range_query(&path, &RangeQuery::first("timestamp", 3).start_after(Bound::at(23, "m23")))
            .await
            .unwrap();
        assert_eq!(newer.len(), 2);
    }

    #[tokio::test]
    async fn subscription_gets_initial_then_changes_and_stops_on_drop() {
        let store = MemoryStore::new();
        let path = paths::presence("bob").unwrap();
        let mut stream = store.subscribe(Query::path(path.clone())).unwrap();
        assert_eq!(stream.next().await, Some(None));

        store.set(&path, json!({"online": true, "lastSeen": 1})).await.unwrap();
        assert_eq!(stream.next().await, Some(Some(json!({"online": true, "lastSeen": 1}))));
        assert_eq!(store.listener_count(), 1);

        drop(stream);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_hooks_fire_once() {
        let store = MemoryStore::new();
        let path = paths::presence("alice").unwrap();
        store.on_disconnect_set(&path, json!({"online": false, "lastSeen": 9})).await.unwrap();

        store.simulate_disconnect();
        assert_eq!(store.snapshot(&path), Some(json!({"online": false, "lastSeen": 9})));
        assert!(store.disconnect_hooks().is_empty());
        assert!(matches!(
            store.write_log().last().map(|r| &r.op),
            Some(WriteOp::DisconnectHook { .. })
        ));
    }
}
