//! The store engine: a JSON tree behind a single lock.
//!
//! Every commit (single write, multi-path update, transaction) is applied
//! under the lock, and watcher notifications are queued before the lock is
//! released. That is what gives subscribers the per-path ordering guarantee:
//! values arrive in commit order, with no gaps and no reordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::StoreError;
use crate::path::Path;

/// Outcome of a [`StoreClient::transaction`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    /// The closure produced a new value, now committed.
    Committed(Value),
    /// The closure declined to write; the tree is unchanged.
    Aborted,
}

struct Watcher {
    path: Path,
    last: Value,
    tx: mpsc::UnboundedSender<Value>,
}

struct StoreInner {
    root: Value,
    watchers: HashMap<u64, Watcher>,
    next_watcher_id: u64,
    /// Paths each connection wants removed when it goes away.
    disconnect_hooks: HashMap<u64, Vec<Path>>,
    disconnected: HashSet<u64>,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            watchers: HashMap::new(),
            next_watcher_id: 0,
            disconnect_hooks: HashMap::new(),
            disconnected: HashSet::new(),
        }
    }
}

/// Shared in-process store engine. Cheap to clone; all clones see one tree.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
    next_conn_id: Arc<AtomicU64>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::new())),
            next_conn_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open a connection. Each connection carries its own disconnect hooks.
    pub fn connect(&self) -> StoreClient {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        trace!(conn_id, "store connection opened");
        StoreClient {
            store: self.clone(),
            conn_id,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection handle. Clones share the connection identity, so a
/// [`StoreClient::disconnect`] severs every clone at once.
#[derive(Clone)]
pub struct StoreClient {
    store: Store,
    conn_id: u64,
}

impl StoreClient {
    fn check_connected(&self, inner: &StoreInner) -> Result<(), StoreError> {
        if inner.disconnected.contains(&self.conn_id) {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Snapshot read. Absent paths materialize as `Null`.
    pub async fn read_once(&self, path: &Path) -> Result<Value, StoreError> {
        let inner = self.store.inner.read().await;
        self.check_connected(&inner)?;
        Ok(value_at(&inner.root, path))
    }

    /// Observe a path: the current value is delivered immediately, then every
    /// committed change to the materialized value, in commit order. Identical
    /// re-writes do not re-notify.
    pub async fn subscribe(&self, path: &Path) -> Result<Subscription, StoreError> {
        let mut inner = self.store.inner.write().await;
        self.check_connected(&inner)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let current = value_at(&inner.root, path);
        let _ = tx.send(current.clone());
        let id = inner.next_watcher_id;
        inner.next_watcher_id += 1;
        inner.watchers.insert(
            id,
            Watcher {
                path: path.clone(),
                last: current,
                tx,
            },
        );
        Ok(Subscription {
            path: path.clone(),
            rx,
        })
    }

    /// Upsert a single path. Writing `Null` deletes the subtree.
    pub async fn write(&self, path: &Path, value: Value) -> Result<(), StoreError> {
        self.update(vec![(path.clone(), value)]).await
    }

    /// Atomic multi-path update: all writes land in one commit, and watchers
    /// see at most one notification for it.
    pub async fn update(&self, writes: Vec<(Path, Value)>) -> Result<(), StoreError> {
        let mut inner = self.store.inner.write().await;
        self.check_connected(&inner)?;
        apply_and_notify(&mut inner, writes);
        Ok(())
    }

    /// Atomic multi-path update that commits only if every precondition
    /// `(path, expected)` still holds. The compare-and-set primitive the
    /// engine uses for single-writer decisions.
    pub async fn update_guarded(
        &self,
        preconditions: &[(Path, Value)],
        writes: Vec<(Path, Value)>,
    ) -> Result<(), StoreError> {
        let mut inner = self.store.inner.write().await;
        self.check_connected(&inner)?;
        for (path, expected) in preconditions {
            if &value_at(&inner.root, path) != expected {
                debug!(%path, "guarded update lost the race");
                return Err(StoreError::PreconditionFailed { path: path.clone() });
            }
        }
        apply_and_notify(&mut inner, writes);
        Ok(())
    }

    /// Read-modify-write of one path under the store lock. The closure sees
    /// the current value and returns the replacement, or `None` to abort
    /// without writing.
    pub async fn transaction<F>(&self, path: &Path, f: F) -> Result<TxOutcome, StoreError>
    where
        F: FnOnce(Value) -> Option<Value>,
    {
        let mut inner = self.store.inner.write().await;
        self.check_connected(&inner)?;
        let current = value_at(&inner.root, path);
        match f(current) {
            Some(next) => {
                apply_and_notify(&mut inner, vec![(path.clone(), next.clone())]);
                Ok(TxOutcome::Committed(next))
            }
            None => Ok(TxOutcome::Aborted),
        }
    }

    /// Allocate a uniquely-keyed child of `path` without writing anything.
    pub fn append_child(&self, path: &Path) -> Result<Path, StoreError> {
        path.join(&Uuid::new_v4().to_string())
    }

    /// Register a path to be removed when this connection goes away.
    pub async fn on_disconnect_remove(&self, path: &Path) -> Result<(), StoreError> {
        let mut inner = self.store.inner.write().await;
        self.check_connected(&inner)?;
        inner
            .disconnect_hooks
            .entry(self.conn_id)
            .or_default()
            .push(path.clone());
        Ok(())
    }

    /// Sever the connection: registered removals are applied as one atomic
    /// commit, and every further operation on this connection fails with
    /// [`StoreError::Disconnected`]. Idempotent.
    pub async fn disconnect(&self) {
        let mut inner = self.store.inner.write().await;
        if !inner.disconnected.insert(self.conn_id) {
            return;
        }
        debug!(conn_id = self.conn_id, "store connection severed");
        let hooks = inner.disconnect_hooks.remove(&self.conn_id).unwrap_or_default();
        if !hooks.is_empty() {
            let writes = hooks.into_iter().map(|p| (p, Value::Null)).collect();
            apply_and_notify(&mut inner, writes);
        }
    }
}

/// A continuous observation of one path. Dropping it stops delivery; the
/// store prunes the watcher on its next related commit.
pub struct Subscription {
    path: Path,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next value, or `None` once the store side is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

fn apply_and_notify(inner: &mut StoreInner, writes: Vec<(Path, Value)>) {
    for (path, value) in &writes {
        set_at(&mut inner.root, path, value.clone());
    }
    let root = &inner.root;
    inner.watchers.retain(|_, watcher| {
        if !writes.iter().any(|(path, _)| path.overlaps(&watcher.path)) {
            return true;
        }
        let current = value_at(root, &watcher.path);
        if current == watcher.last {
            return true;
        }
        watcher.last = current.clone();
        watcher.tx.send(current).is_ok()
    });
}

fn value_at(root: &Value, path: &Path) -> Value {
    let mut node = root;
    for segment in path.segments() {
        match node {
            Value::Object(map) => match map.get(segment) {
                Some(child) => node = child,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    node.clone()
}

fn set_at(root: &mut Value, path: &Path, value: Value) {
    let segments: Vec<&str> = path.segments().collect();
    if segments.is_empty() {
        *root = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        return;
    }
    if value.is_null() {
        remove_at(root, &segments);
    } else {
        insert_at(root, &segments, value);
    }
}

fn insert_at(node: &mut Value, segments: &[&str], value: Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if segments.len() == 1 {
            map.insert(segments[0].to_string(), value);
        } else {
            let child = map.entry(segments[0].to_string()).or_insert(Value::Null);
            insert_at(child, &segments[1..], value);
        }
    }
}

/// Returns true when `node` ended up an empty object, so the parent can prune
/// the key (an empty object is indistinguishable from an absent one).
fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    if segments.len() == 1 {
        map.remove(segments[0]);
    } else if let Some(child) = map.get_mut(segments[0])
        && remove_at(child, &segments[1..])
    {
        map.remove(segments[0]);
    }
    map.is_empty()
}
