use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::store::{ActivityLogEntry, StateStore, StoreError, UserRecord, is_valid_key};

#[derive(Default)]
struct Tree {
    valve_system: Map<String, Value>,
    users: BTreeMap<String, Value>,
    activity: BTreeMap<String, ActivityLogEntry>,
}

/// In-process store with the same merge semantics as the hosted database.
///
/// Used for `STORE_BACKEND=memory` and by the test-suite; `set_offline(true)`
/// makes every call fail with `StoreError::Unavailable`, and
/// `reject_live_writes(true)` denies only `valve_system` updates the way a
/// security rule would.
#[derive(Default)]
pub struct MemoryStore {
    tree: RwLock<Tree>,
    offline: AtomicBool,
    deny_live_writes: AtomicBool,
    next_push: AtomicU64,
    live_reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a `valve_system` object.
    #[must_use]
    pub fn with_live_state(initial: Value) -> Self {
        let valve_system = match initial {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            tree: RwLock::new(Tree {
                valve_system,
                ..Tree::default()
            }),
            ..Self::default()
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn reject_live_writes(&self, deny: bool) {
        self.deny_live_writes.store(deny, Ordering::SeqCst);
    }

    /// Number of `read_live_state` calls that reached the store.
    #[must_use]
    pub fn live_reads(&self) -> usize {
        self.live_reads.load(Ordering::SeqCst)
    }

    /// Number of successful mutations of any kind.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw `valve_system` object (users excluded).
    pub async fn live_fields(&self) -> Map<String, Value> {
        self.tree.read().await.valve_system.clone()
    }

    /// All log entries in key order.
    pub async fn activity(&self) -> Vec<ActivityLogEntry> {
        self.tree.read().await.activity.values().cloned().collect()
    }

    pub async fn user(&self, username: &str) -> Option<UserRecord> {
        let tree = self.tree.read().await;
        let value = tree.users.get(username)?.clone();
        serde_json::from_value(value).ok()
    }

    /// Insert a raw user record, bypassing validation.
    pub async fn insert_user(&self, username: &str, record: Value) {
        self.tree
            .write()
            .await
            .users
            .insert(username.to_string(), record);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn check_key(username: &str) -> Result<(), StoreError> {
        if is_valid_key(username) {
            Ok(())
        } else {
            Err(StoreError::Request(format!("invalid username key '{username}'")))
        }
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn merge_into(target: &mut Map<String, Value>, fields: Map<String, Value>) {
    for (key, value) in fields {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read_live_state(&self) -> Result<Value, StoreError> {
        self.live_reads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let tree = self.tree.read().await;
        if tree.valve_system.is_empty() && tree.users.is_empty() {
            return Ok(Value::Null);
        }
        // The hosted tree nests users under valve_system; mirror that.
        let mut value = tree.valve_system.clone();
        if !tree.users.is_empty() {
            let users: Map<String, Value> = tree
                .users
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            value.insert("users".to_string(), Value::Object(users));
        }
        Ok(Value::Object(value))
    }

    async fn update_live_state(&self, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.check_online()?;
        if self.deny_live_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 401,
                body: r#"{"error":"Permission denied"}"#.to_string(),
            });
        }
        merge_into(&mut self.tree.write().await.valve_system, fields);
        self.wrote();
        Ok(())
    }

    async fn push_activity(&self, entry: &ActivityLogEntry) -> Result<String, StoreError> {
        self.check_online()?;
        let key = format!("-{:019}", self.next_push.fetch_add(1, Ordering::SeqCst));
        self.tree
            .write()
            .await
            .activity
            .insert(key.clone(), entry.clone());
        self.wrote();
        Ok(key)
    }

    async fn recent_activity(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, ActivityLogEntry)>, StoreError> {
        self.check_online()?;
        Ok(self
            .tree
            .read()
            .await
            .activity
            .iter()
            .rev()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.check_online()?;
        Self::check_key(username)?;
        let tree = self.tree.read().await;
        tree.users
            .get(username)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| StoreError::Decode(format!("user: {e}")))
    }

    async fn has_users(&self) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(!self.tree.read().await.users.is_empty())
    }

    async fn put_user(&self, username: &str, record: &UserRecord) -> Result<(), StoreError> {
        self.check_online()?;
        Self::check_key(username)?;
        let value =
            serde_json::to_value(record).map_err(|e| StoreError::Decode(format!("user: {e}")))?;
        self.tree
            .write()
            .await
            .users
            .insert(username.to_string(), value);
        self.wrote();
        Ok(())
    }

    async fn update_user(
        &self,
        username: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        Self::check_key(username)?;
        let mut tree = self.tree.write().await;
        let entry = tree
            .users
            .entry(username.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            merge_into(map, fields);
        }
        drop(tree);
        self.wrote();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn patch_merges_and_null_deletes() {
        let store = MemoryStore::with_live_state(json!({"live_pressure": 3.0, "command": "IDLE"}));

        let mut fields = Map::new();
        fields.insert("command".into(), json!("OPEN"));
        fields.insert("live_pressure".into(), Value::Null);
        store.update_live_state(fields).await.unwrap();

        let live = store.live_fields().await;
        assert_eq!(live.get("command"), Some(&json!("OPEN")));
        assert!(!live.contains_key("live_pressure"));
    }

    #[tokio::test]
    async fn push_keys_sort_in_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..12 {
            let entry = ActivityLogEntry {
                user: "admin".into(),
                action: format!("a{i}"),
                timestamp: String::new(),
                role: None,
            };
            store.push_activity(&entry).await.unwrap();
        }
        let recent = store.recent_activity(3).await.unwrap();
        let actions: Vec<_> = recent.iter().map(|(_, e)| e.action.as_str()).collect();
        assert_eq!(actions, ["a11", "a10", "a9"]);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.read_live_state().await,
            Err(StoreError::Unavailable)
        ));
        assert!(store.has_users().await.is_err());
        assert_eq!(store.writes(), 0);
    }
}
