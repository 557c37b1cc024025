/// In-process store used as the degradation fallback and in tests
///
/// Never authoritative once the shared store is reachable: callers read
/// the primary first and only fall back here under an outage.
use crate::error::GatewayResult;
use crate::store::SessionStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// DashMap-backed store with per-entry expiry
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; called from the periodic sweep job
    pub fn sweep(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.live(now));
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.iter().filter(|e| e.live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> GatewayResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Utc::now() + Duration::seconds(ttl_secs as i64),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let now = Utc::now();
        Ok(self.entries.get(key).and_then(|entry| {
            if !entry.live(now) {
                return None;
            }
            match &entry.value {
                Value::Str(s) => Some(s.clone()),
                Value::Set(_) => None,
            }
        }))
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> GatewayResult<bool> {
        let now = Utc::now();
        Ok(self
            .entries
            .get(key)
            .map_or(false, |entry| entry.live(now)))
    }

    async fn set_add(&self, key: &str, member: &str, ttl_secs: u64) -> GatewayResult<()> {
        let now = Utc::now();
        let proposed = now + Duration::seconds(ttl_secs as i64);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: proposed,
        });

        // An expired set is replaced rather than extended
        if !entry.live(now) {
            entry.value = Value::Set(HashSet::new());
            entry.expires_at = proposed;
        }

        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
            }
            Value::Str(_) => {
                entry.value = Value::Set(HashSet::from([member.to_string()]));
            }
        }
        if proposed > entry.expires_at {
            entry.expires_at = proposed;
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> GatewayResult<Vec<String>> {
        let now = Utc::now();
        Ok(self.entries.get(key).map_or_else(Vec::new, |entry| {
            if !entry.live(now) {
                return Vec::new();
            }
            match &entry.value {
                Value::Set(members) => members.iter().cloned().collect(),
                Value::Str(_) => Vec::new(),
            }
        }))
    }
}
