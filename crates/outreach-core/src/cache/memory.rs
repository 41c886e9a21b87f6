//! In-process cache

use super::Cache;
use async_trait::async_trait;
use outreach_common::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cache held in process memory.
///
/// Expiry uses `tokio::time`, so tests running with a paused clock can
/// advance past TTLs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::Cache(format!("Key {} holds the wrong kind of value", key))
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                let Value::Str(current) = &entry.value else {
                    return Err(wrong_type(key));
                };
                let next = current
                    .parse::<i64>()
                    .map_err(|_| Error::Cache(format!("Key {} is not an integer", key)))?
                    + 1;
                entry.value = Value::Str(next.to_string());
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Str("1".to_string()),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let existed = Self::live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let matches = matches!(
            Self::live(&mut entries, key),
            Some(Entry { value: Value::Str(s), .. }) if s.as_str() == value
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if Self::live(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Hash(hash)) => Ok(hash.insert(field.to_string(), value.to_string()).is_none()),
            _ => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key).map(|e| &e.value) {
            Some(Value::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key).map(|e| &mut e.value) {
            Some(Value::Hash(hash)) => Ok(hash.remove(field).is_some()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn hpop(&self, key: &str) -> Result<Option<(String, String)>> {
        let mut entries = self.entries.lock().await;
        let popped = match Self::live(&mut entries, key).map(|e| &mut e.value) {
            Some(Value::Hash(hash)) => {
                let field = hash.keys().next().cloned();
                field.and_then(|f| hash.remove_entry(&f))
            }
            Some(_) => return Err(wrong_type(key)),
            None => None,
        };
        if matches!(entries.get(key).map(|e| &e.value), Some(Value::Hash(h)) if h.is_empty()) {
            entries.remove(key);
        }
        Ok(popped)
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key).map(|e| &e.value) {
            Some(Value::Hash(hash)) => Ok(hash.len()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }
}
