use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::RwLock, time::Instant};

use crate::application::services::cache::{CacheError, CacheService};

enum Value {
    Text(String),
    /// Kept sorted by score, then member, like a Redis sorted set.
    Sorted(Vec<(f64, String)>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Single-process cache used when no Redis instance is configured.
#[derive(Clone)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    default_ttl: Option<Duration>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InMemoryCache {
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    fn expiry(&self, ttl: Option<Duration>, now: Instant) -> Option<Instant> {
        ttl.or(self.default_ttl).map(|ttl| now + ttl)
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Unavailable(format!("WRONGTYPE operation against key {key}"))
}

/// Resolves an inclusive `start..=stop` rank window against a set of `len`
/// members. Negative ranks count from the end.
fn rank_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn sort_members(members: &mut [(f64, String)]) {
    members.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
}

#[async_trait]
impl CacheService for InMemoryCache {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = Entry {
            value: Value::Text(value),
            expires_at: self.expiry(ttl, now),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => match &entry.value {
                Value::Text(value) => Ok(Some(value.clone())),
                Value::Sorted(_) => Err(wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now())))
    }

    async fn zadd(
        &self,
        key: &str,
        score: f64,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = self.expiry(ttl, now);
        let mut entries = self.entries.write().await;

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(Vec::new()),
            expires_at,
        });
        if !entry.is_live(now) {
            entry.value = Value::Sorted(Vec::new());
        }

        let Value::Sorted(members) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        entry.expires_at = expires_at;
        members.retain(|(_, existing)| existing != member);
        members.push((score, member.to_string()));
        sort_members(members);
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(key).filter(|e| e.is_live(Instant::now())) else {
            return Ok(Vec::new());
        };
        let Value::Sorted(members) = &entry.value else {
            return Err(wrong_type(key));
        };

        let Some((from, to)) = rank_window(members.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(members
            .iter()
            .rev()
            .skip(from)
            .take(to - from + 1)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            let Value::Sorted(existing) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            existing.retain(|(_, member)| !members.contains(member));
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, CacheError> {
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(Instant::now())) {
            Some(Entry { value: Value::Sorted(members), .. }) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(());
        };
        let Value::Sorted(members) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        if let Some((from, to)) = rank_window(members.len(), start, stop) {
            members.drain(from..=to);
        }
        Ok(())
    }

    async fn is_healthy(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
