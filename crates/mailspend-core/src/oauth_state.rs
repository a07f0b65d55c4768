//! Pending OAuth authorization store
//!
//! In-process map from anti-forgery state to the user who initiated the
//! flow. Entries are single use (`take` removes), expire after a TTL, and
//! the map is capacity-bounded with oldest-first eviction so abandoned
//! flows cannot grow it without limit.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

const DEFAULT_TTL_MINUTES: i64 = 10;
const DEFAULT_CAPACITY: usize = 1000;

struct PendingAuth {
    user_id: i64,
    created_at: DateTime<Utc>,
}

pub struct StateStore {
    inner: Mutex<HashMap<String, PendingAuth>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_limits(Duration::minutes(DEFAULT_TTL_MINUTES), DEFAULT_CAPACITY)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Record a pending authorization for a user
    pub fn insert(&self, state: &str, user_id: i64) {
        let now = Utc::now();
        let mut map = self.lock();

        map.retain(|_, pending| now - pending.created_at < self.ttl);

        // Still full after dropping expired entries: evict oldest first
        while map.len() >= self.capacity {
            let oldest = map
                .iter()
                .min_by_key(|(_, pending)| pending.created_at)
                .map(|(state, _)| state.clone());
            match oldest {
                Some(state) => {
                    map.remove(&state);
                }
                None => break,
            }
        }

        map.insert(
            state.to_string(),
            PendingAuth {
                user_id,
                created_at: now,
            },
        );
    }

    /// Redeem a state, removing it. Returns the user id only for a known,
    /// unexpired state; a second call with the same state yields None.
    pub fn take(&self, state: &str) -> Option<i64> {
        let pending = self.lock().remove(state)?;
        if Utc::now() - pending.created_at >= self.ttl {
            debug!("discarded expired oauth state");
            return None;
        }
        Some(pending.user_id)
    }

    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.lock()
            .retain(|_, pending| now - pending.created_at < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingAuth>> {
        // A poisoned lock only means another handler panicked mid-insert;
        // the map itself stays usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_single_use() {
        let store = StateStore::new();
        store.insert("state-1", 42);

        assert_eq!(store.take("state-1"), Some(42));
        assert_eq!(store.take("state-1"), None);
        assert_eq!(store.take("never-inserted"), None);
    }

    #[test]
    fn test_expired_state_is_rejected() {
        let store = StateStore::with_limits(Duration::zero(), 10);
        store.insert("state-1", 42);
        assert_eq!(store.take("state-1"), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = StateStore::with_limits(Duration::minutes(10), 3);
        store.insert("a", 1);
        store.insert("b", 2);
        store.insert("c", 3);
        store.insert("d", 4);

        assert_eq!(store.len(), 3);
        // Insertion order is tracked by timestamp; within the same instant
        // some entry was evicted, and the newest always survives
        assert_eq!(store.take("d"), Some(4));
    }

    #[test]
    fn test_purge_expired() {
        let store = StateStore::with_limits(Duration::zero(), 10);
        store.insert("a", 1);
        store.insert("b", 2);
        store.purge_expired();
        assert!(store.is_empty());
    }
}
