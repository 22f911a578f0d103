//! Time-bounded memo of completed lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{DnsError, Record, RecordType};

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cache slot identity: case-folded `name|type|server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey(String);

impl LookupKey {
    pub fn new(name: &str, record_type: RecordType, server: &str) -> Self {
        Self(format!("{}|{}|{}", name, record_type, server).to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct CacheEntry {
    stored_at: Instant,
    outcome: Result<Vec<Record>, DnsError>,
}

/// Shared lookup cache.
///
/// The lock is only held for a map read or write, never across a query.
/// Entries are replaced wholesale on refresh and handed out as clones.
pub struct DnsCache<C: Clock = SystemClock> {
    ttl: Duration,
    clock: C,
    entries: Mutex<HashMap<LookupKey, Arc<CacheEntry>>>,
}

impl<C: Clock> DnsCache<C> {
    pub fn new(ttl: Duration, clock: C) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh outcome for `key`, if any.
    pub fn get(&self, key: &LookupKey) -> Option<Result<Vec<Record>, DnsError>> {
        let entry = self.lock().get(key).cloned()?;
        if self.clock.now().saturating_duration_since(entry.stored_at) < self.ttl {
            Some(entry.outcome.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: LookupKey, outcome: Result<Vec<Record>, DnsError>) {
        let entry = Arc::new(CacheEntry {
            stored_at: self.clock.now(),
            outcome,
        });
        self.lock().insert(key, entry);
    }

    /// Number of slots, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired slot.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.stored_at) < self.ttl);
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LookupKey, Arc<CacheEntry>>> {
        // Entries go in whole, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record> {
        vec![Record::Host {
            host: "ns1.example.com.".to_string(),
        }]
    }

    #[test]
    fn test_key_is_case_folded() {
        let a = LookupKey::new("Example.COM", RecordType::NS, "8.8.8.8:53");
        let b = LookupKey::new("example.com", RecordType::NS, "8.8.8.8:53");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "example.com|ns|8.8.8.8:53");
    }

    #[test]
    fn test_entry_expires_at_ttl() {
        let clock = ManualClock::new();
        let cache = DnsCache::new(Duration::from_secs(60), clock.clone());
        let key = LookupKey::new("example.com", RecordType::NS, "8.8.8.8:53");

        cache.insert(key.clone(), Ok(records()));
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&key), Some(Ok(records())));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn test_refresh_replaces_entry() {
        let clock = ManualClock::new();
        let cache = DnsCache::new(Duration::from_secs(60), clock.clone());
        let key = LookupKey::new("example.com", RecordType::NS, "8.8.8.8:53");

        cache.insert(key.clone(), Err(DnsError::TransientQuery("timeout".into())));
        clock.advance(Duration::from_secs(61));
        cache.insert(key.clone(), Ok(records()));

        assert_eq!(cache.get(&key), Some(Ok(records())));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_purge_expired() {
        let clock = ManualClock::new();
        let cache = DnsCache::new(Duration::from_secs(60), clock.clone());
        cache.insert(LookupKey::new("a.example", RecordType::A, "s"), Ok(vec![]));
        clock.advance(Duration::from_secs(120));
        cache.insert(LookupKey::new("b.example", RecordType::A, "s"), Ok(vec![]));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
