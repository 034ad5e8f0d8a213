use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use knot_dict::IncrementalHashMap;
use knot_value::{AccessClock, Value, ValueKind};

use crate::error::{DbError, DbResult};

/// Keys are a reference-counted byte handle rather than a plain
/// `Vec<u8>`: the expire table's entry for a key should share the same
/// allocation as the dict's entry (spec §9's "shared ownership"
/// design note), and `Rc::clone` is the cheap-handle realization of
/// that note the notes explicitly allow.
pub type Key = Rc<[u8]>;
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, Default)]
pub struct DbStats {
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub expired_keys: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Generic,
    String,
    List,
    Hash,
    Set,
    ZSet,
    Expired,
    Evicted,
    Stream,
}

#[derive(Debug, Clone)]
pub struct KeyspaceEvent {
    pub class: EventClass,
    pub op: &'static str,
    pub key: Key,
    pub dbid: usize,
}

fn event_class_for(kind: &ValueKind) -> EventClass {
    match kind {
        ValueKind::String(_) => EventClass::String,
        ValueKind::List(_) => EventClass::List,
        ValueKind::Hash(_) => EventClass::Hash,
        ValueKind::Set(_) => EventClass::Set,
        ValueKind::ZSet(_) => EventClass::ZSet,
        ValueKind::Stream(_) => EventClass::Stream,
    }
}

/// One logical database (spec §3's `Database` record): a keyspace
/// dict, its expire table, blocking-client registrations, the
/// ready-keys queue blocking pops drain from, and the watched-key
/// index for optimistic transactions.
pub struct Database {
    pub id: usize,
    dict: IncrementalHashMap<Key, Value>,
    expires: IncrementalHashMap<Key, i64>,
    blocking_keys: HashMap<Key, VecDeque<ClientId>>,
    ready_keys: VecDeque<Key>,
    watched_keys: HashMap<Key, Vec<ClientId>>,
    pending_events: Vec<KeyspaceEvent>,
    stats: DbStats,
    active_expire_cursor: u64,
    /// Replicas don't actively expire keys and treat a logically
    /// expired read as absent without deleting (spec §4.4).
    pub replica_read_only: bool,
}

impl Database {
    pub fn new(id: usize) -> Self {
        Database {
            id,
            dict: IncrementalHashMap::new(),
            expires: IncrementalHashMap::new(),
            blocking_keys: HashMap::new(),
            ready_keys: VecDeque::new(),
            watched_keys: HashMap::new(),
            pending_events: Vec::new(),
            stats: DbStats::default(),
            active_expire_cursor: 0,
            replica_read_only: false,
        }
    }

    pub fn stats(&self) -> DbStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    fn canonical_key(&self, key: &[u8]) -> Key {
        match self.dict.find_key(key) {
            Some(k) => k.clone(),
            None => Rc::from(key),
        }
    }

    fn emit(&mut self, class: EventClass, op: &'static str, key: Key) {
        self.pending_events.push(KeyspaceEvent {
            class,
            op,
            key,
            dbid: self.id,
        });
    }

    pub fn take_events(&mut self) -> Vec<KeyspaceEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// `lookupKeyRead` (spec §4.4): lazily expires, then performs the
    /// read, updating hit/miss stats and (unless `touch` is false, the
    /// `NOTOUCH` case) the access clock.
    pub fn lookup_key_read(&mut self, key: &[u8], now_ms: i64, touch: bool) -> Option<&Value> {
        self.expire_if_needed(key, now_ms);
        match self.dict.find_mut(key) {
            Some(v) => {
                self.stats.keyspace_hits += 1;
                if touch {
                    v.access.touch((now_ms / 1000) as u32, ((now_ms / 60_000) % 65536) as u16);
                }
                Some(&*v)
            }
            None => {
                self.stats.keyspace_misses += 1;
                None
            }
        }
    }

    /// `lookupKeyWrite`: lazy expiration, no telemetry.
    pub fn lookup_key_write(&mut self, key: &[u8], now_ms: i64) -> Option<&mut Value> {
        self.expire_if_needed(key, now_ms);
        self.dict.find_mut(key)
    }

    pub fn exists(&mut self, key: &[u8], now_ms: i64) -> bool {
        self.expire_if_needed(key, now_ms);
        self.dict.find(key).is_some()
    }

    /// `dbAdd`: fails if the key exists; notifies blocking-key
    /// waiters if the new value's type can satisfy them.
    pub fn db_add(&mut self, key: &[u8], val: Value) -> DbResult<()> {
        let k: Key = Rc::from(key);
        let can_unblock = matches!(
            val.kind,
            ValueKind::List(_) | ValueKind::ZSet(_) | ValueKind::Stream(_)
        );
        self.dict
            .add(k.clone(), val)
            .map_err(|_| DbError::KeyExists)?;
        if can_unblock && self.blocking_keys.contains_key(&k) {
            self.ready_keys.push_back(k.clone());
        }
        self.emit(EventClass::Generic, "add", k);
        Ok(())
    }

    /// `dbOverwrite`: requires the key exist; preserves the LFU/LRU
    /// counter across replacement. Per spec.md's resolved open
    /// question, the previous TTL is *preserved* (only `set_key`
    /// clears it).
    pub fn db_overwrite(&mut self, key: &[u8], mut val: Value) -> DbResult<()> {
        let k = self.canonical_key(key);
        let existing = self.dict.find(key).ok_or(DbError::KeyNotFound)?;
        val.access = existing.access;
        self.dict.replace(k.clone(), val);
        self.emit(EventClass::Generic, "overwrite", k);
        Ok(())
    }

    /// `setKey`: the high-level `SET` entry point — add-or-overwrite,
    /// clear any existing TTL, notify watchers.
    pub fn set_key(&mut self, key: &[u8], val: Value) {
        let watchers = self.invalidate_watchers(key);
        let _ = watchers; // caller (knot-txn) marks CAS-dirty; see `invalidate_watchers`.
        let k: Key = self.canonical_key(key);
        self.expires.delete(key).ok();
        self.dict.replace(k.clone(), val);
        self.emit(EventClass::Generic, "set", k);
    }

    /// `dbDelete`: removes both the keyspace entry and any TTL.
    pub fn db_delete(&mut self, key: &[u8]) -> bool {
        let k = self.canonical_key(key);
        self.expires.delete(key).ok();
        match self.dict.delete(key) {
            Ok(_) => {
                self.blocking_keys.remove(&k);
                self.watched_keys.remove(&k);
                self.emit(EventClass::Generic, "del", k);
                true
            }
            Err(_) => false,
        }
    }

    /// `emptyDb`: clears both tables. `dbnum = -1` (all databases) is
    /// handled by the caller iterating every `Database`.
    pub fn empty_db(&mut self) {
        for client in self.all_watchers() {
            let _ = client; // caller marks CAS-dirty for every returned client.
        }
        self.dict.clear();
        self.expires.clear();
        self.blocking_keys.clear();
        self.watched_keys.clear();
        self.ready_keys.clear();
    }

    /// `dbRandomKey`: a non-expired random key, or `None`.
    /// Opportunistically expires any volatile key it happens to land
    /// on (matching the source's behavior of cleaning up as it goes).
    pub fn db_random_key(&mut self, now_ms: i64) -> Option<Vec<u8>> {
        let candidate = self.dict.random_key().map(|(k, _)| k.clone());
        let candidate = candidate?;
        if self.expire_if_needed(&candidate, now_ms) {
            // Expired on the spot; spec's 100-try cap lives inside
            // `IncrementalHashMap::random_key` itself, so a single
            // retry here is enough to avoid infinite recursion.
            return self.dict.random_key().map(|(k, _)| k.to_vec());
        }
        Some(candidate.to_vec())
    }

    pub fn keys_matching(&self, pattern: &[u8]) -> Vec<Vec<u8>> {
        self.dict
            .iter()
            .filter(|(k, _)| knot_base::glob_match(pattern, k))
            .map(|(k, _)| k.to_vec())
            .collect()
    }

    pub fn scan(&self, cursor: u64, mut visit: impl FnMut(&[u8])) -> u64 {
        self.dict.scan(cursor, |k, _| visit(k))
    }

    /// Drives both tables' incremental rehash forward by a bounded
    /// time budget (spec §4.2's "periodic timer also performs a
    /// time-bounded batch"), for a reactor timer to call periodically.
    /// Each table's own per-op `step_rehash_if_due` already makes
    /// progress on every access; this just guarantees forward progress
    /// on otherwise-idle databases.
    pub fn rehash_cycle(&mut self, budget_ms: u64) {
        self.dict.rehash_milliseconds(budget_ms);
        self.expires.rehash_milliseconds(budget_ms);
    }

    // --- Expiration (spec §4.5) ---

    pub fn set_expire(&mut self, key: &[u8], when_ms: i64) {
        let k = self.canonical_key(key);
        self.expires.replace(k, when_ms);
    }

    pub fn get_expire(&self, key: &[u8]) -> i64 {
        self.expires.find(key).copied().unwrap_or(-1)
    }

    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        self.expires.delete(key).is_ok()
    }

    /// `expireIfNeeded`: the lazy-expiration check run on every keyed
    /// access. On a replica, logically-expired keys are treated as
    /// absent without being deleted (the real delete arrives via
    /// replication) — modeled here via `replica_read_only`, since this
    /// crate has no replication collaborator to wait on.
    pub fn expire_if_needed(&mut self, key: &[u8], now_ms: i64) -> bool {
        let deadline = match self.expires.find(key) {
            Some(d) => *d,
            None => return false,
        };
        if deadline > now_ms {
            return false;
        }
        if self.replica_read_only {
            return true;
        }
        self.stats.expired_keys += 1;
        let k = self.canonical_key(key);
        self.expires.delete(key).ok();
        self.dict.delete(key).ok();
        self.emit(EventClass::Expired, "expired", k);
        true
    }

    /// One adaptive pass of the active-expire cycle (spec §4.5):
    /// samples buckets via the expire table's scan cursor, expiring
    /// due entries, and keeps going while more than 25% of the
    /// sampled keys were expired, bounded by `budget`.
    pub fn active_expire_cycle(&mut self, now_ms: i64, budget: std::time::Duration) -> usize {
        let deadline = std::time::Instant::now() + budget;
        let mut total_expired = 0;
        loop {
            let mut sampled = Vec::new();
            let mut cursor = self.active_expire_cursor;
            for _ in 0..20 {
                cursor = self.expires.scan(cursor, |k, deadline| {
                    sampled.push((k.clone(), *deadline));
                });
                if cursor == 0 || sampled.len() >= 20 {
                    break;
                }
            }
            self.active_expire_cursor = cursor;
            if sampled.is_empty() {
                break;
            }
            let mut expired_this_pass = 0;
            for (k, when) in &sampled {
                if *when <= now_ms {
                    self.expires.delete(k).ok();
                    self.dict.delete(k).ok();
                    self.emit(EventClass::Expired, "expired", k.clone());
                    expired_this_pass += 1;
                }
            }
            total_expired += expired_this_pass;
            self.stats.expired_keys += expired_this_pass as u64;
            let ratio = expired_this_pass as f64 / sampled.len() as f64;
            if ratio <= 0.25 || std::time::Instant::now() >= deadline {
                break;
            }
        }
        total_expired
    }

    // --- Blocking keys ---

    pub fn block_client(&mut self, key: &[u8], client: ClientId) {
        let k = self.canonical_key(key);
        self.blocking_keys.entry(k).or_default().push_back(client);
    }

    pub fn unblock_client(&mut self, key: &[u8], client: ClientId) {
        if let Some(waiters) = self.blocking_keys.get_mut(key_ref(key)) {
            waiters.retain(|c| *c != client);
        }
    }

    pub fn pop_first_waiter(&mut self, key: &[u8]) -> Option<ClientId> {
        let waiters = self.blocking_keys.get_mut(key_ref(key))?;
        let first = waiters.pop_front();
        if waiters.is_empty() {
            self.blocking_keys.remove(key_ref(key));
        }
        first
    }

    pub fn drain_ready_keys(&mut self) -> Vec<Key> {
        self.ready_keys.drain(..).collect()
    }

    // --- Watched keys (spec §4.7) ---

    pub fn watch(&mut self, key: &[u8], client: ClientId) {
        let k = self.canonical_key(key);
        let list = self.watched_keys.entry(k).or_default();
        if !list.contains(&client) {
            list.push(client);
        }
    }

    pub fn unwatch(&mut self, key: &[u8], client: ClientId) {
        if let Some(list) = self.watched_keys.get_mut(key_ref(key)) {
            list.retain(|c| *c != client);
            if list.is_empty() {
                self.watched_keys.remove(key_ref(key));
            }
        }
    }

    /// Returns (and doesn't clear) every client watching `key`, for
    /// the caller to mark CAS-dirty. Any mutator that touches `key`
    /// must call this before its reply is emitted.
    pub fn invalidate_watchers(&self, key: &[u8]) -> Vec<ClientId> {
        self.watched_keys
            .get(key_ref(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_watchers(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.watched_keys.values().flatten().copied()
    }
}

/// A one-element-slice view lets us reuse `HashMap<Key, _>::get`-style
/// lookups against a `Rc<[u8]>`-keyed map while only holding borrowed
/// bytes — `Key: Borrow<[u8]>` isn't implemented for `Rc<[u8]>` by std
/// in a way that lets `HashMap::get(&[u8])` work directly, so this
/// helper exists only to document that caveat at the call sites above.
fn key_ref(key: &[u8]) -> &[u8] {
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use knot_value::StringValue;
    use test_log::test;

    fn strval(s: &str) -> Value {
        Value::string(StringValue::from_bytes(s.as_bytes().to_vec()).unwrap(), AccessClock::new_lru(0))
    }

    #[test]
    fn add_read_delete_roundtrip() {
        let mut db = Database::new(0);
        db.db_add(b"k", strval("v")).unwrap();
        assert_eq!(
            db.lookup_key_read(b"k", 0, true).unwrap().as_string().unwrap().as_bytes().as_ref(),
            b"v"
        );
        assert!(db.db_delete(b"k"));
        assert!(db.lookup_key_read(b"k", 0, true).is_none());
    }

    #[test]
    fn db_add_fails_on_existing_key() {
        let mut db = Database::new(0);
        db.db_add(b"k", strval("v")).unwrap();
        assert_eq!(db.db_add(b"k", strval("v2")), Err(DbError::KeyExists));
    }

    #[test]
    fn set_key_clears_ttl_but_overwrite_preserves_it() {
        let mut db = Database::new(0);
        db.db_add(b"k", strval("v")).unwrap();
        db.set_expire(b"k", 1_000);
        db.db_overwrite(b"k", strval("v2")).unwrap();
        assert_eq!(db.get_expire(b"k"), 1_000);
        db.set_key(b"k", strval("v3"));
        assert_eq!(db.get_expire(b"k"), -1);
    }

    #[test]
    fn lazy_expiry_removes_key_on_access() {
        let mut db = Database::new(0);
        db.db_add(b"k", strval("v")).unwrap();
        db.set_expire(b"k", 50);
        assert!(db.lookup_key_read(b"k", 100, true).is_none());
        assert!(!db.exists(b"k", 100));
    }

    #[test]
    fn replica_keeps_expired_key_absent_without_deleting() {
        let mut db = Database::new(0);
        db.replica_read_only = true;
        db.db_add(b"k", strval("v")).unwrap();
        db.set_expire(b"k", 50);
        assert!(db.lookup_key_read(b"k", 100, true).is_none());
        // Still physically present: a replica waits for the DEL to replicate.
        assert_eq!(db.get_expire(b"k"), 50);
    }

    #[test]
    fn watch_invalidation_reports_watchers() {
        let mut db = Database::new(0);
        db.db_add(b"k", strval("v")).unwrap();
        db.watch(b"k", 7);
        let watchers = db.invalidate_watchers(b"k");
        assert_eq!(watchers, vec![7]);
    }

    #[test]
    fn active_expire_cycle_reaps_due_keys() {
        let mut db = Database::new(0);
        for i in 0..50 {
            let key = format!("k{i}");
            db.db_add(key.as_bytes(), strval("v")).unwrap();
            db.set_expire(key.as_bytes(), 10);
        }
        let mut total = 0;
        for _ in 0..10 {
            total += db.active_expire_cycle(1000, std::time::Duration::from_millis(5));
        }
        assert_eq!(total, 50);
        assert_eq!(db.len(), 0);
    }
}
