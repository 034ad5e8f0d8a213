// An open hash table with chaining and online (incremental) resize,
// the keyspace's core data structure (spec §4.2). Growing or shrinking
// never blocks the reactor: `rehash_step` migrates a bounded number of
// buckets per call, and every mutating lookup amortizes one step of
// migration so a resize completes over many commands rather than one.
//
// Safe iteration is enforced by the borrow checker rather than a
// runtime counter: `SafeIter` borrows the map immutably, so the
// compiler refuses to compile any call that would rehash (all of
// which require `&mut self`) while one is alive. This is one of the
// two strategies spec.md's design notes call out explicitly
// ("enforce with borrow-checking or with an explicit 'acquired'
// token") — the unsafe iterator below uses the token form instead,
// since it is allowed to coexist with mutation and only detects
// misuse after the fact.

mod error;
mod table;

pub use error::{DictError, DictResult};
use table::{next_power_of_two, Table};

use rand::Rng;

const MIN_INITIAL_SIZE: usize = 4;
const FORCE_RATIO: usize = 5;
const RANDOM_KEY_TRIES: usize = 100;
const MAX_SAMPLE_ATTEMPTS: usize = 32;

pub struct IncrementalHashMap<K, V> {
    t0: Table<K, V>,
    t1: Table<K, V>,
    rehashidx: i64,
    resizing_enabled: bool,
}

impl<K: AsRef<[u8]> + Clone, V> Default for IncrementalHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AsRef<[u8]> + Clone, V> IncrementalHashMap<K, V> {
    pub fn new() -> Self {
        IncrementalHashMap {
            t0: Table::empty(),
            t1: Table::empty(),
            rehashidx: -1,
            resizing_enabled: true,
        }
    }

    pub fn set_resizing_enabled(&mut self, enabled: bool) {
        self.resizing_enabled = enabled;
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehashidx >= 0
    }

    pub fn len(&self) -> usize {
        self.t0.used + self.t1.used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.t0.size() + self.t1.size()
    }

    fn hash_bytes(bytes: &[u8]) -> u64 {
        rapidhash::rapidhash(bytes)
    }

    /// Looks up by borrowed bytes rather than an owned `K`: avoids
    /// allocating a throwaway key just to query the map, which matters
    /// since keys here are typically a shared, reference-counted
    /// handle (see spec §9's "shared ownership" design note).
    fn locate(&self, key_bytes: &[u8]) -> Option<(u8, usize, usize)> {
        if self.t0.size() > 0 {
            let h = Self::hash_bytes(key_bytes);
            let idx0 = self.t0.index_for(h);
            if let Some(pos) = self.t0.buckets[idx0]
                .iter()
                .position(|(k, _)| k.as_ref() == key_bytes)
            {
                return Some((0, idx0, pos));
            }
            if self.is_rehashing() {
                let idx1 = self.t1.index_for(h);
                if let Some(pos) = self.t1.buckets[idx1]
                    .iter()
                    .position(|(k, _)| k.as_ref() == key_bytes)
                {
                    return Some((1, idx1, pos));
                }
            }
        }
        None
    }

    fn table_mut(&mut self, which: u8) -> &mut Table<K, V> {
        if which == 0 {
            &mut self.t0
        } else {
            &mut self.t1
        }
    }

    fn insert_into_active(&mut self, key: K, val: V) {
        let h = Self::hash_bytes(key.as_ref());
        let rehashing = self.is_rehashing();
        let table = if rehashing { &mut self.t1 } else { &mut self.t0 };
        let idx = table.index_for(h);
        table.buckets[idx].push((key, val));
        table.used += 1;
    }

    fn maybe_expand_before_add(&mut self) {
        if self.t0.size() == 0 {
            self.t0 = Table::with_size(MIN_INITIAL_SIZE);
            return;
        }
        if self.is_rehashing() {
            return;
        }
        if self.t0.used >= self.t0.size()
            && (self.resizing_enabled || self.t0.used / self.t0.size() > FORCE_RATIO)
        {
            self.begin_expand(self.t0.used * 2);
        }
    }

    fn begin_expand(&mut self, size_hint: usize) {
        let size = next_power_of_two(size_hint.max(MIN_INITIAL_SIZE));
        if size <= self.t0.size() {
            return;
        }
        self.t1 = Table::with_size(size);
        self.rehashidx = 0;
    }

    /// Explicit caller-requested resize (grow or shrink) to
    /// `max(requested, used, MIN_INITIAL_SIZE)`, rounded up to a power
    /// of two. A no-op if already that size.
    pub fn resize(&mut self, requested: usize) {
        let target = next_power_of_two(requested.max(self.len()).max(MIN_INITIAL_SIZE));
        if target == self.t0.size() {
            return;
        }
        if self.t0.size() == 0 {
            self.t0 = Table::with_size(target);
            return;
        }
        self.t1 = Table::with_size(target);
        self.rehashidx = 0;
    }

    /// Migrates at most `n` non-empty buckets, visiting at most `10*n`
    /// empty buckets before yielding. Returns `true` if rehashing
    /// completed (or was already idle).
    pub fn rehash_step(&mut self, n: usize) -> bool {
        if !self.is_rehashing() {
            return true;
        }
        let mut empty_visits_budget = (n * 10) as i64;
        let mut migrated = 0usize;
        while migrated < n {
            if self.rehashidx as usize >= self.t0.size() {
                break;
            }
            if self.t0.buckets[self.rehashidx as usize].is_empty() {
                self.rehashidx += 1;
                empty_visits_budget -= 1;
                if empty_visits_budget <= 0 || self.rehashidx as usize >= self.t0.size() {
                    break;
                }
                continue;
            }
            let entries = std::mem::take(&mut self.t0.buckets[self.rehashidx as usize]);
            self.t0.used -= entries.len();
            for (k, v) in entries {
                let h = Self::hash_bytes(k.as_ref());
                let idx = self.t1.index_for(h);
                self.t1.buckets[idx].push((k, v));
                self.t1.used += 1;
            }
            self.rehashidx += 1;
            migrated += 1;
        }
        if self.rehashidx as usize >= self.t0.size() {
            self.t0 = std::mem::replace(&mut self.t1, Table::empty());
            self.rehashidx = -1;
            true
        } else {
            false
        }
    }

    /// A time-bounded batch of `rehash_step` calls, intended for a
    /// periodic reactor timer (spec §4.2's "periodic timer also
    /// performs a time-bounded batch (~1 ms budget)").
    pub fn rehash_milliseconds(&mut self, budget_ms: u64) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(budget_ms);
        while self.is_rehashing() {
            if self.rehash_step(100) {
                break;
            }
            if std::time::Instant::now() >= deadline {
                break;
            }
        }
    }

    fn step_rehash_if_due(&mut self) {
        if self.is_rehashing() {
            self.rehash_step(1);
        }
    }

    pub fn add(&mut self, key: K, val: V) -> DictResult<()> {
        self.maybe_expand_before_add();
        self.step_rehash_if_due();
        if self.locate(key.as_ref()).is_some() {
            return Err(DictError::Duplicate);
        }
        self.insert_into_active(key, val);
        Ok(())
    }

    /// Upsert: returns the previous value, if any.
    pub fn replace(&mut self, key: K, val: V) -> Option<V> {
        self.maybe_expand_before_add();
        self.step_rehash_if_due();
        if let Some((t, b, e)) = self.locate(key.as_ref()) {
            let table = self.table_mut(t);
            Some(std::mem::replace(&mut table.buckets[b][e].1, val))
        } else {
            self.insert_into_active(key, val);
            None
        }
    }

    /// Finds the existing entry, or inserts `make()` and returns a
    /// mutable reference to it either way.
    pub fn add_or_find(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        self.maybe_expand_before_add();
        self.step_rehash_if_due();
        if self.locate(key.as_ref()).is_none() {
            let val = make();
            self.insert_into_active(key.clone(), val);
        }
        let (t, b, e) = self
            .locate(key.as_ref())
            .expect("entry present after insert");
        let table = self.table_mut(t);
        &mut table.buckets[b][e].1
    }

    /// Read-only fetch; does not trigger a rehash step.
    pub fn find(&self, key: &[u8]) -> Option<&V> {
        self.locate(key).map(|(t, b, e)| {
            let table = if t == 0 { &self.t0 } else { &self.t1 };
            &table.buckets[b][e].1
        })
    }

    /// Alias of [`find`](Self::find) matching spec.md's naming; a
    /// read-only fetch that never mutates rehash state.
    pub fn fetch_value(&self, key: &[u8]) -> Option<&V> {
        self.find(key)
    }

    /// Returns the stored key handle itself rather than its value —
    /// useful when `K` is a cheap-to-clone shared handle (e.g. `Rc<[u8]>`)
    /// and a caller wants to share ownership of the same allocation
    /// (spec §9's key-sharing design note) rather than reallocate an
    /// equal-but-distinct key.
    pub fn find_key(&self, key_bytes: &[u8]) -> Option<&K> {
        self.locate(key_bytes).map(|(t, b, e)| {
            let table = if t == 0 { &self.t0 } else { &self.t1 };
            &table.buckets[b][e].0
        })
    }

    pub fn find_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.step_rehash_if_due();
        let (t, b, e) = self.locate(key)?;
        let table = self.table_mut(t);
        Some(&mut table.buckets[b][e].1)
    }

    pub fn delete(&mut self, key: &[u8]) -> DictResult<V> {
        self.step_rehash_if_due();
        let (t, b, e) = self.locate(key).ok_or(DictError::NotFound)?;
        let table = self.table_mut(t);
        let (_, v) = table.buckets[b].remove(e);
        table.used -= 1;
        Ok(v)
    }

    /// Removes the entry without any destructor ceremony beyond
    /// ordinary drop — in Rust there is no separate "free" step, but
    /// the name is kept so callers (lazy-free policy, expiry
    /// propagation) read the same as spec.md's `unlink`.
    pub fn unlink(&mut self, key: &[u8]) -> DictResult<(K, V)> {
        self.step_rehash_if_due();
        let (t, b, e) = self.locate(key).ok_or(DictError::NotFound)?;
        let table = self.table_mut(t);
        let pair = table.buckets[b].remove(e);
        table.used -= 1;
        Ok(pair)
    }

    pub fn clear(&mut self) {
        self.t0 = Table::empty();
        self.t1 = Table::empty();
        self.rehashidx = -1;
    }

    fn fingerprint(&self) -> u64 {
        self.t0.fingerprint() ^ self.t1.fingerprint().rotate_left(1)
    }

    /// Token for the unsafe-iteration contract: capture with
    /// `begin_unsafe_iter`, iterate by any means (including `find`,
    /// which is read-only and safe to interleave), then call
    /// `end_unsafe_iter` — a fingerprint mismatch means something
    /// mutated the map mid-iteration, which is a programming error.
    pub fn begin_unsafe_iter(&self) -> UnsafeIterToken {
        UnsafeIterToken(self.fingerprint())
    }

    pub fn end_unsafe_iter(&self, token: UnsafeIterToken) {
        assert_eq!(
            self.fingerprint(),
            token.0,
            "dict mutated during unsafe iteration"
        );
    }

    /// Borrow-checked safe iteration over every live entry, in no
    /// particular order, spanning both tables while a rehash is in
    /// progress.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.t0
            .buckets
            .iter()
            .chain(self.t1.buckets.iter())
            .flat_map(|bucket| bucket.iter().map(|(k, v)| (k, v)))
    }

    /// Stateless cursor scan (spec §4.2): survives concurrent resizes
    /// by reversing the cursor's bits before incrementing, so
    /// higher-order bits are iterated first and every bucket's
    /// eventual descendants (under any future table size) are visited
    /// before the cursor walks past them. May revisit entries
    /// (duplicates) but never omits one present throughout the scan.
    pub fn scan(&self, cursor: u64, mut visit: impl FnMut(&K, &V)) -> u64 {
        if self.t0.size() == 0 {
            return 0;
        }
        if !self.is_rehashing() {
            let mask = self.t0.mask();
            let idx = (cursor & mask) as usize;
            for (k, v) in &self.t0.buckets[idx] {
                visit(k, v);
            }
            advance_cursor(cursor, mask)
        } else {
            let (small, large) = if self.t0.size() <= self.t1.size() {
                (&self.t0, &self.t1)
            } else {
                (&self.t1, &self.t0)
            };
            let m0 = small.mask();
            let m1 = large.mask();
            let low = cursor & m0;
            for (k, v) in &small.buckets[low as usize] {
                visit(k, v);
            }
            let mut idx1 = low;
            loop {
                for (k, v) in &large.buckets[idx1 as usize] {
                    visit(k, v);
                }
                idx1 = (idx1 + m0 + 1) & m1;
                if idx1 & m0 == low {
                    break;
                }
            }
            advance_cursor(cursor, m0)
        }
    }

    /// Samples a uniformly-random live key, rejecting empty buckets,
    /// capped at [`RANDOM_KEY_TRIES`] attempts (guards against an
    /// all-volatile, all-currently-empty table spinning forever).
    pub fn random_key(&self) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        for _ in 0..RANDOM_KEY_TRIES {
            let use_t1 = self.is_rehashing()
                && rng.gen_ratio(
                    self.t1.size().max(1) as u32,
                    (self.t0.size() + self.t1.size()).max(1) as u32,
                );
            let table = if use_t1 { &self.t1 } else { &self.t0 };
            if table.size() == 0 {
                continue;
            }
            let idx = rng.gen_range(0..table.size());
            let bucket = &table.buckets[idx];
            if !bucket.is_empty() {
                let pos = rng.gen_range(0..bucket.len());
                let (k, v) = &bucket[pos];
                return Some((k, v));
            }
        }
        None
    }

    /// Returns a near-contiguous batch of up to `count` entries,
    /// retrying from fresh random starting points (bounded) when a
    /// sparse table yields too few in one walk. Intended for
    /// statistical sampling (eviction candidate selection and
    /// similar), not for exhaustive iteration — use [`scan`](Self::scan)
    /// for that.
    pub fn get_some_keys(&self, count: usize) -> Vec<(K, V)>
    where
        V: Clone,
    {
        let mut out = Vec::new();
        if self.is_empty() || count == 0 {
            return out;
        }
        let mut rng = rand::thread_rng();
        let mut attempts = 0;
        while out.len() < count && attempts < MAX_SAMPLE_ATTEMPTS {
            attempts += 1;
            let table = if self.is_rehashing() && rng.gen_bool(0.5) {
                &self.t1
            } else {
                &self.t0
            };
            if table.size() == 0 {
                continue;
            }
            let start = rng.gen_range(0..table.size());
            'walk: for offset in 0..table.size() {
                let idx = (start + offset) % table.size();
                for (k, v) in &table.buckets[idx] {
                    out.push((k.clone(), v.clone()));
                    if out.len() >= count {
                        break 'walk;
                    }
                }
            }
        }
        out
    }
}

pub struct UnsafeIterToken(u64);

fn advance_cursor(cursor: u64, mask: u64) -> u64 {
    let mut c = cursor | !mask;
    c = c.reverse_bits();
    c = c.wrapping_add(1);
    c.reverse_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn add_find_delete_roundtrip() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        d.add(k("a"), 1).unwrap();
        d.add(k("b"), 2).unwrap();
        assert_eq!(d.find(&k("a")), Some(&1));
        assert_eq!(d.find(&k("b")), Some(&2));
        assert_eq!(d.find(&k("c")), None);
        assert_eq!(d.delete(&k("a")).unwrap(), 1);
        assert_eq!(d.find(&k("a")), None);
        assert!(matches!(d.delete(&k("a")), Err(DictError::NotFound)));
    }

    #[test]
    fn add_duplicate_errors() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        d.add(k("a"), 1).unwrap();
        assert!(matches!(d.add(k("a"), 2), Err(DictError::Duplicate)));
    }

    #[test]
    fn replace_upserts() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        assert_eq!(d.replace(k("a"), 1), None);
        assert_eq!(d.replace(k("a"), 2), Some(1));
        assert_eq!(d.find(&k("a")), Some(&2));
    }

    #[test]
    fn rehash_preserves_multiset_across_growth() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        for i in 0..2000 {
            d.add(k(&format!("key{i}")), i).unwrap();
            // Drive a couple of amortized steps per insert, as a
            // mutating caller would.
        }
        // Finish any in-flight rehash explicitly.
        while !d.rehash_step(10) {}
        for i in 0..2000 {
            assert_eq!(d.find(&k(&format!("key{i}"))), Some(&i));
        }
        assert_eq!(d.len(), 2000);
    }

    #[test]
    fn scan_visits_every_key_present_throughout() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        for i in 0..10_000 {
            d.add(k(&format!("k{i}")), i).unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            cursor = d.scan(cursor, |key, _| {
                seen.insert(key.clone());
            });
            if cursor == 0 {
                break;
            }
        }
        for i in 0..10_000 {
            assert!(seen.contains(&k(&format!("k{i}"))), "missing k{i}");
        }
    }

    #[test]
    fn scan_survives_resize_mid_iteration() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        for i in 0..10_000 {
            d.add(k(&format!("a{i}")), i).unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        let mut inserted_more = false;
        loop {
            cursor = d.scan(cursor, |key, _| {
                seen.insert(key.clone());
            });
            if !inserted_more {
                for i in 0..10_000 {
                    d.add(k(&format!("b{i}")), i).unwrap();
                }
                inserted_more = true;
            }
            if cursor == 0 {
                break;
            }
        }
        for i in 0..10_000 {
            assert!(seen.contains(&k(&format!("a{i}"))), "missing a{i}");
        }
    }

    #[test]
    fn safe_iter_and_mutation_cannot_coexist() {
        // This is a compile-time property, not a runtime one: the
        // following would fail to compile if uncommented, because
        // `iter()` holds `&self` across the loop body.
        //
        // let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        // for (k, _) in d.iter() { d.add(k.clone(), 0).unwrap(); }
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        d.add(k("a"), 1).unwrap();
        let snapshot: Vec<_> = d.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(snapshot, vec![(k("a"), 1)]);
    }

    #[test]
    fn unsafe_iter_token_detects_mutation() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        d.add(k("a"), 1).unwrap();
        let token = d.begin_unsafe_iter();
        d.add(k("b"), 2).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            d.end_unsafe_iter(token);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn unlink_does_not_error_when_present() {
        let mut d: IncrementalHashMap<Vec<u8>, i32> = IncrementalHashMap::new();
        d.add(k("a"), 1).unwrap();
        let (key, val) = d.unlink(&k("a")).unwrap();
        assert_eq!(key, k("a"));
        assert_eq!(val, 1);
        assert!(d.find(&k("a")).is_none());
    }
}
