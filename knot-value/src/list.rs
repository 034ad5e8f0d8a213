use std::collections::VecDeque;

/// LIST has a single encoding per spec §4.3 ("always stored as
/// compact-node-list"); the source's quicklist nodes and their
/// internal byte-packed/chained sub-encoding are an allocator-level
/// optimization with no observable effect on any operation this crate
/// implements, so `ListValue` is a flat deque of binary-safe elements.
#[derive(Debug, Clone, Default)]
pub struct ListValue {
    items: VecDeque<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Left,
    Right,
}

impl ListValue {
    pub fn new() -> Self {
        ListValue::default()
    }

    pub fn encoding_name(&self) -> &'static str {
        "quicklist"
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, end: End, values: impl IntoIterator<Item = Vec<u8>>) {
        match end {
            End::Left => {
                for v in values {
                    self.items.push_front(v);
                }
            }
            End::Right => {
                for v in values {
                    self.items.push_back(v);
                }
            }
        }
    }

    pub fn pop(&mut self, end: End, count: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(count.min(self.items.len()));
        for _ in 0..count {
            let popped = match end {
                End::Left => self.items.pop_front(),
                End::Right => self.items.pop_back(),
            };
            match popped {
                Some(v) => out.push(v),
                None => break,
            }
        }
        out
    }

    fn resolve_index(&self, idx: i64) -> Option<usize> {
        let len = self.items.len() as i64;
        let i = if idx < 0 { len + idx } else { idx };
        if i < 0 || i >= len {
            None
        } else {
            Some(i as usize)
        }
    }

    pub fn index(&self, idx: i64) -> Option<&[u8]> {
        self.resolve_index(idx).map(|i| self.items[i].as_slice())
    }

    pub fn set(&mut self, idx: i64, value: Vec<u8>) -> bool {
        match self.resolve_index(idx) {
            Some(i) => {
                self.items[i] = value;
                true
            }
            None => false,
        }
    }

    /// Returns `-1`-sentinel (as `None`) when the pivot isn't found,
    /// otherwise the new length.
    pub fn insert(&mut self, before: bool, pivot: &[u8], value: Vec<u8>) -> Option<usize> {
        let pos = self.items.iter().position(|v| v.as_slice() == pivot)?;
        let at = if before { pos } else { pos + 1 };
        self.items.insert(at, value);
        Some(self.items.len())
    }

    /// Clamped range, matching `LRANGE`/`LTRIM` negative-index rules.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Vec<u8>> {
        let (s, e) = match self.clamped_bounds(start, stop) {
            Some(b) => b,
            None => return Vec::new(),
        };
        self.items.range(s..=e).cloned().collect()
    }

    pub fn trim(&mut self, start: i64, stop: i64) {
        match self.clamped_bounds(start, stop) {
            Some((s, e)) => {
                self.items = self.items.range(s..=e).cloned().collect();
            }
            None => self.items.clear(),
        }
    }

    fn clamped_bounds(&self, start: i64, stop: i64) -> Option<(usize, usize)> {
        let len = self.items.len() as i64;
        if len == 0 {
            return None;
        }
        let resolve = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len - 1) };
        let s = resolve(start).max(0);
        let e = resolve(stop);
        if s > e || s >= len {
            None
        } else {
            Some((s as usize, e as usize))
        }
    }

    /// `count >= 0`: remove up to `count` occurrences from the head.
    /// `count < 0`: remove up to `|count|` from the tail. `count == 0`
    /// means all. Returns the number removed.
    pub fn remove(&mut self, count: i64, value: &[u8]) -> usize {
        let mut removed = 0;
        if count >= 0 {
            let limit = if count == 0 { usize::MAX } else { count as usize };
            let mut kept = VecDeque::with_capacity(self.items.len());
            for item in self.items.drain(..) {
                if removed < limit && item.as_slice() == value {
                    removed += 1;
                } else {
                    kept.push_back(item);
                }
            }
            self.items = kept;
        } else {
            let limit = (-count) as usize;
            let mut kept: VecDeque<Vec<u8>> = VecDeque::with_capacity(self.items.len());
            for item in self.items.drain(..).rev() {
                if removed < limit && item.as_slice() == value {
                    removed += 1;
                } else {
                    kept.push_front(item);
                }
            }
            self.items = kept;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn push_and_range() {
        let mut l = ListValue::new();
        l.push(End::Left, [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(l.range(0, -1), vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn insert_before_after() {
        let mut l = ListValue::new();
        l.push(End::Right, [b"a".to_vec(), b"c".to_vec()]);
        let new_len = l.insert(true, b"c", b"b".to_vec()).unwrap();
        assert_eq!(new_len, 3);
        assert_eq!(l.range(0, -1), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(l.insert(false, b"missing", b"x".to_vec()), None);
    }

    #[test]
    fn ltrim_empties_on_empty_range() {
        let mut l = ListValue::new();
        l.push(End::Right, [b"a".to_vec()]);
        l.trim(5, 10);
        assert!(l.is_empty());
    }

    #[test]
    fn lrem_from_head_and_tail() {
        let mut l = ListValue::new();
        l.push(End::Right, [b"a", b"x", b"a", b"x", b"a"].map(|s| s.to_vec()));
        let removed = l.remove(2, b"a");
        assert_eq!(removed, 2);
        assert_eq!(l.range(0, -1), vec![b"x".to_vec(), b"a".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn lrem_negative_count_scans_from_tail() {
        let mut l = ListValue::new();
        l.push(End::Right, [b"a", b"x", b"a", b"x", b"a"].map(|s| s.to_vec()));
        let removed = l.remove(-1, b"a");
        assert_eq!(removed, 1);
        assert_eq!(l.range(0, -1), vec![b"a".to_vec(), b"x".to_vec(), b"a".to_vec(), b"x".to_vec()]);
    }
}
