use std::collections::{BTreeSet, HashMap};

use ordered_float::OrderedFloat;

use crate::thresholds::EncodingThresholds;

type Score = OrderedFloat<f64>;

/// ZSET's compact ↔ expanded pair (spec §3). `Compact` keeps
/// insertion-order pairs and sorts lazily on read; `Expanded` keeps a
/// score→member sorted index alongside the member→score map for
/// O(log n) rank/range queries.
#[derive(Debug, Clone)]
pub enum ZSetEncoding {
    Compact(Vec<(Vec<u8>, Score)>),
    Expanded {
        by_member: HashMap<Vec<u8>, Score>,
        by_score: BTreeSet<(Score, Vec<u8>)>,
    },
}

#[derive(Debug, Clone)]
pub struct ZSetValue(ZSetEncoding);

impl Default for ZSetValue {
    fn default() -> Self {
        ZSetValue(ZSetEncoding::Compact(Vec::new()))
    }
}

impl ZSetValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding_name(&self) -> &'static str {
        match self.0 {
            ZSetEncoding::Compact(_) => "compact",
            ZSetEncoding::Expanded { .. } => "expanded",
        }
    }

    pub fn len(&self) -> usize {
        match &self.0 {
            ZSetEncoding::Compact(v) => v.len(),
            ZSetEncoding::Expanded { by_member, .. } => by_member.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        match &self.0 {
            ZSetEncoding::Compact(v) => v
                .iter()
                .find(|(m, _)| m.as_slice() == member)
                .map(|(_, s)| s.into_inner()),
            ZSetEncoding::Expanded { by_member, .. } => by_member.get(member).map(|s| s.into_inner()),
        }
    }

    /// Sets the member's score (inserting if absent), returns the
    /// previous score if any.
    pub fn set(&mut self, member: Vec<u8>, score: f64, cfg: &EncodingThresholds) -> Option<f64> {
        let prev = self.remove_internal(&member);
        match &mut self.0 {
            ZSetEncoding::Compact(v) => v.push((member, OrderedFloat(score))),
            ZSetEncoding::Expanded { by_member, by_score } => {
                by_member.insert(member.clone(), OrderedFloat(score));
                by_score.insert((OrderedFloat(score), member));
            }
        }
        self.maybe_upgrade(cfg);
        prev
    }

    pub fn incr_by(&mut self, member: Vec<u8>, delta: f64, cfg: &EncodingThresholds) -> f64 {
        let base = self.score(&member).unwrap_or(0.0);
        let next = base + delta;
        self.set(member, next, cfg);
        next
    }

    fn remove_internal(&mut self, member: &[u8]) -> Option<f64> {
        match &mut self.0 {
            ZSetEncoding::Compact(v) => {
                let pos = v.iter().position(|(m, _)| m.as_slice() == member)?;
                Some(v.remove(pos).1.into_inner())
            }
            ZSetEncoding::Expanded { by_member, by_score } => {
                let score = by_member.remove(member)?;
                by_score.remove(&(score, member.to_vec()));
                Some(score.into_inner())
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.remove_internal(member).is_some()
    }

    /// Members in ascending score order.
    pub fn sorted(&self) -> Vec<(&[u8], f64)> {
        match &self.0 {
            ZSetEncoding::Compact(v) => {
                let mut out: Vec<_> = v.iter().map(|(m, s)| (m.as_slice(), *s)).collect();
                out.sort_by_key(|(_, s)| *s);
                out.into_iter().map(|(m, s)| (m, s.into_inner())).collect()
            }
            ZSetEncoding::Expanded { by_score, .. } => by_score
                .iter()
                .map(|(s, m)| (m.as_slice(), s.into_inner()))
                .collect(),
        }
    }

    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        self.sorted().iter().position(|(m, _)| *m == member)
    }

    /// `ZRANGE` with Redis-style negative-index resolution over the
    /// ascending order.
    pub fn range(&self, start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        let sorted = self.sorted();
        let len = sorted.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let resolve = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len - 1) };
        let s = resolve(start).max(0);
        let e = resolve(stop);
        if s > e {
            return Vec::new();
        }
        sorted[s as usize..=e as usize]
            .iter()
            .map(|(m, sc)| (m.to_vec(), *sc))
            .collect()
    }

    fn maybe_upgrade(&mut self, cfg: &EncodingThresholds) {
        let should_upgrade = match &self.0 {
            ZSetEncoding::Compact(v) => {
                v.len() > cfg.zset_max_listpack_entries
                    || v.iter().any(|(m, _)| m.len() > cfg.zset_max_listpack_value)
            }
            ZSetEncoding::Expanded { .. } => false,
        };
        if should_upgrade {
            if let ZSetEncoding::Compact(v) = &mut self.0 {
                tracing::debug!(entries = v.len(), "zset upgrading compact -> expanded");
                let mut by_member = HashMap::with_capacity(v.len());
                let mut by_score = BTreeSet::new();
                for (m, s) in std::mem::take(v) {
                    by_member.insert(m.clone(), s);
                    by_score.insert((s, m));
                }
                self.0 = ZSetEncoding::Expanded { by_member, by_score };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn set_and_score() {
        let cfg = EncodingThresholds::default();
        let mut z = ZSetValue::new();
        z.set(b"a".to_vec(), 1.0, &cfg);
        z.set(b"b".to_vec(), 2.0, &cfg);
        assert_eq!(z.score(b"a"), Some(1.0));
        assert_eq!(z.rank(b"b"), Some(1));
    }

    #[test]
    fn range_ascending_by_score() {
        let cfg = EncodingThresholds::default();
        let mut z = ZSetValue::new();
        z.set(b"c".to_vec(), 3.0, &cfg);
        z.set(b"a".to_vec(), 1.0, &cfg);
        z.set(b"b".to_vec(), 2.0, &cfg);
        let range = z.range(0, -1);
        let members: Vec<_> = range.into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn incr_by_creates_when_absent() {
        let cfg = EncodingThresholds::default();
        let mut z = ZSetValue::new();
        let score = z.incr_by(b"a".to_vec(), 5.0, &cfg);
        assert_eq!(score, 5.0);
        assert_eq!(z.incr_by(b"a".to_vec(), 2.0, &cfg), 7.0);
    }

    #[test]
    fn upgrades_past_entry_count() {
        let cfg = EncodingThresholds {
            zset_max_listpack_entries: 1,
            ..EncodingThresholds::default()
        };
        let mut z = ZSetValue::new();
        z.set(b"a".to_vec(), 1.0, &cfg);
        z.set(b"b".to_vec(), 2.0, &cfg);
        assert_eq!(z.encoding_name(), "expanded");
    }
}
