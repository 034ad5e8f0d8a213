use std::collections::HashSet;

use crate::thresholds::EncodingThresholds;

/// SET's compact ↔ expanded pair (spec §3's "analogous" rule; §4.3
/// leaves set/zset thresholds unspecified beyond "analogous to hash",
/// so this crate reuses the hash's entry-count/value-length shape —
/// see DESIGN.md).
#[derive(Debug, Clone)]
pub enum SetEncoding {
    Compact(Vec<Vec<u8>>),
    Expanded(HashSet<Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct SetValue(SetEncoding);

impl Default for SetValue {
    fn default() -> Self {
        SetValue(SetEncoding::Compact(Vec::new()))
    }
}

impl SetValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding_name(&self) -> &'static str {
        match self.0 {
            SetEncoding::Compact(_) => "compact",
            SetEncoding::Expanded(_) => "expanded",
        }
    }

    pub fn len(&self) -> usize {
        match &self.0 {
            SetEncoding::Compact(v) => v.len(),
            SetEncoding::Expanded(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        match &self.0 {
            SetEncoding::Compact(v) => v.iter().any(|m| m.as_slice() == member),
            SetEncoding::Expanded(s) => s.contains(member),
        }
    }

    /// Returns `true` if the member was newly added.
    pub fn add(&mut self, member: Vec<u8>, cfg: &EncodingThresholds) -> bool {
        let added = match &mut self.0 {
            SetEncoding::Compact(v) => {
                if v.iter().any(|m| *m == member) {
                    false
                } else {
                    v.push(member);
                    true
                }
            }
            SetEncoding::Expanded(s) => s.insert(member),
        };
        self.maybe_upgrade(cfg);
        added
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match &mut self.0 {
            SetEncoding::Compact(v) => {
                if let Some(pos) = v.iter().position(|m| m.as_slice() == member) {
                    v.remove(pos);
                    true
                } else {
                    false
                }
            }
            SetEncoding::Expanded(s) => s.remove(member),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &[u8]> + '_> {
        match &self.0 {
            SetEncoding::Compact(v) => Box::new(v.iter().map(|m| m.as_slice())),
            SetEncoding::Expanded(s) => Box::new(s.iter().map(|m| m.as_slice())),
        }
    }

    fn maybe_upgrade(&mut self, cfg: &EncodingThresholds) {
        let should_upgrade = match &self.0 {
            SetEncoding::Compact(v) => {
                v.len() > cfg.set_max_listpack_entries
                    || v.iter().any(|m| m.len() > cfg.set_max_listpack_value)
            }
            SetEncoding::Expanded(_) => false,
        };
        if should_upgrade {
            if let SetEncoding::Compact(v) = &mut self.0 {
                tracing::debug!(entries = v.len(), "set upgrading compact -> expanded");
                let set: HashSet<Vec<u8>> = std::mem::take(v).into_iter().collect();
                self.0 = SetEncoding::Expanded(set);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn add_and_contains() {
        let cfg = EncodingThresholds::default();
        let mut s = SetValue::new();
        assert!(s.add(b"a".to_vec(), &cfg));
        assert!(!s.add(b"a".to_vec(), &cfg));
        assert!(s.contains(b"a"));
    }

    #[test]
    fn upgrades_past_entry_count() {
        let cfg = EncodingThresholds {
            set_max_listpack_entries: 1,
            ..EncodingThresholds::default()
        };
        let mut s = SetValue::new();
        s.add(b"a".to_vec(), &cfg);
        s.add(b"b".to_vec(), &cfg);
        assert_eq!(s.encoding_name(), "expanded");
    }
}
