use std::collections::HashMap;

use crate::thresholds::EncodingThresholds;

/// HASH's byte-packed-sequence ↔ chained-map pair (spec §3/§4.3).
/// Upgrade is triggered by entry count or any single field/value
/// length crossing the configured thresholds, and is monotone — once
/// `Mapped`, a hash never reverts to `Packed` even if fields are
/// removed back under the thresholds.
#[derive(Debug, Clone)]
pub enum HashEncoding {
    Packed(Vec<(Vec<u8>, Vec<u8>)>),
    Mapped(HashMap<Vec<u8>, Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct HashValue(HashEncoding);

impl Default for HashValue {
    fn default() -> Self {
        HashValue(HashEncoding::Packed(Vec::new()))
    }
}

impl HashValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding_name(&self) -> &'static str {
        match self.0 {
            HashEncoding::Packed(_) => "packed",
            HashEncoding::Mapped(_) => "mapped",
        }
    }

    pub fn len(&self) -> usize {
        match &self.0 {
            HashEncoding::Packed(v) => v.len(),
            HashEncoding::Mapped(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, field: &[u8]) -> Option<&[u8]> {
        match &self.0 {
            HashEncoding::Packed(v) => v
                .iter()
                .find(|(f, _)| f.as_slice() == field)
                .map(|(_, val)| val.as_slice()),
            HashEncoding::Mapped(m) => m.get(field).map(|v| v.as_slice()),
        }
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.get(field).is_some()
    }

    /// Sets `field`; returns `true` if the field was newly created.
    pub fn set(&mut self, field: Vec<u8>, value: Vec<u8>, cfg: &EncodingThresholds) -> bool {
        let created = match &mut self.0 {
            HashEncoding::Packed(v) => match v.iter_mut().find(|(f, _)| *f == field) {
                Some((_, val)) => {
                    *val = value;
                    false
                }
                None => {
                    v.push((field, value));
                    true
                }
            },
            HashEncoding::Mapped(m) => m.insert(field, value).is_none(),
        };
        self.maybe_upgrade(cfg);
        created
    }

    /// `HSETNX`: only sets if the field is absent.
    pub fn set_if_absent(&mut self, field: Vec<u8>, value: Vec<u8>, cfg: &EncodingThresholds) -> bool {
        if self.contains(&field) {
            return false;
        }
        self.set(field, value, cfg);
        true
    }

    pub fn del(&mut self, field: &[u8]) -> bool {
        match &mut self.0 {
            HashEncoding::Packed(v) => {
                if let Some(pos) = v.iter().position(|(f, _)| f.as_slice() == field) {
                    v.remove(pos);
                    true
                } else {
                    false
                }
            }
            HashEncoding::Mapped(m) => m.remove(field).is_some(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
        match &self.0 {
            HashEncoding::Packed(v) => Box::new(v.iter().map(|(f, val)| (f.as_slice(), val.as_slice()))),
            HashEncoding::Mapped(m) => Box::new(m.iter().map(|(f, val)| (f.as_slice(), val.as_slice()))),
        }
    }

    fn maybe_upgrade(&mut self, cfg: &EncodingThresholds) {
        let should_upgrade = match &self.0 {
            HashEncoding::Packed(v) => {
                v.len() > cfg.hash_max_listpack_entries
                    || v.iter().any(|(f, val)| {
                        f.len() > cfg.hash_max_listpack_value || val.len() > cfg.hash_max_listpack_value
                    })
            }
            HashEncoding::Mapped(_) => false,
        };
        if should_upgrade {
            if let HashEncoding::Packed(v) = &mut self.0 {
                tracing::debug!(entries = v.len(), "hash upgrading packed -> mapped");
                let map: HashMap<Vec<u8>, Vec<u8>> = std::mem::take(v).into_iter().collect();
                self.0 = HashEncoding::Mapped(map);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn starts_packed_and_upgrades_on_entry_count() {
        let cfg = EncodingThresholds {
            hash_max_listpack_entries: 2,
            ..EncodingThresholds::default()
        };
        let mut h = HashValue::new();
        h.set(b"f1".to_vec(), b"v1".to_vec(), &cfg);
        assert_eq!(h.encoding_name(), "packed");
        h.set(b"f2".to_vec(), b"v2".to_vec(), &cfg);
        h.set(b"f3".to_vec(), b"v3".to_vec(), &cfg);
        assert_eq!(h.encoding_name(), "mapped");
    }

    #[test]
    fn upgrades_on_value_length() {
        let cfg = EncodingThresholds {
            hash_max_listpack_value: 4,
            ..EncodingThresholds::default()
        };
        let mut h = HashValue::new();
        h.set(b"f".to_vec(), b"short".to_vec(), &cfg);
        assert_eq!(h.encoding_name(), "mapped");
    }

    #[test]
    fn upgrade_is_monotone() {
        let cfg = EncodingThresholds {
            hash_max_listpack_entries: 1,
            ..EncodingThresholds::default()
        };
        let mut h = HashValue::new();
        h.set(b"f1".to_vec(), b"v".to_vec(), &cfg);
        h.set(b"f2".to_vec(), b"v".to_vec(), &cfg);
        assert_eq!(h.encoding_name(), "mapped");
        h.del(b"f2");
        assert_eq!(h.encoding_name(), "mapped");
    }

    #[test]
    fn hsetnx_only_sets_when_absent() {
        let cfg = EncodingThresholds::default();
        let mut h = HashValue::new();
        assert!(h.set_if_absent(b"f".to_vec(), b"1".to_vec(), &cfg));
        assert!(!h.set_if_absent(b"f".to_vec(), b"2".to_vec(), &cfg));
        assert_eq!(h.get(b"f"), Some(b"1".as_slice()));
    }
}
