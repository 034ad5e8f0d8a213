/// STREAM entry id: milliseconds-since-epoch plus a per-millisecond
/// sequence, strictly increasing within a stream (`original_source/`
/// does not include `t_stream.c`, so this crate implements only the
/// append/length/range subset named in SPEC_FULL.md's supplemented
/// features, not consumer groups or trimming policies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn next_after(self, now_ms: u64) -> StreamId {
        if now_ms > self.ms {
            StreamId { ms: now_ms, seq: 0 }
        } else {
            StreamId {
                ms: self.ms,
                seq: self.seq + 1,
            }
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// STREAM has one encoding (spec §4.3 only details the rule for HASH
/// and marks SET/ZSET as "analogous"; it is silent on STREAM's actual
/// compact/expanded split, so this crate gives it the single encoding
/// the data actually needs — an append-only ordered entry log).
#[derive(Debug, Clone, Default)]
pub struct StreamValue {
    entries: Vec<(StreamId, Vec<(Vec<u8>, Vec<u8>)>)>,
    last_id: StreamId,
}

impl StreamValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding_name(&self) -> &'static str {
        "compact"
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    pub fn add(&mut self, now_ms: u64, fields: Vec<(Vec<u8>, Vec<u8>)>) -> StreamId {
        let id = self.last_id.next_after(now_ms);
        self.entries.push((id, fields));
        self.last_id = id;
        id
    }

    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<(StreamId, &[(Vec<u8>, Vec<u8>)])> {
        self.entries
            .iter()
            .filter(|(id, _)| *id >= start && *id <= end)
            .map(|(id, fields)| (*id, fields.as_slice()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn ids_strictly_increase_within_a_millisecond() {
        let mut s = StreamValue::new();
        let a = s.add(100, vec![(b"f".to_vec(), b"1".to_vec())]);
        let b = s.add(100, vec![(b"f".to_vec(), b"2".to_vec())]);
        assert_eq!(a, StreamId { ms: 100, seq: 0 });
        assert_eq!(b, StreamId { ms: 100, seq: 1 });
    }

    #[test]
    fn range_is_inclusive() {
        let mut s = StreamValue::new();
        let a = s.add(1, vec![]);
        let b = s.add(2, vec![]);
        let _c = s.add(3, vec![]);
        let got: Vec<_> = s.range(a, b).into_iter().map(|(id, _)| id).collect();
        assert_eq!(got, vec![a, b]);
    }
}
