// A single hash table: a power-of-two-sized bucket array where each
// bucket is itself a small chain (`Vec`) of entries. This is the
// `t0`/`t1` half of the incrementally-rehashing map in `lib.rs`.

pub(crate) struct Table<K, V> {
    pub(crate) buckets: Vec<Vec<(K, V)>>,
    pub(crate) used: usize,
}

impl<K, V> Table<K, V> {
    pub(crate) fn empty() -> Self {
        Table {
            buckets: Vec::new(),
            used: 0,
        }
    }

    pub(crate) fn with_size(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        Table {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            used: 0,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn mask(&self) -> u64 {
        self.size().saturating_sub(1) as u64
    }

    pub(crate) fn index_for(&self, hash: u64) -> usize {
        (hash & self.mask()) as usize
    }

    /// An xor-mixed identity fingerprint: changes whenever the table's
    /// backing storage or occupancy changes, even across a
    /// reallocation to the same logical size. Used by unsafe iterators
    /// to detect concurrent mutation.
    pub(crate) fn fingerprint(&self) -> u64 {
        let ptr = self.buckets.as_ptr() as usize as u64;
        ptr ^ (self.size() as u64).wrapping_mul(0x9E3779B97F4A7C15)
            ^ (self.used as u64).wrapping_mul(0xBF58476D1CE4E5B9)
    }
}

pub(crate) fn next_power_of_two(n: usize) -> usize {
    if n <= 1 {
        1
    } else {
        n.next_power_of_two()
    }
}
