/// Encoding upgrade thresholds (spec §3/§4.3), one field per
/// aggregate type. Upgrades are monotone: once a container crosses a
/// threshold it moves to the expanded encoding and never moves back.
#[derive(Debug, Clone, Copy)]
pub struct EncodingThresholds {
    pub hash_max_listpack_entries: usize,
    pub hash_max_listpack_value: usize,
    pub set_max_intset_entries: usize,
    pub set_max_listpack_entries: usize,
    pub set_max_listpack_value: usize,
    pub zset_max_listpack_entries: usize,
    pub zset_max_listpack_value: usize,
    pub list_max_listpack_size: usize,
}

impl Default for EncodingThresholds {
    fn default() -> Self {
        EncodingThresholds {
            hash_max_listpack_entries: 128,
            hash_max_listpack_value: 64,
            set_max_intset_entries: 512,
            set_max_listpack_entries: 128,
            set_max_listpack_value: 64,
            zset_max_listpack_entries: 128,
            zset_max_listpack_value: 64,
            list_max_listpack_size: 128,
        }
    }
}

/// String size ceiling (spec §4.6's `SETRANGE` boundary: 512 MiB
/// accepted, 512 MiB + 1 rejected).
pub const STRING_MAX_LEN: usize = 512 * 1024 * 1024;

/// Above this length a string is stored `Raw` rather than `EmbStr`
/// even though both are heap buffers — `EmbStr` is the encoding name
/// for small strings that would, in the teacher's allocator model, sit
/// inline with the object header. We don't replicate the allocation
/// trick, only the name and the threshold, since `OBJECT ENCODING`
/// tests against it.
pub const EMBSTR_MAX_LEN: usize = 44;
