// The tagged value model (spec §3): each logical type admits one or
// more physical encodings and transparently upgrades between them.
// Command handlers (`knot-cmd`) must never cache an encoding-specific
// reference across a mutation — the encoding can change under them.

mod access;
mod error;
mod hash;
mod list;
mod set;
mod stream;
mod string;
mod thresholds;
mod zset;

pub use access::AccessClock;
pub use error::{ValueError, ValueResult};
pub use hash::{HashEncoding, HashValue};
pub use list::{End, ListValue};
pub use set::{SetEncoding, SetValue};
pub use stream::{StreamId, StreamValue};
pub use string::{StringEncoding, StringValue};
pub use thresholds::EncodingThresholds;
pub use zset::{ZSetEncoding, ZSetValue};

#[derive(Debug, Clone)]
pub enum ValueKind {
    String(StringValue),
    List(ListValue),
    Hash(HashValue),
    Set(SetValue),
    ZSet(ZSetValue),
    Stream(StreamValue),
}

/// The full per-key record from spec §3: `{type, encoding, lru_or_lfu,
/// refcount, payload}`. `type` is the `ValueKind` discriminant and
/// `encoding` is nested inside it; `refcount` only has observable
/// weight on the `String` variant's heap buffer (see `string.rs`) so
/// it isn't duplicated here.
#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    pub access: AccessClock,
}

impl Value {
    pub fn new(kind: ValueKind, access: AccessClock) -> Self {
        Value { kind, access }
    }

    pub fn string(v: StringValue, access: AccessClock) -> Self {
        Value::new(ValueKind::String(v), access)
    }

    pub fn list(v: ListValue, access: AccessClock) -> Self {
        Value::new(ValueKind::List(v), access)
    }

    pub fn hash(v: HashValue, access: AccessClock) -> Self {
        Value::new(ValueKind::Hash(v), access)
    }

    pub fn set(v: SetValue, access: AccessClock) -> Self {
        Value::new(ValueKind::Set(v), access)
    }

    pub fn zset(v: ZSetValue, access: AccessClock) -> Self {
        Value::new(ValueKind::ZSet(v), access)
    }

    pub fn stream(v: StreamValue, access: AccessClock) -> Self {
        Value::new(ValueKind::Stream(v), access)
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::String(_) => "string",
            ValueKind::List(_) => "list",
            ValueKind::Hash(_) => "hash",
            ValueKind::Set(_) => "set",
            ValueKind::ZSet(_) => "zset",
            ValueKind::Stream(_) => "stream",
        }
    }

    pub fn encoding_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::String(v) => v.encoding_name(),
            ValueKind::List(v) => v.encoding_name(),
            ValueKind::Hash(v) => v.encoding_name(),
            ValueKind::Set(v) => v.encoding_name(),
            ValueKind::ZSet(v) => v.encoding_name(),
            ValueKind::Stream(v) => v.encoding_name(),
        }
    }

    pub fn as_string(&self) -> Option<&StringValue> {
        match &self.kind {
            ValueKind::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string_mut(&mut self) -> Option<&mut StringValue> {
        match &mut self.kind {
            ValueKind::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListValue> {
        match &self.kind {
            ValueKind::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListValue> {
        match &mut self.kind {
            ValueKind::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashValue> {
        match &self.kind {
            ValueKind::Hash(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_hash_mut(&mut self) -> Option<&mut HashValue> {
        match &mut self.kind {
            ValueKind::Hash(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetValue> {
        match &self.kind {
            ValueKind::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut SetValue> {
        match &mut self.kind {
            ValueKind::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_zset(&self) -> Option<&ZSetValue> {
        match &self.kind {
            ValueKind::ZSet(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_zset_mut(&mut self) -> Option<&mut ZSetValue> {
        match &mut self.kind {
            ValueKind::ZSet(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamValue> {
        match &self.kind {
            ValueKind::Stream(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_stream_mut(&mut self) -> Option<&mut StreamValue> {
        match &mut self.kind {
            ValueKind::Stream(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn type_and_encoding_names() {
        let v = Value::string(
            StringValue::from_bytes(b"42".to_vec()).unwrap(),
            AccessClock::new_lru(0),
        );
        assert_eq!(v.type_name(), "string");
        assert_eq!(v.encoding_name(), "int");
    }

    #[test]
    fn accessor_type_mismatch_returns_none() {
        let v = Value::list(ListValue::new(), AccessClock::new_lru(0));
        assert!(v.as_hash().is_none());
        assert!(v.as_list().is_some());
    }
}
