use std::rc::Rc;

use crate::error::{ValueError, ValueResult};
use crate::thresholds::{EMBSTR_MAX_LEN, STRING_MAX_LEN};

/// STRING's three encodings (spec §3/§4.3). `Int` is plain `i64`
/// rather than a refcounted handle: copying an `i64` is already free,
/// so the source's shared small-integer object pool (built to dodge
/// allocator traffic) has no Rust analogue worth keeping — see
/// DESIGN.md. `EmbStr`/`Raw` share a refcounted buffer; the only
/// difference between them is the length threshold used for `OBJECT
/// ENCODING`, both go through the same `unshare` path.
#[derive(Debug, Clone)]
pub enum StringEncoding {
    Int(i64),
    EmbStr(Rc<Vec<u8>>),
    Raw(Rc<Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct StringValue(StringEncoding);

impl StringValue {
    pub fn from_bytes(bytes: Vec<u8>) -> ValueResult<Self> {
        if bytes.len() > STRING_MAX_LEN {
            return Err(ValueError::OutOfRange);
        }
        Ok(StringValue(Self::encode(bytes)))
    }

    fn encode(bytes: Vec<u8>) -> StringEncoding {
        if let Some(n) = parse_strict_i64(&bytes) {
            return StringEncoding::Int(n);
        }
        if bytes.len() <= EMBSTR_MAX_LEN {
            StringEncoding::EmbStr(Rc::new(bytes))
        } else {
            StringEncoding::Raw(Rc::new(bytes))
        }
    }

    pub fn from_int(n: i64) -> Self {
        StringValue(StringEncoding::Int(n))
    }

    pub fn encoding_name(&self) -> &'static str {
        match self.0 {
            StringEncoding::Int(_) => "int",
            StringEncoding::EmbStr(_) => "embstr",
            StringEncoding::Raw(_) => "raw",
        }
    }

    pub fn len(&self) -> usize {
        match &self.0 {
            StringEncoding::Int(n) => n.to_string().len(),
            StringEncoding::EmbStr(b) | StringEncoding::Raw(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> std::borrow::Cow<'_, [u8]> {
        match &self.0 {
            StringEncoding::Int(n) => std::borrow::Cow::Owned(n.to_string().into_bytes()),
            StringEncoding::EmbStr(b) | StringEncoding::Raw(b) => std::borrow::Cow::Borrowed(b),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.0 {
            StringEncoding::Int(n) => Some(*n),
            StringEncoding::EmbStr(b) | StringEncoding::Raw(b) => parse_strict_i64(b),
        }
    }

    /// Implements the copy-on-write discipline from §4.3: any path
    /// that wants to mutate the buffer in place must go through here
    /// first. Returns an exclusive handle to a byte buffer, converting
    /// an `Int` encoding to a fresh buffer if needed.
    pub fn unshare(&mut self) -> &mut Vec<u8> {
        let needs_fresh = match &self.0 {
            StringEncoding::Int(_) => true,
            StringEncoding::EmbStr(b) | StringEncoding::Raw(b) => Rc::strong_count(b) > 1,
        };
        if needs_fresh {
            let bytes = self.as_bytes().into_owned();
            self.0 = if bytes.len() <= EMBSTR_MAX_LEN {
                StringEncoding::EmbStr(Rc::new(bytes))
            } else {
                StringEncoding::Raw(Rc::new(bytes))
            };
        }
        match &mut self.0 {
            StringEncoding::EmbStr(b) | StringEncoding::Raw(b) => {
                Rc::get_mut(b).expect("unshared buffer must be uniquely owned")
            }
            StringEncoding::Int(_) => unreachable!("converted above"),
        }
    }

    /// Re-derives the encoding after a mutation grew or shrank the
    /// buffer past the embstr/int thresholds (`APPEND`, `SETRANGE`).
    pub fn renormalize(&mut self) {
        if let StringEncoding::EmbStr(b) | StringEncoding::Raw(b) = &self.0 {
            let bytes = (**b).clone();
            self.0 = Self::encode(bytes);
        }
    }

    pub fn append(&mut self, suffix: &[u8]) -> ValueResult<()> {
        if self.len() + suffix.len() > STRING_MAX_LEN {
            return Err(ValueError::OutOfRange);
        }
        self.unshare().extend_from_slice(suffix);
        self.renormalize();
        Ok(())
    }

    pub fn setrange(&mut self, offset: usize, value: &[u8]) -> ValueResult<usize> {
        if value.is_empty() {
            return Ok(self.len());
        }
        let end = offset.checked_add(value.len()).ok_or(ValueError::OutOfRange)?;
        if end > STRING_MAX_LEN {
            return Err(ValueError::OutOfRange);
        }
        let buf = self.unshare();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(value);
        let new_len = buf.len();
        self.renormalize();
        Ok(new_len)
    }

    /// Inclusive-range slice with Redis-style negative-index
    /// resolution, clamped to bounds; returns empty for an
    /// out-of-order or fully-out-of-bounds range.
    pub fn getrange(&self, start: i64, end: i64) -> Vec<u8> {
        let bytes = self.as_bytes();
        let len = bytes.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let resolve = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let start = resolve(start).min(len - 1).max(0);
        let end = resolve(end).min(len - 1);
        if end < start {
            return Vec::new();
        }
        bytes[start as usize..=end as usize].to_vec()
    }

    pub fn incr_by(&mut self, delta: i64) -> ValueResult<i64> {
        let current = self.as_int().ok_or(ValueError::NotANumber)?;
        let next = current.checked_add(delta).ok_or(ValueError::Overflow)?;
        self.0 = StringEncoding::Int(next);
        Ok(next)
    }

    pub fn incr_by_float(&mut self, delta: f64) -> ValueResult<f64> {
        if delta.is_nan() || delta.is_infinite() {
            return Err(ValueError::NotANumber);
        }
        let current: f64 = match self.as_int() {
            Some(n) => n as f64,
            None => std::str::from_utf8(&self.as_bytes())
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .ok_or(ValueError::NotANumber)?,
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(ValueError::NotANumber);
        }
        let formatted = format_float(next);
        self.0 = Self::encode(formatted.into_bytes());
        Ok(next)
    }
}

fn parse_strict_i64(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) || s == "-0" {
        return None;
    }
    if s.starts_with('-') && s.len() > 2 && s.as_bytes()[1] == b'0' {
        return None;
    }
    s.parse::<i64>().ok()
}

/// `%.17Lg`-equivalent: the shortest decimal that round-trips back to
/// `f`, with no trailing zeros (`t_string.c`'s `ld2string` formats this
/// way so `INCRBYFLOAT 10.5 0.1` reads back `"10.6"`, not a
/// fixed-precision `10.60000000000000142`). Rust's `f64` `Display`
/// already produces that shortest round-tripping form and never
/// switches to scientific notation, so no further trimming is needed.
fn format_float(f: f64) -> String {
    format!("{f}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn small_ints_encode_as_int() {
        let v = StringValue::from_bytes(b"12345".to_vec()).unwrap();
        assert_eq!(v.encoding_name(), "int");
        assert_eq!(v.as_int(), Some(12345));
    }

    #[test]
    fn leading_zero_is_not_int_encoded() {
        let v = StringValue::from_bytes(b"0123".to_vec()).unwrap();
        assert_eq!(v.encoding_name(), "embstr");
    }

    #[test]
    fn long_strings_are_raw() {
        let big = vec![b'x'; EMBSTR_MAX_LEN + 1];
        let v = StringValue::from_bytes(big).unwrap();
        assert_eq!(v.encoding_name(), "raw");
    }

    #[test]
    fn unshare_copies_when_shared() {
        let mut v = StringValue::from_bytes(b"hello".to_vec()).unwrap();
        let clone_enc = v.0.clone();
        let _keep_alive = clone_enc;
        v.append(b" world").unwrap();
        assert_eq!(&*v.as_bytes(), b"hello world");
    }

    #[test]
    fn setrange_zero_pads() {
        let mut v = StringValue::from_bytes(b"hi".to_vec()).unwrap();
        let new_len = v.setrange(5, b"there").unwrap();
        assert_eq!(new_len, 10);
        assert_eq!(&*v.as_bytes(), b"hi\0\0\0there");
    }

    #[test]
    fn setrange_empty_value_on_missing_returns_len() {
        let v = StringValue::from_bytes(Vec::new()).unwrap();
        assert_eq!(v.len(), 0);
    }

    #[test]
    fn getrange_negative_indices() {
        let v = StringValue::from_bytes(b"This is a string".to_vec()).unwrap();
        assert_eq!(v.getrange(-3, -1), b"ing".to_vec());
        assert_eq!(v.getrange(0, -1), b"This is a string".to_vec());
    }

    #[test]
    fn incr_by_overflow_is_rejected() {
        let mut v = StringValue::from_int(i64::MAX);
        assert_eq!(v.incr_by(1), Err(ValueError::Overflow));
    }

    #[test]
    fn incr_by_float_rejects_nan() {
        let mut v = StringValue::from_int(1);
        assert_eq!(v.incr_by_float(f64::NAN), Err(ValueError::NotANumber));
    }

    #[test]
    fn incr_by_float_formats_without_trailing_zeros() {
        let mut v = StringValue::from_bytes(b"10.5".to_vec()).unwrap();
        let result = v.incr_by_float(0.1).unwrap();
        assert!((result - 10.6).abs() < 1e-9);
    }
}
