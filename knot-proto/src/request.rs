// Incremental request parsing: the reactor hands a `RequestParser`
// whatever bytes just arrived on a readable fd, and pulls out
// complete commands as they become available. "Multi-bulk header
// first, items next" (spec §6) is the primary form; a line not
// starting with `*` is parsed as the source's inline-command fallback
// (whitespace-separated, no embedded spaces), matching clients like
// `redis-cli -x` piping raw lines.

use memchr::memchr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    /// A multi-bulk header or bulk length was not a valid non-negative
    /// integer, or a bulk argument's terminating CRLF was missing.
    MalformedRequest,
    /// A single bulk argument exceeded the configured limit — a
    /// lightweight stand-in for the source's `proto-max-bulk-len`.
    BulkTooLarge,
}

const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;

/// Buffers partial input and yields complete command argument vectors.
#[derive(Default)]
pub struct RequestParser {
    buf: Vec<u8>,
}

impl RequestParser {
    pub fn new() -> Self {
        RequestParser::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pulls the next complete command out of the buffer, if any.
    /// Returns `Ok(None)` when more bytes are needed (leaving the
    /// partial frame buffered) and consumes the frame's bytes on
    /// `Ok(Some(_))`.
    pub fn next_command(&mut self) -> Result<Option<Vec<Vec<u8>>>, ProtoError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf[0] == b'*' {
            self.parse_multibulk()
        } else {
            self.parse_inline()
        }
    }

    fn parse_inline(&mut self) -> Result<Option<Vec<Vec<u8>>>, ProtoError> {
        let Some(nl) = memchr(b'\n', &self.buf) else {
            return Ok(None);
        };
        let mut line_end = nl;
        if line_end > 0 && self.buf[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        let argv: Vec<Vec<u8>> = self.buf[..line_end]
            .split(|b| *b == b' ')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_vec())
            .collect();
        self.buf.drain(..=nl);
        Ok(Some(argv))
    }

    fn parse_multibulk(&mut self) -> Result<Option<Vec<Vec<u8>>>, ProtoError> {
        let mut pos = 0usize;
        let count = match read_line_i64(&self.buf, &mut pos)? {
            Some(n) => n,
            None => return Ok(None),
        };
        if count > MAX_MULTIBULK_LEN {
            tracing::debug!(count, "rejecting oversized multibulk count");
            return Err(ProtoError::MalformedRequest);
        }
        if count <= 0 {
            self.buf.drain(..pos);
            return Ok(Some(Vec::new()));
        }
        let mut argv = Vec::with_capacity(count as usize);
        let mut cursor = pos;
        for _ in 0..count {
            if cursor >= self.buf.len() || self.buf[cursor] != b'$' {
                if cursor >= self.buf.len() {
                    return Ok(None);
                }
                return Err(ProtoError::MalformedRequest);
            }
            cursor += 1;
            let len = match read_line_i64(&self.buf, &mut cursor) {
                Ok(Some(n)) => n,
                Ok(None) => return Ok(None),
                Err(e) => return Err(e),
            };
            if len < 0 || len as usize > MAX_BULK_LEN {
                return Err(ProtoError::BulkTooLarge);
            }
            let len = len as usize;
            if self.buf.len() < cursor + len + 2 {
                return Ok(None);
            }
            if &self.buf[cursor + len..cursor + len + 2] != b"\r\n" {
                return Err(ProtoError::MalformedRequest);
            }
            argv.push(self.buf[cursor..cursor + len].to_vec());
            cursor += len + 2;
        }
        self.buf.drain(..cursor);
        Ok(Some(argv))
    }
}

/// Reads a CRLF-terminated line starting at `*pos` as an `i64`,
/// advancing `*pos` past the CRLF. Returns `Ok(None)` if the line
/// isn't complete yet.
fn read_line_i64(buf: &[u8], pos: &mut usize) -> Result<Option<i64>, ProtoError> {
    let rest = &buf[*pos..];
    let Some(nl) = memchr(b'\n', rest) else {
        return Ok(None);
    };
    let mut end = nl;
    if end > 0 && rest[end - 1] == b'\r' {
        end -= 1;
    }
    // The leading tag byte (`*` or `$`) was already consumed by the
    // caller; skip it if still present at position 0 of `rest`.
    let digits_start = if !rest.is_empty() && (rest[0] == b'*' || rest[0] == b'$') {
        1
    } else {
        0
    };
    let text = std::str::from_utf8(&rest[digits_start..end]).map_err(|_| ProtoError::MalformedRequest)?;
    let n: i64 = text.trim().parse().map_err(|_| ProtoError::MalformedRequest)?;
    *pos += nl + 1;
    Ok(Some(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn parses_a_complete_multibulk_command() {
        let mut p = RequestParser::new();
        p.feed(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n");
        let argv = p.next_command().unwrap().unwrap();
        assert_eq!(argv, vec![b"GET".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn waits_for_more_bytes_on_partial_frame() {
        let mut p = RequestParser::new();
        p.feed(b"*2\r\n$3\r\nGET\r\n$1\r\n");
        assert_eq!(p.next_command().unwrap(), None);
        p.feed(b"x\r\n");
        assert_eq!(p.next_command().unwrap().unwrap(), vec![b"GET".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn parses_successive_commands_from_one_buffer() {
        let mut p = RequestParser::new();
        p.feed(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(p.next_command().unwrap().unwrap(), vec![b"PING".to_vec()]);
        assert_eq!(p.next_command().unwrap().unwrap(), vec![b"PING".to_vec()]);
        assert_eq!(p.next_command().unwrap(), None);
    }

    #[test]
    fn parses_inline_command() {
        let mut p = RequestParser::new();
        p.feed(b"PING\r\n");
        assert_eq!(p.next_command().unwrap().unwrap(), vec![b"PING".to_vec()]);
    }

    #[test]
    fn rejects_oversized_bulk_length() {
        let mut p = RequestParser::new();
        p.feed(b"*1\r\n$999999999999\r\n");
        assert_eq!(p.next_command(), Err(ProtoError::BulkTooLarge));
    }

    #[test]
    fn rejects_malformed_multibulk_count() {
        let mut p = RequestParser::new();
        p.feed(b"*notanumber\r\n");
        assert_eq!(p.next_command(), Err(ProtoError::MalformedRequest));
    }
}
