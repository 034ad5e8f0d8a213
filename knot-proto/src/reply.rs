/// The `addReplyX` family from spec §6: every shape a command handler
/// can hand back to a client. `encode` renders it to RESP2 bytes
/// unconditionally, except `Push`, which a RESP2 client receives as a
/// plain array (the spec's documented v2 fallback) and a RESP3 client
/// receives as a real push frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    SimpleString(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    NullBulk,
    NullArray,
    Array(Vec<Reply>),
    Map(Vec<(Reply, Reply)>),
    Set(Vec<Reply>),
    Push(Vec<Reply>),
}

impl Reply {
    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Reply {
        Reply::Bulk(bytes.into())
    }

    pub fn error(prefix: &str, msg: impl AsRef<str>) -> Reply {
        Reply::Error(format!("{prefix} {}", msg.as_ref()))
    }
}

/// Appends the RESP encoding of `reply` to `buf`. `resp3` controls
/// only `Map`/`Set`/`Push`, which RESP2 renders as flat/plain arrays
/// (spec §6: "v2 clients receive them as plain arrays").
pub fn encode(reply: &Reply, resp3: bool, buf: &mut Vec<u8>) {
    match reply {
        Reply::Ok => buf.extend_from_slice(b"+OK\r\n"),
        Reply::SimpleString(s) => {
            buf.push(b'+');
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Error(s) => {
            buf.push(b'-');
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Integer(n) => {
            buf.push(b':');
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(bytes) => {
            buf.push(b'$');
            buf.extend_from_slice(bytes.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::NullBulk => {
            buf.extend_from_slice(if resp3 { b"_\r\n" } else { b"$-1\r\n" });
        }
        Reply::NullArray => {
            buf.extend_from_slice(if resp3 { b"_\r\n" } else { b"*-1\r\n" });
        }
        Reply::Array(items) => encode_aggregate(b'*', items, resp3, buf),
        Reply::Set(items) => {
            if resp3 {
                encode_aggregate(b'~', items, resp3, buf);
            } else {
                encode_aggregate(b'*', items, resp3, buf);
            }
        }
        Reply::Push(items) => {
            if resp3 {
                encode_aggregate(b'>', items, resp3, buf);
            } else {
                encode_aggregate(b'*', items, resp3, buf);
            }
        }
        Reply::Map(pairs) => {
            if resp3 {
                buf.push(b'%');
                buf.extend_from_slice(pairs.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for (k, v) in pairs {
                    encode(k, resp3, buf);
                    encode(v, resp3, buf);
                }
            } else {
                let flat: Vec<Reply> = pairs
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                encode_aggregate(b'*', &flat, resp3, buf);
            }
        }
    }
}

fn encode_aggregate(tag: u8, items: &[Reply], resp3: bool, buf: &mut Vec<u8>) {
    buf.push(tag);
    buf.extend_from_slice(items.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in items {
        encode(item, resp3, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn encodes_simple_ok() {
        let mut buf = Vec::new();
        encode(&Reply::Ok, false, &mut buf);
        assert_eq!(buf, b"+OK\r\n");
    }

    #[test]
    fn encodes_bulk_string() {
        let mut buf = Vec::new();
        encode(&Reply::bulk(b"hi".to_vec()), false, &mut buf);
        assert_eq!(buf, b"$2\r\nhi\r\n");
    }

    #[test]
    fn encodes_null_bulk_per_protocol_version() {
        let mut resp2 = Vec::new();
        encode(&Reply::NullBulk, false, &mut resp2);
        assert_eq!(resp2, b"$-1\r\n");

        let mut resp3 = Vec::new();
        encode(&Reply::NullBulk, true, &mut resp3);
        assert_eq!(resp3, b"_\r\n");
    }

    #[test]
    fn encodes_array_of_mixed_replies() {
        let mut buf = Vec::new();
        let reply = Reply::Array(vec![Reply::Integer(1), Reply::bulk(b"x".to_vec()), Reply::NullBulk]);
        encode(&reply, false, &mut buf);
        assert_eq!(buf, b"*3\r\n:1\r\n$1\r\nx\r\n$-1\r\n");
    }

    #[test]
    fn map_flattens_to_array_under_resp2() {
        let mut buf = Vec::new();
        let reply = Reply::Map(vec![(Reply::bulk(b"f".to_vec()), Reply::bulk(b"v".to_vec()))]);
        encode(&reply, false, &mut buf);
        assert_eq!(buf, b"*2\r\n$1\r\nf\r\n$1\r\nv\r\n");
    }

    #[test]
    fn push_is_a_real_frame_under_resp3_and_an_array_under_resp2() {
        let reply = Reply::Push(vec![Reply::bulk(b"message".to_vec())]);
        let mut resp2 = Vec::new();
        encode(&reply, false, &mut resp2);
        assert!(resp2.starts_with(b"*1\r\n"));

        let mut resp3 = Vec::new();
        encode(&reply, true, &mut resp3);
        assert!(resp3.starts_with(b">1\r\n"));
    }
}
