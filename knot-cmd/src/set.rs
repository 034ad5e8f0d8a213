// SET/ZSET/STREAM semantics (SPEC_FULL's supplemented ops; spec.md
// itself only names these types in §3/§4.3, leaving commands to this
// crate's discretion per DESIGN.md's "analogous to hash" note).

use knot_base::mstime;
use knot_proto::Reply;
use knot_value::{AccessClock, SetValue, StreamId, StreamValue, Value, ZSetValue};

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};
use crate::util::{arity_error, parse_f64, parse_i64};

fn db_mut<'a>(server: &'a mut Server, session: &Session) -> CommandResult<&'a mut knot_store::Database> {
    server
        .keyspace
        .get_mut(session.dbid)
        .ok_or(CommandError::OutOfRange("DB index is out of range".to_string()))
}

fn now_seconds() -> u32 {
    (mstime() / 1000) as u32
}

pub fn sadd(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 {
        return Err(arity_error("sadd"));
    }
    let now = mstime();
    let cfg = server.thresholds;
    let db = db_mut(server, session)?;
    if db.lookup_key_write(&argv[1], now).is_none() {
        db.db_add(&argv[1], Value::set(SetValue::new(), AccessClock::new_lru(now_seconds())))
            .ok();
    }
    let v = db.lookup_key_write(&argv[1], now).ok_or(CommandError::NotFound)?;
    let s = v.as_set_mut().ok_or(CommandError::WrongType)?;
    let mut added = 0;
    for member in &argv[2..] {
        if s.add(member.clone(), &cfg) {
            added += 1;
        }
    }
    Ok(Reply::Integer(added))
}

pub fn srem(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 {
        return Err(arity_error("srem"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(v) = db.lookup_key_write(&argv[1], now) else {
        return Ok(Reply::Integer(0));
    };
    let s = v.as_set_mut().ok_or(CommandError::WrongType)?;
    let mut removed = 0;
    for member in &argv[2..] {
        if s.remove(member) {
            removed += 1;
        }
    }
    let emptied = s.is_empty();
    if emptied {
        db.db_delete(&argv[1]);
    }
    Ok(Reply::Integer(removed))
}

pub fn sismember(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("sismember"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(v.as_set().ok_or(CommandError::WrongType)?.contains(&argv[2]) as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn smembers(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("smembers"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Array(
            v.as_set().ok_or(CommandError::WrongType)?.iter().map(|m| Reply::bulk(m.to_vec())).collect(),
        )),
        None => Ok(Reply::Array(Vec::new())),
    }
}

pub fn scard(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("scard"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(v.as_set().ok_or(CommandError::WrongType)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn zadd(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 4 || (argv.len() - 2) % 2 != 0 {
        return Err(arity_error("zadd"));
    }
    let now = mstime();
    let cfg = server.thresholds;
    let db = db_mut(server, session)?;
    if db.lookup_key_write(&argv[1], now).is_none() {
        db.db_add(&argv[1], Value::zset(ZSetValue::new(), AccessClock::new_lru(now_seconds())))
            .ok();
    }
    let v = db.lookup_key_write(&argv[1], now).ok_or(CommandError::NotFound)?;
    let z = v.as_zset_mut().ok_or(CommandError::WrongType)?;
    let mut added = 0;
    for pair in argv[2..].chunks(2) {
        let score = parse_f64(&pair[0])?;
        if z.set(pair[1].clone(), score, &cfg).is_none() {
            added += 1;
        }
    }
    Ok(Reply::Integer(added))
}

pub fn zscore(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("zscore"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(v
            .as_zset()
            .ok_or(CommandError::WrongType)?
            .score(&argv[2])
            .map(|s| Reply::bulk(format_score(s)))
            .unwrap_or(Reply::NullBulk)),
        None => Ok(Reply::NullBulk),
    }
}

pub fn zincrby(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("zincrby"));
    }
    let delta = parse_f64(&argv[2])?;
    let now = mstime();
    let cfg = server.thresholds;
    let db = db_mut(server, session)?;
    if db.lookup_key_write(&argv[1], now).is_none() {
        db.db_add(&argv[1], Value::zset(ZSetValue::new(), AccessClock::new_lru(now_seconds())))
            .ok();
    }
    let v = db.lookup_key_write(&argv[1], now).ok_or(CommandError::NotFound)?;
    let z = v.as_zset_mut().ok_or(CommandError::WrongType)?;
    let new_score = z.incr_by(argv[3].clone(), delta, &cfg);
    Ok(Reply::bulk(format_score(new_score)))
}

pub fn zrank(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("zrank"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(v
            .as_zset()
            .ok_or(CommandError::WrongType)?
            .rank(&argv[2])
            .map(|r| Reply::Integer(r as i64))
            .unwrap_or(Reply::NullBulk)),
        None => Ok(Reply::NullBulk),
    }
}

pub fn zrem(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 {
        return Err(arity_error("zrem"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(v) = db.lookup_key_write(&argv[1], now) else {
        return Ok(Reply::Integer(0));
    };
    let z = v.as_zset_mut().ok_or(CommandError::WrongType)?;
    let mut removed = 0;
    for member in &argv[2..] {
        if z.remove(member) {
            removed += 1;
        }
    }
    let emptied = z.is_empty();
    if emptied {
        db.db_delete(&argv[1]);
    }
    Ok(Reply::Integer(removed))
}

pub fn zcard(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("zcard"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(v.as_zset().ok_or(CommandError::WrongType)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn zrange(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 4 {
        return Err(arity_error("zrange"));
    }
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let withscores = argv.len() == 5 && crate::util::uppercase(&argv[4]) == "WITHSCORES";
    if argv.len() == 5 && !withscores {
        return Err(CommandError::syntax());
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => {
            let z = v.as_zset().ok_or(CommandError::WrongType)?;
            let range = z.range(start, stop);
            let mut out = Vec::with_capacity(range.len() * if withscores { 2 } else { 1 });
            for (member, score) in range {
                out.push(Reply::bulk(member));
                if withscores {
                    out.push(Reply::bulk(format_score(score)));
                }
            }
            Ok(Reply::Array(out))
        }
        None => Ok(Reply::Array(Vec::new())),
    }
}

fn format_score(score: f64) -> Vec<u8> {
    if score.fract() == 0.0 && score.is_finite() {
        format!("{}", score as i64).into_bytes()
    } else {
        format!("{score}").into_bytes()
    }
}

/// `XADD key <* | ms-seq> field value [field value ...]`; only `*`
/// auto-generation is implemented, matching `StreamValue`'s id scheme.
pub fn xadd(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 5 || (argv.len() - 3) % 2 != 0 {
        return Err(arity_error("xadd"));
    }
    if argv[2] != b"*" {
        return Err(CommandError::Syntax(
            "only the '*' auto-generated id form is supported".to_string(),
        ));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if db.lookup_key_write(&argv[1], now).is_none() {
        db.db_add(&argv[1], Value::stream(StreamValue::new(), AccessClock::new_lru(now_seconds())))
            .ok();
    }
    let v = db.lookup_key_write(&argv[1], now).ok_or(CommandError::NotFound)?;
    let stream = v.as_stream_mut().ok_or(CommandError::WrongType)?;
    let fields: Vec<(Vec<u8>, Vec<u8>)> = argv[3..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let id = stream.add(now.max(0) as u64, fields);
    Ok(Reply::bulk(id.to_string().into_bytes()))
}

pub fn xlen(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("xlen"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(v.as_stream().ok_or(CommandError::WrongType)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

fn parse_stream_id(bytes: &[u8], default: StreamId) -> CommandResult<StreamId> {
    let s = std::str::from_utf8(bytes).map_err(|_| CommandError::syntax())?;
    if s == "-" {
        return Ok(StreamId::ZERO);
    }
    if s == "+" {
        return Ok(StreamId { ms: u64::MAX, seq: u64::MAX });
    }
    match s.split_once('-') {
        Some((ms, seq)) => {
            let ms: u64 = ms.parse().map_err(|_| CommandError::syntax())?;
            let seq: u64 = seq.parse().map_err(|_| CommandError::syntax())?;
            Ok(StreamId { ms, seq })
        }
        None => {
            let ms: u64 = s.parse().map_err(|_| CommandError::syntax())?;
            Ok(StreamId { ms, seq: default.seq })
        }
    }
}

pub fn xrange(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("xrange"));
    }
    let start = parse_stream_id(&argv[2], StreamId::ZERO)?;
    let end = parse_stream_id(&argv[3], StreamId { ms: u64::MAX, seq: u64::MAX })?;
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => {
            let stream = v.as_stream().ok_or(CommandError::WrongType)?;
            let entries = stream
                .range(start, end)
                .into_iter()
                .map(|(id, fields)| {
                    let flat: Vec<Reply> = fields
                        .iter()
                        .flat_map(|(f, val)| [Reply::bulk(f.clone()), Reply::bulk(val.clone())])
                        .collect();
                    Reply::Array(vec![Reply::bulk(id.to_string().into_bytes()), Reply::Array(flat)])
                })
                .collect();
            Ok(Reply::Array(entries))
        }
        None => Ok(Reply::Array(Vec::new())),
    }
}
