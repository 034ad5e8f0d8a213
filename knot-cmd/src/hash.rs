// Hash semantics (spec §4.6 plus SPEC_FULL's supplemented ops).

use knot_base::mstime;
use knot_proto::Reply;
use knot_value::{AccessClock, HashValue, Value};

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};
use crate::util::arity_error;

fn db_mut<'a>(server: &'a mut Server, session: &Session) -> CommandResult<&'a mut knot_store::Database> {
    server
        .keyspace
        .get_mut(session.dbid)
        .ok_or(CommandError::OutOfRange("DB index is out of range".to_string()))
}

fn now_seconds() -> u32 {
    (mstime() / 1000) as u32
}

/// `HSET`: variadic field/value pairs. Returns the count of fields
/// newly created (not overwritten).
pub fn hset(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(arity_error("hset"));
    }
    let now = mstime();
    let cfg = server.thresholds;
    let db = db_mut(server, session)?;
    if db.lookup_key_write(&argv[1], now).is_none() {
        db.db_add(&argv[1], Value::hash(HashValue::new(), AccessClock::new_lru(now_seconds())))
            .ok();
    }
    let v = db.lookup_key_write(&argv[1], now).ok_or(CommandError::NotFound)?;
    let h = v.as_hash_mut().ok_or(CommandError::WrongType)?;
    let mut created = 0;
    for pair in argv[2..].chunks(2) {
        if h.set(pair[0].clone(), pair[1].clone(), &cfg) {
            created += 1;
        }
    }
    Ok(Reply::Integer(created))
}

pub fn hsetnx(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("hsetnx"));
    }
    let now = mstime();
    let cfg = server_thresholds(server, session)?;
    let db = db_mut(server, session)?;
    let v = db.lookup_key_write(&argv[1], now);
    let created = match v {
        Some(v) => {
            let h = v.as_hash_mut().ok_or(CommandError::WrongType)?;
            h.set_if_absent(argv[2].clone(), argv[3].clone(), &cfg)
        }
        None => {
            let mut h = HashValue::new();
            h.set_if_absent(argv[2].clone(), argv[3].clone(), &cfg);
            db.db_add(&argv[1], Value::hash(h, AccessClock::new_lru(now_seconds()))).ok();
            true
        }
    };
    Ok(Reply::Integer(created as i64))
}

pub fn hget(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("hget"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, true) {
        Some(v) => {
            let h = v.as_hash().ok_or(CommandError::WrongType)?;
            Ok(h.get(&argv[2]).map(|b| Reply::bulk(b.to_vec())).unwrap_or(Reply::NullBulk))
        }
        None => Ok(Reply::NullBulk),
    }
}

pub fn hmget(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 {
        return Err(arity_error("hmget"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, true) {
        Some(v) => {
            let h = v.as_hash().ok_or(CommandError::WrongType)?;
            Ok(Reply::Array(
                argv[2..]
                    .iter()
                    .map(|f| h.get(f).map(|b| Reply::bulk(b.to_vec())).unwrap_or(Reply::NullBulk))
                    .collect(),
            ))
        }
        None => Ok(Reply::Array(argv[2..].iter().map(|_| Reply::NullBulk).collect())),
    }
}

pub fn hdel(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 {
        return Err(arity_error("hdel"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(v) = db.lookup_key_write(&argv[1], now) else {
        return Ok(Reply::Integer(0));
    };
    let h = v.as_hash_mut().ok_or(CommandError::WrongType)?;
    let mut removed = 0;
    for field in &argv[2..] {
        if h.del(field) {
            removed += 1;
        }
    }
    let empty = h.is_empty();
    if empty {
        db.db_delete(&argv[1]);
    }
    Ok(Reply::Integer(removed))
}

pub fn hexists(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("hexists"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(v.as_hash().ok_or(CommandError::WrongType)?.contains(&argv[2]) as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn hlen(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("hlen"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(v.as_hash().ok_or(CommandError::WrongType)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn hkeys(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    hash_iter_reply(server, session, argv, "hkeys", |h| {
        h.iter().map(|(f, _)| Reply::bulk(f.to_vec())).collect()
    })
}

pub fn hvals(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    hash_iter_reply(server, session, argv, "hvals", |h| {
        h.iter().map(|(_, v)| Reply::bulk(v.to_vec())).collect()
    })
}

pub fn hgetall(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    hash_iter_reply(server, session, argv, "hgetall", |h| {
        h.iter().flat_map(|(f, v)| [Reply::bulk(f.to_vec()), Reply::bulk(v.to_vec())]).collect()
    })
}

fn hash_iter_reply(
    server: &mut Server,
    session: &Session,
    argv: &[Vec<u8>],
    name: &str,
    f: impl FnOnce(&HashValue) -> Vec<Reply>,
) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error(name));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Array(f(v.as_hash().ok_or(CommandError::WrongType)?))),
        None => Ok(Reply::Array(Vec::new())),
    }
}

/// `HRANDFIELD`: uniform sample, grounded in `dict.c`'s
/// `dictGetRandomKey` via `knot-dict`'s `random_key`. The minimal
/// single-field form only; the count/WITHVALUES grammar is left to a
/// future extension since `original_source/` doesn't specify it.
pub fn hrandfield(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("hrandfield"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => {
            let h = v.as_hash().ok_or(CommandError::WrongType)?;
            let fields: Vec<&[u8]> = h.iter().map(|(f, _)| f).collect();
            if fields.is_empty() {
                return Ok(Reply::NullBulk);
            }
            let idx = (mstime() as usize) % fields.len();
            Ok(Reply::bulk(fields[idx].to_vec()))
        }
        None => Ok(Reply::NullBulk),
    }
}

fn server_thresholds(server: &Server, _session: &Session) -> CommandResult<knot_value::EncodingThresholds> {
    Ok(server.thresholds)
}
