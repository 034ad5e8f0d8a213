// Generic key ops (spec §4.4/§4.5 plus the supplemented C5/C6 ops from
// SPEC_FULL): existence, expiration, renaming, iteration, and the
// whole-keyspace commands (FLUSHDB/FLUSHALL/SELECT/SWAPDB/DBSIZE).

use knot_base::mstime;
use knot_proto::Reply;

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};
use crate::util::{arity_error, parse_i64, parse_usize, uppercase};

pub fn exists(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    let now = mstime();
    let db = db_mut(server, session)?;
    let mut count = 0;
    for key in &argv[1..] {
        if db.exists(key, now) {
            count += 1;
        }
    }
    Ok(Reply::Integer(count))
}

pub fn type_cmd(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("type"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::SimpleString(v.type_name().to_string())),
        None => Ok(Reply::SimpleString("none".to_string())),
    }
}

pub fn object_encoding(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 || uppercase(&argv[1]) != "ENCODING" {
        return Err(CommandError::syntax());
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[2], now, false) {
        Some(v) => Ok(Reply::bulk(v.encoding_name().as_bytes().to_vec())),
        None => Err(CommandError::NotFound),
    }
}

pub fn del(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 2 {
        return Err(arity_error("del"));
    }
    let db = db_mut(server, session)?;
    let mut deleted = 0;
    for key in &argv[1..] {
        if db.db_delete(key) {
            deleted += 1;
        }
    }
    Ok(Reply::Integer(deleted))
}

pub fn expire(server: &mut Server, session: &Session, argv: &[Vec<u8>], unit_ms: bool, at: bool) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("expire"));
    }
    let n = parse_i64(&argv[2])?;
    let now = mstime();
    let deadline = if at {
        if unit_ms { n } else { n.saturating_mul(1000) }
    } else {
        now + if unit_ms { n } else { n.saturating_mul(1000) }
    };
    let db = db_mut(server, session)?;
    if !db.exists(&argv[1], now) {
        return Ok(Reply::Integer(0));
    }
    if deadline <= now {
        db.db_delete(&argv[1]);
    } else {
        db.set_expire(&argv[1], deadline);
    }
    Ok(Reply::Integer(1))
}

pub fn ttl(server: &mut Server, session: &Session, argv: &[Vec<u8>], millis: bool) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("ttl"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if !db.exists(&argv[1], now) {
        return Ok(Reply::Integer(-2));
    }
    let deadline = db.get_expire(&argv[1]);
    if deadline < 0 {
        return Ok(Reply::Integer(-1));
    }
    let remaining = (deadline - now).max(0);
    Ok(Reply::Integer(if millis { remaining } else { remaining / 1000 }))
}

pub fn persist(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("persist"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if !db.exists(&argv[1], now) || db.get_expire(&argv[1]) < 0 {
        return Ok(Reply::Integer(0));
    }
    db.remove_expire(&argv[1]);
    Ok(Reply::Integer(1))
}

/// `RENAME`/`RENAMENX`: moves both the dict entry and any TTL,
/// grounded in `db.c`'s `renameGenericCommand` — the destination's
/// own TTL (if any) is simply overwritten by the source's.
pub fn rename(server: &mut Server, session: &Session, argv: &[Vec<u8>], not_exists: bool) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("rename"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    let value = db
        .lookup_key_write(&argv[1], now)
        .cloned()
        .ok_or(CommandError::NotFound)?;
    if not_exists && db.exists(&argv[2], now) {
        return Ok(Reply::Integer(0));
    }
    let ttl = db.get_expire(&argv[1]);
    db.db_delete(&argv[1]);
    db.db_delete(&argv[2]);
    db.db_add(&argv[2], value).ok();
    if ttl >= 0 {
        db.set_expire(&argv[2], ttl);
    }
    Ok(if not_exists { Reply::Integer(1) } else { Reply::Ok })
}

pub fn randomkey(server: &mut Server, session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.db_random_key(now) {
        Some(k) => Ok(Reply::bulk(k)),
        None => Ok(Reply::NullBulk),
    }
}

pub fn keys(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("keys"));
    }
    let db = db_ref(server, session)?;
    let matched = db.keys_matching(&argv[1]);
    Ok(Reply::Array(matched.into_iter().map(Reply::bulk).collect()))
}

pub fn scan(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 2 {
        return Err(arity_error("scan"));
    }
    let cursor = parse_i64(&argv[1])?.max(0) as u64;
    let mut pattern: Option<Vec<u8>> = None;
    let mut count = 10usize;
    let mut i = 2;
    while i < argv.len() {
        match uppercase(&argv[i]).as_str() {
            "MATCH" if i + 1 < argv.len() => {
                pattern = Some(argv[i + 1].clone());
                i += 2;
            }
            "COUNT" if i + 1 < argv.len() => {
                count = parse_usize(&argv[i + 1])?;
                i += 2;
            }
            _ => return Err(CommandError::syntax()),
        }
    }
    let db = db_ref(server, session)?;
    let mut keys = Vec::new();
    let mut c = cursor;
    loop {
        let start_len = keys.len();
        c = db.scan(c, |k| {
            if pattern.as_ref().map(|p| knot_base::glob_match(p, k)).unwrap_or(true) {
                keys.push(k.to_vec());
            }
        });
        if keys.len() - start_len >= count || c == 0 {
            break;
        }
    }
    Ok(Reply::Array(vec![
        Reply::bulk(c.to_string().into_bytes()),
        Reply::Array(keys.into_iter().map(Reply::bulk).collect()),
    ]))
}

pub fn dbsize(server: &mut Server, session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    let db = db_ref(server, session)?;
    Ok(Reply::Integer(db.len() as i64))
}

pub fn flushdb(server: &mut Server, session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    let db = db_mut(server, session)?;
    db.empty_db();
    Ok(Reply::Ok)
}

pub fn flushall(server: &mut Server, _session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    server.keyspace.flush_all();
    Ok(Reply::Ok)
}

pub fn select(server: &mut Server, session: &mut Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("select"));
    }
    let id = parse_usize(&argv[1])?;
    if server.keyspace.get(id).is_none() {
        return Err(CommandError::OutOfRange("DB index is out of range".to_string()));
    }
    session.dbid = id;
    Ok(Reply::Ok)
}

pub fn swapdb(server: &mut Server, _session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("swapdb"));
    }
    let a = parse_usize(&argv[1])?;
    let b = parse_usize(&argv[2])?;
    server
        .keyspace
        .swap(a, b)
        .map_err(|_| CommandError::OutOfRange("DB index is out of range".to_string()))?;
    Ok(Reply::Ok)
}

fn db_mut<'a>(server: &'a mut Server, session: &Session) -> CommandResult<&'a mut knot_store::Database> {
    server
        .keyspace
        .get_mut(session.dbid)
        .ok_or(CommandError::OutOfRange("DB index is out of range".to_string()))
}

fn db_ref<'a>(server: &'a Server, session: &Session) -> CommandResult<&'a knot_store::Database> {
    server
        .keyspace
        .get(session.dbid)
        .ok_or(CommandError::OutOfRange("DB index is out of range".to_string()))
}
