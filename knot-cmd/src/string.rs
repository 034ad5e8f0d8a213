// String semantics (spec §4.6, abridged, plus SPEC_FULL's
// supplemented ops): SET and its NX/XX/EX/PX modifiers, INCR/DECR
// family with the INCRBYFLOAT replication-rewrite note, APPEND,
// SETRANGE/GETRANGE, MSET/MSETNX, and the GETSET/GETDEL/STRLEN/
// EXISTS-adjacent sugar forms.

use knot_base::mstime;
use knot_proto::Reply;
use knot_value::{AccessClock, StringValue, Value};

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};
use crate::util::{arity_error, parse_f64, parse_i64, uppercase};

fn now_seconds() -> u32 {
    (mstime() / 1000) as u32
}

fn db_mut<'a>(server: &'a mut Server, session: &Session) -> CommandResult<&'a mut knot_store::Database> {
    server
        .keyspace
        .get_mut(session.dbid)
        .ok_or(CommandError::OutOfRange("DB index is out of range".to_string()))
}

fn as_string<'a>(value: &'a Value) -> CommandResult<&'a StringValue> {
    value.as_string().ok_or(CommandError::WrongType)
}

struct SetOpts {
    nx: bool,
    xx: bool,
    expire_at_ms: Option<i64>,
    keep_ttl: bool,
}

fn parse_set_opts(argv: &[Vec<u8>]) -> CommandResult<SetOpts> {
    let mut opts = SetOpts {
        nx: false,
        xx: false,
        expire_at_ms: None,
        keep_ttl: false,
    };
    let now = mstime();
    let mut i = 3;
    while i < argv.len() {
        match uppercase(&argv[i]).as_str() {
            "NX" => {
                if opts.xx {
                    return Err(CommandError::syntax());
                }
                opts.nx = true;
                i += 1;
            }
            "XX" => {
                if opts.nx {
                    return Err(CommandError::syntax());
                }
                opts.xx = true;
                i += 1;
            }
            "KEEPTTL" => {
                opts.keep_ttl = true;
                i += 1;
            }
            "EX" if i + 1 < argv.len() => {
                if opts.expire_at_ms.is_some() {
                    return Err(CommandError::syntax());
                }
                opts.expire_at_ms = Some(now + parse_i64(&argv[i + 1])? * 1000);
                i += 2;
            }
            "PX" if i + 1 < argv.len() => {
                if opts.expire_at_ms.is_some() {
                    return Err(CommandError::syntax());
                }
                opts.expire_at_ms = Some(now + parse_i64(&argv[i + 1])?);
                i += 2;
            }
            _ => return Err(CommandError::syntax()),
        }
    }
    Ok(opts)
}

pub fn set(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 {
        return Err(arity_error("set"));
    }
    let opts = parse_set_opts(argv)?;
    let now = mstime();
    let db = db_mut(server, session)?;
    let exists = db.exists(&argv[1], now);
    if (opts.nx && exists) || (opts.xx && !exists) {
        return Ok(Reply::NullBulk);
    }
    let prior_ttl = if opts.keep_ttl { db.get_expire(&argv[1]) } else { -1 };
    let value = Value::string(
        StringValue::from_bytes(argv[2].clone())?,
        AccessClock::new_lru(now_seconds()),
    );
    db.set_key(&argv[1], value);
    if let Some(deadline) = opts.expire_at_ms {
        db.set_expire(&argv[1], deadline);
    } else if opts.keep_ttl && prior_ttl >= 0 {
        db.set_expire(&argv[1], prior_ttl);
    }
    Ok(Reply::Ok)
}

/// `SETNX`: sugar over `SET k v NX`.
pub fn setnx(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("setnx"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if db.exists(&argv[1], now) {
        return Ok(Reply::Integer(0));
    }
    let value = Value::string(StringValue::from_bytes(argv[2].clone())?, AccessClock::new_lru(now_seconds()));
    db.set_key(&argv[1], value);
    Ok(Reply::Integer(1))
}

/// `SETEX`/`PSETEX`: sugar over `SET k v EX s` / `SET k v PX ms`.
pub fn setex(server: &mut Server, session: &Session, argv: &[Vec<u8>], millis: bool) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("setex"));
    }
    let ttl = parse_i64(&argv[2])?;
    if ttl <= 0 {
        return Err(CommandError::OutOfRange("invalid expire time".to_string()));
    }
    let now = mstime();
    let deadline = now + if millis { ttl } else { ttl * 1000 };
    let db = db_mut(server, session)?;
    let value = Value::string(StringValue::from_bytes(argv[3].clone())?, AccessClock::new_lru(now_seconds()));
    db.set_key(&argv[1], value);
    db.set_expire(&argv[1], deadline);
    Ok(Reply::Ok)
}

pub fn get(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("get"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, true) {
        Some(v) => Ok(Reply::bulk(as_string(v)?.as_bytes().into_owned())),
        None => Ok(Reply::NullBulk),
    }
}

pub fn getset(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("getset"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    let old = match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Some(as_string(v)?.as_bytes().into_owned()),
        None => None,
    };
    let value = Value::string(StringValue::from_bytes(argv[2].clone())?, AccessClock::new_lru(now_seconds()));
    db.set_key(&argv[1], value);
    Ok(old.map(Reply::bulk).unwrap_or(Reply::NullBulk))
}

pub fn getdel(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("getdel"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    let old = match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Some(as_string(v)?.as_bytes().into_owned()),
        None => None,
    };
    if old.is_some() {
        db.db_delete(&argv[1]);
    }
    Ok(old.map(Reply::bulk).unwrap_or(Reply::NullBulk))
}

pub fn strlen(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("strlen"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(as_string(v)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn append(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("append"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if let Some(v) = db.lookup_key_write(&argv[1], now) {
        let s = v.as_string_mut().ok_or(CommandError::WrongType)?;
        s.append(&argv[2])?;
        Ok(Reply::Integer(s.len() as i64))
    } else {
        let len = argv[2].len();
        let value = Value::string(StringValue::from_bytes(argv[2].clone())?, AccessClock::new_lru(now_seconds()));
        db.db_add(&argv[1], value).ok();
        Ok(Reply::Integer(len as i64))
    }
}

pub fn setrange(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("setrange"));
    }
    let offset = parse_i64(&argv[2])?;
    if offset < 0 {
        return Err(CommandError::OutOfRange("offset is out of range".to_string()));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if let Some(v) = db.lookup_key_write(&argv[1], now) {
        let s = v.as_string_mut().ok_or(CommandError::WrongType)?;
        let len = s.setrange(offset as usize, &argv[3])?;
        Ok(Reply::Integer(len as i64))
    } else {
        if argv[3].is_empty() {
            return Ok(Reply::Integer(0));
        }
        let mut s = StringValue::from_bytes(Vec::new())?;
        let len = s.setrange(offset as usize, &argv[3])?;
        db.db_add(&argv[1], Value::string(s, AccessClock::new_lru(now_seconds()))).ok();
        Ok(Reply::Integer(len as i64))
    }
}

pub fn getrange(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("getrange"));
    }
    let start = parse_i64(&argv[2])?;
    let end = parse_i64(&argv[3])?;
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::bulk(as_string(v)?.getrange(start, end))),
        None => Ok(Reply::bulk(Vec::new())),
    }
}

pub fn incr_by(server: &mut Server, session: &Session, argv: &[Vec<u8>], delta: i64) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("incr"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if let Some(v) = db.lookup_key_write(&argv[1], now) {
        let s = v.as_string_mut().ok_or(CommandError::WrongType)?;
        Ok(Reply::Integer(s.incr_by(delta)?))
    } else {
        db.db_add(&argv[1], Value::string(StringValue::from_int(delta), AccessClock::new_lru(now_seconds())))
            .ok();
        Ok(Reply::Integer(delta))
    }
}

pub fn incrby_cmd(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("incrby"));
    }
    let delta = parse_i64(&argv[2])?;
    incr_by(server, session, &argv[..2], delta)
}

pub fn decrby_cmd(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("decrby"));
    }
    let delta = parse_i64(&argv[2])?.checked_neg().ok_or(CommandError::OutOfRange(
        "increment or decrement would overflow".to_string(),
    ))?;
    incr_by(server, session, &argv[..2], delta)
}

/// `INCRBYFLOAT`: the reply is the formatted result, and SPEC_FULL's
/// ambient replication note says this is what should be re-fed as
/// `SET` for replica fidelity — there's no replication collaborator
/// in this workspace, so that rewrite has no observable effect here,
/// but the formatted value returned is the one a caller would use.
pub fn incrbyfloat(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("incrbyfloat"));
    }
    let delta = parse_f64(&argv[2])?;
    let now = mstime();
    let db = db_mut(server, session)?;
    let formatted = if let Some(v) = db.lookup_key_write(&argv[1], now) {
        let s = v.as_string_mut().ok_or(CommandError::WrongType)?;
        s.incr_by_float(delta)?;
        s.as_bytes().into_owned()
    } else {
        let mut s = StringValue::from_int(0);
        s.incr_by_float(delta)?;
        let bytes = s.as_bytes().into_owned();
        db.db_add(&argv[1], Value::string(s, AccessClock::new_lru(now_seconds()))).ok();
        bytes
    };
    Ok(Reply::bulk(formatted))
}

pub fn mset(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 || argv.len() % 2 != 1 {
        return Err(arity_error("mset"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    for pair in argv[1..].chunks(2) {
        let value = Value::string(StringValue::from_bytes(pair[1].clone())?, AccessClock::new_lru(now_seconds()));
        db.set_key(&pair[0], value);
    }
    let _ = now;
    Ok(Reply::Ok)
}

/// `MSETNX`: all-or-nothing — every key must be absent before any
/// write happens.
pub fn msetnx(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 3 || argv.len() % 2 != 1 {
        return Err(arity_error("msetnx"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    if argv[1..].chunks(2).any(|pair| db.exists(&pair[0], now)) {
        return Ok(Reply::Integer(0));
    }
    for pair in argv[1..].chunks(2) {
        let value = Value::string(StringValue::from_bytes(pair[1].clone())?, AccessClock::new_lru(now_seconds()));
        db.db_add(&pair[0], value).ok();
    }
    Ok(Reply::Integer(1))
}
