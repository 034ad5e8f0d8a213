// List semantics (spec §4.6 plus SPEC_FULL's supplemented ops),
// including the blocking variants. This crate detects the "would
// block" condition and registers the waiting client in the
// database's `blocking_keys` table (spec's description of
// `BLPOP`/`BRPOP`/`BRPOPLPUSH`); arming the actual timeout timer and
// resuming the client belongs to the `knot` binary, which owns the
// reactor.

use knot_base::mstime;
use knot_proto::Reply;
use knot_store::Database;
use knot_value::{End, ListValue, Value};

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};
use crate::util::{arity_error, parse_i64, parse_usize};

fn db_mut<'a>(server: &'a mut Server, session: &Session) -> CommandResult<&'a mut Database> {
    server
        .keyspace
        .get_mut(session.dbid)
        .ok_or(CommandError::OutOfRange("DB index is out of range".to_string()))
}

fn now_seconds() -> u32 {
    (knot_base::mstime() / 1000) as u32
}

fn push(server: &mut Server, session: &Session, argv: &[Vec<u8>], end: End, require_exists: bool) -> CommandResult<Reply> {
    if argv.len() < 3 {
        return Err(arity_error("lpush"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    let exists = db.lookup_key_write(&argv[1], now).is_some();
    if !exists {
        if require_exists {
            return Ok(Reply::Integer(0));
        }
        db.db_add(&argv[1], Value::list(ListValue::new(), knot_value::AccessClock::new_lru(now_seconds())))
            .ok();
    }
    let v = db.lookup_key_write(&argv[1], now).ok_or(CommandError::NotFound)?;
    let l = v.as_list_mut().ok_or(CommandError::WrongType)?;
    l.push(end, argv[2..].iter().cloned());
    Ok(Reply::Integer(l.len() as i64))
}

pub fn lpush(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    push(server, session, argv, End::Left, false)
}

pub fn rpush(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    push(server, session, argv, End::Right, false)
}

pub fn lpushx(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    push(server, session, argv, End::Left, true)
}

pub fn rpushx(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    push(server, session, argv, End::Right, true)
}

fn pop(server: &mut Server, session: &Session, argv: &[Vec<u8>], end: End) -> CommandResult<Reply> {
    if argv.len() < 2 || argv.len() > 3 {
        return Err(arity_error("lpop"));
    }
    let count = if argv.len() == 3 { Some(parse_usize(&argv[2])?) } else { None };
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(v) = db.lookup_key_write(&argv[1], now) else {
        return Ok(match count {
            Some(_) => Reply::NullArray,
            None => Reply::NullBulk,
        });
    };
    let l = v.as_list_mut().ok_or(CommandError::WrongType)?;
    let popped = l.pop(end, count.unwrap_or(1));
    let emptied = l.is_empty();
    if emptied {
        db.db_delete(&argv[1]);
    }
    Ok(match count {
        Some(_) => Reply::Array(popped.into_iter().map(Reply::bulk).collect()),
        None => popped.into_iter().next().map(Reply::bulk).unwrap_or(Reply::NullBulk),
    })
}

pub fn lpop(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    pop(server, session, argv, End::Left)
}

pub fn rpop(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    pop(server, session, argv, End::Right)
}

pub fn llen(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 2 {
        return Err(arity_error("llen"));
    }
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Integer(v.as_list().ok_or(CommandError::WrongType)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn lindex(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("lindex"));
    }
    let idx = parse_i64(&argv[2])?;
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(v
            .as_list()
            .ok_or(CommandError::WrongType)?
            .index(idx)
            .map(|b| Reply::bulk(b.to_vec()))
            .unwrap_or(Reply::NullBulk)),
        None => Ok(Reply::NullBulk),
    }
}

pub fn lset(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("lset"));
    }
    let idx = parse_i64(&argv[2])?;
    let now = mstime();
    let db = db_mut(server, session)?;
    let v = db.lookup_key_write(&argv[1], now).ok_or(CommandError::NotFound)?;
    let l = v.as_list_mut().ok_or(CommandError::WrongType)?;
    if l.set(idx, argv[3].clone()) {
        Ok(Reply::Ok)
    } else {
        Err(CommandError::OutOfRange("index out of range".to_string()))
    }
}

pub fn linsert(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 5 {
        return Err(arity_error("linsert"));
    }
    let before = match crate::util::uppercase(&argv[2]).as_str() {
        "BEFORE" => true,
        "AFTER" => false,
        _ => return Err(CommandError::syntax()),
    };
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(v) = db.lookup_key_write(&argv[1], now) else {
        return Ok(Reply::Integer(0));
    };
    let l = v.as_list_mut().ok_or(CommandError::WrongType)?;
    match l.insert(before, &argv[3], argv[4].clone()) {
        Some(len) => Ok(Reply::Integer(len as i64)),
        None => Ok(Reply::Integer(-1)),
    }
}

pub fn lrange(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("lrange"));
    }
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let now = mstime();
    let db = db_mut(server, session)?;
    match db.lookup_key_read(&argv[1], now, false) {
        Some(v) => Ok(Reply::Array(
            v.as_list().ok_or(CommandError::WrongType)?.range(start, stop).into_iter().map(Reply::bulk).collect(),
        )),
        None => Ok(Reply::Array(Vec::new())),
    }
}

pub fn ltrim(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("ltrim"));
    }
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(v) = db.lookup_key_write(&argv[1], now) else {
        return Ok(Reply::Ok);
    };
    let l = v.as_list_mut().ok_or(CommandError::WrongType)?;
    l.trim(start, stop);
    let emptied = l.is_empty();
    if emptied {
        db.db_delete(&argv[1]);
    }
    Ok(Reply::Ok)
}

pub fn lrem(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 4 {
        return Err(arity_error("lrem"));
    }
    let count = parse_i64(&argv[2])?;
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(v) = db.lookup_key_write(&argv[1], now) else {
        return Ok(Reply::Integer(0));
    };
    let l = v.as_list_mut().ok_or(CommandError::WrongType)?;
    let removed = l.remove(count, &argv[3]);
    let emptied = l.is_empty();
    if emptied {
        db.db_delete(&argv[1]);
    }
    Ok(Reply::Integer(removed as i64))
}

fn end_from_bytes(bytes: &[u8]) -> CommandResult<End> {
    match crate::util::uppercase(bytes).as_str() {
        "LEFT" => Ok(End::Left),
        "RIGHT" => Ok(End::Right),
        _ => Err(CommandError::syntax()),
    }
}

/// `LMOVE src dst fromEnd toEnd`; `RPOPLPUSH src dst` is sugar for
/// `LMOVE src dst RIGHT LEFT`. Atomic because the whole engine is
/// single-threaded; creates `dst` if absent, deletes `src` if emptied.
pub fn lmove(server: &mut Server, session: &Session, argv: &[Vec<u8>], from: End, to: End) -> CommandResult<Reply> {
    let now = mstime();
    let db = db_mut(server, session)?;
    let Some(src) = db.lookup_key_write(&argv[1], now) else {
        return Ok(Reply::NullBulk);
    };
    let src_list = src.as_list_mut().ok_or(CommandError::WrongType)?;
    let popped = src_list.pop(from, 1);
    let Some(item) = popped.into_iter().next() else {
        return Ok(Reply::NullBulk);
    };
    let src_emptied = src_list.is_empty();
    if src_emptied {
        db.db_delete(&argv[1]);
    }
    if db.lookup_key_write(&argv[2], now).is_none() {
        db.db_add(&argv[2], Value::list(ListValue::new(), knot_value::AccessClock::new_lru(now_seconds())))
            .ok();
    }
    let dst = db.lookup_key_write(&argv[2], now).ok_or(CommandError::NotFound)?;
    let dst_list = dst.as_list_mut().ok_or(CommandError::WrongType)?;
    dst_list.push(to, std::iter::once(item.clone()));
    Ok(Reply::bulk(item))
}

pub fn lmove_cmd(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 5 {
        return Err(arity_error("lmove"));
    }
    let from = end_from_bytes(&argv[3])?;
    let to = end_from_bytes(&argv[4])?;
    lmove(server, session, &argv[..3], from, to)
}

pub fn rpoplpush(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("rpoplpush"));
    }
    lmove(server, session, argv, End::Right, End::Left)
}

/// The outcome of a blocking list op: either it completed immediately
/// (non-empty key, or the client is inside MULTI — "MULTI blocks
/// never actually block", spec §4.6) or it needs to register and
/// suspend.
pub enum BlockOutcome {
    Reply(Reply),
    Block { key: Vec<u8>, timeout_ms: Option<u64> },
}

/// `BLPOP`/`BRPOP key... timeout`. `in_multi` comes from the caller's
/// `knot-txn` session state.
pub fn blocking_pop(
    server: &mut Server,
    session: &Session,
    argv: &[Vec<u8>],
    end: End,
    in_multi: bool,
) -> CommandResult<BlockOutcome> {
    if argv.len() < 3 {
        return Err(arity_error("blpop"));
    }
    let timeout_secs = crate::util::parse_f64(&argv[argv.len() - 1])?;
    if timeout_secs < 0.0 {
        return Err(CommandError::OutOfRange("timeout is negative".to_string()));
    }
    let keys = &argv[1..argv.len() - 1];
    let now = mstime();
    let db = db_mut(server, session)?;
    for key in keys {
        if let Some(v) = db.lookup_key_write(key, now) {
            let l = v.as_list_mut().ok_or(CommandError::WrongType)?;
            if !l.is_empty() {
                let item = l.pop(end, 1).into_iter().next().expect("non-empty checked above");
                let emptied = l.is_empty();
                if emptied {
                    db.db_delete(key);
                }
                return Ok(BlockOutcome::Reply(Reply::Array(vec![
                    Reply::bulk(key.clone()),
                    Reply::bulk(item),
                ])));
            }
        }
    }
    if in_multi {
        return Ok(BlockOutcome::Reply(Reply::NullArray));
    }
    let key = keys.first().cloned().unwrap_or_default();
    db.block_client(&key, session.client);
    let timeout_ms = if timeout_secs == 0.0 {
        None
    } else {
        Some((timeout_secs * 1000.0) as u64)
    };
    Ok(BlockOutcome::Block { key, timeout_ms })
}
