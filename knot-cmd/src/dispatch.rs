// The command table (spec §4.6's dispatch surface) and the MULTI
// queueing interception (spec §4.7: "any command other than {MULTI,
// EXEC, DISCARD, WATCH, UNWATCH, RESET} arriving while `inMulti` is
// queued instead of run"). This is the one module allowed to know
// every command name, since `knot-txn`'s `exec` needs an `is_write`
// classifier and can't depend on this crate without a cycle.

use knot_proto::Reply;
use knot_txn::QueuedCommand;
use knot_value::End;

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};
use crate::util::uppercase;
use crate::{generic, hash, list, pubsub, set, string, txn};

/// What a dispatched command hands back to the connection layer.
pub enum Dispatched {
    /// One reply frame.
    Reply(Reply),
    /// Several reply frames in sequence (SUBSCRIBE-family commands
    /// reply once per channel/pattern).
    Multi(Vec<Reply>),
    /// A blocking list op that found nothing and must suspend the
    /// client; the `knot` binary arms a timer and registers interest
    /// in `key` via `Database::block_client` (already done by the
    /// handler) before returning control to the reactor.
    Block { key: Vec<u8>, timeout_ms: Option<u64> },
}

const TXN_CONTROL: &[&str] = &["MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH", "RESET"];

/// Classifies a queued command as a write for EXEC's read-only-replica
/// check (Open Question #3). Unknown names are treated as writes —
/// safer to abort a transaction than to let an unrecognized mutation
/// through on a replica.
pub fn is_write(cmd: &QueuedCommand) -> bool {
    let name = uppercase(cmd.name());
    !READ_COMMANDS.contains(&name.as_str())
}

const READ_COMMANDS: &[&str] = &[
    "GET", "MGET", "STRLEN", "GETRANGE", "EXISTS", "TYPE", "OBJECT", "TTL", "PTTL", "RANDOMKEY",
    "KEYS", "SCAN", "DBSIZE", "SELECT", "HGET", "HMGET", "HEXISTS", "HLEN", "HKEYS", "HVALS",
    "HGETALL", "HRANDFIELD", "LLEN", "LINDEX", "LRANGE", "SISMEMBER", "SMEMBERS", "SCARD",
    "ZSCORE", "ZRANK", "ZCARD", "ZRANGE", "XLEN", "XRANGE", "PUBLISH", "PUBSUB", "PING",
];

/// Top-level entry point: handles MULTI queueing, then dispatches.
pub fn dispatch(server: &mut Server, session: &mut Session, argv: Vec<Vec<u8>>) -> Dispatched {
    if argv.is_empty() {
        return Dispatched::Reply(CommandError::syntax().to_reply());
    }
    let name = uppercase(&argv[0]);
    let in_multi = server.txns.get_or_insert(session.client).in_multi();
    if in_multi && !TXN_CONTROL.contains(&name.as_str()) {
        if !is_known_command(&name) {
            server.txns.get_or_insert(session.client).mark_queue_errored();
            return Dispatched::Reply(
                CommandError::Syntax(format!("unknown command '{name}'")).to_reply(),
            );
        }
        server.txns.get_or_insert(session.client).enqueue(QueuedCommand::new(argv));
        return Dispatched::Reply(Reply::SimpleString("QUEUED".to_string()));
    }
    execute(server, session, &name, &argv, false)
}

fn is_known_command(name: &str) -> bool {
    execute_table().contains(&name)
}

fn execute_table() -> &'static [&'static str] {
    &[
        "PING", "EXISTS", "TYPE", "OBJECT", "DEL", "UNLINK", "EXPIRE", "PEXPIRE", "EXPIREAT",
        "PEXPIREAT", "TTL", "PTTL", "PERSIST", "RENAME", "RENAMENX", "RANDOMKEY", "KEYS", "SCAN",
        "DBSIZE", "FLUSHDB", "FLUSHALL", "SELECT", "SWAPDB", "SET", "SETNX", "SETEX", "PSETEX",
        "GET", "GETSET", "GETDEL", "STRLEN", "APPEND", "SETRANGE", "GETRANGE", "INCR", "DECR",
        "INCRBY", "DECRBY", "INCRBYFLOAT", "MSET", "MSETNX", "HSET", "HSETNX", "HGET", "HMGET",
        "HDEL", "HEXISTS", "HLEN", "HKEYS", "HVALS", "HGETALL", "HRANDFIELD", "LPUSH", "RPUSH",
        "LPUSHX", "RPUSHX", "LPOP", "RPOP", "LLEN", "LINDEX", "LSET", "LINSERT", "LRANGE",
        "LTRIM", "LREM", "LMOVE", "RPOPLPUSH", "BLPOP", "BRPOP", "SADD", "SREM", "SISMEMBER",
        "SMEMBERS", "SCARD", "ZADD", "ZSCORE", "ZINCRBY", "ZRANK", "ZREM", "ZCARD", "ZRANGE",
        "XADD", "XLEN", "XRANGE", "MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH", "RESET",
        "SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE", "PUNSUBSCRIBE", "PUBLISH", "PUBSUB",
    ]
}

/// Runs one command by name. `in_queue_replay` is true only when this
/// call originates from EXEC replaying a queue — it suppresses the
/// MULTI-control commands (a queued MULTI/EXEC would be nonsensical)
/// and lets blocking ops fall back to their non-blocking behavior.
fn execute(server: &mut Server, session: &mut Session, name: &str, argv: &[Vec<u8>], in_queue_replay: bool) -> Dispatched {
    let result = run(server, session, name, argv, in_queue_replay);
    match result {
        Ok(d) => d,
        Err(e) => Dispatched::Reply(e.to_reply()),
    }
}

fn run(server: &mut Server, session: &mut Session, name: &str, argv: &[Vec<u8>], in_queue_replay: bool) -> CommandResult<Dispatched> {
    Ok(match name {
        "PING" => Dispatched::Reply(Reply::SimpleString("PONG".to_string())),
        "EXISTS" => Dispatched::Reply(generic::exists(server, session, argv)?),
        "TYPE" => Dispatched::Reply(generic::type_cmd(server, session, argv)?),
        "OBJECT" => Dispatched::Reply(generic::object_encoding(server, session, argv)?),
        "DEL" | "UNLINK" => Dispatched::Reply(generic::del(server, session, argv)?),
        "EXPIRE" => Dispatched::Reply(generic::expire(server, session, argv, false, false)?),
        "PEXPIRE" => Dispatched::Reply(generic::expire(server, session, argv, true, false)?),
        "EXPIREAT" => Dispatched::Reply(generic::expire(server, session, argv, false, true)?),
        "PEXPIREAT" => Dispatched::Reply(generic::expire(server, session, argv, true, true)?),
        "TTL" => Dispatched::Reply(generic::ttl(server, session, argv, false)?),
        "PTTL" => Dispatched::Reply(generic::ttl(server, session, argv, true)?),
        "PERSIST" => Dispatched::Reply(generic::persist(server, session, argv)?),
        "RENAME" => Dispatched::Reply(generic::rename(server, session, argv, false)?),
        "RENAMENX" => Dispatched::Reply(generic::rename(server, session, argv, true)?),
        "RANDOMKEY" => Dispatched::Reply(generic::randomkey(server, session, argv)?),
        "KEYS" => Dispatched::Reply(generic::keys(server, session, argv)?),
        "SCAN" => Dispatched::Reply(generic::scan(server, session, argv)?),
        "DBSIZE" => Dispatched::Reply(generic::dbsize(server, session, argv)?),
        "FLUSHDB" => Dispatched::Reply(generic::flushdb(server, session, argv)?),
        "FLUSHALL" => {
            let reply = generic::flushall(server, session, argv)?;
            server.txns.invalidate_all(&server.keyspace);
            Dispatched::Reply(reply)
        }
        "SELECT" => Dispatched::Reply(generic::select(server, session, argv)?),
        "SWAPDB" => Dispatched::Reply(generic::swapdb(server, session, argv)?),

        "SET" => Dispatched::Reply(string::set(server, session, argv)?),
        "SETNX" => Dispatched::Reply(string::setnx(server, session, argv)?),
        "SETEX" => Dispatched::Reply(string::setex(server, session, argv, false)?),
        "PSETEX" => Dispatched::Reply(string::setex(server, session, argv, true)?),
        "GET" => Dispatched::Reply(string::get(server, session, argv)?),
        "GETSET" => Dispatched::Reply(string::getset(server, session, argv)?),
        "GETDEL" => Dispatched::Reply(string::getdel(server, session, argv)?),
        "STRLEN" => Dispatched::Reply(string::strlen(server, session, argv)?),
        "APPEND" => Dispatched::Reply(string::append(server, session, argv)?),
        "SETRANGE" => Dispatched::Reply(string::setrange(server, session, argv)?),
        "GETRANGE" => Dispatched::Reply(string::getrange(server, session, argv)?),
        "INCR" => Dispatched::Reply(string::incr_by(server, session, argv, 1)?),
        "DECR" => Dispatched::Reply(string::incr_by(server, session, argv, -1)?),
        "INCRBY" => Dispatched::Reply(string::incrby_cmd(server, session, argv)?),
        "DECRBY" => Dispatched::Reply(string::decrby_cmd(server, session, argv)?),
        "INCRBYFLOAT" => Dispatched::Reply(string::incrbyfloat(server, session, argv)?),
        "MSET" => Dispatched::Reply(string::mset(server, session, argv)?),
        "MSETNX" => Dispatched::Reply(string::msetnx(server, session, argv)?),

        "HSET" => Dispatched::Reply(hash::hset(server, session, argv)?),
        "HSETNX" => Dispatched::Reply(hash::hsetnx(server, session, argv)?),
        "HGET" => Dispatched::Reply(hash::hget(server, session, argv)?),
        "HMGET" => Dispatched::Reply(hash::hmget(server, session, argv)?),
        "HDEL" => Dispatched::Reply(hash::hdel(server, session, argv)?),
        "HEXISTS" => Dispatched::Reply(hash::hexists(server, session, argv)?),
        "HLEN" => Dispatched::Reply(hash::hlen(server, session, argv)?),
        "HKEYS" => Dispatched::Reply(hash::hkeys(server, session, argv)?),
        "HVALS" => Dispatched::Reply(hash::hvals(server, session, argv)?),
        "HGETALL" => Dispatched::Reply(hash::hgetall(server, session, argv)?),
        "HRANDFIELD" => Dispatched::Reply(hash::hrandfield(server, session, argv)?),

        "LPUSH" => Dispatched::Reply(list::lpush(server, session, argv)?),
        "RPUSH" => Dispatched::Reply(list::rpush(server, session, argv)?),
        "LPUSHX" => Dispatched::Reply(list::lpushx(server, session, argv)?),
        "RPUSHX" => Dispatched::Reply(list::rpushx(server, session, argv)?),
        "LPOP" => Dispatched::Reply(list::lpop(server, session, argv)?),
        "RPOP" => Dispatched::Reply(list::rpop(server, session, argv)?),
        "LLEN" => Dispatched::Reply(list::llen(server, session, argv)?),
        "LINDEX" => Dispatched::Reply(list::lindex(server, session, argv)?),
        "LSET" => Dispatched::Reply(list::lset(server, session, argv)?),
        "LINSERT" => Dispatched::Reply(list::linsert(server, session, argv)?),
        "LRANGE" => Dispatched::Reply(list::lrange(server, session, argv)?),
        "LTRIM" => Dispatched::Reply(list::ltrim(server, session, argv)?),
        "LREM" => Dispatched::Reply(list::lrem(server, session, argv)?),
        "LMOVE" => Dispatched::Reply(list::lmove_cmd(server, session, argv)?),
        "RPOPLPUSH" => Dispatched::Reply(list::rpoplpush(server, session, argv)?),
        "BLPOP" => block_reply(list::blocking_pop(server, session, argv, End::Left, in_queue_replay)?),
        "BRPOP" => block_reply(list::blocking_pop(server, session, argv, End::Right, in_queue_replay)?),

        "SADD" => Dispatched::Reply(set::sadd(server, session, argv)?),
        "SREM" => Dispatched::Reply(set::srem(server, session, argv)?),
        "SISMEMBER" => Dispatched::Reply(set::sismember(server, session, argv)?),
        "SMEMBERS" => Dispatched::Reply(set::smembers(server, session, argv)?),
        "SCARD" => Dispatched::Reply(set::scard(server, session, argv)?),
        "ZADD" => Dispatched::Reply(set::zadd(server, session, argv)?),
        "ZSCORE" => Dispatched::Reply(set::zscore(server, session, argv)?),
        "ZINCRBY" => Dispatched::Reply(set::zincrby(server, session, argv)?),
        "ZRANK" => Dispatched::Reply(set::zrank(server, session, argv)?),
        "ZREM" => Dispatched::Reply(set::zrem(server, session, argv)?),
        "ZCARD" => Dispatched::Reply(set::zcard(server, session, argv)?),
        "ZRANGE" => Dispatched::Reply(set::zrange(server, session, argv)?),
        "XADD" => Dispatched::Reply(set::xadd(server, session, argv)?),
        "XLEN" => Dispatched::Reply(set::xlen(server, session, argv)?),
        "XRANGE" => Dispatched::Reply(set::xrange(server, session, argv)?),

        "MULTI" => Dispatched::Reply(txn::multi(server, session, argv)?),
        "DISCARD" => Dispatched::Reply(txn::discard(server, session, argv)?),
        "WATCH" => Dispatched::Reply(txn::watch(server, session, argv)?),
        "UNWATCH" => Dispatched::Reply(txn::unwatch(server, session, argv)?),
        "RESET" => Dispatched::Reply(txn::reset(server, session, argv)?),
        "EXEC" => return Ok(run_exec(server, session)),

        "SUBSCRIBE" => Dispatched::Multi(pubsub::subscribe(server, session, argv)?),
        "UNSUBSCRIBE" => Dispatched::Multi(pubsub::unsubscribe(server, session, argv)?),
        "PSUBSCRIBE" => Dispatched::Multi(pubsub::psubscribe(server, session, argv)?),
        "PUNSUBSCRIBE" => Dispatched::Multi(pubsub::punsubscribe(server, session, argv)?),
        "PUBLISH" => Dispatched::Reply(pubsub::publish(server, session, argv)?),
        "PUBSUB" => Dispatched::Reply(pubsub::pubsub(server, session, argv)?),

        _ => Dispatched::Reply(CommandError::Syntax(format!("unknown command '{name}'")).to_reply()),
    })
}

fn block_reply(outcome: list::BlockOutcome) -> Dispatched {
    match outcome {
        list::BlockOutcome::Reply(r) => Dispatched::Reply(r),
        list::BlockOutcome::Block { key, timeout_ms } => Dispatched::Block { key, timeout_ms },
    }
}

fn run_exec(server: &mut Server, session: &mut Session) -> Dispatched {
    match txn::exec(server, session, is_write) {
        Ok(txn::ExecResult::Reply(r)) => Dispatched::Reply(r),
        Ok(txn::ExecResult::RunQueue(queue)) => {
            let mut replies = Vec::with_capacity(queue.len());
            for cmd in queue {
                let name = uppercase(cmd.name());
                match execute(server, session, &name, &cmd.argv, true) {
                    Dispatched::Reply(r) => replies.push(r),
                    Dispatched::Multi(mut rs) => replies.push(rs.pop().unwrap_or(Reply::NullBulk)),
                    Dispatched::Block { .. } => replies.push(Reply::NullArray),
                }
            }
            Dispatched::Reply(Reply::Array(replies))
        }
        Err(e) => Dispatched::Reply(e.to_reply()),
    }
}
