// MULTI/EXEC/DISCARD/WATCH/UNWATCH/RESET (spec §4.7). This module only
// drives `knot_txn::ClientTxnState`; the MULTI-queueing interception
// itself (deciding whether an arbitrary incoming command gets queued
// instead of run) lives in `dispatch.rs`, which is the one place that
// knows the full command table.

use knot_proto::Reply;
use knot_txn::{AbortReason, ExecOutcome, QueuedCommand, TxnError};

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};

impl From<TxnError> for CommandError {
    fn from(e: TxnError) -> Self {
        CommandError::Syntax(e.to_string())
    }
}

pub fn multi(server: &mut Server, session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    server.txns.get_or_insert(session.client).multi()?;
    Ok(Reply::Ok)
}

pub fn discard(server: &mut Server, session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    server
        .txns
        .get_or_insert(session.client)
        .discard(&mut server.keyspace, session.client)?;
    Ok(Reply::Ok)
}

pub fn reset(server: &mut Server, session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    server.txns.get_or_insert(session.client).reset(&mut server.keyspace, session.client);
    server.pubsub.drop_client(session.client);
    Ok(Reply::SimpleString("RESET".to_string()))
}

pub fn watch(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 2 {
        return Err(crate::util::arity_error("watch"));
    }
    let dbid = session.dbid;
    let client = session.client;
    let state = server.txns.get_or_insert(client);
    for key in &argv[1..] {
        state.watch(&mut server.keyspace, client, dbid, key)?;
    }
    Ok(Reply::Ok)
}

pub fn unwatch(server: &mut Server, session: &Session, _argv: &[Vec<u8>]) -> CommandResult<Reply> {
    server.txns.get_or_insert(session.client).unwatch_all(&mut server.keyspace, session.client);
    Ok(Reply::Ok)
}

/// The outcome `dispatch.rs` needs: either EXEC produced an immediate
/// reply (abort case — null array or EXECABORT) or a queue of commands
/// it must now run itself and wrap into one `Reply::Array`.
pub enum ExecResult {
    Reply(Reply),
    RunQueue(Vec<QueuedCommand>),
}

pub fn exec(
    server: &mut Server,
    session: &Session,
    is_write: impl Fn(&QueuedCommand) -> bool,
) -> CommandResult<ExecResult> {
    let dbid = session.dbid;
    let client = session.client;
    let state = server.txns.get_or_insert(client);
    if !state.in_multi() {
        return Err(CommandError::Syntax("EXEC without MULTI".to_string()));
    }
    match state.exec(&mut server.keyspace, client, dbid, is_write) {
        ExecOutcome::Aborted(AbortReason::CasDirty) => Ok(ExecResult::Reply(Reply::NullArray)),
        ExecOutcome::Aborted(AbortReason::QueueErrored) => Err(CommandError::ExecAbort),
        ExecOutcome::Aborted(AbortReason::ReadOnlyReplica) => Err(CommandError::ReadOnlyReplica),
        ExecOutcome::Run(queue) => Ok(ExecResult::RunQueue(queue)),
    }
}
