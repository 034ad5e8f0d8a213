// Per-client MULTI/EXEC queueing and WATCH-based optimistic CAS (spec
// §4.7, component C8). This crate only holds the per-client state
// machine and the keyspace-wide index of who's watching what; it
// knows nothing about command dispatch or reply encoding — `knot-cmd`
// supplies the queued commands' bytes and decides, after `exec`
// returns a queue, how to actually run them.

mod error;

pub use error::{TxnError, TxnResult};

use std::collections::HashMap;

use knot_store::{ClientId, Keyspace};

/// A command captured verbatim while `MULTI` is open, replayed in
/// order at `EXEC`. `argv[0]` is conventionally the command name, kept
/// uppercased by the caller for dispatch.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub argv: Vec<Vec<u8>>,
}

impl QueuedCommand {
    pub fn new(argv: Vec<Vec<u8>>) -> Self {
        QueuedCommand { argv }
    }

    pub fn name(&self) -> &[u8] {
        self.argv.first().map(|v| v.as_slice()).unwrap_or(b"")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A watched key was touched by another client: EXEC replies with
    /// a null array without running anything (spec §4.7).
    CasDirty,
    /// A queue-time syntax error occurred: EXEC replies EXECABORT.
    QueueErrored,
    /// Queued writes on a read-only replica (Open Question #3).
    ReadOnlyReplica,
}

pub enum ExecOutcome {
    Aborted(AbortReason),
    Run(Vec<QueuedCommand>),
}

/// Per-connection transaction state (spec §4.7's "State per client").
#[derive(Debug, Default)]
pub struct ClientTxnState {
    in_multi: bool,
    queue: Vec<QueuedCommand>,
    queue_errored: bool,
    cas_dirty: bool,
    watched: Vec<(usize, Vec<u8>)>,
}

impl ClientTxnState {
    pub fn new() -> Self {
        ClientTxnState::default()
    }

    pub fn in_multi(&self) -> bool {
        self.in_multi
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// `MULTI`.
    pub fn multi(&mut self) -> TxnResult<()> {
        if self.in_multi {
            return Err(TxnError::NestedMulti);
        }
        self.in_multi = true;
        Ok(())
    }

    /// Enqueues a command that arrived while `in_multi()` is true.
    /// Callers are expected to have already validated the command's
    /// syntax and call [`mark_queue_errored`](Self::mark_queue_errored)
    /// on failure instead of this.
    pub fn enqueue(&mut self, cmd: QueuedCommand) {
        self.queue.push(cmd);
    }

    pub fn mark_queue_errored(&mut self) {
        self.queue_errored = true;
    }

    pub fn mark_cas_dirty(&mut self) {
        self.cas_dirty = true;
    }

    /// `WATCH k...`: registers this client against `key` in `db`'s
    /// watch table and records it locally so `UNWATCH`/`EXEC`/`RESET`
    /// can clean up.
    pub fn watch(
        &mut self,
        keyspace: &mut Keyspace,
        client: ClientId,
        dbid: usize,
        key: &[u8],
    ) -> TxnResult<()> {
        if self.in_multi {
            return Err(TxnError::WatchInsideMulti);
        }
        if let Some(db) = keyspace.get_mut(dbid) {
            db.watch(key, client);
            self.watched.push((dbid, key.to_vec()));
        }
        Ok(())
    }

    /// `UNWATCH`, and the unwatch half of `DISCARD`/`EXEC`/`RESET`.
    pub fn unwatch_all(&mut self, keyspace: &mut Keyspace, client: ClientId) {
        for (dbid, key) in self.watched.drain(..) {
            if let Some(db) = keyspace.get_mut(dbid) {
                db.unwatch(&key, client);
            }
        }
        self.cas_dirty = false;
    }

    /// `DISCARD`.
    pub fn discard(&mut self, keyspace: &mut Keyspace, client: ClientId) -> TxnResult<()> {
        if !self.in_multi {
            return Err(TxnError::DiscardWithoutMulti);
        }
        self.clear_multi_state(keyspace, client);
        Ok(())
    }

    /// `RESET`: unconditionally unwatches and clears multi state,
    /// regardless of whether a transaction was open.
    pub fn reset(&mut self, keyspace: &mut Keyspace, client: ClientId) {
        self.clear_multi_state(keyspace, client);
    }

    fn clear_multi_state(&mut self, keyspace: &mut Keyspace, client: ClientId) {
        self.unwatch_all(keyspace, client);
        self.in_multi = false;
        self.queue.clear();
        self.queue_errored = false;
    }

    /// `EXEC`. `current_dbid` is the client's currently selected
    /// database (for the read-only-replica check); `is_write` lets the
    /// caller classify a queued command without this crate knowing
    /// about the command table.
    pub fn exec(
        &mut self,
        keyspace: &mut Keyspace,
        client: ClientId,
        current_dbid: usize,
        is_write: impl Fn(&QueuedCommand) -> bool,
    ) -> ExecOutcome {
        let replica_blocks_writes = keyspace
            .get(current_dbid)
            .map(|db| db.replica_read_only)
            .unwrap_or(false);

        let outcome = if self.cas_dirty {
            ExecOutcome::Aborted(AbortReason::CasDirty)
        } else if self.queue_errored {
            ExecOutcome::Aborted(AbortReason::QueueErrored)
        } else if replica_blocks_writes && self.queue.iter().any(&is_write) {
            ExecOutcome::Aborted(AbortReason::ReadOnlyReplica)
        } else {
            ExecOutcome::Run(std::mem::take(&mut self.queue))
        };

        self.clear_multi_state(keyspace, client);
        outcome
    }
}

/// The server-wide table of per-connection transaction state, and the
/// glue between `Database::invalidate_watchers`/`all_watchers` and
/// each client's `cas_dirty` flag.
#[derive(Default)]
pub struct TxnTable {
    clients: HashMap<ClientId, ClientTxnState>,
}

impl TxnTable {
    pub fn new() -> Self {
        TxnTable::default()
    }

    pub fn get_or_insert(&mut self, client: ClientId) -> &mut ClientTxnState {
        self.clients.entry(client).or_default()
    }

    pub fn remove(&mut self, client: ClientId) {
        self.clients.remove(&client);
    }

    /// Marks every client in `watchers` as CAS-dirty. Call this from
    /// any mutator right after it touches a key, with
    /// `db.invalidate_watchers(key)` as `watchers`, before the
    /// mutator's own reply is emitted (spec §4.7's invalidation rule).
    pub fn invalidate(&mut self, watchers: impl IntoIterator<Item = ClientId>) {
        for client in watchers {
            if let Some(state) = self.clients.get_mut(&client) {
                state.mark_cas_dirty();
            }
        }
    }

    /// `FLUSHDB`/`FLUSHALL`: every client watching any key in the
    /// flushed database(s) becomes CAS-dirty.
    pub fn invalidate_all(&mut self, keyspace: &Keyspace) {
        let watchers: Vec<ClientId> = keyspace.iter().flat_map(|db| db.all_watchers()).collect();
        self.invalidate(watchers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knot_value::{AccessClock, StringValue, Value};
    use test_log::test;

    fn strval(s: &str) -> Value {
        Value::string(
            StringValue::from_bytes(s.as_bytes().to_vec()).unwrap(),
            AccessClock::new_lru(0),
        )
    }

    #[test]
    fn multi_nested_errors() {
        let mut state = ClientTxnState::new();
        state.multi().unwrap();
        assert_eq!(state.multi(), Err(TxnError::NestedMulti));
    }

    #[test]
    fn exec_without_watch_runs_queue() {
        let mut keyspace = Keyspace::new(1);
        let mut state = ClientTxnState::new();
        state.multi().unwrap();
        state.enqueue(QueuedCommand::new(vec![b"SET".to_vec(), b"x".to_vec(), b"1".to_vec()]));
        match state.exec(&mut keyspace, 1, 0, |_| true) {
            ExecOutcome::Run(cmds) => assert_eq!(cmds.len(), 1),
            ExecOutcome::Aborted(_) => panic!("expected Run"),
        }
        assert!(!state.in_multi());
    }

    #[test]
    fn queue_errored_aborts_exec() {
        let mut keyspace = Keyspace::new(1);
        let mut state = ClientTxnState::new();
        state.multi().unwrap();
        state.mark_queue_errored();
        match state.exec(&mut keyspace, 1, 0, |_| true) {
            ExecOutcome::Aborted(AbortReason::QueueErrored) => {}
            _ => panic!("expected QueueErrored abort"),
        }
    }

    #[test]
    fn watched_key_mutation_dirties_client_and_aborts_exec() {
        let mut keyspace = Keyspace::new(1);
        keyspace.get_mut(0).unwrap().db_add(b"x", strval("10")).unwrap();

        let mut table = TxnTable::new();
        let state = table.get_or_insert(1);
        state.watch(&mut keyspace, 1, 0, b"x").unwrap();
        state.multi().unwrap();
        state.enqueue(QueuedCommand::new(vec![b"SET".to_vec(), b"x".to_vec(), b"11".to_vec()]));

        // Another client mutates x.
        let watchers = keyspace.get(0).unwrap().invalidate_watchers(b"x");
        table.invalidate(watchers);

        let state = table.get_or_insert(1);
        match state.exec(&mut keyspace, 1, 0, |_| true) {
            ExecOutcome::Aborted(AbortReason::CasDirty) => {}
            _ => panic!("expected CasDirty abort"),
        }
    }

    #[test]
    fn exec_aborts_on_read_only_replica_with_queued_write() {
        let mut keyspace = Keyspace::new(1);
        keyspace.get_mut(0).unwrap().replica_read_only = true;
        let mut state = ClientTxnState::new();
        state.multi().unwrap();
        state.enqueue(QueuedCommand::new(vec![b"SET".to_vec(), b"x".to_vec(), b"1".to_vec()]));
        match state.exec(&mut keyspace, 1, 0, |cmd| cmd.name() == b"SET") {
            ExecOutcome::Aborted(AbortReason::ReadOnlyReplica) => {}
            _ => panic!("expected ReadOnlyReplica abort"),
        }
    }

    #[test]
    fn discard_without_multi_errors() {
        let mut keyspace = Keyspace::new(1);
        let mut state = ClientTxnState::new();
        assert_eq!(state.discard(&mut keyspace, 1), Err(TxnError::DiscardWithoutMulti));
    }

    #[test]
    fn reset_clears_watch_registration() {
        let mut keyspace = Keyspace::new(1);
        keyspace.get_mut(0).unwrap().db_add(b"x", strval("v")).unwrap();
        let mut state = ClientTxnState::new();
        state.watch(&mut keyspace, 1, 0, b"x").unwrap();
        state.reset(&mut keyspace, 1);
        assert!(keyspace.get(0).unwrap().invalidate_watchers(b"x").is_empty());
    }
}
