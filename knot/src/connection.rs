// Per-connection state and the reactor-facing event handlers. The
// reactor only ever hands a handler `(&mut Reactor, RawFd, FileMask)`
// (see `knot-reactor`'s doc comment: "everything here runs on one
// thread... a handler must never block" — it has no notion of an
// application), so every handler closure here captures a clone of the
// shared `Rc<RefCell<App>>` and does its own lookup by fd.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

use knot_base::mstime;
use knot_cmd::{dispatch, Dispatched, PendingPublish, Server, Session};
use knot_proto::{encode, Reply, RequestParser};
use knot_reactor::{FileMask, Reactor, TimerAction};
use knot_store::ClientId;
use knot_value::End;

use crate::config::Config;

fn uppercase(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_ascii_uppercase()
}

struct Connection {
    stream: TcpStream,
    session: Session,
    parser: RequestParser,
    out: Vec<u8>,
    write_registered: bool,
}

/// A client suspended inside `BLPOP`/`BRPOP`, waiting on a single key
/// (spec §4.6: the handler already called `Database::block_client`
/// before handing back `Dispatched::Block`). `end` is recovered from
/// the command name at the dispatch site, since `Dispatched::Block`
/// itself doesn't carry it.
struct Blocked {
    client: ClientId,
    fd: RawFd,
    dbid: usize,
    key: Vec<u8>,
    end: End,
    timer_id: Option<u64>,
}

pub struct App {
    pub server: Server,
    listener: TcpListener,
    connections: HashMap<RawFd, Connection>,
    /// Pub/sub delivery needs a fd for a `ClientId`, but every other
    /// client-facing op only ever has the fd to hand — kept as a
    /// second small index rather than threading `ClientId` through
    /// `Connection` lookups everywhere else.
    client_fds: HashMap<ClientId, RawFd>,
    blocked: Vec<Blocked>,
    next_client_id: ClientId,
}

impl App {
    pub fn new(cfg: &Config, listener: TcpListener) -> Self {
        let mut server = Server::new(cfg.databases, cfg.thresholds);
        server.notify_keyspace_events = cfg.notify_keyspace_events;
        server.lazy_free_threshold = cfg.lazy_free_threshold;
        App {
            server,
            listener,
            connections: HashMap::new(),
            client_fds: HashMap::new(),
            blocked: Vec::new(),
            next_client_id: 1,
        }
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

pub fn register_listener(app: &Rc<RefCell<App>>, reactor: &mut Reactor) {
    let fd = app.borrow().listener_fd();
    let app = app.clone();
    reactor
        .register(fd, FileMask::READABLE, move |reactor, fd, _bit| {
            accept_loop(&app, reactor, fd);
        })
        .expect("register listener fd");
}

fn accept_loop(app: &Rc<RefCell<App>>, reactor: &mut Reactor, _listener_fd: RawFd) {
    loop {
        let accepted = app.borrow_mut().listener.accept();
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                tracing::warn!(%e, "accept failed");
                return;
            }
        };
        if let Err(e) = stream.set_nonblocking(true) {
            tracing::warn!(%e, "failed to set client stream nonblocking");
            continue;
        }
        let fd = stream.as_raw_fd();
        let client_id = {
            let mut a = app.borrow_mut();
            let id = a.next_client_id;
            a.next_client_id += 1;
            a.connections.insert(
                fd,
                Connection {
                    stream,
                    session: Session::new(id),
                    parser: RequestParser::new(),
                    out: Vec::new(),
                    write_registered: false,
                },
            );
            a.client_fds.insert(id, fd);
            id
        };
        tracing::debug!(client = client_id, %addr, fd, "accepted connection");
        let app2 = app.clone();
        let registered = reactor.register(fd, FileMask::READABLE, move |reactor, fd, bit| {
            on_client_event(&app2, reactor, fd, bit);
        });
        if let Err(e) = registered {
            tracing::warn!(%e, "failed to register client fd");
            app.borrow_mut().connections.remove(&fd);
        }
    }
}

fn on_client_event(app: &Rc<RefCell<App>>, reactor: &mut Reactor, fd: RawFd, bit: FileMask) {
    if bit.contains(FileMask::READABLE) {
        handle_readable(app, reactor, fd);
    }
    if bit.contains(FileMask::WRITABLE) {
        handle_writable(app, reactor, fd);
    }
}

fn handle_readable(app: &Rc<RefCell<App>>, reactor: &mut Reactor, fd: RawFd) {
    let mut buf = [0u8; 16 * 1024];
    let mut closed = false;
    loop {
        let read = {
            let mut a = app.borrow_mut();
            let Some(conn) = a.connections.get_mut(&fd) else { return };
            conn.stream.read(&mut buf)
        };
        match read {
            Ok(0) => {
                closed = true;
                break;
            }
            Ok(n) => {
                let mut a = app.borrow_mut();
                let Some(conn) = a.connections.get_mut(&fd) else { return };
                conn.parser.feed(&buf[..n]);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(_) => {
                closed = true;
                break;
            }
        }
    }
    if closed {
        close_connection(app, reactor, fd);
        return;
    }
    process_pending_commands(app, reactor, fd);
}

fn process_pending_commands(app: &Rc<RefCell<App>>, reactor: &mut Reactor, fd: RawFd) {
    loop {
        let next = {
            let mut a = app.borrow_mut();
            let Some(conn) = a.connections.get_mut(&fd) else { return };
            conn.parser.next_command()
        };
        let argv = match next {
            Ok(Some(argv)) => argv,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(?e, fd, "malformed request, closing connection");
                close_connection(app, reactor, fd);
                return;
            }
        };
        if argv.is_empty() {
            continue;
        }
        let name = uppercase(&argv[0]);
        let outcome = {
            let mut a = app.borrow_mut();
            let App { server, connections, .. } = &mut *a;
            let Some(conn) = connections.get_mut(&fd) else { return };
            let dispatched = dispatch(server, &mut conn.session, argv);
            (conn.session.client, conn.session.dbid, dispatched)
        };
        let (client, dbid, dispatched) = outcome;
        app.borrow_mut().server.drain_notifications(dbid);
        let publishes = app.borrow_mut().server.drain_publishes();
        deliver_publishes(app, reactor, publishes);
        handle_dispatched(app, reactor, fd, client, dbid, &name, dispatched);
    }
    serve_ready_keys(app, reactor);
}

/// Writes a "message"/"pmessage" push frame into every recipient's
/// output buffer for a resolved `PendingPublish` (spec §4.8/§6). Both
/// direct `PUBLISH` and keyspace-notification publishes flow through
/// `Server::drain_publishes`, so this is the one delivery path for
/// both. A recipient whose `ClientId` no longer maps to a live fd
/// (disconnected between subscribing and this publish) is silently
/// skipped, same as the source drops writes to a client already gone.
fn deliver_publishes(app: &Rc<RefCell<App>>, reactor: &mut Reactor, publishes: Vec<PendingPublish>) {
    for publish in &publishes {
        for client in &publish.delivery.channel_recipients {
            let fd = { app.borrow().client_fds.get(client).copied() };
            let Some(fd) = fd else { continue };
            let reply = Reply::Push(vec![
                Reply::bulk(b"message".to_vec()),
                Reply::bulk(publish.channel.clone()),
                Reply::bulk(publish.payload.clone()),
            ]);
            write_reply(app, reactor, fd, &reply);
        }
        for pattern_match in &publish.delivery.pattern_recipients {
            let fd = { app.borrow().client_fds.get(&pattern_match.client).copied() };
            let Some(fd) = fd else { continue };
            let reply = Reply::Push(vec![
                Reply::bulk(b"pmessage".to_vec()),
                Reply::bulk(pattern_match.pattern.clone()),
                Reply::bulk(publish.channel.clone()),
                Reply::bulk(publish.payload.clone()),
            ]);
            write_reply(app, reactor, fd, &reply);
        }
    }
}

fn handle_dispatched(
    app: &Rc<RefCell<App>>,
    reactor: &mut Reactor,
    fd: RawFd,
    client: ClientId,
    dbid: usize,
    name: &str,
    dispatched: Dispatched,
) {
    match dispatched {
        Dispatched::Reply(reply) => write_reply(app, reactor, fd, &reply),
        Dispatched::Multi(replies) => {
            for reply in &replies {
                write_reply(app, reactor, fd, reply);
            }
        }
        Dispatched::Block { key, timeout_ms } => {
            let end = if name == "BRPOP" { End::Right } else { End::Left };
            let timer_id = timeout_ms.map(|ms| {
                let app2 = app.clone();
                reactor.add_timer(
                    ms as i64,
                    move |r| {
                        fire_block_timeout(&app2, r, client, fd);
                        TimerAction::Remove
                    },
                    None,
                )
            });
            app.borrow_mut().blocked.push(Blocked { client, fd, dbid, key, end, timer_id });
        }
    }
}

fn write_reply(app: &Rc<RefCell<App>>, reactor: &mut Reactor, fd: RawFd, reply: &Reply) {
    {
        let mut a = app.borrow_mut();
        let Some(conn) = a.connections.get_mut(&fd) else { return };
        let resp3 = conn.session.resp3;
        encode(reply, resp3, &mut conn.out);
    }
    ensure_write_interest(app, reactor, fd);
}

fn ensure_write_interest(app: &Rc<RefCell<App>>, reactor: &mut Reactor, fd: RawFd) {
    let needs_register = {
        let mut a = app.borrow_mut();
        match a.connections.get_mut(&fd) {
            Some(conn) if !conn.out.is_empty() && !conn.write_registered => {
                conn.write_registered = true;
                true
            }
            _ => false,
        }
    };
    if !needs_register {
        return;
    }
    let app2 = app.clone();
    if let Err(e) = reactor.register(fd, FileMask::WRITABLE, move |reactor, fd, bit| {
        on_client_event(&app2, reactor, fd, bit);
    }) {
        tracing::warn!(%e, "failed to register writable interest");
    }
}

fn handle_writable(app: &Rc<RefCell<App>>, reactor: &mut Reactor, fd: RawFd) {
    let mut closed = false;
    loop {
        let mut a = app.borrow_mut();
        let Some(conn) = a.connections.get_mut(&fd) else { return };
        if conn.out.is_empty() {
            break;
        }
        match conn.stream.write(&conn.out) {
            Ok(0) => {
                closed = true;
                break;
            }
            Ok(n) => {
                conn.out.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(_) => {
                closed = true;
                break;
            }
        }
    }
    if closed {
        close_connection(app, reactor, fd);
        return;
    }
    let drained = {
        let a = app.borrow();
        a.connections.get(&fd).map(|c| c.out.is_empty()).unwrap_or(true)
    };
    if drained {
        {
            let mut a = app.borrow_mut();
            if let Some(conn) = a.connections.get_mut(&fd) {
                conn.write_registered = false;
            }
        }
        let _ = reactor.deregister(fd, FileMask::WRITABLE);
    }
}

fn close_connection(app: &Rc<RefCell<App>>, reactor: &mut Reactor, fd: RawFd) {
    let client = {
        let mut a = app.borrow_mut();
        let Some(conn) = a.connections.remove(&fd) else { return };
        a.client_fds.remove(&conn.session.client);
        conn.session.client
    };
    let _ = reactor.deregister(fd, FileMask::READABLE.union(FileMask::WRITABLE));
    let mut a = app.borrow_mut();
    a.server.txns.remove(client);
    a.server.pubsub.drop_client(client);
    a.blocked.retain(|b| b.client != client);
    tracing::debug!(client, fd, "connection closed");
}

/// Runs on a per-client timeout timer armed when the client suspended.
/// If the client was already woken by `serve_ready_keys` the timer was
/// already cancelled and this is a no-op (the blocked entry is gone).
fn fire_block_timeout(app: &Rc<RefCell<App>>, reactor: &mut Reactor, client: ClientId, fd: RawFd) {
    let blocked = {
        let mut a = app.borrow_mut();
        let pos = a.blocked.iter().position(|b| b.client == client);
        pos.map(|i| a.blocked.remove(i))
    };
    let Some(blocked) = blocked else { return };
    {
        let mut a = app.borrow_mut();
        if let Some(db) = a.server.keyspace.get_mut(blocked.dbid) {
            db.unblock_client(&blocked.key, client);
        }
    }
    write_reply(app, reactor, fd, &Reply::NullArray);
}

/// After every batch of commands, serves any blocked `BLPOP`/`BRPOP`
/// clients whose key just transitioned from absent to present
/// (`Database::drain_ready_keys`, spec §4.6's blocking-key design).
/// FIFO per key via `pop_first_waiter`; a waiter that loses a race (key
/// drained by someone else first) is put back to block on the key.
fn serve_ready_keys(app: &Rc<RefCell<App>>, reactor: &mut Reactor) {
    let ndb = app.borrow().server.keyspace.len();
    for dbid in 0..ndb {
        let ready = {
            let mut a = app.borrow_mut();
            match a.server.keyspace.get_mut(dbid) {
                Some(db) => db.drain_ready_keys(),
                None => continue,
            }
        };
        for key in ready {
            loop {
                let client = {
                    let mut a = app.borrow_mut();
                    a.server.keyspace.get_mut(dbid).and_then(|db| db.pop_first_waiter(&key))
                };
                let Some(client) = client else { break };
                let pos = {
                    let a = app.borrow();
                    a.blocked.iter().position(|b| b.client == client)
                };
                let Some(pos) = pos else { continue };
                let blocked = app.borrow_mut().blocked.remove(pos);
                if let Some(timer_id) = blocked.timer_id {
                    reactor.delete_timer(timer_id);
                }
                let reply = pop_for_blocked(app, dbid, &key, blocked.end);
                match reply {
                    Some(reply) => write_reply(app, reactor, blocked.fd, &reply),
                    None => {
                        // Lost the race for the item; keep waiting.
                        let mut a = app.borrow_mut();
                        if let Some(db) = a.server.keyspace.get_mut(dbid) {
                            db.block_client(&key, client);
                        }
                        a.blocked.push(Blocked { client, fd: blocked.fd, dbid, key: key.to_vec(), end: blocked.end, timer_id: None });
                    }
                }
            }
        }
    }
}

fn pop_for_blocked(app: &Rc<RefCell<App>>, dbid: usize, key: &[u8], end: End) -> Option<Reply> {
    let mut a = app.borrow_mut();
    let db = a.server.keyspace.get_mut(dbid)?;
    let now = mstime();
    let v = db.lookup_key_write(key, now)?;
    let l = v.as_list_mut()?;
    if l.is_empty() {
        return None;
    }
    let item = l.pop(end, 1).into_iter().next()?;
    let emptied = l.is_empty();
    if emptied {
        db.db_delete(key);
    }
    Some(Reply::Array(vec![Reply::bulk(key.to_vec()), Reply::bulk(item)]))
}

pub fn arm_active_expire(app: &Rc<RefCell<App>>, reactor: &mut Reactor, cfg: &Config) {
    let app2 = app.clone();
    let period = cfg.active_expire_period_ms;
    let budget = std::time::Duration::from_millis(cfg.active_expire_budget_ms);
    reactor.add_timer(
        period,
        move |_r| {
            let mut a = app2.borrow_mut();
            let now = mstime();
            for db in a.server.keyspace.iter_mut() {
                let expired = db.active_expire_cycle(now, budget);
                if expired > 0 {
                    tracing::debug!(expired, db = db.id, "active expire cycle");
                }
            }
            TimerAction::Reschedule(period)
        },
        None,
    );
}

/// Keeps every database's dict and expire table rehashing forward
/// even when idle (`knot-dict`'s own `step_rehash_if_due` only fires
/// on direct access). Mirrors the source's `serverCron` → `dictRehash`
/// periodic nudge.
pub fn arm_rehash_cycle(app: &Rc<RefCell<App>>, reactor: &mut Reactor, cfg: &Config) {
    let app2 = app.clone();
    let period = cfg.rehash_period_ms;
    let budget_ms = cfg.rehash_budget_ms;
    reactor.add_timer(
        period,
        move |_r| {
            let mut a = app2.borrow_mut();
            for db in a.server.keyspace.iter_mut() {
                db.rehash_cycle(budget_ms);
            }
            TimerAction::Reschedule(period)
        },
        None,
    );
}
