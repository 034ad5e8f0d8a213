// The `knot` binary: wires `knot-reactor`'s fd/timer multiplexer to a
// real TCP listener and a `knot-cmd::Server`, the way the original
// engine's `server.c` wires `ae.c` to its listening socket and command
// table. Everything downstream of `main` runs on one thread; the
// keyspace has no lock because nothing else ever touches it (spec §5).

mod config;
mod connection;

use std::cell::RefCell;
use std::net::TcpListener;
use std::rc::Rc;

use knot_reactor::Reactor;
use tracing_subscriber::EnvFilter;

use config::Config;
use connection::App;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KNOT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// An fd table sized generously above any realistic connection count;
/// `Reactor::register` rejects anything at or above it (mirrors the
/// source's `maxclients`-derived `setsize`).
const REACTOR_CAPACITY: usize = 16_384;

fn main() {
    init_tracing();
    let cfg = Config::from_env();

    let listener = TcpListener::bind(&cfg.bind).unwrap_or_else(|e| {
        tracing::error!(bind = %cfg.bind, %e, "failed to bind listener");
        std::process::exit(1);
    });
    listener.set_nonblocking(true).expect("set listener nonblocking");

    let app = Rc::new(RefCell::new(App::new(&cfg, listener)));
    let mut reactor = Reactor::new(REACTOR_CAPACITY).expect("reactor init");

    connection::register_listener(&app, &mut reactor);
    connection::arm_active_expire(&app, &mut reactor, &cfg);
    connection::arm_rehash_cycle(&app, &mut reactor, &cfg);

    tracing::info!(bind = %cfg.bind, databases = cfg.databases, "knot listening");
    reactor.run();
}
