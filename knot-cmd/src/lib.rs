// Command execution (spec §4.6, component C7): per-type handlers
// operating on `knot-store`'s `Database`/`Keyspace`, wired together by
// `dispatch`'s command table. Every handler takes a `&mut Server` and
// a `Session` and returns a `CommandResult<Reply>` (or, for the
// handful of commands that reply with more than one frame or need to
// suspend the connection, the richer shapes in `dispatch::Dispatched`).

mod dispatch;
mod error;
mod generic;
mod hash;
mod list;
mod pubsub;
mod server;
mod set;
mod string;
#[cfg(test)]
mod test;
mod txn;
mod util;

pub use dispatch::{dispatch, is_write, Dispatched};
pub use error::{CommandError, CommandResult};
pub use list::BlockOutcome;
pub use server::{PendingPublish, Server, Session};
