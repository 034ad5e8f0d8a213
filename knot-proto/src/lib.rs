// The wire protocol collaborator spec §6 describes but declares out
// of core's scope ("core does not define it; it exposes..."). This
// crate is that collaborator, realized: a RESP2/RESP3-ish multi-bulk
// request parser and the `addReplyX` encoder family.

mod reply;
mod request;

pub use reply::{encode, Reply};
pub use request::{ProtoError, RequestParser};
