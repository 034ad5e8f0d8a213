mod error;
mod glob;
mod time;

pub use error::{err, Error, Result};
pub use glob::{glob_match, glob_match_nocase};
pub use time::{mstime, FreezeGuard};
