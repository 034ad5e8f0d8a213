use std::fmt;

/// Errors from the transaction-state transitions themselves (spec
/// §4.7's transition table). Execution-time errors belong to
/// `knot-cmd`'s `CommandError`; this enum only covers misuse of
/// MULTI/WATCH/EXEC/DISCARD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnError {
    NestedMulti,
    WatchInsideMulti,
    DiscardWithoutMulti,
}

impl fmt::Display for TxnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnError::NestedMulti => write!(f, "MULTI calls can not be nested"),
            TxnError::WatchInsideMulti => write!(f, "WATCH inside MULTI is not allowed"),
            TxnError::DiscardWithoutMulti => write!(f, "DISCARD without MULTI"),
        }
    }
}

impl std::error::Error for TxnError {}

pub type TxnResult<T> = Result<T, TxnError>;
