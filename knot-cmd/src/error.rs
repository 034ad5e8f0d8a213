use knot_proto::Reply;

/// The RESP error-prefix taxonomy from spec §7: command execution
/// errors, as distinct from `knot_base::Error` (process-level/IO
/// failures) and `knot_txn::TxnError` (MULTI/WATCH transition misuse,
/// which a caller maps onto `Syntax` at the command boundary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    WrongType,
    Syntax(String),
    OutOfRange(String),
    NotFound,
    Busy(String),
    ExecAbort,
    NoScript,
    ReadOnlyReplica,
}

impl CommandError {
    pub fn syntax() -> Self {
        CommandError::Syntax("syntax error".to_string())
    }

    pub fn to_reply(&self) -> Reply {
        match self {
            CommandError::WrongType => Reply::error(
                "WRONGTYPE",
                "Operation against a key holding the wrong kind of value",
            ),
            CommandError::Syntax(msg) => Reply::error("ERR", msg),
            CommandError::OutOfRange(msg) => Reply::error("ERR", msg),
            CommandError::NotFound => Reply::error("ERR", "no such key"),
            CommandError::Busy(msg) => Reply::error("BUSY", msg),
            CommandError::ExecAbort => Reply::error(
                "EXECABORT",
                "Transaction discarded because of previous errors.",
            ),
            CommandError::NoScript => Reply::error("NOSCRIPT", "No matching script"),
            CommandError::ReadOnlyReplica => {
                Reply::error("READONLY", "You can't write against a read only replica.")
            }
        }
    }
}

impl From<knot_value::ValueError> for CommandError {
    fn from(e: knot_value::ValueError) -> Self {
        match e {
            knot_value::ValueError::NotANumber => {
                CommandError::Syntax("value is not an integer or out of range".to_string())
            }
            knot_value::ValueError::Overflow => {
                CommandError::OutOfRange("increment or decrement would overflow".to_string())
            }
            knot_value::ValueError::OutOfRange => {
                CommandError::OutOfRange("value exceeds allowed size".to_string())
            }
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;
