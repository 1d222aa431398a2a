use crate::{Command, Key};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("the writer has already been closed")]
    Closed,
    #[error("the dump is empty")]
    Empty,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// The reasons an intermediate dump stopped being decoded
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("the dump does not begin with a root map")]
    MissingRootMap,
    #[error("the dump is nested more than {0} levels deep")]
    TooDeep(usize),
    #[error("unknown command tag {0}")]
    UnknownCommand(u8),
    #[error("command {command:?} is not valid inside a {parent}")]
    UnexpectedCommand {
        command: Command,
        parent: &'static str,
    },
    #[error("key 0 is reserved")]
    InvalidKey,
    #[error("property {key} has a length of {length} which exceeds the maximum")]
    PropertyTooLarge { key: Key, length: u64 },
    #[error("the dump ended in the middle of a command")]
    Truncated,
    #[error("{0} bytes follow the end of the root map")]
    TrailingData(usize),
    #[error("the dump ended with {0} container(s) still open")]
    UnclosedContainers(usize),
}
