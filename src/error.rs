use std::io;
use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("chain {name} not found")]
    ChainNotFound { name: String },

    #[error("chain {name} already exists")]
    AlreadyExists { name: String },

    #[error("chain name {name} too long")]
    NameTooLong { name: String },

    #[error("chain {name} is a built-in chain")]
    BuiltinProtected { name: String },

    #[error("chain {name} is not a built-in chain")]
    NotBuiltin { name: String },

    #[error("index {index} out of range in chain {chain} (length {len})")]
    IndexOutOfRange {
        chain: String,
        index: usize,
        len: usize,
    },

    #[error("invalid policy verdict {verdict}")]
    InvalidVerdict { verdict: String },

    #[error("rule jumps to unknown chain id {id}")]
    DanglingJump { id: u32 },

    #[error("transport rejected {operation}: {reason}")]
    TransportRejected { operation: String, reason: String },

    #[error("entries replaced but counters not applied: {reason}")]
    CountersNotApplied { reason: String },

    #[error("no route to {dst}")]
    NoRoute { dst: Ipv4Addr },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

pub type Result<T> = std::result::Result<T, Error>;
