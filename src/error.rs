//! Error taxonomy. A small, closed set: protocol-level failures
//! are recoverable by tearing down the offending link; a log durability
//! failure is fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("malformed frame: {0}")]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not leader")]
    NotLeader,

    #[error("applicator error: {0}")]
    Applicator(String),

    #[error("log durability failure: {0}")]
    Durability(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("bad signature")]
    BadSignature,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("declared length {declared} does not match computed length {computed}")]
    LengthMismatch { declared: u32, computed: u32 },
    #[error("unknown message kind tag {0}")]
    UnknownKind(u16),
    #[error("entries_count {0} exceeds the per-frame bound")]
    TooManyEntries(u16),
    #[error("truncated payload")]
    Truncated,
}
