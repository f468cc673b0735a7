//! Runtime errors: persistence, wire decoding and replay consistency.

use std::path::PathBuf;

use thiserror::Error;

use assembly_kernel::error::AssemblyError;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid frame length {len} at byte {offset}")]
    InvalidFrameLength { offset: u64, len: usize },

    #[error("truncated frame at byte {offset}")]
    TruncatedFrame { offset: u64 },

    #[error("protobuf decode error at byte {offset}: {source}")]
    Decode {
        offset: u64,
        #[source]
        source: prost::DecodeError,
    },

    #[error("record {sequence} is malformed: {reason}")]
    MalformedRecord { sequence: u64, reason: String },

    #[error("sequence violation in event log: expected {expected}, got {found}")]
    SequenceViolation { expected: u64, found: u64 },

    #[error("replay inconsistency at record {sequence}: {reason}")]
    Replay { sequence: u64, reason: String },

    #[error("bad snapshot '{path}': {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error("invalid runtime config '{path}': {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("session '{0}' already has an event log")]
    SessionExists(String),

    #[error("event log writer has stopped")]
    WriterGone,

    #[error(transparent)]
    Kernel(#[from] AssemblyError),
}

impl RuntimeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuntimeError::Io {
            path: path.into(),
            source,
        }
    }
}
