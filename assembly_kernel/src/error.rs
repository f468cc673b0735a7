//! Error types for plan, layout and configuration loading.
//!
//! Verification mismatches are not errors: they are reported as
//! [`crate::verifier::Rejection`] values.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{PieceId, PieceKind};

/// Result type for kernel setup operations.
pub type AssemblyResult<T> = Result<T, AssemblyError>;

/// Data and setup problems detected while loading or validating.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported plan schema version {found}, expected {expected}")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("two pieces share id {id}")]
    DuplicatePieceId { id: PieceId },

    #[error("step {step}: piece {id} is not in the structure")]
    MissingPiece { step: usize, id: PieceId },

    #[error("step {step}: expected piece {id} to be a {expected:?}, not a {found:?}")]
    KindMismatch {
        step: usize,
        id: PieceId,
        expected: PieceKind,
        found: PieceKind,
    },

    #[error("step {step}: attach point index {index} out of range for piece {id} ({count} points)")]
    AttachIndexOutOfRange {
        step: usize,
        id: PieceId,
        index: usize,
        count: usize,
    },

    #[error("not enough screws ({screws}) for the number of steps ({steps})")]
    NotEnoughScrews { screws: usize, steps: usize },

    #[error("piece {piece}: symmetry {symmetry} is invalid: {source}")]
    InvalidSymmetry {
        piece: String,
        symmetry: usize,
        #[source]
        source: SymmetryError,
    },
}

/// Structural problems in a symmetry's attach-point mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymmetryError {
    #[error("maps {mapped} attach points but the piece has {expected}")]
    CountMismatch { mapped: usize, expected: usize },

    #[error("mapping is not a permutation of 0..{count}")]
    NotAPermutation { count: usize },

    #[error("no symmetry at index {index}")]
    UnknownSymmetry { index: usize },
}

impl AssemblyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssemblyError::Io {
            path: path.into(),
            source,
        }
    }
}
