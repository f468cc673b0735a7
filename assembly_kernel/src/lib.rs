#![forbid(unsafe_code)]

//! Assembly kernel: symmetry-aware verification of a guided piping build.

/// Kernel v1. Changes to verification behavior or canonical hashing
/// require a version bump.
pub const KERNEL_VERSION: u32 = 1;

/// Version of the persisted instruction plan format.
pub const PLAN_SCHEMA_VERSION: u32 = 1;

pub mod math;
pub mod domain;
pub mod error;
pub mod symmetry;
pub mod attach_point;
pub mod piece;
pub mod scene;
pub mod registry;
pub mod connection;
pub mod config;
pub mod events;
pub mod instructions;
pub mod verifier;
pub mod invariants;
pub mod hashing;
pub mod session;
pub mod layout;
pub mod rehearsal;
