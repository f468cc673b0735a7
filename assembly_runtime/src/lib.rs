#![forbid(unsafe_code)]

//! Assembly runtime: persistence around the assembly kernel.
//!
//! Records kernel progress to an append-only protobuf log from a background
//! thread, replays logs through the kernel's instruction sequence, and
//! writes canonical state snapshots.
//!
//! No assembly rules live here. Every check is delegated to the kernel.

pub mod config;
pub mod error;
pub mod event_store;
pub mod proto_bridge;
pub mod proto_types;
pub mod replay;
pub mod session;
pub mod sink;
pub mod snapshot;
