//! Hand-written protobuf types for the assembly event log.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Tags are part of the on-disk format and never reused.

use prost::Message;

// ── Record ─────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoRecord {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    /// Wall clock at write time, milliseconds since the Unix epoch.
    /// Informational only; replay ignores it.
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    #[prost(message, optional, tag = "3")]
    pub event: Option<ProtoEvent>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoEvent {
    #[prost(oneof = "EventKind", tags = "1, 2, 3")]
    pub kind: Option<EventKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum EventKind {
    #[prost(message, tag = "1")]
    SessionStarted(SessionStarted),
    #[prost(message, tag = "2")]
    SubStep(SubStepEntered),
    #[prost(message, tag = "3")]
    Completed(Completed),
}

// ── Sub-step ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtoSubStep {
    AttachPiece = 0,
    InsertScrew = 1,
    UseKey = 2,
}

// ── Event Types ────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct SessionStarted {
    #[prost(string, tag = "1")]
    pub plan_hash: String,
    #[prost(string, tag = "2")]
    pub plan_name: String,
    #[prost(uint32, tag = "3")]
    pub step_count: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SubStepEntered {
    #[prost(uint32, tag = "1")]
    pub step: u32,
    #[prost(enumeration = "ProtoSubStep", tag = "2")]
    pub sub_step: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Completed {
    #[prost(uint32, tag = "1")]
    pub step_count: u32,
}
