//! Log records and their protobuf wire form.
//!
//! The kernel reports progress as [`AssemblyEvent`]s; the runtime adds a
//! session header and stamps every entry with a sequence number and a
//! wall-clock time before it goes to disk.

use serde::{Deserialize, Serialize};

use assembly_kernel::domain::SubStep;
use assembly_kernel::events::AssemblyEvent;

use crate::error::{RuntimeError, RuntimeResult};
use crate::proto_types::*;

/// One entry of the assembly event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LogEvent {
    /// Always the first record of a session.
    SessionStarted {
        plan_hash: String,
        plan_name: String,
        step_count: usize,
    },
    SubStepEntered { step: usize, sub_step: SubStep },
    Completed { steps: usize },
}

impl From<AssemblyEvent> for LogEvent {
    fn from(event: AssemblyEvent) -> Self {
        match event {
            AssemblyEvent::SubStepEntered { step, sub_step } => {
                LogEvent::SubStepEntered { step, sub_step }
            }
            AssemblyEvent::Completed { steps } => LogEvent::Completed { steps },
        }
    }
}

/// A [`LogEvent`] as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub event: LogEvent,
}

fn sub_step_to_proto(sub_step: SubStep) -> ProtoSubStep {
    match sub_step {
        SubStep::AttachPiece => ProtoSubStep::AttachPiece,
        SubStep::InsertScrew => ProtoSubStep::InsertScrew,
        SubStep::UseKey => ProtoSubStep::UseKey,
    }
}

fn sub_step_from_proto(sub_step: ProtoSubStep) -> SubStep {
    match sub_step {
        ProtoSubStep::AttachPiece => SubStep::AttachPiece,
        ProtoSubStep::InsertScrew => SubStep::InsertScrew,
        ProtoSubStep::UseKey => SubStep::UseKey,
    }
}

/// Convert a record to its wire form.
pub fn record_to_proto(record: &LogRecord) -> ProtoRecord {
    let kind = match &record.event {
        LogEvent::SessionStarted {
            plan_hash,
            plan_name,
            step_count,
        } => EventKind::SessionStarted(SessionStarted {
            plan_hash: plan_hash.clone(),
            plan_name: plan_name.clone(),
            step_count: *step_count as u32,
        }),
        LogEvent::SubStepEntered { step, sub_step } => EventKind::SubStep(SubStepEntered {
            step: *step as u32,
            sub_step: sub_step_to_proto(*sub_step) as i32,
        }),
        LogEvent::Completed { steps } => EventKind::Completed(Completed {
            step_count: *steps as u32,
        }),
    };
    ProtoRecord {
        sequence: record.sequence,
        timestamp_ms: record.timestamp_ms,
        event: Some(ProtoEvent { kind: Some(kind) }),
    }
}

/// Convert a wire record back. Missing oneofs and unknown enum values
/// are reported, never defaulted.
pub fn proto_to_record(proto: &ProtoRecord) -> RuntimeResult<LogRecord> {
    let malformed = |reason: &str| RuntimeError::MalformedRecord {
        sequence: proto.sequence,
        reason: reason.to_string(),
    };
    let kind = proto
        .event
        .as_ref()
        .and_then(|e| e.kind.as_ref())
        .ok_or_else(|| malformed("record has no event"))?;

    let event = match kind {
        EventKind::SessionStarted(s) => LogEvent::SessionStarted {
            plan_hash: s.plan_hash.clone(),
            plan_name: s.plan_name.clone(),
            step_count: s.step_count as usize,
        },
        EventKind::SubStep(s) => {
            let sub_step = ProtoSubStep::try_from(s.sub_step)
                .map_err(|_| malformed(&format!("unknown sub-step {}", s.sub_step)))?;
            LogEvent::SubStepEntered {
                step: s.step as usize,
                sub_step: sub_step_from_proto(sub_step),
            }
        }
        EventKind::Completed(c) => LogEvent::Completed {
            steps: c.step_count as usize,
        },
    };
    Ok(LogRecord {
        sequence: proto.sequence,
        timestamp_ms: proto.timestamp_ms,
        event,
    })
}
