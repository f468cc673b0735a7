//! Replay: rebuild assembly progress from an event log.
//!
//! Sub-step records are fed through the kernel's [`InstructionSequence`],
//! so a log is only accepted if the kernel itself could have produced it.
//! Pure function of the record stream; no cached state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use assembly_kernel::domain::SubStep;
use assembly_kernel::instructions::InstructionSequence;

use crate::error::{RuntimeError, RuntimeResult};
use crate::event_store::EventStore;
use crate::proto_bridge::{LogEvent, LogRecord};

/// Progress reconstructed from a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub plan_hash: String,
    pub plan_name: String,
    pub step_count: usize,
    pub cursor: usize,
    pub sub_step: SubStep,
    pub completed: bool,
    /// Completions across all runs of the plan.
    pub completions: usize,
    /// Restarts from step 0 after the initial begin.
    pub resets: usize,
    pub last_sequence: u64,
}

struct Replayer {
    sequence: InstructionSequence,
    /// A completion record was seen; the wrapping sub-step must follow.
    completion_pending: bool,
    /// This run already logged its completion.
    run_completed: bool,
    completions: usize,
    resets: usize,
}

impl Replayer {
    fn new(step_count: usize) -> Self {
        Self {
            sequence: InstructionSequence::new(step_count),
            completion_pending: false,
            run_completed: false,
            completions: 0,
            resets: 0,
        }
    }

    fn apply(&mut self, record: &LogRecord) -> Result<(), String> {
        match &record.event {
            LogEvent::SessionStarted { .. } => Err("second session header".into()),
            LogEvent::Completed { steps } => self.complete(*steps),
            LogEvent::SubStepEntered { step, sub_step } => self.enter(*step, *sub_step),
        }
    }

    fn complete(&mut self, steps: usize) -> Result<(), String> {
        let len = self.sequence.len();
        if steps != len {
            return Err(format!("completion of {steps} steps in a {len}-step plan"));
        }
        if self.run_completed || self.completion_pending {
            return Err("plan completed twice without a reset".into());
        }
        if len == 0 {
            // Empty plans complete right at begin.
            self.run_completed = true;
            self.completions += 1;
            return Ok(());
        }
        let on_last = self.sequence.sub_step() == SubStep::UseKey
            && self.sequence.cursor() + 1 == len;
        if !on_last {
            return Err(format!(
                "completion logged at step {} {}",
                self.sequence.cursor(),
                self.sequence.sub_step()
            ));
        }
        self.completion_pending = true;
        Ok(())
    }

    fn enter(&mut self, step: usize, sub_step: SubStep) -> Result<(), String> {
        // Advancing never lands on (0, AttachPiece), so that record is
        // always a begin or a reset.
        if step == 0 && sub_step == SubStep::AttachPiece {
            if self.completion_pending {
                return Err("reset between completion and its final sub-step".into());
            }
            self.sequence.reset();
            self.run_completed = false;
            self.resets += 1;
            return Ok(());
        }

        let transition = self
            .sequence
            .advance(sub_step)
            .ok_or_else(|| format!("step {step} {sub_step} does not follow the previous record"))?;
        if transition.step != step {
            return Err(format!(
                "step {step} {sub_step} logged where step {} was expected",
                transition.step
            ));
        }
        if transition.completed != self.completion_pending {
            return Err(if transition.completed {
                "plan finished without a completion record".into()
            } else {
                "completion record not followed by the final sub-step".into()
            });
        }
        if transition.completed {
            self.completion_pending = false;
            self.run_completed = true;
            self.completions += 1;
        }
        Ok(())
    }
}

/// Rebuild progress from records in log order.
///
/// The first record must be the session header; sequence numbers must run
/// 1, 2, 3, ... without gaps. A log cut between a completion record and its
/// final sub-step is accepted as complete.
pub fn rebuild_progress(records: &[LogRecord]) -> RuntimeResult<Progress> {
    let Some(first) = records.first() else {
        return Err(RuntimeError::Replay {
            sequence: 0,
            reason: "event log is empty".into(),
        });
    };
    let LogEvent::SessionStarted {
        plan_hash,
        plan_name,
        step_count,
    } = &first.event
    else {
        return Err(RuntimeError::Replay {
            sequence: first.sequence,
            reason: "first record is not a session header".into(),
        });
    };

    let mut replayer = Replayer::new(*step_count);
    for (i, record) in records.iter().enumerate() {
        let expected = i as u64 + 1;
        if record.sequence != expected {
            return Err(RuntimeError::SequenceViolation {
                expected,
                found: record.sequence,
            });
        }
        if i == 0 {
            continue;
        }
        replayer
            .apply(record)
            .map_err(|reason| RuntimeError::Replay {
                sequence: record.sequence,
                reason,
            })?;
    }

    // The kernel begins the plan right after the header, so the first
    // sub-step record is not a reset.
    let resets = replayer.resets.saturating_sub(1);
    let mut completions = replayer.completions;
    let mut completed = replayer.sequence.is_complete();
    let (mut cursor, mut sub_step) = (replayer.sequence.cursor(), replayer.sequence.sub_step());
    if replayer.completion_pending {
        completed = true;
        completions += 1;
        cursor += 1;
        sub_step = SubStep::AttachPiece;
    }

    Ok(Progress {
        plan_hash: plan_hash.clone(),
        plan_name: plan_name.clone(),
        step_count: *step_count,
        cursor,
        sub_step,
        completed,
        completions,
        resets,
        last_sequence: records.last().map(|r| r.sequence).unwrap_or(0),
    })
}

/// Read the log at `path` and rebuild its progress.
pub fn replay_log(path: &Path) -> RuntimeResult<Progress> {
    let store = EventStore::open(path)?;
    rebuild_progress(&store.load_all()?)
}
