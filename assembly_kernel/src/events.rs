//! Assembly progress events.
//!
//! Events are pure data. The verifier reports every sub-step transition and
//! the one-time completion to an [`EventSink`]; sinks must never block or
//! fail the caller.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::domain::SubStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AssemblyEvent {
    /// The sequence entered `sub_step` of step `step`.
    SubStepEntered { step: usize, sub_step: SubStep },
    /// Every step of a plan of `steps` steps is done.
    Completed { steps: usize },
}

/// Receiver of assembly progress.
pub trait EventSink: Send {
    fn record_sub_step(&mut self, step: usize, sub_step: SubStep);

    fn record_completion(&mut self, steps: usize);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record_sub_step(&mut self, _step: usize, _sub_step: SubStep) {}

    fn record_completion(&mut self, _steps: usize) {}
}

/// Keeps events in memory. Clones share the same buffer, so a test can hold
/// one clone while the session owns another.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AssemblyEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AssemblyEvent> {
        self.lock().clone()
    }

    pub fn completions(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, AssemblyEvent::Completed { .. }))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AssemblyEvent>> {
        // A panicking reader cannot corrupt a Vec push; keep recording.
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EventSink for RecordingSink {
    fn record_sub_step(&mut self, step: usize, sub_step: SubStep) {
        self.lock()
            .push(AssemblyEvent::SubStepEntered { step, sub_step });
    }

    fn record_completion(&mut self, steps: usize) {
        self.lock().push(AssemblyEvent::Completed { steps });
    }
}
