//! Build plans and the step/sub-step cursor that walks through them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::domain::{AttachHandle, PieceColor, PieceId, PieceKind, SubStep};
use crate::error::{AssemblyError, AssemblyResult};
use crate::math::{QuatRecord, Rotation};
use crate::registry::StructureRegistry;
use crate::PLAN_SCHEMA_VERSION;

// ---------------------------------------------------------------------------
// InstructionStep
// ---------------------------------------------------------------------------

/// One prescribed connection: the target piece's socket goes onto the
/// source piece's socket with the recorded relative rotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionStep {
    #[serde(rename = "sourcePieceKind")]
    pub source_kind: PieceKind,
    #[serde(rename = "sourceAttachIndex")]
    pub source_index: usize,
    #[serde(rename = "sourceRelativeRotation")]
    pub source_rotation: QuatRecord,
    #[serde(rename = "sourcePieceRuntimeID")]
    pub source_id: PieceId,
    #[serde(rename = "targetPieceKind")]
    pub target_kind: PieceKind,
    #[serde(rename = "targetAttachIndex")]
    pub target_index: usize,
    #[serde(rename = "targetRelativeRotation")]
    pub target_rotation: QuatRecord,
    #[serde(rename = "targetPieceRuntimeID")]
    pub target_id: PieceId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_color: Option<PieceColor>,
}

impl InstructionStep {
    /// Record the realized connection between `source` and `target` as a step.
    ///
    /// Both handles must name sockets joined to each other.
    pub fn capture(
        registry: &StructureRegistry,
        source: AttachHandle,
        target: AttachHandle,
    ) -> Option<Self> {
        let source_ap = registry.attach_point(source)?;
        let target_ap = registry.attach_point(target)?;
        if source_ap.attached() != Some(target) || target_ap.attached() != Some(source) {
            return None;
        }
        let source_piece = registry.piece(source.piece)?;
        let target_piece = registry.piece(target.piece)?;
        let mut step = Self {
            source_kind: source_piece.kind(),
            source_index: source.index,
            source_rotation: QuatRecord::from(*source_ap.this_to_other()),
            source_id: source.piece,
            target_kind: target_piece.kind(),
            target_index: target.index,
            target_rotation: QuatRecord::from(*target_ap.this_to_other()),
            target_id: target.piece,
            display_name: String::new(),
            target_color: Some(target_piece.color()),
        };
        step.display_name = step.default_name();
        Some(step)
    }

    pub fn source(&self) -> AttachHandle {
        AttachHandle::new(self.source_id, self.source_index)
    }

    pub fn target(&self) -> AttachHandle {
        AttachHandle::new(self.target_id, self.target_index)
    }

    pub fn source_relative_rotation(&self) -> Rotation {
        self.source_rotation.to_rotation()
    }

    pub fn target_relative_rotation(&self) -> Rotation {
        self.target_rotation.to_rotation()
    }

    /// True when the step joins exactly the pieces `a` and `b`, in either order.
    pub fn joins(&self, a: PieceId, b: PieceId) -> bool {
        (self.source_id == a && self.target_id == b) || (self.source_id == b && self.target_id == a)
    }

    pub fn default_name(&self) -> String {
        format!(
            "Attach {:?}_{}[{}] to {:?}_{}[{}]",
            self.target_kind,
            self.target_id.0,
            self.target_index,
            self.source_kind,
            self.source_id.0,
            self.source_index
        )
    }
}

// ---------------------------------------------------------------------------
// InstructionPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionPlan {
    pub schema_version: u32,
    #[serde(default)]
    pub name: String,
    pub steps: Vec<InstructionStep>,
}

impl InstructionPlan {
    pub fn new(name: impl Into<String>, steps: Vec<InstructionStep>) -> Self {
        Self {
            schema_version: PLAN_SCHEMA_VERSION,
            name: name.into(),
            steps,
        }
    }

    pub fn from_json_str(json: &str) -> AssemblyResult<Self> {
        let plan: Self = serde_json::from_str(json).map_err(|source| AssemblyError::Parse {
            what: "instruction plan",
            source,
        })?;
        if plan.schema_version != PLAN_SCHEMA_VERSION {
            return Err(AssemblyError::UnsupportedSchema {
                found: plan.schema_version,
                expected: PLAN_SCHEMA_VERSION,
            });
        }
        Ok(plan)
    }

    pub fn load(path: &Path) -> AssemblyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AssemblyError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> AssemblyResult<String> {
        serde_json::to_string_pretty(self).map_err(|source| AssemblyError::Parse {
            what: "instruction plan",
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&InstructionStep> {
        self.steps.get(index)
    }

    /// Check every step against the pieces and screws actually present.
    ///
    /// Each problem is logged and returned; none of them stops a session.
    pub fn validate_against(&self, registry: &StructureRegistry) -> Vec<AssemblyError> {
        let mut issues = Vec::new();
        for (i, step) in self.steps.iter().enumerate() {
            for (id, kind, index) in [
                (step.source_id, step.source_kind, step.source_index),
                (step.target_id, step.target_kind, step.target_index),
            ] {
                let Some(piece) = registry.piece(id) else {
                    issues.push(AssemblyError::MissingPiece { step: i, id });
                    continue;
                };
                if piece.kind() != kind {
                    issues.push(AssemblyError::KindMismatch {
                        step: i,
                        id,
                        expected: kind,
                        found: piece.kind(),
                    });
                }
                if index >= piece.attach_points().len() {
                    issues.push(AssemblyError::AttachIndexOutOfRange {
                        step: i,
                        id,
                        index,
                        count: piece.attach_points().len(),
                    });
                }
            }
        }
        if registry.screw_count() < self.steps.len() {
            issues.push(AssemblyError::NotEnoughScrews {
                screws: registry.screw_count(),
                steps: self.steps.len(),
            });
        }
        for issue in &issues {
            error!(plan = %self.name, "{issue}");
        }
        issues
    }
}

/// Step index a validation issue refers to, if it is step-specific.
pub fn issue_step(issue: &AssemblyError) -> Option<usize> {
    match issue {
        AssemblyError::MissingPiece { step, .. }
        | AssemblyError::KindMismatch { step, .. }
        | AssemblyError::AttachIndexOutOfRange { step, .. } => Some(*step),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// InstructionSequence
// ---------------------------------------------------------------------------

/// A sub-step change produced by [`InstructionSequence::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubStepTransition {
    /// Cursor after the transition.
    pub step: usize,
    pub sub_step: SubStep,
    /// This transition finished the plan.
    pub completed: bool,
}

/// Cursor over a plan plus the sub-state within the current step.
///
/// The cursor only moves forward. Sub-states cycle
/// `AttachPiece → InsertScrew → UseKey → AttachPiece`, bumping the cursor
/// on the wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSequence {
    cursor: usize,
    sub_step: SubStep,
    completed: bool,
    len: usize,
}

impl InstructionSequence {
    pub fn new(len: usize) -> Self {
        Self {
            cursor: 0,
            sub_step: SubStep::AttachPiece,
            completed: len == 0,
            len,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn sub_step(&self) -> SubStep {
        self.sub_step
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Move to `to` if it is the successor of the current sub-state.
    pub fn advance(&mut self, to: SubStep) -> Option<SubStepTransition> {
        if self.completed || to != self.sub_step.next() {
            return None;
        }
        self.sub_step = to;
        let mut completed = false;
        if to == SubStep::AttachPiece {
            self.cursor += 1;
            if self.cursor >= self.len {
                self.completed = true;
                completed = true;
            }
        }
        Some(SubStepTransition {
            step: self.cursor,
            sub_step: to,
            completed,
        })
    }

    /// Back to step 0. The only way the cursor ever decreases.
    pub fn reset(&mut self) {
        *self = Self::new(self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_cycles_and_completes_once() {
        let mut seq = InstructionSequence::new(1);
        assert!(seq.advance(SubStep::UseKey).is_none());
        assert_eq!(seq.advance(SubStep::InsertScrew).unwrap().step, 0);
        assert_eq!(seq.advance(SubStep::UseKey).unwrap().sub_step, SubStep::UseKey);
        let t = seq.advance(SubStep::AttachPiece).unwrap();
        assert!(t.completed);
        assert_eq!(t.step, 1);
        assert!(seq.is_complete());
        assert!(seq.advance(SubStep::InsertScrew).is_none());
    }

    #[test]
    fn empty_sequence_starts_complete() {
        assert!(InstructionSequence::new(0).is_complete());
    }

    #[test]
    fn reset_rewinds_to_first_step() {
        let mut seq = InstructionSequence::new(2);
        seq.advance(SubStep::InsertScrew);
        seq.advance(SubStep::UseKey);
        seq.advance(SubStep::AttachPiece);
        assert_eq!(seq.cursor(), 1);
        seq.reset();
        assert_eq!(seq, InstructionSequence::new(2));
    }

    #[test]
    fn plan_with_wrong_schema_is_rejected() {
        let json = r#"{"schema_version": 2, "name": "x", "steps": []}"#;
        assert!(matches!(
            InstructionPlan::from_json_str(json),
            Err(AssemblyError::UnsupportedSchema { found: 2, expected: 1 })
        ));
    }
}
