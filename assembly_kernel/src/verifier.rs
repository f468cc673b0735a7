//! Assembly verifier: checks every physical action against the current plan step.
//!
//! Verification failures are data. Every `check_*` either accepts and
//! advances the sub-state, or returns a [`Rejection`] having changed
//! nothing. Once the plan is complete every check accepts.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::AssemblyConfig;
use crate::connection::potential_this_to_other_with;
use crate::domain::{AttachHandle, PieceId, ScrewId, SubStep};
use crate::events::EventSink;
use crate::instructions::{InstructionPlan, InstructionSequence, InstructionStep, SubStepTransition};
use crate::math::{angle_deg, pose_from, quarter_turns, Pose, Rotation};
use crate::registry::StructureRegistry;
use crate::symmetry::closest_symmetry;

/// Why an action did not register.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("expected pieces {expected:?}, got {found:?}")]
    WrongPieces {
        expected: (PieceId, PieceId),
        found: (PieceId, PieceId),
    },
    #[error("right pieces, wrong sockets: expected {expected:?}, got {found:?}")]
    WrongSockets {
        /// (source index, target index)
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("orientation off by {deviation_deg:.3} degrees")]
    WrongOrientation { deviation_deg: f64 },
    #[error("action belongs to {expected}, current sub-step is {current}")]
    WrongSubStep { expected: SubStep, current: SubStep },
    #[error("attach point {0} is not joined to anything")]
    NotJoined(AttachHandle),
    #[error("socket {0} is already in use")]
    SocketOccupied(AttachHandle),
    #[error("step {step} does not match the structure")]
    InvalidStep { step: usize },
    #[error("unknown attach point {0}")]
    UnknownAttachPoint(AttachHandle),
    #[error("no loose pipe socket within reach")]
    NoSocketInReach,
    #[error("{0} is not seated in a socket")]
    ScrewNotSeated(ScrewId),
    #[error("precondition not met")]
    Precondition,
}

/// Outcome of [`AssemblyVerifier::check_attach`].
#[derive(Debug, Clone, PartialEq)]
pub struct AttachCheck {
    pub accepted: bool,
    /// Attach point the join continues on. May differ from the one passed in
    /// when the piece was snapped to another symmetry.
    pub continuation: Option<AttachHandle>,
    /// Socket the continuation joins onto.
    pub partner: Option<AttachHandle>,
    /// Quarter turn about the socket axis still to be applied (pipes only).
    pub correction: Rotation,
    pub rejection: Option<Rejection>,
}

impl AttachCheck {
    fn accept(continuation: AttachHandle, partner: AttachHandle, correction: Rotation) -> Self {
        Self {
            accepted: true,
            continuation: Some(continuation),
            partner: Some(partner),
            correction,
            rejection: None,
        }
    }

    fn reject(rejection: Rejection) -> Self {
        Self {
            accepted: false,
            continuation: None,
            partner: None,
            correction: Rotation::identity(),
            rejection: Some(rejection),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifierSettings {
    pub symmetry_snapping: bool,
    pub allow_pipe_quarter_turns: bool,
    pub angle_tolerance_deg: f64,
}

impl From<&AssemblyConfig> for VerifierSettings {
    fn from(config: &AssemblyConfig) -> Self {
        Self {
            symmetry_snapping: config.symmetry_snapping,
            allow_pipe_quarter_turns: config.allow_pipe_quarter_turns,
            angle_tolerance_deg: config.angle_tolerance_deg,
        }
    }
}

pub struct AssemblyVerifier {
    plan: InstructionPlan,
    sequence: InstructionSequence,
    settings: VerifierSettings,
    invalid_steps: BTreeSet<usize>,
    sink: Box<dyn EventSink>,
}

impl std::fmt::Debug for AssemblyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblyVerifier")
            .field("plan", &self.plan.name)
            .field("sequence", &self.sequence)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AssemblyVerifier {
    pub fn new(plan: InstructionPlan, settings: VerifierSettings, sink: Box<dyn EventSink>) -> Self {
        let sequence = InstructionSequence::new(plan.len());
        Self {
            plan,
            sequence,
            settings,
            invalid_steps: BTreeSet::new(),
            sink,
        }
    }

    /// Steps that failed validation; verifying them always rejects.
    pub fn set_invalid_steps(&mut self, steps: BTreeSet<usize>) {
        self.invalid_steps = steps;
    }

    pub fn plan(&self) -> &InstructionPlan {
        &self.plan
    }

    pub fn sequence(&self) -> &InstructionSequence {
        &self.sequence
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    pub fn is_complete(&self) -> bool {
        self.sequence.is_complete()
    }

    /// The step being worked on, `None` once complete.
    pub fn current_step(&self) -> Option<&InstructionStep> {
        if self.sequence.is_complete() {
            return None;
        }
        self.plan.step(self.sequence.cursor())
    }

    /// Start (or restart) at step 0, `AttachPiece`.
    pub fn begin(&mut self) {
        self.sequence.reset();
        self.sink.record_sub_step(0, SubStep::AttachPiece);
        if self.sequence.is_complete() {
            info!(plan = %self.plan.name, "empty plan is complete from the start");
            self.sink.record_completion(0);
        }
    }

    /// Explicit reset. The only way the cursor goes back.
    pub fn reset(&mut self) {
        self.begin();
    }

    // ── Checks ─────────────────────────────────────────────────────────

    /// Verify joining `ap` onto `other` against the current step.
    ///
    /// `potential` is the relative rotation the join would realize; it is
    /// recomputed after a symmetry snap. On acceptance the snapped
    /// orientation is committed to the registry and the sequence moves to
    /// `InsertScrew`. On rejection nothing changes.
    pub fn check_attach(
        &mut self,
        registry: &mut StructureRegistry,
        ap: AttachHandle,
        other: AttachHandle,
        potential: Option<Rotation>,
    ) -> AttachCheck {
        if self.sequence.is_complete() {
            return AttachCheck::accept(ap, other, Rotation::identity());
        }
        let cursor = self.sequence.cursor();
        let Some(step) = self.usable_step(cursor) else {
            return AttachCheck::reject(Rejection::InvalidStep { step: cursor });
        };
        let step = step.clone();

        for h in [ap, other] {
            if registry.attach_point(h).is_none() {
                return AttachCheck::reject(Rejection::UnknownAttachPoint(h));
            }
        }

        let to_is_this = if ap.piece == step.source_id && other.piece == step.target_id {
            false
        } else if ap.piece == step.target_id && other.piece == step.source_id {
            true
        } else {
            info!(
                step = cursor,
                this = %ap.piece,
                other = %other.piece,
                "attached the wrong pieces"
            );
            return AttachCheck::reject(Rejection::WrongPieces {
                expected: (step.source_id, step.target_id),
                found: (ap.piece, other.piece),
            });
        };
        let (mut from, mut to) = if to_is_this { (other, ap) } else { (ap, other) };
        let mut this = ap;
        let mut that = other;

        let mut realized = match potential {
            Some(r) => r,
            None => match potential_this_to_other_with(registry, this, that, None) {
                Some(r) => r,
                None => return AttachCheck::reject(Rejection::UnknownAttachPoint(ap)),
            },
        };

        let mut staged: Option<(PieceId, Pose)> = None;
        if self.settings.symmetry_snapping {
            if let Some((snap, remapped)) = self.snap_to_symmetry(registry, &step, to) {
                if remapped != to {
                    debug!(from = to.index, to = remapped.index, "remapped for symmetry");
                    if registry.attach_point(remapped).is_some_and(|p| !p.is_free()) {
                        info!(socket = %remapped, "symmetric socket is occupied");
                        return AttachCheck::reject(Rejection::SocketOccupied(remapped));
                    }
                }
                to = remapped;
                (this, that) = if to_is_this { (to, from) } else { (from, to) };
                staged = Some((to.piece, snap));
                realized = match potential_this_to_other_with(registry, this, that, staged) {
                    Some(r) => r,
                    None => return AttachCheck::reject(Rejection::UnknownAttachPoint(to)),
                };
            }
        }
        from = if to_is_this { that } else { this };

        if to.index != step.target_index || from.index != step.source_index {
            info!(
                step = cursor,
                source = from.index,
                target = to.index,
                "attached correct pieces, but wrong attach points"
            );
            return AttachCheck::reject(Rejection::WrongSockets {
                expected: (step.source_index, step.target_index),
                found: (from.index, to.index),
            });
        }

        let prescribed = step.target_relative_rotation();
        let tolerance = self.settings.angle_tolerance_deg;
        let to_is_pipe = registry.piece(to.piece).is_some_and(|p| p.is_pipe());
        let correction = if to_is_pipe && self.settings.allow_pipe_quarter_turns {
            quarter_turns()
                .into_iter()
                .find(|c| angle_deg(&realized, &(prescribed * c)) <= tolerance)
        } else {
            (angle_deg(&realized, &prescribed) <= tolerance).then(Rotation::identity)
        };
        let Some(correction) = correction else {
            let deviation_deg = angle_deg(&realized, &prescribed);
            info!(step = cursor, deviation_deg, "attached with the wrong orientation");
            return AttachCheck::reject(Rejection::WrongOrientation { deviation_deg });
        };

        if let Some((piece, pose)) = staged {
            registry.move_piece(piece, pose);
        }
        debug!(step = cursor, continuation = %this, "attach verified");
        self.transit(SubStep::InsertScrew);
        AttachCheck::accept(this, that, correction)
    }

    /// Verify that the screw went into the connection the current step made.
    pub fn check_screw_insert(
        &mut self,
        registry: &StructureRegistry,
        ap: AttachHandle,
    ) -> Result<(), Rejection> {
        self.check_joined_pair(registry, ap, SubStep::InsertScrew)?;
        debug!(%ap, "screw insert verified");
        self.transit(SubStep::UseKey);
        Ok(())
    }

    /// Verify that the key was used on the connection the current step made.
    pub fn check_key_usage(
        &mut self,
        registry: &StructureRegistry,
        ap: AttachHandle,
    ) -> Result<(), Rejection> {
        self.check_joined_pair(registry, ap, SubStep::UseKey)?;
        debug!(%ap, "key usage verified");
        self.transit(SubStep::AttachPiece);
        Ok(())
    }

    fn check_joined_pair(
        &self,
        registry: &StructureRegistry,
        ap: AttachHandle,
        expected: SubStep,
    ) -> Result<(), Rejection> {
        if self.sequence.is_complete() {
            return Ok(());
        }
        let current = self.sequence.sub_step();
        if current != expected {
            info!(%expected, %current, "action out of order");
            return Err(Rejection::WrongSubStep { expected, current });
        }
        let cursor = self.sequence.cursor();
        let step = self
            .usable_step(cursor)
            .ok_or(Rejection::InvalidStep { step: cursor })?;
        let point = registry
            .attach_point(ap)
            .ok_or(Rejection::UnknownAttachPoint(ap))?;
        let partner = point.attached().ok_or(Rejection::NotJoined(ap))?;
        if !step.joins(ap.piece, partner.piece) {
            info!(step = cursor, this = %ap.piece, other = %partner.piece, "wrong pieces for {expected}");
            return Err(Rejection::WrongPieces {
                expected: (step.source_id, step.target_id),
                found: (ap.piece, partner.piece),
            });
        }
        Ok(())
    }

    // ── Targets ────────────────────────────────────────────────────────

    /// Where the incoming piece of `step` has to go: its socket on the
    /// source socket with the recorded relative rotation.
    pub fn target_pose(&self, registry: &StructureRegistry, step: &InstructionStep) -> Option<Pose> {
        let from_world = registry.attach_point_world_pose(step.source())?;
        let to_piece = registry.piece(step.target_id)?;
        let to_ap = to_piece.attach_point(step.target_index)?;
        let goal = from_world.rotation * step.source_relative_rotation();
        let rotation = goal * to_ap.local_rotation().inverse();
        let position = from_world.translation.vector
            - rotation * to_ap.local_position().component_mul(to_piece.scale());
        Some(pose_from(position, rotation))
    }

    /// Target pose turned by whichever symmetry of the incoming piece is
    /// closest to how it is held right now.
    pub fn symmetric_target_pose(
        &self,
        registry: &StructureRegistry,
        step: &InstructionStep,
    ) -> Option<Pose> {
        let target = self.target_pose(registry, step)?;
        let piece = registry.piece(step.target_id)?;
        let rotation = match closest_symmetry(piece.symmetries(), &target.rotation, piece.rotation()) {
            Some((_, s)) => target.rotation * s.rotational_offset(),
            None => target.rotation,
        };
        Some(pose_from(target.translation.vector, rotation))
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn usable_step(&self, index: usize) -> Option<&InstructionStep> {
        if self.invalid_steps.contains(&index) {
            error!(step = index, "step failed validation and cannot be verified");
            return None;
        }
        self.plan.step(index)
    }

    /// Closest symmetry of the target piece to its expected final pose:
    /// the snapped pose and the socket that now plays the target role.
    fn snap_to_symmetry(
        &self,
        registry: &StructureRegistry,
        step: &InstructionStep,
        to: AttachHandle,
    ) -> Option<(Pose, AttachHandle)> {
        let target = self.target_pose(registry, step)?;
        let piece = registry.piece(to.piece)?;
        let (index, symmetry) =
            closest_symmetry(piece.symmetries(), &target.rotation, piece.rotation())?;
        let remapped = symmetry.maps_to(to.index)?;
        debug!(piece = %to.piece, symmetry = index, "closest symmetry");
        let snapped = piece.rotation() * symmetry.rotational_offset().inverse();
        Some((
            pose_from(piece.position(), snapped),
            AttachHandle::new(to.piece, remapped),
        ))
    }

    fn transit(&mut self, to: SubStep) {
        if let Some(transition) = self.sequence.advance(to) {
            self.emit(transition);
        }
    }

    fn emit(&mut self, transition: SubStepTransition) {
        if transition.completed {
            info!(plan = %self.plan.name, steps = self.plan.len(), "assembly complete");
            self.sink.record_completion(self.plan.len());
        }
        self.sink
            .record_sub_step(transition.step, transition.sub_step);
    }
}
