//! AssemblySession: owns the registry and the verifier for one build.
//!
//! Every user action enters here. Each mutating operation runs to
//! completion (verification, lock transition, reparenting) before it
//! returns, then the registry invariants are checked.

use std::collections::BTreeSet;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::config::AssemblyConfig;
use crate::connection::{self, JoinParams};
use crate::domain::{
    AlignBehavior, AlignSymmetry, AttachHandle, AttachMode, Hand, LockState, PieceColor, PieceId,
    PieceKind, ScrewId, SubStep,
};
use crate::error::{AssemblyError, SymmetryError};
use crate::events::EventSink;
use crate::hashing;
use crate::instructions::{issue_step, InstructionPlan, InstructionSequence, InstructionStep};
use crate::invariants::validate_invariants;
use crate::math::{Pose, Rotation};
use crate::registry::StructureRegistry;
use crate::scene::ReparentRequest;
use crate::verifier::{AssemblyVerifier, Rejection, VerifierSettings};

/// Options for one attach attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachRequest {
    pub state: LockState,
    pub align: AlignBehavior,
    pub symmetry: Option<AlignSymmetry>,
    /// `None` uses the configured mode.
    pub mode: Option<AttachMode>,
    pub ignore_free_check: bool,
}

impl Default for AttachRequest {
    fn default() -> Self {
        Self {
            state: LockState::LooseLock,
            align: AlignBehavior::AlignThis,
            symmetry: None,
            mode: None,
            ignore_free_check: false,
        }
    }
}

/// What an attach attempt did.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachOutcome {
    pub accepted: bool,
    /// Socket the join was made on.
    pub continuation: Option<AttachHandle>,
    pub correction: Rotation,
    pub reparent: Option<ReparentRequest>,
    pub rejection: Option<Rejection>,
}

impl AttachOutcome {
    fn rejected(rejection: Rejection) -> Self {
        Self {
            accepted: false,
            continuation: None,
            correction: Rotation::identity(),
            reparent: None,
            rejection: Some(rejection),
        }
    }
}

/// What the hint layer should point at.
#[derive(Debug, Clone, PartialEq)]
pub enum HintTarget {
    /// Bring this piece to the target pose.
    Piece { piece: PieceId, kind: PieceKind, color: PieceColor },
    /// Put this screw into the hole.
    Screw { screw: ScrewId, hole: Pose },
    /// Turn the key in the hole.
    Key { hole: Pose },
    None,
}

/// Snapshot of what the user should do next.
#[derive(Debug, Clone, PartialEq)]
pub struct Guidance {
    pub step: usize,
    pub sub_step: SubStep,
    pub display_name: Option<String>,
    pub target_pose: Option<Pose>,
    pub symmetric_target: Option<Pose>,
    pub hint: HintTarget,
}

#[derive(Debug)]
pub struct AssemblySession {
    registry: StructureRegistry,
    verifier: AssemblyVerifier,
    config: AssemblyConfig,
    plan_issues: Vec<AssemblyError>,
    plan_hash: String,
}

impl AssemblySession {
    /// Build a session and begin the plan.
    ///
    /// Plan problems are logged and kept (see [`AssemblySession::plan_issues`]);
    /// steps they affect reject every action.
    pub fn new(
        mut registry: StructureRegistry,
        plan: InstructionPlan,
        config: AssemblyConfig,
        sink: Box<dyn EventSink>,
    ) -> Self {
        registry.set_snap_distance(config.snap_distance);
        let plan_issues = plan.validate_against(&registry);
        let invalid: BTreeSet<usize> = plan_issues.iter().filter_map(issue_step).collect();
        let plan_hash = hashing::plan_hash(&plan);
        let mut verifier = AssemblyVerifier::new(plan, VerifierSettings::from(&config), sink);
        verifier.set_invalid_steps(invalid);
        verifier.begin();
        validate_invariants(&registry);
        info!(
            plan = %verifier.plan().name,
            steps = verifier.plan().len(),
            pieces = registry.len(),
            "assembly session started"
        );
        Self {
            registry,
            verifier,
            config,
            plan_issues,
            plan_hash,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn registry(&self) -> &StructureRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn plan(&self) -> &InstructionPlan {
        self.verifier.plan()
    }

    pub fn plan_hash(&self) -> String {
        self.plan_hash.clone()
    }

    pub fn plan_issues(&self) -> &[AssemblyError] {
        &self.plan_issues
    }

    pub fn sequence(&self) -> &InstructionSequence {
        self.verifier.sequence()
    }

    pub fn current_step(&self) -> Option<&InstructionStep> {
        self.verifier.current_step()
    }

    pub fn is_complete(&self) -> bool {
        self.verifier.is_complete()
    }

    pub fn state_hash(&self) -> String {
        hashing::canonical_hash(self)
    }

    /// Restart the plan from step 0. Connections already made stay.
    pub fn reset(&mut self) {
        self.verifier.reset();
    }

    // ── Attach / detach ────────────────────────────────────────────────

    /// The user tried to join `this` onto `other`.
    pub fn attach(
        &mut self,
        this: AttachHandle,
        other: AttachHandle,
        request: AttachRequest,
    ) -> AttachOutcome {
        if !connection::can_join(&self.registry, this, other, request.ignore_free_check) {
            return AttachOutcome::rejected(Rejection::Precondition);
        }
        let potential = connection::potential_this_to_other(&self.registry, this, other);
        let check = self
            .verifier
            .check_attach(&mut self.registry, this, other, potential);
        let (true, Some(continuation), Some(partner)) =
            (check.accepted, check.continuation, check.partner)
        else {
            debug!(%this, %other, "will not attach because incorrect");
            self.validate();
            return AttachOutcome::rejected(check.rejection.unwrap_or(Rejection::Precondition));
        };

        let correction =
            (check.correction != Rotation::identity()).then_some(check.correction);
        let params = JoinParams {
            state: request.state,
            align: request.align,
            align_symmetry: request.symmetry,
            mode: request.mode.unwrap_or(self.config.attach_mode),
            correction,
        };
        let joined = connection::join(&mut self.registry, continuation, partner, params);
        self.validate();
        AttachOutcome {
            accepted: true,
            continuation: Some(continuation),
            correction: check.correction,
            reparent: joined.and_then(|j| j.reparent),
            rejection: None,
        }
    }

    /// Pull a loose connection apart (or any connection with `force`).
    pub fn detach(&mut self, ap: AttachHandle, force: bool) -> bool {
        let detached = connection::detach(&mut self.registry, ap, force);
        self.validate();
        detached
    }

    /// Try every socket of `piece` against the closest compatible free
    /// socket on another piece and attach the closest pair.
    pub fn snap_nearby(&mut self, piece: PieceId) -> Option<AttachOutcome> {
        let count = self.registry.piece(piece)?.attach_points().len();
        let mut best: Option<(AttachHandle, AttachHandle, f64)> = None;
        for index in 0..count {
            let here = AttachHandle::new(piece, index);
            if !self.registry.attach_point(here).is_some_and(|ap| ap.is_free()) {
                continue;
            }
            let Some(there) = self
                .registry
                .find_closest_compatible_attach_point(here, &[piece])
            else {
                continue;
            };
            let (Some(a), Some(b)) = (
                self.registry.attach_point_world_pose(here),
                self.registry.attach_point_world_pose(there),
            ) else {
                continue;
            };
            let distance = (a.translation.vector - b.translation.vector).norm();
            if best.map_or(true, |(_, _, d)| distance < d) {
                best = Some((here, there, distance));
            }
        }
        let (here, there, _) = best?;
        Some(self.attach(here, there, AttachRequest::default()))
    }

    // ── Screws and key ─────────────────────────────────────────────────

    /// The user let go of `screw` where it is. It goes into the nearest
    /// loose pipe socket within reach if that is what the plan expects.
    pub fn insert_screw(&mut self, screw: ScrewId) -> Result<AttachHandle, Rejection> {
        let position = match self.registry.screw(screw) {
            Some(s) if s.seated_in.is_none() => s.position,
            Some(_) => {
                warn!(%screw, "screw is already seated");
                return Err(Rejection::Precondition);
            }
            None => {
                warn!(%screw, "unknown screw");
                return Err(Rejection::Precondition);
            }
        };
        let hole = self
            .registry
            .find_closest_free_attach_point(&position, LockState::LooseLock, true)
            .ok_or(Rejection::NoSocketInReach)?;
        self.verifier.check_screw_insert(&self.registry, hole)?;
        if !connection::partial_lock(&mut self.registry, hole, screw) {
            warn!(%screw, %hole, "screw insert verified but the partial lock failed");
            self.validate();
            return Err(Rejection::Precondition);
        }
        self.validate();
        Ok(hole)
    }

    /// The key was turned in `screw`: drive it home and make the connection permanent.
    pub fn use_key(&mut self, screw: ScrewId) -> Result<Option<ReparentRequest>, Rejection> {
        let hole = self
            .registry
            .screw(screw)
            .and_then(|s| s.seated_in)
            .ok_or(Rejection::ScrewNotSeated(screw))?;
        let state = self.registry.attach_point(hole).map(|ap| ap.lock_state());
        if state != Some(LockState::PartialLock) {
            warn!(%screw, ?state, "key used on a connection that is not partially locked");
            return Err(Rejection::Precondition);
        }
        self.verifier.check_key_usage(&self.registry, hole)?;
        let reparent = connection::full_lock(&mut self.registry, hole);
        self.validate();
        Ok(reparent)
    }

    // ── Input layer ────────────────────────────────────────────────────

    pub fn move_piece(&mut self, piece: PieceId, pose: Pose) {
        self.registry.move_piece(piece, pose);
    }

    pub fn move_screw(&mut self, screw: ScrewId, position: Vector3<f64>) {
        self.registry.move_screw(screw, position);
    }

    pub fn grab(&mut self, piece: PieceId, hand: Hand) -> bool {
        self.registry.grab(piece, hand)
    }

    pub fn release(&mut self, hand: Hand) {
        self.registry.release(hand);
    }

    pub fn rotate_indices(&mut self, piece: PieceId, symmetry: usize) -> Result<(), SymmetryError> {
        let result = self.registry.rotate_indices(piece, symmetry);
        self.validate();
        result
    }

    pub fn remove_piece(&mut self, piece: PieceId) -> bool {
        let removed = self.registry.remove(piece).is_some();
        self.validate();
        removed
    }

    // ── Guidance ───────────────────────────────────────────────────────

    /// Current step, sub-step and where to look.
    pub fn guidance(&self) -> Guidance {
        let sequence = self.verifier.sequence();
        let mut guidance = Guidance {
            step: sequence.cursor(),
            sub_step: sequence.sub_step(),
            display_name: None,
            target_pose: None,
            symmetric_target: None,
            hint: HintTarget::None,
        };
        let Some(step) = self.verifier.current_step() else {
            return guidance;
        };
        guidance.display_name = Some(step.display_name.clone());
        guidance.target_pose = self.verifier.target_pose(&self.registry, step);
        guidance.symmetric_target = self.verifier.symmetric_target_pose(&self.registry, step);
        guidance.hint = match sequence.sub_step() {
            SubStep::AttachPiece => match self.registry.piece(step.target_id) {
                Some(p) => HintTarget::Piece {
                    piece: step.target_id,
                    kind: p.kind(),
                    color: p.color(),
                },
                None => HintTarget::None,
            },
            SubStep::InsertScrew => match self.screw_hole(step) {
                Some(hole) => HintTarget::Screw {
                    screw: ScrewId(sequence.cursor() as u32),
                    hole,
                },
                None => HintTarget::None,
            },
            SubStep::UseKey => match self.screw_hole(step) {
                Some(hole) => HintTarget::Key { hole },
                None => HintTarget::None,
            },
        };
        guidance
    }

    /// Socket on the pipe side of `step`, where its screw goes.
    fn screw_hole(&self, step: &InstructionStep) -> Option<Pose> {
        let target_is_pipe = self
            .registry
            .piece(step.target_id)
            .is_some_and(|p| p.is_pipe());
        let hole = if target_is_pipe {
            step.target()
        } else {
            step.source()
        };
        self.registry.attach_point_world_pose(hole)
    }

    fn validate(&self) {
        validate_invariants(&self.registry);
    }
}
