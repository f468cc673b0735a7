//! Attach points: directional sockets owned by a piece.
//!
//! An attach point never holds a reference to its partner, only an
//! [`AttachHandle`]. Lock-state transitions live in [`crate::connection`],
//! which is the only place that writes the link fields.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::domain::{AlignSymmetry, AttachHandle, JointId, LockState, ScrewId};
use crate::math::{pose_from, Pose, Rotation};
use crate::symmetry::alignment_orientations;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachPoint {
    local_position: Vector3<f64>,
    /// Local rotation as authored, before any symmetry is applied.
    canonical_rotation: Rotation,
    local_rotation: Rotation,
    /// Slot this point occupied in the authored list.
    canonical_index: usize,
    align_symmetry: AlignSymmetry,
    lock_state: LockState,
    attached: Option<AttachHandle>,
    screw: Option<ScrewId>,
    this_to_other: Rotation,
    joint: Option<JointId>,
}

impl AttachPoint {
    pub fn new(local_position: Vector3<f64>, local_rotation: Rotation) -> Self {
        Self {
            local_position,
            canonical_rotation: local_rotation,
            local_rotation,
            canonical_index: 0,
            align_symmetry: AlignSymmetry::default(),
            lock_state: LockState::Free,
            attached: None,
            screw: None,
            this_to_other: Rotation::identity(),
            joint: None,
        }
    }

    pub fn with_align_symmetry(mut self, class: AlignSymmetry) -> Self {
        self.align_symmetry = class;
        self
    }

    pub fn local_position(&self) -> &Vector3<f64> {
        &self.local_position
    }

    pub fn local_rotation(&self) -> &Rotation {
        &self.local_rotation
    }

    pub fn canonical_rotation(&self) -> &Rotation {
        &self.canonical_rotation
    }

    pub fn canonical_index(&self) -> usize {
        self.canonical_index
    }

    pub fn align_symmetry(&self) -> AlignSymmetry {
        self.align_symmetry
    }

    pub fn lock_state(&self) -> LockState {
        self.lock_state
    }

    pub fn attached(&self) -> Option<AttachHandle> {
        self.attached
    }

    pub fn screw(&self) -> Option<ScrewId> {
        self.screw
    }

    /// Relative rotation from this socket's frame to its partner's.
    /// Identity while free.
    pub fn this_to_other(&self) -> &Rotation {
        &self.this_to_other
    }

    pub fn joint(&self) -> Option<JointId> {
        self.joint
    }

    pub fn is_free(&self) -> bool {
        self.lock_state == LockState::Free
    }

    pub fn is_loose(&self) -> bool {
        self.lock_state == LockState::LooseLock
    }

    /// Candidate rotations about this socket's axis used when something aligns onto it.
    pub fn orientations_to_align_to(&self) -> Vec<Rotation> {
        alignment_orientations(self.align_symmetry)
    }

    /// World frame of this socket for a piece at `piece_pose` with per-axis `scale`.
    pub fn world_pose(&self, piece_pose: &Pose, scale: &Vector3<f64>) -> Pose {
        let scaled = self.local_position.component_mul(scale);
        pose_from(
            piece_pose.translation.vector + piece_pose.rotation * scaled,
            piece_pose.rotation * self.local_rotation,
        )
    }

    // ── Mutators used by the piece and the connection machine ──────────

    pub(crate) fn set_canonical_index(&mut self, index: usize) {
        self.canonical_index = index;
    }

    pub(crate) fn set_local_rotation(&mut self, rotation: Rotation) {
        self.local_rotation = rotation;
    }

    pub(crate) fn link(
        &mut self,
        other: AttachHandle,
        state: LockState,
        this_to_other: Rotation,
        joint: Option<JointId>,
    ) {
        self.attached = Some(other);
        self.lock_state = state;
        self.this_to_other = this_to_other;
        self.joint = joint;
    }

    pub(crate) fn unlink(&mut self) {
        self.attached = None;
        self.lock_state = LockState::Free;
        self.this_to_other = Rotation::identity();
        self.joint = None;
    }

    pub(crate) fn set_lock_state(&mut self, state: LockState) {
        self.lock_state = state;
    }

    pub(crate) fn set_screw(&mut self, screw: Option<ScrewId>) {
        self.screw = screw;
    }

    pub(crate) fn set_joint(&mut self, joint: Option<JointId>) {
        self.joint = joint;
    }

    pub(crate) fn retarget(&mut self, other: AttachHandle) {
        self.attached = Some(other);
    }
}
