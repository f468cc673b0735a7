//! Lock-state machine for joined attach points.
//!
//! `FREE → LOOSE_LOCK → PARTIAL_LOCK → FULL_LOCK`, with `detach` returning
//! both endpoints to `FREE`. Every transition updates both endpoints
//! together so the link stays mutual. Precondition failures are logged
//! and leave the registry untouched.

use tracing::{debug, warn};

use crate::domain::{
    AlignBehavior, AlignSymmetry, AttachHandle, AttachMode, LockState, PieceId, ScrewId,
};
use crate::math::{Pose, Rotation};
use crate::piece::realized_this_to_other;
use crate::registry::StructureRegistry;
use crate::scene::ReparentRequest;

/// How a verified join is carried out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinParams {
    pub state: LockState,
    pub align: AlignBehavior,
    /// Overrides the stationary socket's own symmetry class when aligning.
    pub align_symmetry: Option<AlignSymmetry>,
    pub mode: AttachMode,
    /// Quarter turn about the socket axis reported by the verifier for pipes.
    pub correction: Option<Rotation>,
}

impl Default for JoinParams {
    fn default() -> Self {
        Self {
            state: LockState::LooseLock,
            align: AlignBehavior::AlignThis,
            align_symmetry: None,
            mode: AttachMode::ConfigurableJoint,
            correction: None,
        }
    }
}

/// Side effects of a completed join.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Joined {
    pub reparent: Option<ReparentRequest>,
}

/// Check the preconditions of a join. Logs and returns false on failure.
pub fn can_join(
    registry: &StructureRegistry,
    this: AttachHandle,
    other: AttachHandle,
    ignore_free_check: bool,
) -> bool {
    let (Some(a), Some(b)) = (registry.attach_point(this), registry.attach_point(other)) else {
        warn!(%this, %other, "attach between unknown attach points");
        return false;
    };
    if this.piece == other.piece {
        warn!(%this, %other, "cannot attach a piece to itself");
        return false;
    }
    if !ignore_free_check && (!a.is_free() || !b.is_free()) {
        warn!(
            %this,
            %other,
            this_state = ?a.lock_state(),
            other_state = ?b.lock_state(),
            "attach refused: attach points are not free"
        );
        return false;
    }
    // Skipping the free check only allows re-linking a pair to itself.
    let stale = [(this, a.attached(), other), (other, b.attached(), this)]
        .into_iter()
        .find(|(_, partner, expected)| partner.is_some_and(|p| p != *expected));
    if let Some((end, partner, _)) = stale {
        warn!(
            %this,
            %other,
            %end,
            partner = ?partner,
            "attach refused: attach point is joined elsewhere"
        );
        return false;
    }
    true
}

/// Align, link and physically realize a join between `this` and `other`.
///
/// Callers run [`can_join`] and the verifier first; this function only
/// fails on unknown handles.
pub fn join(
    registry: &mut StructureRegistry,
    this: AttachHandle,
    other: AttachHandle,
    params: JoinParams,
) -> Option<Joined> {
    match params.align {
        AlignBehavior::AlignThis => align_onto(registry, this, other, &params)?,
        AlignBehavior::AlignOther => align_onto(registry, other, this, &params)?,
        AlignBehavior::None => {}
    }

    let this_world = registry.attach_point_world_pose(this)?;
    let other_world = registry.attach_point_world_pose(other)?;
    let this_to_other = this_world.rotation.inverse() * other_world.rotation;

    // A remapped partner can leave one end linked to its old socket.
    for (end, counterpart) in [(this, other), (other, this)] {
        let stale = registry
            .attach_point(end)
            .and_then(|p| p.attached())
            .is_some_and(|p| p != counterpart);
        if stale {
            detach(registry, end, true);
        }
    }

    // Re-linking an existing pair: drop its joint and never lower the lock.
    let existing = registry
        .attach_point(this)
        .filter(|p| p.attached() == Some(other))
        .map(|p| (p.lock_state(), p.joint()));
    let mut state = params.state;
    if let Some((current, old_joint)) = existing {
        state = state.max(current);
        if let Some(old_joint) = old_joint {
            registry.scene_mut().destroy_joint(old_joint);
        }
    }

    let mut joined = Joined::default();
    let joint = match params.mode {
        AttachMode::ConfigurableJoint => Some(registry.scene_mut().create_joint(this, other)),
        AttachMode::Hierarchical => None,
    };
    registry
        .attach_point_mut(this)?
        .link(other, state, this_to_other, joint);
    registry
        .attach_point_mut(other)?
        .link(this, state, this_to_other.inverse(), joint);

    if params.mode == AttachMode::Hierarchical {
        joined.reparent = reparent(registry, this, other);
    }
    debug!(%this, %other, ?state, mode = ?params.mode, "attached");
    Some(joined)
}

/// Relative rotation a join of `this` onto `other` would realize if `this`
/// were aligned right now.
pub fn potential_this_to_other(
    registry: &StructureRegistry,
    this: AttachHandle,
    other: AttachHandle,
) -> Option<Rotation> {
    potential_this_to_other_with(registry, this, other, None)
}

/// Same as [`potential_this_to_other`] with one piece standing at a staged pose.
pub fn potential_this_to_other_with(
    registry: &StructureRegistry,
    this: AttachHandle,
    other: AttachHandle,
    staged: Option<(PieceId, Pose)>,
) -> Option<Rotation> {
    let pose_of = |id: PieceId| -> Option<Pose> {
        match staged {
            Some((staged_id, pose)) if staged_id == id => Some(pose),
            _ => registry.piece(id).map(|p| *p.pose()),
        }
    };
    let this_piece = registry.piece(this.piece)?;
    let other_piece = registry.piece(other.piece)?;
    let other_world = other_piece.attach_point_world_pose_at(other.index, &pose_of(other.piece)?)?;
    let class = other_piece.attach_point(other.index)?.align_symmetry();
    let alignment =
        this_piece.alignment_onto_at(this.index, &pose_of(this.piece)?, &other_world, class, None)?;
    Some(realized_this_to_other(
        this_piece.attach_point(this.index)?,
        &alignment,
        &other_world.rotation,
    ))
}

/// Move the piece owning `mover` so it sits on `anchor`.
fn align_onto(
    registry: &mut StructureRegistry,
    mover: AttachHandle,
    anchor: AttachHandle,
    params: &JoinParams,
) -> Option<()> {
    let anchor_world = registry.attach_point_world_pose(anchor)?;
    let class = match params.align_symmetry {
        Some(class) => class,
        None => registry.attach_point(anchor)?.align_symmetry(),
    };
    let piece = registry.piece(mover.piece)?;
    let mut alignment = piece.alignment_onto(mover.index, &anchor_world, class, None)?;
    if let Some(correction) = params.correction {
        let offset = correction.inverse() * alignment.offset;
        alignment = piece.alignment_onto(mover.index, &anchor_world, class, Some(offset))?;
    }
    registry.move_piece(mover.piece, alignment.pose);
    Some(())
}

fn reparent(
    registry: &mut StructureRegistry,
    this: AttachHandle,
    other: AttachHandle,
) -> Option<ReparentRequest> {
    let request = ReparentRequest::plan(
        registry.piece(this.piece)?,
        this.piece,
        registry.piece(other.piece)?,
        other.piece,
    );
    registry.apply_reparent(&request)?;
    Some(request)
}

/// Break the connection at `ap`.
///
/// Both endpoints must be loose unless `force`. Detaching a free point is
/// a no-op. A forced detach also drops any screw seated in either side.
pub fn detach(registry: &mut StructureRegistry, ap: AttachHandle, force: bool) -> bool {
    let Some(point) = registry.attach_point(ap) else {
        warn!(%ap, "detach of unknown attach point");
        return false;
    };
    let Some(partner) = point.attached() else {
        debug!(%ap, "detach of a free attach point ignored");
        return false;
    };
    let partner_loose = registry
        .attach_point(partner)
        .is_some_and(|p| p.is_loose());
    if !force && !(point.is_loose() && partner_loose) {
        warn!(%ap, state = ?point.lock_state(), "won't detach locked attach points");
        return false;
    }

    let joints: Vec<_> = [Some(point.joint()), registry.attach_point(partner).map(|p| p.joint())]
        .into_iter()
        .flatten()
        .flatten()
        .collect();
    for joint in joints {
        registry.scene_mut().destroy_joint(joint);
    }
    for end in [ap, partner] {
        let screw = registry.attach_point(end).and_then(|p| p.screw());
        if let Some(id) = screw {
            if let Some(s) = registry.screw_mut(id) {
                s.seated_in = None;
                s.driven = false;
            }
        }
        if let Some(p) = registry.attach_point_mut(end) {
            p.unlink();
            p.set_screw(None);
        }
    }
    debug!(%ap, %partner, forced = force, "detached");
    true
}

/// Seat `screw` in the loose connection at `ap`; both endpoints go to PARTIAL_LOCK.
pub fn partial_lock(registry: &mut StructureRegistry, ap: AttachHandle, screw: ScrewId) -> bool {
    let Some(point) = registry.attach_point(ap) else {
        warn!(%ap, "partial lock of unknown attach point");
        return false;
    };
    let (Some(partner), true) = (point.attached(), point.is_loose()) else {
        warn!(%ap, state = ?point.lock_state(), "partial lock requires a loose connection");
        return false;
    };
    let Some(position) = registry
        .attach_point_world_pose(ap)
        .map(|p| p.translation.vector)
    else {
        return false;
    };
    match registry.screw_mut(screw) {
        Some(s) if s.seated_in.is_none() => {
            s.seated_in = Some(ap);
            s.position = position;
        }
        Some(_) => {
            warn!(%screw, "screw is already seated");
            return false;
        }
        None => {
            warn!(%screw, "unknown screw");
            return false;
        }
    }
    if let Some(p) = registry.attach_point_mut(ap) {
        p.set_screw(Some(screw));
        p.set_lock_state(LockState::PartialLock);
    }
    if let Some(p) = registry.attach_point_mut(partner) {
        p.set_lock_state(LockState::PartialLock);
    }
    debug!(%ap, %screw, "partial lock");
    true
}

/// Turn a screwed connection into a permanent hierarchical one.
///
/// The partner is kept and not re-verified. Any physics joint is replaced
/// by shared substructure membership and both endpoints go to FULL_LOCK.
pub fn full_lock(registry: &mut StructureRegistry, ap: AttachHandle) -> Option<ReparentRequest> {
    let Some(point) = registry.attach_point(ap) else {
        warn!(%ap, "full lock of unknown attach point");
        return None;
    };
    if point.lock_state() != LockState::PartialLock {
        warn!(%ap, state = ?point.lock_state(), "full lock requires a partial lock");
        return None;
    }
    let partner = point.attached()?;
    let joint = point.joint();
    if let Some(joint) = joint {
        registry.scene_mut().destroy_joint(joint);
    }

    for end in [ap, partner] {
        let screw = registry.attach_point(end).and_then(|p| p.screw());
        if let Some(s) = screw.and_then(|id| registry.screw_mut(id)) {
            s.driven = true;
        }
        if let Some(p) = registry.attach_point_mut(end) {
            p.set_joint(None);
            p.set_lock_state(LockState::FullLock);
        }
    }
    let request = reparent(registry, ap, partner);
    debug!(%ap, %partner, "full lock");
    request
}
