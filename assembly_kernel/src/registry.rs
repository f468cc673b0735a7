//! Structure registry: every piece, screw and scene node in the assembly.
//!
//! Owns the pieces and the scene graph. Spatial queries are linear scans
//! in registration order, so ties resolve to the earlier-registered piece.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attach_point::AttachPoint;
use crate::connection;
use crate::domain::{AttachHandle, Hand, LockState, PieceId, ScrewId, SubstructureId};
use crate::error::SymmetryError;
use crate::math::{pose_from, Pose, Rotation};
use crate::piece::Piece;
use crate::scene::{ReparentRequest, ReparentTarget, SceneGraph};

/// Default maximum distance between two sockets for a snap.
pub const DEFAULT_SNAP_DISTANCE: f64 = 0.1;

/// A screw offered to the user. Screw `i` belongs to plan step `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screw {
    pub id: ScrewId,
    pub position: Vector3<f64>,
    /// Socket the screw has been inserted into.
    pub seated_in: Option<AttachHandle>,
    /// Driven home with the key.
    pub driven: bool,
}

impl Screw {
    pub fn new(id: ScrewId, position: Vector3<f64>) -> Self {
        Self {
            id,
            position,
            seated_in: None,
            driven: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRegistry {
    pieces: BTreeMap<PieceId, Piece>,
    order: Vec<PieceId>,
    screws: BTreeMap<ScrewId, Screw>,
    scene: SceneGraph,
    next_id: u32,
    snap_distance: f64,
}

impl Default for StructureRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SNAP_DISTANCE)
    }
}

impl StructureRegistry {
    pub fn new(snap_distance: f64) -> Self {
        Self {
            pieces: BTreeMap::new(),
            order: Vec::new(),
            screws: BTreeMap::new(),
            scene: SceneGraph::default(),
            next_id: 1,
            snap_distance,
        }
    }

    pub fn snap_distance(&self) -> f64 {
        self.snap_distance
    }

    pub fn set_snap_distance(&mut self, distance: f64) {
        self.snap_distance = distance;
    }

    // ── Registration ───────────────────────────────────────────────────

    /// Register a piece and return its id.
    ///
    /// A piece without a preset id gets the next free one. Registering a
    /// piece whose preset id is already taken is a no-op that returns that id.
    pub fn register(&mut self, mut piece: Piece) -> PieceId {
        let id = match piece.id() {
            Some(id) => {
                if self.pieces.contains_key(&id) {
                    warn!(piece = %id, "piece already registered");
                    return id;
                }
                id
            }
            None => {
                let mut candidate = PieceId(self.next_id);
                while self.pieces.contains_key(&candidate) {
                    candidate = PieceId(candidate.0 + 1);
                }
                piece.set_id(candidate);
                candidate
            }
        };
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        debug!(piece = %id, kind = ?piece.kind(), "registered piece");
        self.pieces.insert(id, piece);
        self.order.push(id);
        id
    }

    /// Remove a piece from the simulation.
    ///
    /// Every connection it holds is force-detached and any screw seated in it
    /// falls out.
    pub fn remove(&mut self, id: PieceId) -> Option<Piece> {
        let count = self.pieces.get(&id)?.attach_points().len();
        for index in 0..count {
            connection::detach(self, AttachHandle::new(id, index), true);
        }
        for screw in self.screws.values_mut() {
            if screw.seated_in.is_some_and(|h| h.piece == id) {
                screw.seated_in = None;
                screw.driven = false;
            }
        }
        let piece = self.pieces.remove(&id)?;
        if let Some(parent) = piece.parent() {
            self.leave_substructure(parent, id);
        }
        self.order.retain(|p| *p != id);
        debug!(piece = %id, "removed piece");
        Some(piece)
    }

    pub fn add_screw(&mut self, screw: Screw) {
        if self.screws.contains_key(&screw.id) {
            warn!(screw = %screw.id, "screw already registered");
            return;
        }
        self.screws.insert(screw.id, screw);
    }

    // ── Lookup ─────────────────────────────────────────────────────────

    pub fn contains(&self, id: PieceId) -> bool {
        self.pieces.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn piece(&self, id: PieceId) -> Option<&Piece> {
        self.pieces.get(&id)
    }

    /// Pieces in registration order.
    pub fn pieces(&self) -> impl Iterator<Item = (PieceId, &Piece)> {
        self.order
            .iter()
            .filter_map(|id| self.pieces.get(id).map(|p| (*id, p)))
    }

    pub fn attach_point(&self, handle: AttachHandle) -> Option<&AttachPoint> {
        self.pieces.get(&handle.piece)?.attach_point(handle.index)
    }

    pub fn attach_point_world_pose(&self, handle: AttachHandle) -> Option<Pose> {
        self.pieces
            .get(&handle.piece)?
            .attach_point_world_pose(handle.index)
    }

    pub fn screw(&self, id: ScrewId) -> Option<&Screw> {
        self.screws.get(&id)
    }

    pub fn screws(&self) -> impl Iterator<Item = &Screw> {
        self.screws.values()
    }

    pub fn screw_count(&self) -> usize {
        self.screws.len()
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub(crate) fn piece_mut(&mut self, id: PieceId) -> Option<&mut Piece> {
        self.pieces.get_mut(&id)
    }

    pub(crate) fn attach_point_mut(&mut self, handle: AttachHandle) -> Option<&mut AttachPoint> {
        self.pieces
            .get_mut(&handle.piece)?
            .attach_point_mut(handle.index)
    }

    pub(crate) fn screw_mut(&mut self, id: ScrewId) -> Option<&mut Screw> {
        self.screws.get_mut(&id)
    }

    pub(crate) fn scene_mut(&mut self) -> &mut SceneGraph {
        &mut self.scene
    }

    // ── Spatial queries ────────────────────────────────────────────────

    /// Closest socket in `lock_filter` state to `position`, within the snap distance.
    pub fn find_closest_free_attach_point(
        &self,
        position: &Vector3<f64>,
        lock_filter: LockState,
        pipes_only: bool,
    ) -> Option<AttachHandle> {
        let (handle, distance) = self.closest(position, |piece, _, ap| {
            ap.lock_state() == lock_filter && (!pipes_only || piece.is_pipe())
        })?;
        (distance <= self.snap_distance).then_some(handle)
    }

    /// Closest free socket on a complementary piece to `from`, within the
    /// snap distance. Pieces in `ignore` are skipped.
    pub fn find_closest_compatible_attach_point(
        &self,
        from: AttachHandle,
        ignore: &[PieceId],
    ) -> Option<AttachHandle> {
        let from_kind = self.pieces.get(&from.piece)?.kind();
        let origin = self.attach_point_world_pose(from)?.translation.vector;
        let (handle, distance) = self.closest(&origin, |piece, id, ap| {
            id != from.piece
                && !ignore.contains(&id)
                && piece.kind().complements(from_kind)
                && ap.is_free()
        })?;
        (distance <= self.snap_distance).then_some(handle)
    }

    fn closest<F>(&self, position: &Vector3<f64>, mut accept: F) -> Option<(AttachHandle, f64)>
    where
        F: FnMut(&Piece, PieceId, &AttachPoint) -> bool,
    {
        let mut best: Option<(AttachHandle, f64)> = None;
        for (id, piece) in self.pieces() {
            for (index, ap) in piece.attach_points().iter().enumerate() {
                if !accept(piece, id, ap) {
                    continue;
                }
                let world = ap.world_pose(piece.pose(), piece.scale());
                let distance = (world.translation.vector - position).norm();
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((AttachHandle::new(id, index), distance));
                }
            }
        }
        best
    }

    // ── Symmetry ───────────────────────────────────────────────────────

    /// Re-index `piece`'s attach points for one of its symmetries.
    ///
    /// Links, seated screws and joints that refer to the piece's slots are
    /// rewritten so every reference still names the same physical socket.
    pub fn rotate_indices(&mut self, piece: PieceId, symmetry: usize) -> Result<(), SymmetryError> {
        let Some(target) = self.pieces.get_mut(&piece) else {
            warn!(piece = %piece, "rotate_indices on unknown piece");
            return Ok(());
        };
        let moved = target.apply_symmetry(symmetry)?;
        let fix = |h: AttachHandle| -> AttachHandle {
            if h.piece == piece {
                AttachHandle::new(piece, moved.get(h.index).copied().unwrap_or(h.index))
            } else {
                h
            }
        };

        let mut retargets = Vec::new();
        for (id, p) in &self.pieces {
            for (index, ap) in p.attach_points().iter().enumerate() {
                if let Some(h) = ap.attached() {
                    let fixed = fix(h);
                    if fixed != h {
                        retargets.push((AttachHandle::new(*id, index), fixed));
                    }
                }
            }
        }
        for (at, to) in retargets {
            if let Some(ap) = self.attach_point_mut(at) {
                ap.retarget(to);
            }
        }
        for screw in self.screws.values_mut() {
            screw.seated_in = screw.seated_in.map(fix);
        }
        self.scene.remap_piece_slots(piece, &moved);
        debug!(piece = %piece, symmetry, "rotated attach point indices");
        Ok(())
    }

    // ── Poses, grabs and screws ────────────────────────────────────────

    /// Move a piece. A piece inside a substructure drags the whole
    /// substructure along rigidly.
    pub fn move_piece(&mut self, id: PieceId, pose: Pose) {
        let Some(piece) = self.pieces.get(&id) else {
            warn!(piece = %id, "move of unknown piece");
            return;
        };
        match piece.parent() {
            Some(parent) => {
                let delta = pose * piece.pose().inverse();
                self.transform_substructure(parent, &delta);
            }
            None => {
                if let Some(piece) = self.pieces.get_mut(&id) {
                    piece.set_pose(pose);
                }
            }
        }
    }

    /// Move a substructure to `pose`, carrying its members and their screws.
    pub fn move_substructure(&mut self, id: SubstructureId, pose: Pose) {
        let Some(s) = self.scene.substructure(id) else {
            warn!(substructure = id.0, "move of unknown substructure");
            return;
        };
        let delta = pose * s.pose.inverse();
        self.transform_substructure(id, &delta);
    }

    fn transform_substructure(&mut self, id: SubstructureId, delta: &Pose) {
        let Some(s) = self.scene.substructure_mut(id) else {
            return;
        };
        s.pose = delta * s.pose;
        let members: Vec<PieceId> = s.members.iter().copied().collect();
        for member in &members {
            if let Some(p) = self.pieces.get_mut(member) {
                let moved = delta * p.pose();
                p.set_pose(moved);
            }
        }
        for screw in self.screws.values_mut() {
            if screw.seated_in.is_some_and(|h| members.contains(&h.piece)) {
                screw.position = delta.transform_point(&Point3::from(screw.position)).coords;
            }
        }
    }

    pub fn move_screw(&mut self, id: ScrewId, position: Vector3<f64>) {
        match self.screws.get_mut(&id) {
            Some(screw) if screw.seated_in.is_none() => screw.position = position,
            Some(_) => warn!(screw = %id, "seated screw cannot be moved"),
            None => warn!(screw = %id, "move of unknown screw"),
        }
    }

    /// Put `piece` (or the substructure it belongs to) in `hand`.
    pub fn grab(&mut self, piece: PieceId, hand: Hand) -> bool {
        let Some(p) = self.pieces.get(&piece) else {
            warn!(piece = %piece, "grab of unknown piece");
            return false;
        };
        let parent = p.parent();
        let interactable = p.body().interactable;
        if parent.is_none() && !interactable {
            warn!(piece = %piece, "piece is not interactable");
            return false;
        }
        self.release(hand);
        match parent {
            Some(s) => {
                if let Some(s) = self.scene.substructure_mut(s) {
                    s.grabbed_by = Some(hand);
                }
            }
            None => {
                if let Some(p) = self.pieces.get_mut(&piece) {
                    p.set_held_by(Some(hand));
                }
            }
        }
        true
    }

    /// Let go of whatever `hand` holds.
    pub fn release(&mut self, hand: Hand) {
        for p in self.pieces.values_mut() {
            if p.held_by() == Some(hand) {
                p.set_held_by(None);
            }
        }
        self.scene.release_hand(hand);
    }

    // ── Reparenting ────────────────────────────────────────────────────

    /// Apply a planned hierarchical join to the scene graph.
    pub(crate) fn apply_reparent(&mut self, request: &ReparentRequest) -> Option<SubstructureId> {
        let target = match request.target {
            ReparentTarget::Existing(id) => id,
            ReparentTarget::New { origin } => self
                .scene
                .create_substructure(pose_from(origin, Rotation::identity())),
        };
        self.scene.substructure(target)?;

        let mut joining = vec![request.this_piece, request.other_piece];
        if let Some(merged) = request.merged {
            if let Some(old) = self.scene.remove_substructure(merged) {
                if let Some(hand) = old.grabbed_by {
                    debug!(substructure = merged.0, ?hand, "merged substructure released");
                }
                joining.extend(old.members);
            }
        }

        for hand in &request.released {
            self.release(*hand);
        }
        for id in &joining {
            if let Some(p) = self.pieces.get_mut(id) {
                p.set_parent(Some(target));
                p.set_body(crate::domain::BodyState::stripped());
                p.set_held_by(None);
            }
        }
        if let Some(hand) = request.grab_transfer {
            self.scene.release_hand(hand);
        }
        let s = self.scene.substructure_mut(target)?;
        s.members.extend(joining);
        if let Some(hand) = request.grab_transfer {
            s.grabbed_by = Some(hand);
        }
        debug!(substructure = target.0, members = s.members.len(), "reparented pieces");
        Some(target)
    }

    fn leave_substructure(&mut self, parent: SubstructureId, piece: PieceId) {
        let empty = match self.scene.substructure_mut(parent) {
            Some(s) => {
                s.members.remove(&piece);
                s.members.is_empty()
            }
            None => false,
        };
        if empty {
            self.scene.remove_substructure(parent);
        }
    }
}
