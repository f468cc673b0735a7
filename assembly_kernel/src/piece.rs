//! Building pieces and the alignment math that snaps one socket onto another.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::attach_point::AttachPoint;
use crate::domain::{
    AlignSymmetry, BodyState, Hand, PieceColor, PieceId, PieceKind, SubstructureId,
};
use crate::error::SymmetryError;
use crate::math::{angle_deg, facing_flip, pose_from, Pose, Rotation};
use crate::symmetry::{alignment_orientations, Symmetry};

/// A rigid assembly unit.
///
/// The attach-point list is fixed in length for the piece's lifetime.
/// Slot order may be permuted by [`Piece::apply_symmetry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    id: Option<PieceId>,
    kind: PieceKind,
    color: PieceColor,
    pose: Pose,
    scale: Vector3<f64>,
    attach_points: Vec<AttachPoint>,
    symmetries: Vec<Symmetry>,
    current_symmetry: usize,
    parent: Option<SubstructureId>,
    body: BodyState,
    held_by: Option<Hand>,
}

/// Result of [`potential_alignment`]: where the moving piece must go and
/// which candidate rotation about the socket axis was used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub pose: Pose,
    pub offset: Rotation,
}

impl Piece {
    pub fn new(kind: PieceKind) -> Self {
        Self {
            id: None,
            kind,
            color: PieceColor::default(),
            pose: Pose::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            attach_points: Vec::new(),
            symmetries: Vec::new(),
            current_symmetry: 0,
            parent: None,
            body: BodyState::default(),
            held_by: None,
        }
    }

    /// Preset id. The registry assigns one lazily when absent.
    pub fn with_id(mut self, id: PieceId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_color(mut self, color: PieceColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_scale(mut self, scale: Vector3<f64>) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_attach_point(mut self, mut ap: AttachPoint) -> Self {
        ap.set_canonical_index(self.attach_points.len());
        self.attach_points.push(ap);
        self
    }

    pub fn with_symmetry(mut self, symmetry: Symmetry) -> Self {
        self.symmetries.push(symmetry);
        self
    }

    pub fn id(&self) -> Option<PieceId> {
        self.id
    }

    pub fn kind(&self) -> PieceKind {
        self.kind
    }

    pub fn color(&self) -> PieceColor {
        self.color
    }

    pub fn is_pipe(&self) -> bool {
        self.kind.is_pipe()
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn rotation(&self) -> &Rotation {
        &self.pose.rotation
    }

    pub fn position(&self) -> Vector3<f64> {
        self.pose.translation.vector
    }

    pub fn scale(&self) -> &Vector3<f64> {
        &self.scale
    }

    pub fn attach_points(&self) -> &[AttachPoint] {
        &self.attach_points
    }

    pub fn attach_point(&self, index: usize) -> Option<&AttachPoint> {
        self.attach_points.get(index)
    }

    pub fn symmetries(&self) -> &[Symmetry] {
        &self.symmetries
    }

    pub fn current_symmetry(&self) -> usize {
        self.current_symmetry
    }

    pub fn parent(&self) -> Option<SubstructureId> {
        self.parent
    }

    pub fn body(&self) -> BodyState {
        self.body
    }

    pub fn held_by(&self) -> Option<Hand> {
        self.held_by
    }

    /// World frame of socket `index` at the piece's current pose.
    pub fn attach_point_world_pose(&self, index: usize) -> Option<Pose> {
        self.attach_point_world_pose_at(index, &self.pose)
    }

    /// World frame of socket `index` if the piece stood at `pose`.
    pub fn attach_point_world_pose_at(&self, index: usize, pose: &Pose) -> Option<Pose> {
        self.attach_points
            .get(index)
            .map(|ap| ap.world_pose(pose, &self.scale))
    }

    /// Pose this piece must adopt so socket `index` sits on `other_world`,
    /// facing it. See [`potential_alignment`].
    pub fn alignment_onto(
        &self,
        index: usize,
        other_world: &Pose,
        other_class: AlignSymmetry,
        offset: Option<Rotation>,
    ) -> Option<Alignment> {
        self.alignment_onto_at(index, &self.pose, other_world, other_class, offset)
    }

    /// Same as [`Piece::alignment_onto`] with the piece standing at `pose`.
    pub fn alignment_onto_at(
        &self,
        index: usize,
        pose: &Pose,
        other_world: &Pose,
        other_class: AlignSymmetry,
        offset: Option<Rotation>,
    ) -> Option<Alignment> {
        let ap = self.attach_points.get(index)?;
        let this_world_rot = pose.rotation * ap.local_rotation();
        Some(potential_alignment(
            ap,
            &this_world_rot,
            &self.scale,
            other_world,
            other_class,
            offset,
        ))
    }

    /// Check every symmetry's mapping against the attach-point count.
    pub fn validate_symmetries(&self) -> Result<(), (usize, SymmetryError)> {
        for (i, s) in self.symmetries.iter().enumerate() {
            s.validate(self.attach_points.len()).map_err(|e| (i, e))?;
        }
        Ok(())
    }

    /// Re-index the attach points for symmetry `index`.
    ///
    /// Recomputed from the authored slot and rotation of every point, so
    /// applying the same symmetry twice leaves the piece unchanged. Returns,
    /// for every slot before the call, the slot its point now occupies.
    pub fn apply_symmetry(&mut self, index: usize) -> Result<Vec<usize>, SymmetryError> {
        let symmetry = self
            .symmetries
            .get(index)
            .ok_or(SymmetryError::UnknownSymmetry { index })?;
        symmetry.validate(self.attach_points.len())?;

        let count = self.attach_points.len();
        let mut moved = vec![0; count];
        let mut slots: Vec<Option<AttachPoint>> = vec![None; count];
        for (old_slot, mut ap) in std::mem::take(&mut self.attach_points)
            .into_iter()
            .enumerate()
        {
            let map = &symmetry.attach_point_mapping[ap.canonical_index()];
            let spun = ap.canonical_rotation() * map.rotational_offset();
            ap.set_local_rotation(spun);
            moved[old_slot] = map.attach_point_index;
            slots[map.attach_point_index] = Some(ap);
        }
        self.attach_points = slots.into_iter().flatten().collect();
        self.current_symmetry = index;
        Ok(moved)
    }

    // ── Crate-internal mutation ────────────────────────────────────────

    pub(crate) fn set_id(&mut self, id: PieceId) {
        self.id = Some(id);
    }

    pub(crate) fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<SubstructureId>) {
        self.parent = parent;
    }

    pub(crate) fn set_body(&mut self, body: BodyState) {
        self.body = body;
    }

    pub(crate) fn set_held_by(&mut self, hand: Option<Hand>) {
        self.held_by = hand;
    }

    pub(crate) fn attach_point_mut(&mut self, index: usize) -> Option<&mut AttachPoint> {
        self.attach_points.get_mut(index)
    }
}

/// Pose that puts a socket onto `other_world`, facing it.
///
/// Sockets point outward, so a join is a half turn about +Y plus one of the
/// target socket's allowed rotations about its own axis. When `offset` is
/// `None` the candidate closest to the socket's current world rotation is
/// chosen; the first candidate wins ties.
pub fn potential_alignment(
    this_ap: &AttachPoint,
    this_world_rot: &Rotation,
    scale: &Vector3<f64>,
    other_world: &Pose,
    other_class: AlignSymmetry,
    offset: Option<Rotation>,
) -> Alignment {
    let facing = other_world.rotation * facing_flip();
    let offset = offset.unwrap_or_else(|| {
        let mut best = Rotation::identity();
        let mut best_angle = f64::INFINITY;
        for q in alignment_orientations(other_class) {
            let a = angle_deg(&(facing * q), this_world_rot);
            if a < best_angle {
                best_angle = a;
                best = q;
            }
        }
        best
    });

    let rotation = facing * offset * this_ap.local_rotation().inverse();
    let position =
        other_world.translation.vector - rotation * this_ap.local_position().component_mul(scale);
    Alignment {
        pose: pose_from(position, rotation),
        offset,
    }
}

/// Relative rotation a join would realize if the moving socket were aligned
/// with `alignment`: `inverse(world rotation of moving socket) * other socket rotation`.
pub fn realized_this_to_other(
    this_ap: &AttachPoint,
    alignment: &Alignment,
    other_world_rot: &Rotation,
) -> Rotation {
    (alignment.pose.rotation * this_ap.local_rotation()).inverse() * other_world_rot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{about_forward, about_up, same_orientation};
    use crate::symmetry::AttachPointMap;
    use approx::assert_relative_eq;

    fn pipe() -> Piece {
        Piece::new(PieceKind::Pipe)
            .with_attach_point(AttachPoint::new(
                Vector3::new(0.0, 0.0, 0.5),
                Rotation::identity(),
            ))
            .with_attach_point(AttachPoint::new(
                Vector3::new(0.0, 0.0, -0.5),
                about_up(180.0),
            ))
            .with_symmetry(Symmetry::identity(2))
            .with_symmetry(Symmetry {
                euler_offset: [0.0, 180.0, 0.0],
                attach_point_mapping: vec![
                    AttachPointMap {
                        attach_point_index: 1,
                        euler_offset: [0.0, 0.0, 90.0],
                    },
                    AttachPointMap {
                        attach_point_index: 0,
                        euler_offset: [0.0; 3],
                    },
                ],
            })
    }

    #[test]
    fn aligned_sockets_coincide_and_face_each_other() {
        let other = pose_from(Vector3::new(1.0, 2.0, 3.0), about_forward(30.0));
        let p = pipe();
        let a = p
            .alignment_onto(0, &other, AlignSymmetry::Quarter, None)
            .unwrap();
        let socket = p.attach_point_world_pose_at(0, &a.pose).unwrap();
        assert_relative_eq!(
            (socket.translation.vector - other.translation.vector).norm(),
            0.0,
            epsilon = 1e-9
        );
        let forward = socket.rotation * Vector3::z();
        let other_forward = other.rotation * Vector3::z();
        assert_relative_eq!(forward.dot(&other_forward), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn realized_relative_rotation_is_a_half_turn() {
        let other = pose_from(Vector3::zeros(), Rotation::identity());
        let p = pipe();
        let a = p
            .alignment_onto(0, &other, AlignSymmetry::Quarter, Some(about_forward(90.0)))
            .unwrap();
        let r = realized_this_to_other(&p.attach_points()[0], &a, &other.rotation);
        assert!(same_orientation(&(r * r), &Rotation::identity(), 1e-6));
    }

    #[test]
    fn closest_candidate_follows_current_orientation() {
        let other = pose_from(Vector3::zeros(), Rotation::identity());
        let p = pipe().with_pose(pose_from(
            Vector3::zeros(),
            facing_flip() * about_forward(85.0),
        ));
        let a = p
            .alignment_onto(0, &other, AlignSymmetry::Quarter, None)
            .unwrap();
        assert!(same_orientation(&a.offset, &about_forward(90.0), 1e-6));

        let a = p.alignment_onto(0, &other, AlignSymmetry::None, None).unwrap();
        assert_eq!(a.offset, Rotation::identity());
    }

    #[test]
    fn applying_a_symmetry_twice_is_idempotent() {
        let mut p = pipe();
        let moved = p.apply_symmetry(1).unwrap();
        assert_eq!(moved, vec![1, 0]);
        let once = p.clone();
        let moved = p.apply_symmetry(1).unwrap();
        assert_eq!(moved, vec![0, 1]);
        assert_eq!(p, once);
        assert_eq!(p.attach_points()[1].canonical_index(), 0);
        assert!(same_orientation(
            p.attach_points()[1].local_rotation(),
            &about_forward(90.0),
            1e-9
        ));
    }

    #[test]
    fn identity_symmetry_restores_authored_layout() {
        let mut p = pipe();
        let authored = p.clone();
        p.apply_symmetry(1).unwrap();
        p.apply_symmetry(0).unwrap();
        assert_eq!(p, authored);
    }

    #[test]
    fn unknown_symmetry_is_rejected() {
        let mut p = pipe();
        assert_eq!(
            p.apply_symmetry(5),
            Err(SymmetryError::UnknownSymmetry { index: 5 })
        );
    }
}
