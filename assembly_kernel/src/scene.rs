//! Scene graph: substructures, joints and grab state.
//!
//! Pieces always carry world poses. A substructure groups the pieces that
//! move as one body once hierarchically joined; it owns the physics and
//! grab flags its members had stripped.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::domain::{AttachHandle, BodyState, Hand, JointId, PieceId, SubstructureId};
use crate::math::Pose;
use crate::piece::Piece;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substructure {
    pub id: SubstructureId,
    pub pose: Pose,
    pub members: BTreeSet<PieceId>,
    pub grabbed_by: Option<Hand>,
    pub body: BodyState,
}

/// A locked physics joint between two joined sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joint {
    pub id: JointId,
    pub a: AttachHandle,
    pub b: AttachHandle,
}

/// Which substructure a hierarchical join ends up under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReparentTarget {
    Existing(SubstructureId),
    /// Neither piece had a parent: create one at `origin`.
    New { origin: Vector3<f64> },
}

/// Scene mutation implied by a hierarchical join.
///
/// Returned alongside every accepted hierarchical attach so a host engine
/// can mirror it; the registry applies the same request to its own graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReparentRequest {
    pub this_piece: PieceId,
    pub other_piece: PieceId,
    pub target: ReparentTarget,
    /// Substructure of `this_piece` that merges into the target, if any.
    pub merged: Option<SubstructureId>,
    /// Hand that was holding the other piece and now holds the substructure.
    pub grab_transfer: Option<Hand>,
    /// Hands that let go of either piece.
    pub released: Vec<Hand>,
}

impl ReparentRequest {
    /// Plan the reparenting of `this` and `other` under a shared substructure.
    ///
    /// The other piece's substructure wins when both have one.
    pub fn plan(this: &Piece, this_id: PieceId, other: &Piece, other_id: PieceId) -> Self {
        let target = match (this.parent(), other.parent()) {
            (_, Some(s)) => ReparentTarget::Existing(s),
            (Some(s), None) => ReparentTarget::Existing(s),
            (None, None) => ReparentTarget::New {
                origin: other.position(),
            },
        };
        let merged = match (this.parent(), other.parent()) {
            (Some(a), Some(b)) if a != b => Some(a),
            _ => None,
        };
        let mut released = Vec::new();
        for hand in [this.held_by(), other.held_by()].into_iter().flatten() {
            if !released.contains(&hand) {
                released.push(hand);
            }
        }
        Self {
            this_piece: this_id,
            other_piece: other_id,
            target,
            merged,
            grab_transfer: other.held_by(),
            released,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneGraph {
    substructures: BTreeMap<SubstructureId, Substructure>,
    joints: BTreeMap<JointId, Joint>,
    next_substructure: u32,
    next_joint: u32,
}

impl SceneGraph {
    pub fn substructures(&self) -> impl Iterator<Item = &Substructure> {
        self.substructures.values()
    }

    pub fn substructure(&self, id: SubstructureId) -> Option<&Substructure> {
        self.substructures.get(&id)
    }

    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.values()
    }

    pub fn joint(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(&id)
    }

    /// Substructure currently held by `hand`.
    pub fn grabbed_by(&self, hand: Hand) -> Option<SubstructureId> {
        self.substructures
            .values()
            .find(|s| s.grabbed_by == Some(hand))
            .map(|s| s.id)
    }

    pub(crate) fn substructure_mut(&mut self, id: SubstructureId) -> Option<&mut Substructure> {
        self.substructures.get_mut(&id)
    }

    pub(crate) fn create_substructure(&mut self, pose: Pose) -> SubstructureId {
        let id = SubstructureId(self.next_substructure);
        self.next_substructure += 1;
        self.substructures.insert(
            id,
            Substructure {
                id,
                pose,
                members: BTreeSet::new(),
                grabbed_by: None,
                body: BodyState::default(),
            },
        );
        id
    }

    pub(crate) fn remove_substructure(&mut self, id: SubstructureId) -> Option<Substructure> {
        self.substructures.remove(&id)
    }

    pub(crate) fn create_joint(&mut self, a: AttachHandle, b: AttachHandle) -> JointId {
        let id = JointId(self.next_joint);
        self.next_joint += 1;
        self.joints.insert(id, Joint { id, a, b });
        id
    }

    pub(crate) fn destroy_joint(&mut self, id: JointId) -> Option<Joint> {
        self.joints.remove(&id)
    }

    /// Rewrite joint ends on `piece` after its slots were permuted.
    pub(crate) fn remap_piece_slots(&mut self, piece: PieceId, moved: &[usize]) {
        for joint in self.joints.values_mut() {
            for end in [&mut joint.a, &mut joint.b] {
                if end.piece == piece {
                    if let Some(&slot) = moved.get(end.index) {
                        end.index = slot;
                    }
                }
            }
        }
    }

    /// Drop `hand`'s grab on any substructure.
    pub(crate) fn release_hand(&mut self, hand: Hand) {
        for s in self.substructures.values_mut() {
            if s.grabbed_by == Some(hand) {
                s.grabbed_by = None;
            }
        }
    }
}
