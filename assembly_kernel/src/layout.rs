//! Authored layouts: the pieces and screws laid out before a session starts.

use std::collections::BTreeSet;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::attach_point::AttachPoint;
use crate::domain::{AlignSymmetry, PieceColor, PieceId, PieceKind, ScrewId};
use crate::error::{AssemblyError, AssemblyResult};
use crate::math::{pose_from, QuatRecord};
use crate::piece::Piece;
use crate::registry::{Screw, StructureRegistry};
use crate::symmetry::Symmetry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachPointSpec {
    pub position: [f64; 3],
    #[serde(default)]
    pub rotation: QuatRecord,
    #[serde(default)]
    pub align_symmetry: AlignSymmetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PieceSpec {
    /// Preset runtime id; pieces without one are numbered on registration.
    #[serde(default)]
    pub id: Option<PieceId>,
    pub kind: PieceKind,
    #[serde(default)]
    pub color: PieceColor,
    #[serde(default)]
    pub position: [f64; 3],
    #[serde(default)]
    pub rotation: QuatRecord,
    #[serde(default = "unit_scale")]
    pub scale: [f64; 3],
    pub attach_points: Vec<AttachPointSpec>,
    #[serde(default)]
    pub symmetries: Vec<Symmetry>,
}

fn unit_scale() -> [f64; 3] {
    [1.0; 3]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrewSpec {
    /// Plan step this screw belongs to.
    pub index: u32,
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layout {
    pub pieces: Vec<PieceSpec>,
    #[serde(default)]
    pub screws: Vec<ScrewSpec>,
}

impl PieceSpec {
    fn build(&self) -> Piece {
        let mut piece = Piece::new(self.kind)
            .with_color(self.color)
            .with_pose(pose_from(
                Vector3::from(self.position),
                self.rotation.to_rotation(),
            ))
            .with_scale(Vector3::from(self.scale));
        if let Some(id) = self.id {
            piece = piece.with_id(id);
        }
        for ap in &self.attach_points {
            piece = piece.with_attach_point(
                AttachPoint::new(Vector3::from(ap.position), ap.rotation.to_rotation())
                    .with_align_symmetry(ap.align_symmetry),
            );
        }
        for symmetry in &self.symmetries {
            piece = piece.with_symmetry(symmetry.clone());
        }
        piece
    }

    fn label(&self, position: usize) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => format!("{:?} at layout position {position}", self.kind),
        }
    }
}

impl Layout {
    pub fn from_json_str(json: &str) -> AssemblyResult<Self> {
        serde_json::from_str(json).map_err(|source| AssemblyError::Parse {
            what: "layout",
            source,
        })
    }

    pub fn load(path: &Path) -> AssemblyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AssemblyError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Register every piece and screw.
    ///
    /// Fails on a malformed symmetry or a preset id used twice; nothing is
    /// registered in that case.
    pub fn build_registry(&self, snap_distance: f64) -> AssemblyResult<StructureRegistry> {
        let mut seen = BTreeSet::new();
        let mut pieces = Vec::with_capacity(self.pieces.len());
        for (position, spec) in self.pieces.iter().enumerate() {
            if let Some(id) = spec.id {
                if !seen.insert(id) {
                    error!(piece = %id, "duplicate preset id in layout");
                    return Err(AssemblyError::DuplicatePieceId { id });
                }
            }
            let piece = spec.build();
            if let Err((symmetry, source)) = piece.validate_symmetries() {
                let label = spec.label(position);
                error!(piece = %label, symmetry, "{source}");
                return Err(AssemblyError::InvalidSymmetry {
                    piece: label,
                    symmetry,
                    source,
                });
            }
            pieces.push(piece);
        }

        let mut registry = StructureRegistry::new(snap_distance);
        // Preset ids first so automatic numbering never takes one of them.
        let (preset, unnumbered): (Vec<_>, Vec<_>) =
            pieces.into_iter().partition(|p| p.id().is_some());
        for piece in preset.into_iter().chain(unnumbered) {
            registry.register(piece);
        }
        for screw in &self.screws {
            registry.add_screw(Screw::new(ScrewId(screw.index), Vector3::from(screw.position)));
        }
        debug!(
            pieces = registry.len(),
            screws = registry.screw_count(),
            "layout registered"
        );
        Ok(registry)
    }
}
