//! Symmetry model: rotational equivalences of a piece shape.
//!
//! A [`Symmetry`] says "this piece, rotated by `offset` from its canonical
//! pose, looks identical; attach point `i` then sits where attach point
//! `mapping[i]` used to be, spun by the map's local offset".

use serde::{Deserialize, Serialize};

use crate::domain::AlignSymmetry;
use crate::error::SymmetryError;
use crate::math::{about_forward, angle_deg, euler_deg_array, Rotation};

/// Where one attach point lands under a symmetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachPointMap {
    pub attach_point_index: usize,
    /// Local spin the attach point picks up, Euler degrees.
    #[serde(default)]
    pub euler_offset: [f64; 3],
}

impl AttachPointMap {
    pub fn rotational_offset(&self) -> Rotation {
        euler_deg_array(self.euler_offset)
    }
}

/// One rotational equivalence class of a piece shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Symmetry {
    /// Rotation off the canonical pose, Euler degrees.
    #[serde(default)]
    pub euler_offset: [f64; 3],
    pub attach_point_mapping: Vec<AttachPointMap>,
}

impl Symmetry {
    /// The trivial symmetry for a piece with `count` attach points.
    pub fn identity(count: usize) -> Self {
        Self {
            euler_offset: [0.0; 3],
            attach_point_mapping: (0..count)
                .map(|i| AttachPointMap {
                    attach_point_index: i,
                    euler_offset: [0.0; 3],
                })
                .collect(),
        }
    }

    pub fn rotational_offset(&self) -> Rotation {
        euler_deg_array(self.euler_offset)
    }

    /// Slot that attach point `index` maps to, if the mapping covers it.
    pub fn maps_to(&self, index: usize) -> Option<usize> {
        self.attach_point_mapping
            .get(index)
            .map(|m| m.attach_point_index)
    }

    /// True when the mapping is a bijection over `0..len`.
    pub fn is_permutation(&self) -> bool {
        let n = self.attach_point_mapping.len();
        let mut seen = vec![false; n];
        for m in &self.attach_point_mapping {
            match seen.get_mut(m.attach_point_index) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        true
    }

    /// Check the mapping against a piece with `attach_point_count` points.
    pub fn validate(&self, attach_point_count: usize) -> Result<(), SymmetryError> {
        if self.attach_point_mapping.len() != attach_point_count {
            return Err(SymmetryError::CountMismatch {
                mapped: self.attach_point_mapping.len(),
                expected: attach_point_count,
            });
        }
        if !self.is_permutation() {
            return Err(SymmetryError::NotAPermutation {
                count: attach_point_count,
            });
        }
        Ok(())
    }
}

/// Candidate alignment rotations about the attach axis for a symmetry class.
///
/// Enumeration order is the tie-break order.
pub fn alignment_orientations(class: AlignSymmetry) -> Vec<Rotation> {
    match class {
        AlignSymmetry::None => vec![Rotation::identity()],
        AlignSymmetry::Half => vec![Rotation::identity(), about_forward(180.0)],
        AlignSymmetry::Quarter => vec![
            Rotation::identity(),
            about_forward(90.0),
            about_forward(270.0),
            about_forward(180.0),
        ],
    }
}

/// Symmetry whose offset, applied to `target`, lands closest to `current`.
///
/// Ties go to the first symmetry in list order.
pub fn closest_symmetry<'a>(
    symmetries: &'a [Symmetry],
    target: &Rotation,
    current: &Rotation,
) -> Option<(usize, &'a Symmetry)> {
    let mut best: Option<(usize, &Symmetry, f64)> = None;
    for (i, s) in symmetries.iter().enumerate() {
        let offset = angle_deg(&(target * s.rotational_offset()), current);
        match best {
            Some((_, _, d)) if offset >= d => {}
            _ => best = Some((i, s, offset)),
        }
    }
    best.map(|(i, s, _)| (i, s))
}
