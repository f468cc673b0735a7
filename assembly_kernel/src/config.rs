//! Session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::AttachMode;
use crate::error::{AssemblyError, AssemblyResult};
use crate::math::DEFAULT_ANGLE_TOLERANCE_DEG;
use crate::registry::DEFAULT_SNAP_DISTANCE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AssemblyConfig {
    /// Maximum socket distance for snaps and screw insertion.
    pub snap_distance: f64,
    /// How loose connections are realized.
    pub attach_mode: AttachMode,
    /// Snap the incoming piece to its closest symmetry before verifying.
    pub symmetry_snapping: bool,
    /// Accept a pipe inserted at any quarter turn about its axis.
    pub allow_pipe_quarter_turns: bool,
    pub angle_tolerance_deg: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            snap_distance: DEFAULT_SNAP_DISTANCE,
            attach_mode: AttachMode::ConfigurableJoint,
            symmetry_snapping: true,
            allow_pipe_quarter_turns: true,
            angle_tolerance_deg: DEFAULT_ANGLE_TOLERANCE_DEG,
        }
    }
}

impl AssemblyConfig {
    pub fn from_json_str(json: &str) -> AssemblyResult<Self> {
        serde_json::from_str(json).map_err(|source| AssemblyError::Parse {
            what: "config",
            source,
        })
    }

    pub fn load(path: &Path) -> AssemblyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AssemblyError::io(path, e))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg = AssemblyConfig::from_json_str(r#"{"symmetry_snapping": false}"#).unwrap();
        assert!(!cfg.symmetry_snapping);
        assert_eq!(cfg.snap_distance, DEFAULT_SNAP_DISTANCE);
        assert!(cfg.allow_pipe_quarter_turns);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(AssemblyConfig::from_json_str(r#"{"snap": 1.0}"#).is_err());
    }

    #[test]
    fn attach_mode_reads_variant_names() {
        let cfg = AssemblyConfig::from_json_str(r#"{"attach_mode": "Hierarchical"}"#).unwrap();
        assert_eq!(cfg.attach_mode, AttachMode::Hierarchical);
    }
}
