//! Runtime configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use assembly_kernel::config::AssemblyConfig;

use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    /// Settings handed to the kernel session.
    pub assembly: AssemblyConfig,
    /// Write a snapshot of the final state when the plan completes.
    pub snapshot_on_completion: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            assembly: AssemblyConfig::default(),
            snapshot_on_completion: true,
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> RuntimeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RuntimeError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| RuntimeError::Config {
            path: path.to_path_buf(),
            source,
        })
    }
}
