//! Snapshot layer: canonical assembly state written next to the log.
//!
//! Snapshots contain canonical JSON + hash for verification.
//! No timestamps in snapshot content (determinism).

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use assembly_kernel::hashing::{canonical_serialize, sha256_hex};
use assembly_kernel::session::AssemblySession;
use assembly_kernel::KERNEL_VERSION;

use crate::error::{RuntimeError, RuntimeResult};

/// Snapshot on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Last log sequence covered by this snapshot.
    pub sequence: u64,
    /// Canonical JSON of the session state (UTF-8).
    pub canonical_json: String,
    /// SHA-256 of the canonical JSON.
    pub hash: String,
    pub kernel_version: u32,
}

impl Snapshot {
    pub fn capture(sequence: u64, session: &AssemblySession) -> Self {
        // serde_json only emits UTF-8.
        let canonical_json = String::from_utf8_lossy(&canonical_serialize(session)).into_owned();
        let hash = sha256_hex(canonical_json.as_bytes());
        Self {
            sequence,
            canonical_json,
            hash,
            kernel_version: KERNEL_VERSION,
        }
    }

    /// The stored hash matches the stored JSON.
    pub fn is_consistent(&self) -> bool {
        sha256_hex(self.canonical_json.as_bytes()) == self.hash
    }

    /// The snapshot describes exactly the state of `session`.
    pub fn matches(&self, session: &AssemblySession) -> bool {
        self.is_consistent() && self.hash == session.state_hash()
    }
}

fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("snapshot_{:06}.json", sequence))
}

/// Write a snapshot of `session` taken at log sequence `sequence`.
pub fn save_snapshot(dir: &Path, sequence: u64, session: &AssemblySession) -> RuntimeResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| RuntimeError::io(dir, e))?;

    let snap = Snapshot::capture(sequence, session);
    let path = snapshot_path(dir, sequence);
    let content = serde_json::to_string(&snap).map_err(|e| RuntimeError::Snapshot {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let mut file = File::create(&path).map_err(|e| RuntimeError::io(&path, e))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| RuntimeError::io(&path, e))?;

    Ok(path)
}

/// Load the snapshot at `sequence`, if one exists.
///
/// A file that parses but whose hash does not match its JSON, or that was
/// written by another kernel version, is an error.
pub fn load_snapshot(dir: &Path, sequence: u64) -> RuntimeResult<Option<Snapshot>> {
    let path = snapshot_path(dir, sequence);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path).map_err(|e| RuntimeError::io(&path, e))?;
    let bad = |reason: String| RuntimeError::Snapshot {
        path: path.clone(),
        reason,
    };
    let snap: Snapshot = serde_json::from_str(&content).map_err(|e| bad(e.to_string()))?;
    if snap.kernel_version != KERNEL_VERSION {
        return Err(bad(format!(
            "kernel version {} (expected {KERNEL_VERSION})",
            snap.kernel_version
        )));
    }
    if !snap.is_consistent() {
        return Err(bad("hash does not match content".into()));
    }
    Ok(Some(snap))
}

/// Load the snapshot with the highest sequence in `dir`.
pub fn load_latest_snapshot(dir: &Path) -> RuntimeResult<Option<Snapshot>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut best_seq: Option<u64> = None;
    for entry in fs::read_dir(dir).map_err(|e| RuntimeError::io(dir, e))? {
        let entry = entry.map_err(|e| RuntimeError::io(dir, e))?;
        let name = entry.file_name();
        let seq = name
            .to_string_lossy()
            .strip_prefix("snapshot_")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(seq) = seq {
            best_seq = Some(best_seq.map_or(seq, |best| best.max(seq)));
        }
    }

    match best_seq {
        Some(seq) => load_snapshot(dir, seq),
        None => Ok(None),
    }
}
