//! Canonical hashing of plans and assembly state.
//!
//! Deterministic canonical serialization + SHA-256, lowercase hex.
//!
//! Rules:
//!   - Objects are built field by field in a fixed order
//!   - Pieces, connections, substructures and screws sorted by id
//!   - Each connection listed once, from its lower handle
//!   - No poses: state identity is discrete (links, locks, membership)
//!   - Compact JSON, no whitespace

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::instructions::{InstructionPlan, InstructionSequence};
use crate::math::QuatRecord;
use crate::registry::StructureRegistry;
use crate::session::AssemblySession;
use crate::KERNEL_VERSION;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Fingerprint of a plan's content.
pub fn plan_hash(plan: &InstructionPlan) -> String {
    let quat = |q: &QuatRecord| json!([q.x, q.y, q.z, q.w]);
    let steps: Vec<Value> = plan
        .steps
        .iter()
        .map(|s| {
            json!([
                s.source_id.0,
                format!("{:?}", s.source_kind),
                s.source_index,
                quat(&s.source_rotation),
                s.target_id.0,
                format!("{:?}", s.target_kind),
                s.target_index,
                quat(&s.target_rotation),
            ])
        })
        .collect();
    let mut root = Map::new();
    root.insert("schema_version".into(), json!(plan.schema_version));
    root.insert("steps".into(), Value::Array(steps));
    sha256_hex(Value::Object(root).to_string().as_bytes())
}

/// Canonical JSON bytes of a session's state.
pub fn canonical_serialize(session: &AssemblySession) -> Vec<u8> {
    build_canonical_value(
        &session.plan_hash(),
        session.sequence(),
        session.registry(),
    )
    .to_string()
    .into_bytes()
}

/// SHA-256 of [`canonical_serialize`].
pub fn canonical_hash(session: &AssemblySession) -> String {
    sha256_hex(&canonical_serialize(session))
}

/// Build the canonical value in strict field order:
/// kernel_version, plan_hash, cursor, sub_step, completed, pieces,
/// connections, substructures, screws.
pub fn build_canonical_value(
    plan_hash: &str,
    sequence: &InstructionSequence,
    registry: &StructureRegistry,
) -> Value {
    let mut pieces: Vec<(u32, Value)> = Vec::new();
    let mut connections: Vec<((u32, usize), Value)> = Vec::new();
    for (id, piece) in registry.pieces() {
        let mut p = Map::new();
        p.insert("id".into(), json!(id.0));
        p.insert("parent".into(), json!(piece.parent().map(|s| s.0)));
        p.insert("symmetry".into(), json!(piece.current_symmetry()));
        pieces.push((id.0, Value::Object(p)));

        for (index, ap) in piece.attach_points().iter().enumerate() {
            let Some(there) = ap.attached() else {
                continue;
            };
            let here = (id.0, index);
            if here > (there.piece.0, there.index) {
                continue;
            }
            let mut c = Map::new();
            c.insert("a".into(), json!([here.0, here.1]));
            c.insert("b".into(), json!([there.piece.0, there.index]));
            c.insert("lock".into(), json!(format!("{:?}", ap.lock_state())));
            c.insert("joint".into(), json!(ap.joint().is_some()));
            connections.push((here, Value::Object(c)));
        }
    }
    pieces.sort_by_key(|(id, _)| *id);
    connections.sort_by_key(|(key, _)| *key);

    let substructures: Vec<Value> = registry
        .scene()
        .substructures()
        .map(|s| {
            let mut m = Map::new();
            m.insert("id".into(), json!(s.id.0));
            m.insert(
                "members".into(),
                json!(s.members.iter().map(|p| p.0).collect::<Vec<_>>()),
            );
            Value::Object(m)
        })
        .collect();

    let screws: Vec<Value> = registry
        .screws()
        .map(|s| {
            let mut m = Map::new();
            m.insert("id".into(), json!(s.id.0));
            m.insert(
                "seated_in".into(),
                json!(s.seated_in.map(|h| [h.piece.0 as usize, h.index])),
            );
            m.insert("driven".into(), json!(s.driven));
            Value::Object(m)
        })
        .collect();

    // kernel_version first: it is part of the state identity.
    let mut root = Map::new();
    root.insert("kernel_version".into(), json!(KERNEL_VERSION));
    root.insert("plan_hash".into(), json!(plan_hash));
    root.insert("cursor".into(), json!(sequence.cursor()));
    root.insert("sub_step".into(), json!(sequence.sub_step().as_str()));
    root.insert("completed".into(), json!(sequence.is_complete()));
    root.insert(
        "pieces".into(),
        Value::Array(pieces.into_iter().map(|(_, v)| v).collect()),
    );
    root.insert(
        "connections".into(),
        Value::Array(connections.into_iter().map(|(_, v)| v).collect()),
    );
    root.insert("substructures".into(), Value::Array(substructures));
    root.insert("screws".into(), Value::Array(screws));
    Value::Object(root)
}
