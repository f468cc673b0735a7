//! Invariant checks over the structure registry.
//!
//! Hard-fail validation. `validate_invariants` panics on the first
//! violation; `try_validate_invariants` reports it instead, for callers
//! restoring state from outside the process.

use crate::domain::{AttachHandle, LockState};
use crate::registry::StructureRegistry;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every check. Panics on the first failure.
pub fn validate_invariants(registry: &StructureRegistry) {
    if let Err(message) = try_validate_invariants(registry) {
        panic!("{message}");
    }
}

/// Non-panicking variant of [`validate_invariants`].
pub fn try_validate_invariants(registry: &StructureRegistry) -> Result<(), String> {
    check_mutual_links(registry)?;
    check_lock_state_matches_link(registry)?;
    check_linked_states_agree(registry)?;
    check_symmetry_mappings(registry)?;
    check_screw_seating(registry)?;
    check_substructure_membership(registry)?;
    check_joints(registry)?;
    Ok(())
}

fn violation(name: &str, detail: String) -> String {
    format!("Invariant violation: [INVARIANT:{name}] {detail}")
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

/// If A is attached to B then B is attached to A.
fn check_mutual_links(registry: &StructureRegistry) -> Result<(), String> {
    for (id, piece) in registry.pieces() {
        for (index, ap) in piece.attach_points().iter().enumerate() {
            let here = AttachHandle::new(id, index);
            let Some(there) = ap.attached() else {
                continue;
            };
            let back = registry.attach_point(there).and_then(|p| p.attached());
            if back != Some(here) {
                return Err(violation(
                    "mutual_link",
                    format!("{here} points at {there}, which points at {back:?}"),
                ));
            }
        }
    }
    Ok(())
}

/// FREE exactly when unlinked.
fn check_lock_state_matches_link(registry: &StructureRegistry) -> Result<(), String> {
    for (id, piece) in registry.pieces() {
        for (index, ap) in piece.attach_points().iter().enumerate() {
            if (ap.lock_state() == LockState::Free) != ap.attached().is_none() {
                return Err(violation(
                    "lock_state_link",
                    format!(
                        "{} is {:?} with link {:?}",
                        AttachHandle::new(id, index),
                        ap.lock_state(),
                        ap.attached()
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Both ends of a connection are in the same lock state.
fn check_linked_states_agree(registry: &StructureRegistry) -> Result<(), String> {
    for (id, piece) in registry.pieces() {
        for (index, ap) in piece.attach_points().iter().enumerate() {
            let Some(there) = ap.attached() else {
                continue;
            };
            let other = registry.attach_point(there).map(|p| p.lock_state());
            if other != Some(ap.lock_state()) {
                return Err(violation(
                    "linked_states",
                    format!(
                        "{} is {:?} but its partner {there} is {other:?}",
                        AttachHandle::new(id, index),
                        ap.lock_state()
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Every symmetry maps a bijection over the piece's attach points.
fn check_symmetry_mappings(registry: &StructureRegistry) -> Result<(), String> {
    for (id, piece) in registry.pieces() {
        if let Err((symmetry, e)) = piece.validate_symmetries() {
            return Err(violation(
                "symmetry_mapping",
                format!("piece {id} symmetry {symmetry}: {e}"),
            ));
        }
    }
    Ok(())
}

/// Screws sit only in locked sockets, and socket and screw agree.
fn check_screw_seating(registry: &StructureRegistry) -> Result<(), String> {
    for screw in registry.screws() {
        let Some(h) = screw.seated_in else {
            if screw.driven {
                return Err(violation(
                    "screw_seating",
                    format!("{} is driven but not seated", screw.id),
                ));
            }
            continue;
        };
        let Some(ap) = registry.attach_point(h) else {
            return Err(violation(
                "screw_seating",
                format!("{} is seated in unknown socket {h}", screw.id),
            ));
        };
        if ap.screw() != Some(screw.id)
            || !matches!(ap.lock_state(), LockState::PartialLock | LockState::FullLock)
        {
            return Err(violation(
                "screw_seating",
                format!(
                    "{} is seated in {h}, which is {:?} holding {:?}",
                    screw.id,
                    ap.lock_state(),
                    ap.screw()
                ),
            ));
        }
    }
    for (id, piece) in registry.pieces() {
        for (index, ap) in piece.attach_points().iter().enumerate() {
            let Some(screw) = ap.screw() else {
                continue;
            };
            let here = AttachHandle::new(id, index);
            let seated = registry.screw(screw).and_then(|s| s.seated_in);
            if seated != Some(here) {
                return Err(violation(
                    "screw_seating",
                    format!("{here} holds {screw}, which is seated in {seated:?}"),
                ));
            }
        }
    }
    Ok(())
}

/// Parent links and member sets agree; no substructure is empty.
fn check_substructure_membership(registry: &StructureRegistry) -> Result<(), String> {
    for (id, piece) in registry.pieces() {
        let Some(parent) = piece.parent() else {
            continue;
        };
        let member = registry
            .scene()
            .substructure(parent)
            .is_some_and(|s| s.members.contains(&id));
        if !member {
            return Err(violation(
                "substructure_membership",
                format!("piece {id} names substructure {} as parent but is not a member", parent.0),
            ));
        }
    }
    for s in registry.scene().substructures() {
        if s.members.is_empty() {
            return Err(violation(
                "substructure_membership",
                format!("substructure {} is empty", s.id.0),
            ));
        }
        for member in &s.members {
            let parent = registry.piece(*member).and_then(|p| p.parent());
            if parent != Some(s.id) {
                return Err(violation(
                    "substructure_membership",
                    format!("substructure {} lists piece {member} whose parent is {parent:?}", s.id.0),
                ));
            }
        }
    }
    Ok(())
}

/// A joint connects two sockets linked to each other, and both carry it.
fn check_joints(registry: &StructureRegistry) -> Result<(), String> {
    for joint in registry.scene().joints() {
        let a = registry.attach_point(joint.a);
        let b = registry.attach_point(joint.b);
        let consistent = match (a, b) {
            (Some(a), Some(b)) => {
                a.attached() == Some(joint.b)
                    && b.attached() == Some(joint.a)
                    && a.joint() == Some(joint.id)
                    && b.joint() == Some(joint.id)
            }
            _ => false,
        };
        if !consistent {
            return Err(violation(
                "joints",
                format!("joint {} between {} and {} is dangling", joint.id.0, joint.a, joint.b),
            ));
        }
    }
    for (id, piece) in registry.pieces() {
        for (index, ap) in piece.attach_points().iter().enumerate() {
            if let Some(j) = ap.joint() {
                if registry.scene().joint(j).is_none() {
                    return Err(violation(
                        "joints",
                        format!("{} refers to missing joint {}", AttachHandle::new(id, index), j.0),
                    ));
                }
            }
        }
    }
    Ok(())
}
