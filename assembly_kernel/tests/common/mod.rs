//! Shared fixtures: a two-way connector at the origin with a pipe hovering
//! just off each of its sockets.
#![allow(dead_code)]

use nalgebra::Vector3;

use assembly_kernel::attach_point::AttachPoint;
use assembly_kernel::config::AssemblyConfig;
use assembly_kernel::connection::{self, JoinParams};
use assembly_kernel::domain::{AttachHandle, PieceColor, PieceId, PieceKind, ScrewId};
use assembly_kernel::events::RecordingSink;
use assembly_kernel::instructions::{InstructionPlan, InstructionStep};
use assembly_kernel::math::{about_up, pose_from, Rotation};
use assembly_kernel::piece::Piece;
use assembly_kernel::registry::{Screw, StructureRegistry};
use assembly_kernel::session::AssemblySession;
use assembly_kernel::symmetry::{AttachPointMap, Symmetry};

pub const CONNECTOR: PieceId = PieceId(1);
pub const PIPE_A: PieceId = PieceId(2);
pub const PIPE_B: PieceId = PieceId(3);

pub fn h(piece: PieceId, index: usize) -> AttachHandle {
    AttachHandle::new(piece, index)
}

/// End-for-end flip of a two-socket piece.
pub fn half_turn() -> Symmetry {
    Symmetry {
        euler_offset: [0.0, 180.0, 0.0],
        attach_point_mapping: vec![
            AttachPointMap {
                attach_point_index: 1,
                euler_offset: [0.0; 3],
            },
            AttachPointMap {
                attach_point_index: 0,
                euler_offset: [0.0; 3],
            },
        ],
    }
}

/// Two sockets `half_length` either side of the origin, facing out along ±Z.
pub fn two_socket(kind: PieceKind, half_length: f64) -> Piece {
    Piece::new(kind)
        .with_attach_point(AttachPoint::new(
            Vector3::new(0.0, 0.0, half_length),
            Rotation::identity(),
        ))
        .with_attach_point(AttachPoint::new(
            Vector3::new(0.0, 0.0, -half_length),
            about_up(180.0),
        ))
        .with_symmetry(Symmetry::identity(2))
        .with_symmetry(half_turn())
}

/// Pipe A sits above the connector facing down at it, pipe B below facing up.
/// Each free pipe socket is 0.05 from the connector socket it belongs on.
pub fn structure() -> StructureRegistry {
    let mut registry = StructureRegistry::default();
    registry.register(two_socket(PieceKind::Connector2Way, 0.05).with_id(CONNECTOR));
    registry.register(
        two_socket(PieceKind::Pipe, 0.5)
            .with_id(PIPE_A)
            .with_color(PieceColor::Red)
            .with_pose(pose_from(Vector3::new(0.0, 0.0, 0.6), about_up(180.0))),
    );
    registry.register(
        two_socket(PieceKind::Pipe, 0.5)
            .with_id(PIPE_B)
            .with_color(PieceColor::Blue)
            .with_pose(pose_from(Vector3::new(0.0, 0.0, -0.6), Rotation::identity())),
    );
    registry.add_screw(Screw::new(ScrewId(0), Vector3::new(1.0, 0.0, 0.0)));
    registry.add_screw(Screw::new(ScrewId(1), Vector3::new(1.2, 0.0, 0.0)));
    registry
}

/// Plan recorded by building the structure once: pipe A onto connector
/// socket 0, then pipe B onto connector socket 1.
pub fn recorded_plan() -> InstructionPlan {
    let mut registry = structure();
    let mut steps = Vec::new();
    for (pipe, socket) in [(PIPE_A, 0), (PIPE_B, 1)] {
        let source = h(CONNECTOR, socket);
        let target = h(pipe, 0);
        connection::join(&mut registry, target, source, JoinParams::default())
            .expect("recording join");
        steps.push(InstructionStep::capture(&registry, source, target).expect("capture"));
    }
    InstructionPlan::new("pipe-connector-pipe", steps)
}

pub fn session_with(config: AssemblyConfig) -> (AssemblySession, RecordingSink) {
    let sink = RecordingSink::new();
    let session = AssemblySession::new(
        structure(),
        recorded_plan(),
        config,
        Box::new(sink.clone()),
    );
    (session, sink)
}

pub fn session() -> (AssemblySession, RecordingSink) {
    session_with(AssemblyConfig::default())
}
