//! AssemblySession tests: attach, screws, key, substructures and guidance.

mod common;

use nalgebra::Vector3;

use assembly_kernel::config::AssemblyConfig;
use assembly_kernel::connection::{self, JoinParams};
use assembly_kernel::domain::{
    AttachMode, BodyState, Hand, LockState, PieceColor, PieceId, PieceKind, ScrewId, SubStep,
};
use assembly_kernel::error::{AssemblyError, SymmetryError};
use assembly_kernel::events::{AssemblyEvent, RecordingSink};
use assembly_kernel::invariants::try_validate_invariants;
use assembly_kernel::math::{about_forward, about_up, angle_deg, pose_from, Rotation};
use assembly_kernel::session::{AssemblySession, AttachRequest, HintTarget};
use assembly_kernel::verifier::Rejection;

use common::{h, recorded_plan, session, session_with, structure, two_socket, CONNECTOR, PIPE_A, PIPE_B};

/// Put the step's screw into its hole and turn the key.
fn screw_and_key(session: &mut AssemblySession, screw: ScrewId) {
    let HintTarget::Screw { screw: hinted, hole } = session.guidance().hint else {
        panic!("expected a screw hint, got {:?}", session.guidance().hint);
    };
    assert_eq!(hinted, screw);
    session.move_screw(screw, hole.translation.vector);
    session.insert_screw(screw).expect("insert screw");
    session.use_key(screw).expect("use key");
}

fn attach(session: &mut AssemblySession, this: (PieceId, usize), other: (PieceId, usize)) -> bool {
    session
        .attach(h(this.0, this.1), h(other.0, other.1), AttachRequest::default())
        .accepted
}

// ─────────────────────────────────────────────────────────────
// Test 1: the whole plan ends in one fully locked substructure
// ─────────────────────────────────────────────────────────────

#[test]
fn full_plan_builds_one_substructure() {
    let (mut s, sink) = session();

    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    screw_and_key(&mut s, ScrewId(0));
    assert_eq!(s.sequence().cursor(), 1);
    assert!(attach(&mut s, (PIPE_B, 0), (CONNECTOR, 1)));
    screw_and_key(&mut s, ScrewId(1));

    assert!(s.is_complete());
    let registry = s.registry();
    let substructures: Vec<_> = registry.scene().substructures().collect();
    assert_eq!(substructures.len(), 1);
    assert_eq!(
        substructures[0].members.iter().copied().collect::<Vec<_>>(),
        vec![CONNECTOR, PIPE_A, PIPE_B]
    );
    for handle in [h(CONNECTOR, 0), h(CONNECTOR, 1), h(PIPE_A, 0), h(PIPE_B, 0)] {
        assert_eq!(
            registry.attach_point(handle).expect("socket").lock_state(),
            LockState::FullLock
        );
    }
    assert!(registry.screws().all(|screw| screw.driven));
    assert_eq!(registry.scene().joints().count(), 0);

    assert_eq!(sink.completions(), 1);
    let events = sink.events();
    assert_eq!(events.len(), 8);
    assert_eq!(events[6], AssemblyEvent::Completed { steps: 2 });
}

// ─────────────────────────────────────────────────────────────
// Test 2: a pipe twisted a quarter turn is straightened on join
// ─────────────────────────────────────────────────────────────

#[test]
fn twisted_pipe_is_straightened() {
    let (mut s, _) = session();
    s.move_piece(
        PIPE_A,
        pose_from(
            Vector3::new(0.0, 0.0, 0.6),
            about_up(180.0) * about_forward(90.0),
        ),
    );

    let outcome = s.attach(h(PIPE_A, 0), h(CONNECTOR, 0), AttachRequest::default());

    assert!(outcome.accepted, "{:?}", outcome.rejection);
    assert!(angle_deg(&outcome.correction, &about_forward(90.0)) < 1e-6);
    let pipe = s.registry().piece(PIPE_A).expect("pipe");
    assert!(angle_deg(pipe.rotation(), &about_up(180.0)) < 1e-6);
    let realized = s.registry().attach_point(h(PIPE_A, 0)).expect("socket").this_to_other();
    let prescribed = s.plan().steps[0].target_relative_rotation();
    assert!(angle_deg(realized, &prescribed) < 1e-6);
}

// ─────────────────────────────────────────────────────────────
// Test 3: screws and key
// ─────────────────────────────────────────────────────────────

#[test]
fn screw_out_of_reach_is_rejected() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));

    assert_eq!(s.insert_screw(ScrewId(0)), Err(Rejection::NoSocketInReach));
    assert_eq!(s.sequence().sub_step(), SubStep::InsertScrew);
    assert_eq!(s.registry().screw(ScrewId(0)).expect("screw").seated_in, None);
}

#[test]
fn key_needs_a_seated_screw() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));

    assert_eq!(s.use_key(ScrewId(1)), Err(Rejection::ScrewNotSeated(ScrewId(1))));
    assert_eq!(s.sequence().sub_step(), SubStep::InsertScrew);
}

#[test]
fn seated_screw_makes_partial_lock() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    s.move_screw(ScrewId(0), Vector3::new(0.0, 0.01, 0.05));

    assert_eq!(s.insert_screw(ScrewId(0)), Ok(h(PIPE_A, 0)));

    let registry = s.registry();
    assert_eq!(
        registry.screw(ScrewId(0)).expect("screw").seated_in,
        Some(h(PIPE_A, 0))
    );
    assert_eq!(
        registry.attach_point(h(CONNECTOR, 0)).expect("socket").lock_state(),
        LockState::PartialLock
    );
    assert_eq!(s.sequence().sub_step(), SubStep::UseKey);
    assert!(!s.detach(h(CONNECTOR, 0), false));
}

// ─────────────────────────────────────────────────────────────
// Test 4: detaching a loose connection keeps the cursor
// ─────────────────────────────────────────────────────────────

#[test]
fn detach_keeps_progress() {
    let (mut s, sink) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    let recorded = sink.events().len();

    assert!(s.detach(h(PIPE_A, 0), false));
    assert!(!s.detach(h(PIPE_A, 0), false));
    assert_eq!(s.sequence().cursor(), 0);
    assert_eq!(s.sequence().sub_step(), SubStep::InsertScrew);

    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    assert_eq!(sink.events().len(), recorded);
}

// ─────────────────────────────────────────────────────────────
// Test 5: hierarchical attach hands the grab to the substructure
// ─────────────────────────────────────────────────────────────

#[test]
fn hierarchical_attach_transfers_grab() {
    let (mut s, _) = session_with(AssemblyConfig {
        attach_mode: AttachMode::Hierarchical,
        ..AssemblyConfig::default()
    });
    assert!(s.grab(CONNECTOR, Hand::Left));
    assert!(s.grab(PIPE_A, Hand::Right));

    let outcome = s.attach(h(PIPE_A, 0), h(CONNECTOR, 0), AttachRequest::default());

    let reparent = outcome.reparent.expect("hierarchical attach reparents");
    assert_eq!(reparent.grab_transfer, Some(Hand::Left));
    assert!(reparent.released.contains(&Hand::Right));
    let registry = s.registry();
    let parent = registry.piece(PIPE_A).expect("pipe").parent();
    assert!(parent.is_some());
    assert_eq!(registry.piece(CONNECTOR).expect("connector").parent(), parent);
    assert_eq!(registry.scene().grabbed_by(Hand::Left), parent);
    assert_eq!(registry.scene().grabbed_by(Hand::Right), None);
    for id in [PIPE_A, CONNECTOR] {
        let piece = registry.piece(id).expect("piece");
        assert_eq!(piece.body(), BodyState::stripped());
        assert_eq!(piece.held_by(), None);
    }
    assert_eq!(registry.scene().joints().count(), 0);

    // Locking keeps the same substructure and its grab.
    screw_and_key(&mut s, ScrewId(0));
    assert_eq!(s.registry().scene().substructures().count(), 1);
    assert_eq!(s.registry().scene().grabbed_by(Hand::Left), parent);
}

#[test]
fn moving_a_member_drags_its_substructure() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    screw_and_key(&mut s, ScrewId(0));
    let pipe_before = s.registry().piece(PIPE_A).expect("pipe").position();

    s.move_piece(
        CONNECTOR,
        pose_from(Vector3::new(1.0, 0.0, 0.0), Rotation::identity()),
    );

    let pipe_after = s.registry().piece(PIPE_A).expect("pipe").position();
    assert!((pipe_after - pipe_before - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-9);
    let screw = s.registry().screw(ScrewId(0)).expect("screw");
    assert!((screw.position - Vector3::new(1.0, 0.0, 0.05)).norm() < 1e-9);
}

#[test]
fn hierarchical_join_merges_substructures() {
    let mut registry = structure();
    registry.register(
        two_socket(PieceKind::Connector2Way, 0.05)
            .with_id(PieceId(4))
            .with_pose(pose_from(Vector3::new(5.0, 0.0, 0.0), Rotation::identity())),
    );
    registry.register(
        two_socket(PieceKind::Pipe, 0.5)
            .with_id(PieceId(5))
            .with_pose(pose_from(Vector3::new(5.0, 0.0, 0.6), about_up(180.0))),
    );
    let params = JoinParams {
        mode: AttachMode::Hierarchical,
        ..JoinParams::default()
    };

    connection::join(&mut registry, h(PIPE_A, 0), h(CONNECTOR, 0), params).expect("first pair");
    connection::join(&mut registry, h(PieceId(5), 0), h(PieceId(4), 0), params)
        .expect("second pair");
    assert_eq!(registry.scene().substructures().count(), 2);
    let survivor = registry.piece(CONNECTOR).expect("connector").parent();

    let joined = connection::join(&mut registry, h(PieceId(5), 1), h(CONNECTOR, 1), params)
        .expect("bridge");

    let request = joined.reparent.expect("reparent");
    assert!(request.merged.is_some());
    let substructures: Vec<_> = registry.scene().substructures().collect();
    assert_eq!(substructures.len(), 1);
    assert_eq!(Some(substructures[0].id), survivor);
    assert_eq!(substructures[0].members.len(), 4);
    try_validate_invariants(&registry).expect("invariants");
}

// ─────────────────────────────────────────────────────────────
// Test 6: snapping to whatever is near
// ─────────────────────────────────────────────────────────────

#[test]
fn snap_nearby_attaches_closest_pair() {
    let (mut s, _) = session();

    let outcome = s.snap_nearby(PIPE_A).expect("something in reach");
    assert!(outcome.accepted, "{:?}", outcome.rejection);
    assert_eq!(outcome.continuation, Some(h(PIPE_A, 0)));
    assert_eq!(
        s.registry().attach_point(h(CONNECTOR, 0)).expect("socket").attached(),
        Some(h(PIPE_A, 0))
    );

    // Pipe B is in reach too, but the plan wants a screw first.
    let outcome = s.snap_nearby(PIPE_B).expect("something in reach");
    assert!(matches!(outcome.rejection, Some(Rejection::WrongPieces { .. })));
    assert!(s.registry().attach_point(h(PIPE_B, 0)).expect("socket").is_free());
}

#[test]
fn snap_nearby_finds_nothing_out_of_reach() {
    let (mut s, _) = session();
    s.move_piece(
        PIPE_B,
        pose_from(Vector3::new(4.0, 0.0, 0.0), Rotation::identity()),
    );
    assert_eq!(s.snap_nearby(PIPE_B), None);
}

// ─────────────────────────────────────────────────────────────
// Test 7: re-indexing for a symmetry keeps links mutual
// ─────────────────────────────────────────────────────────────

#[test]
fn rotate_indices_rewrites_links() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));

    s.rotate_indices(PIPE_A, 1).expect("half turn");
    let registry = s.registry();
    assert_eq!(
        registry.attach_point(h(CONNECTOR, 0)).expect("socket").attached(),
        Some(h(PIPE_A, 1))
    );
    assert!(registry.attach_point(h(PIPE_A, 0)).expect("socket").is_free());
    let joint = registry.scene().joints().next().expect("joint");
    assert!(joint.a == h(PIPE_A, 1) || joint.b == h(PIPE_A, 1));

    let once = s.registry().clone();
    s.rotate_indices(PIPE_A, 1).expect("again");
    assert_eq!(s.registry(), &once);

    assert_eq!(
        s.rotate_indices(PIPE_A, 7),
        Err(SymmetryError::UnknownSymmetry { index: 7 })
    );
    s.rotate_indices(PIPE_A, 0).expect("back");
    assert_eq!(
        s.registry().attach_point(h(CONNECTOR, 0)).expect("socket").attached(),
        Some(h(PIPE_A, 0))
    );
}

// ─────────────────────────────────────────────────────────────
// Test 8: guidance follows the sub-steps
// ─────────────────────────────────────────────────────────────

#[test]
fn guidance_points_at_next_action() {
    let (mut s, _) = session();

    let g = s.guidance();
    assert_eq!((g.step, g.sub_step), (0, SubStep::AttachPiece));
    assert_eq!(
        g.hint,
        HintTarget::Piece {
            piece: PIPE_A,
            kind: PieceKind::Pipe,
            color: PieceColor::Red
        }
    );
    let target = g.target_pose.expect("target pose");
    assert!((target.translation.vector - Vector3::new(0.0, 0.0, 0.55)).norm() < 1e-9);
    assert!(angle_deg(&target.rotation, &about_up(180.0)) < 1e-6);
    let symmetric = g.symmetric_target.expect("symmetric target");
    assert!(angle_deg(&symmetric.rotation, &target.rotation) < 1e-6);

    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    let HintTarget::Screw { screw, hole } = s.guidance().hint else {
        panic!("expected screw hint");
    };
    assert_eq!(screw, ScrewId(0));
    assert!((hole.translation.vector - Vector3::new(0.0, 0.0, 0.05)).norm() < 1e-9);

    s.move_screw(ScrewId(0), hole.translation.vector);
    s.insert_screw(ScrewId(0)).expect("screw");
    assert!(matches!(s.guidance().hint, HintTarget::Key { .. }));

    s.use_key(ScrewId(0)).expect("key");
    let g = s.guidance();
    assert_eq!((g.step, g.sub_step), (1, SubStep::AttachPiece));
    assert!(matches!(g.hint, HintTarget::Piece { piece: PIPE_B, .. }));
}

#[test]
fn symmetric_target_follows_a_flipped_pipe() {
    let (mut s, _) = session();
    s.move_piece(
        PIPE_A,
        pose_from(Vector3::new(0.0, 0.0, 0.6), Rotation::identity()),
    );
    let g = s.guidance();
    let target = g.target_pose.expect("target");
    let symmetric = g.symmetric_target.expect("symmetric");
    assert!(angle_deg(&target.rotation, &symmetric.rotation) > 179.0);
    assert!(angle_deg(&symmetric.rotation, &Rotation::identity()) < 1e-6);
}

// ─────────────────────────────────────────────────────────────
// Test 9: plan problems are kept and their steps reject
// ─────────────────────────────────────────────────────────────

#[test]
fn invalid_step_rejects_instead_of_panicking() {
    let mut plan = recorded_plan();
    plan.steps[0].target_id = PieceId(9);
    let mut s = AssemblySession::new(
        structure(),
        plan,
        AssemblyConfig::default(),
        Box::new(RecordingSink::new()),
    );

    assert!(s
        .plan_issues()
        .iter()
        .any(|e| matches!(e, AssemblyError::MissingPiece { step: 0, id: PieceId(9) })));
    let outcome = s.attach(h(PIPE_A, 0), h(CONNECTOR, 0), AttachRequest::default());
    assert_eq!(outcome.rejection, Some(Rejection::InvalidStep { step: 0 }));
    assert!(s.registry().attach_point(h(PIPE_A, 0)).expect("socket").is_free());
}

#[test]
fn occupied_socket_is_a_precondition_failure() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    let outcome = s.attach(h(PIPE_B, 0), h(CONNECTOR, 0), AttachRequest::default());
    assert_eq!(outcome.rejection, Some(Rejection::Precondition));
}

// ─────────────────────────────────────────────────────────────
// Test 10: state hash and piece removal
// ─────────────────────────────────────────────────────────────

#[test]
fn state_hash_is_deterministic() {
    let (mut a, _) = session();
    let (b, _) = session();
    let initial = a.state_hash();
    assert_eq!(initial, b.state_hash());
    assert_eq!(initial.len(), 64);

    a.attach(h(PIPE_B, 0), h(CONNECTOR, 1), AttachRequest::default());
    assert_eq!(a.state_hash(), initial, "rejected attach changes nothing");

    assert!(attach(&mut a, (PIPE_A, 0), (CONNECTOR, 0)));
    assert_ne!(a.state_hash(), initial);
}

#[test]
fn removing_a_piece_frees_its_partner() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));

    assert!(s.remove_piece(PIPE_A));
    assert!(!s.remove_piece(PIPE_A));
    assert!(s.registry().attach_point(h(CONNECTOR, 0)).expect("socket").is_free());
    assert_eq!(s.registry().scene().joints().count(), 0);
}

// ─────────────────────────────────────────────────────────────
// Test 11: skipping the free check never breaks mutual links
// ─────────────────────────────────────────────────────────────

#[test]
fn ignoring_the_free_check_never_steals_a_joined_socket() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    screw_and_key(&mut s, ScrewId(0));
    assert!(attach(&mut s, (PIPE_B, 0), (CONNECTOR, 1)));
    screw_and_key(&mut s, ScrewId(1));
    assert!(s.is_complete());
    let before = s.state_hash();

    let outcome = s.attach(
        h(PIPE_B, 1),
        h(CONNECTOR, 0),
        AttachRequest {
            ignore_free_check: true,
            ..AttachRequest::default()
        },
    );

    assert!(!outcome.accepted);
    assert_eq!(outcome.rejection, Some(Rejection::Precondition));
    let socket = s.registry().attach_point(h(CONNECTOR, 0)).expect("socket");
    assert_eq!(socket.attached(), Some(h(PIPE_A, 0)));
    assert_eq!(socket.lock_state(), LockState::FullLock);
    assert!(s.registry().attach_point(h(PIPE_B, 1)).expect("socket").is_free());
    assert!(try_validate_invariants(s.registry()).is_ok());
    assert_eq!(s.state_hash(), before);
}

#[test]
fn relinking_a_loose_pair_keeps_one_joint() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));

    let outcome = s.attach(
        h(PIPE_A, 0),
        h(CONNECTOR, 0),
        AttachRequest {
            ignore_free_check: true,
            ..AttachRequest::default()
        },
    );

    assert!(outcome.accepted, "{:?}", outcome.rejection);
    let registry = s.registry();
    assert_eq!(
        registry.attach_point(h(PIPE_A, 0)).expect("socket").attached(),
        Some(h(CONNECTOR, 0))
    );
    assert_eq!(
        registry.attach_point(h(CONNECTOR, 0)).expect("socket").attached(),
        Some(h(PIPE_A, 0))
    );
    assert_eq!(registry.scene().joints().count(), 1);
    assert!(try_validate_invariants(registry).is_ok());
}

#[test]
fn seating_a_screw_twice_leaves_the_lock_alone() {
    let (mut s, _) = session();
    assert!(attach(&mut s, (PIPE_A, 0), (CONNECTOR, 0)));
    s.move_screw(ScrewId(0), Vector3::new(0.0, 0.01, 0.05));
    assert_eq!(s.insert_screw(ScrewId(0)), Ok(h(PIPE_A, 0)));

    assert_eq!(s.insert_screw(ScrewId(0)), Err(Rejection::Precondition));
    assert_eq!(
        s.registry().attach_point(h(PIPE_A, 0)).expect("socket").lock_state(),
        LockState::PartialLock
    );
    assert_eq!(s.sequence().sub_step(), SubStep::UseKey);
    assert!(try_validate_invariants(s.registry()).is_ok());
}
