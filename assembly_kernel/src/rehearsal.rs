//! Rehearsal: drive a whole plan against a layout without a user.
//!
//! Each step is played the way a user would: the incoming piece is put at
//! its target pose and attached, the step's screw is dropped into the hole
//! and the key is turned. The first step that does not register stops
//! the run.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AssemblyConfig;
use crate::domain::SubStep;
use crate::error::AssemblyResult;
use crate::events::{EventSink, NullSink};
use crate::instructions::InstructionPlan;
use crate::layout::Layout;
use crate::session::{AssemblySession, AttachRequest, HintTarget};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RehearsalReport {
    pub plan: String,
    pub steps: Vec<StepReport>,
    pub completed: bool,
    pub plan_issues: usize,
    pub state_hash: String,
}

impl RehearsalReport {
    pub fn passed(&self) -> usize {
        self.steps.iter().filter(|s| s.passed).count()
    }
}

/// Build a session from `layout` and play `plan` through it.
pub fn rehearse(
    layout: &Layout,
    plan: InstructionPlan,
    config: AssemblyConfig,
) -> AssemblyResult<RehearsalReport> {
    rehearse_with_sink(layout, plan, config, Box::new(NullSink))
}

/// [`rehearse`] with the session's transitions going to `sink`.
pub fn rehearse_with_sink(
    layout: &Layout,
    plan: InstructionPlan,
    config: AssemblyConfig,
    sink: Box<dyn EventSink>,
) -> AssemblyResult<RehearsalReport> {
    let registry = layout.build_registry(config.snap_distance)?;
    let mut session = AssemblySession::new(registry, plan, config, sink);
    let steps = play(&mut session);
    Ok(RehearsalReport {
        plan: session.plan().name.clone(),
        steps,
        completed: session.is_complete(),
        plan_issues: session.plan_issues().len(),
        state_hash: session.state_hash(),
    })
}

/// Play every remaining step of `session`'s plan.
pub fn play(session: &mut AssemblySession) -> Vec<StepReport> {
    let total = session.plan().len();
    let mut reports = Vec::with_capacity(total);
    while let Some(step) = session.current_step().cloned() {
        let index = session.sequence().cursor();
        let result = play_step(session);
        let report = StepReport {
            index,
            name: step.display_name.clone(),
            passed: result.is_ok(),
            detail: result.err().unwrap_or_default(),
        };
        if report.passed {
            info!(step = index, name = %report.name, "rehearsed step");
        } else {
            warn!(step = index, name = %report.name, detail = %report.detail, "rehearsal stopped");
        }
        let stop = !report.passed;
        reports.push(report);
        if stop {
            break;
        }
    }
    for index in reports.len()..total {
        let name = session
            .plan()
            .step(index)
            .map(|s| s.display_name.clone())
            .unwrap_or_default();
        reports.push(StepReport {
            index,
            name,
            passed: false,
            detail: "not reached".into(),
        });
    }
    reports
}

fn play_step(session: &mut AssemblySession) -> Result<(), String> {
    let step = session
        .current_step()
        .cloned()
        .ok_or_else(|| "no current step".to_string())?;
    if session.sequence().sub_step() != SubStep::AttachPiece {
        return Err(format!("step starts at {}", session.sequence().sub_step()));
    }

    let guidance = session.guidance();
    let pose = guidance
        .target_pose
        .ok_or_else(|| "no target pose for the incoming piece".to_string())?;
    let registry = session.registry();
    let shared_parent = match (registry.piece(step.source_id), registry.piece(step.target_id)) {
        (Some(a), Some(b)) => a.parent().is_some() && a.parent() == b.parent(),
        _ => false,
    };
    if !shared_parent {
        session.move_piece(step.target_id, pose);
    }

    let outcome = session.attach(step.target(), step.source(), AttachRequest::default());
    if let Some(rejection) = outcome.rejection {
        return Err(format!("attach: {rejection}"));
    }

    let HintTarget::Screw { screw, hole } = session.guidance().hint else {
        return Err("no screw hole after attaching".into());
    };
    session.move_screw(screw, hole.translation.vector);
    session
        .insert_screw(screw)
        .map_err(|r| format!("screw: {r}"))?;
    session.use_key(screw).map_err(|r| format!("key: {r}"))?;
    Ok(())
}
