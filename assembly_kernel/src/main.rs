/// Assembly kernel v1: plan rehearsal harness.
///
/// Loads a layout and an instruction plan, plays every step through a
/// fresh session and reports which steps register.
///
/// Usage: assembly_kernel <layout.json> <plan.json> [config.json]
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use assembly_kernel::config::AssemblyConfig;
use assembly_kernel::error::AssemblyResult;
use assembly_kernel::instructions::InstructionPlan;
use assembly_kernel::layout::Layout;
use assembly_kernel::rehearsal::{rehearse, RehearsalReport};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "assembly_kernel")]
#[command(about = "Rehearse an instruction plan against a piece layout", long_about = None)]
struct Args {
    /// Piece layout (JSON)
    layout: PathBuf,
    /// Instruction plan (JSON)
    plan: PathBuf,
    /// Assembly config (JSON); defaults apply when omitted
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args.layout, &args.plan, args.config.as_deref()) {
        Ok(report) => {
            print_report(&report);
            if report.completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(layout: &Path, plan: &Path, config: Option<&Path>) -> AssemblyResult<RehearsalReport> {
    let layout = Layout::load(layout)?;
    let plan = InstructionPlan::load(plan)?;
    let config = match config {
        Some(path) => AssemblyConfig::load(path)?,
        None => AssemblyConfig::default(),
    };
    println!("Loaded plan '{}' ({} steps)", plan.name, plan.len());
    rehearse(&layout, plan, config)
}

fn print_report(report: &RehearsalReport) {
    for step in &report.steps {
        if step.passed {
            println!("[PASS] step {}: {}", step.index, step.name);
        } else {
            println!("[FAIL] step {}: {} ({})", step.index, step.name, step.detail);
        }
    }
    if report.plan_issues > 0 {
        println!("  {} plan issue(s) logged at load", report.plan_issues);
    }

    println!("\n===========================================");
    println!("Results: {}/{} passed", report.passed(), report.steps.len());
    println!("State hash: {}", report.state_hash);
    if report.completed {
        println!("[OK] Plan '{}' completed.", report.plan);
    } else {
        println!("[FAIL] Plan '{}' did not complete.", report.plan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn config_is_optional() {
        let args = Args::try_parse_from(["assembly_kernel", "layout.json", "plan.json"]).expect("parse");
        assert_eq!(args.layout, PathBuf::from("layout.json"));
        assert_eq!(args.plan, PathBuf::from("plan.json"));
        assert_eq!(args.config, None);

        let args = Args::try_parse_from(["assembly_kernel", "l.json", "p.json", "c.json"]).expect("parse");
        assert_eq!(args.config, Some(PathBuf::from("c.json")));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert!(Args::try_parse_from(["assembly_kernel", "layout.json"]).is_err());
        assert!(Args::try_parse_from(["assembly_kernel", "l", "p", "c", "extra"]).is_err());
    }
}
