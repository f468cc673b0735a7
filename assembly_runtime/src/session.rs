//! Recorded sessions: a kernel session whose progress goes to disk.
//!
//! Each session gets its own directory:
//!   <base_dir>/<session_id>/events.log
//!   <base_dir>/<session_id>/snapshots/
//!
//! Event order:
//!   1. SessionStarted header, recorded before the kernel session exists
//!   2. every sub-step and completion the kernel reports, via [`LogSink`]
//!
//! No global mutable state. Sessions in different directories share nothing.

use std::path::{Path, PathBuf};

use tracing::info;

use assembly_kernel::hashing;
use assembly_kernel::instructions::InstructionPlan;
use assembly_kernel::layout::Layout;
use assembly_kernel::registry::StructureRegistry;
use assembly_kernel::session::AssemblySession;

use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::event_store::EventStore;
use crate::proto_bridge::LogEvent;
use crate::replay::{replay_log, Progress};
use crate::sink::{self, LogSink, LogWriter, WriterReport};
use crate::snapshot::save_snapshot;

const EVENTS_FILE: &str = "events.log";
const SNAPSHOT_DIR: &str = "snapshots";

/// An assembly session with its own event log and snapshots.
#[derive(Debug)]
pub struct RecordedSession {
    session_id: String,
    dir: PathBuf,
    session: AssemblySession,
    log: LogSink,
    writer: LogWriter,
    config: RuntimeConfig,
    /// The current completion already has its snapshot.
    snapshotted: bool,
}

impl RecordedSession {
    /// Start a session in `<base_dir>/<session_id>`. Fails if that
    /// directory already holds a non-empty log.
    pub fn create(
        base_dir: &Path,
        session_id: &str,
        registry: StructureRegistry,
        plan: InstructionPlan,
        config: RuntimeConfig,
    ) -> RuntimeResult<Self> {
        let dir = base_dir.join(session_id);
        let store = EventStore::open(&dir.join(EVENTS_FILE))?;
        if !store.is_empty() {
            return Err(RuntimeError::SessionExists(session_id.to_string()));
        }

        let (log, writer) = sink::spawn(store)?;
        log.record(LogEvent::SessionStarted {
            plan_hash: hashing::plan_hash(&plan),
            plan_name: plan.name.clone(),
            step_count: plan.len(),
        });
        let session = AssemblySession::new(
            registry,
            plan,
            config.assembly.clone(),
            Box::new(log.clone()),
        );
        info!(session = session_id, dir = %dir.display(), "recorded session created");

        let mut recorded = Self {
            session_id: session_id.to_string(),
            dir,
            session,
            log,
            writer,
            config,
            snapshotted: false,
        };
        recorded.after_mutation()?;
        Ok(recorded)
    }

    /// [`RecordedSession::create`] with the registry built from a layout.
    pub fn from_layout(
        base_dir: &Path,
        session_id: &str,
        layout: &Layout,
        plan: InstructionPlan,
        config: RuntimeConfig,
    ) -> RuntimeResult<Self> {
        let registry = layout.build_registry(config.assembly.snap_distance)?;
        Self::create(base_dir, session_id, registry, plan, config)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_DIR)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Read-only view of the kernel session.
    pub fn session(&self) -> &AssemblySession {
        &self.session
    }

    /// Run `action` against the kernel session, then snapshot if the plan
    /// just completed and the config asks for it.
    pub fn apply<R>(&mut self, action: impl FnOnce(&mut AssemblySession) -> R) -> RuntimeResult<R> {
        let result = action(&mut self.session);
        self.after_mutation()?;
        Ok(result)
    }

    fn after_mutation(&mut self) -> RuntimeResult<()> {
        if !self.session.is_complete() {
            self.snapshotted = false;
            return Ok(());
        }
        if self.config.snapshot_on_completion && !self.snapshotted {
            let path = self.snapshot()?;
            info!(session = %self.session_id, path = %path.display(), "completion snapshot written");
            self.snapshotted = true;
        }
        Ok(())
    }

    /// Wait for the writer to catch up. Returns the last logged sequence.
    pub fn flush(&self) -> RuntimeResult<u64> {
        self.log.flush()
    }

    /// Snapshot the current state at the current end of the log.
    pub fn snapshot(&self) -> RuntimeResult<PathBuf> {
        let sequence = self.flush()?;
        save_snapshot(&self.snapshot_dir(), sequence, &self.session)
    }

    /// Replay the on-disk log and check it agrees with the live session.
    pub fn replay(&self) -> RuntimeResult<Progress> {
        let last = self.flush()?;
        let progress = replay_log(&self.events_path())?;

        let live = self.session.sequence();
        let mismatch = if progress.plan_hash != self.session.plan_hash() {
            Some("plan hash differs".to_string())
        } else if progress.last_sequence != last {
            Some(format!("log ends at {} but writer reports {last}", progress.last_sequence))
        } else if (progress.cursor, progress.sub_step, progress.completed)
            != (live.cursor(), live.sub_step(), live.is_complete())
        {
            Some(format!(
                "log is at step {} {}, session at step {} {}",
                progress.cursor,
                progress.sub_step,
                live.cursor(),
                live.sub_step()
            ))
        } else {
            None
        };

        match mismatch {
            Some(reason) => Err(RuntimeError::Replay {
                sequence: progress.last_sequence,
                reason,
            }),
            None => Ok(progress),
        }
    }

    /// Stop the writer after it drains everything recorded so far.
    pub fn close(self) -> RuntimeResult<WriterReport> {
        let Self {
            session_id,
            session,
            log,
            writer,
            ..
        } = self;
        // The kernel session holds a sink clone; both must go before the
        // writer thread sees its channel close.
        drop(session);
        drop(log);
        let report = writer.join()?;
        info!(
            session = %session_id,
            written = report.written,
            failed = report.failed,
            "recorded session closed"
        );
        Ok(report)
    }
}
