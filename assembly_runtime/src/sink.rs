//! Background event log writer.
//!
//! The kernel calls its [`EventSink`] from inside user actions, so the sink
//! only pushes onto a channel. A dedicated thread owns the [`EventStore`],
//! stamps sequence numbers and timestamps, and does the fsync'd appends.
//! Write failures are logged and counted; they never reach the caller.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use assembly_kernel::domain::SubStep;
use assembly_kernel::events::EventSink;

use crate::error::{RuntimeError, RuntimeResult};
use crate::event_store::EventStore;
use crate::proto_bridge::{LogEvent, LogRecord};

enum WriterMsg {
    Event(LogEvent),
    /// Answered with the last sequence written once every earlier
    /// message has been handled.
    Flush(Sender<u64>),
}

/// Cloneable, non-blocking handle onto the writer thread.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: Sender<WriterMsg>,
}

impl LogSink {
    pub fn record(&self, event: LogEvent) {
        if self.tx.send(WriterMsg::Event(event)).is_err() {
            warn!("event log writer has stopped; event dropped");
        }
    }

    /// Block until everything recorded so far is on disk. Returns the last
    /// sequence number in the log.
    pub fn flush(&self) -> RuntimeResult<u64> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.tx
            .send(WriterMsg::Flush(ack_tx))
            .map_err(|_| RuntimeError::WriterGone)?;
        ack_rx.recv().map_err(|_| RuntimeError::WriterGone)
    }
}

impl EventSink for LogSink {
    fn record_sub_step(&mut self, step: usize, sub_step: SubStep) {
        self.record(LogEvent::SubStepEntered { step, sub_step });
    }

    fn record_completion(&mut self, steps: usize) {
        self.record(LogEvent::Completed { steps });
    }
}

/// What the writer thread did over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterReport {
    pub written: u64,
    pub failed: u64,
    pub last_sequence: u64,
}

/// Owner side of the writer thread. The thread exits once every
/// [`LogSink`] clone is dropped.
#[derive(Debug)]
pub struct LogWriter {
    handle: JoinHandle<WriterReport>,
}

impl LogWriter {
    pub fn join(self) -> RuntimeResult<WriterReport> {
        self.handle.join().map_err(|_| RuntimeError::WriterGone)
    }
}

/// Start the writer thread for `store`.
pub fn spawn(store: EventStore) -> RuntimeResult<(LogSink, LogWriter)> {
    let (tx, rx) = mpsc::channel();
    let path = store.path().to_path_buf();
    let handle = thread::Builder::new()
        .name("assembly-event-log".into())
        .spawn(move || run_writer(store, rx))
        .map_err(|e| RuntimeError::io(path, e))?;
    Ok((LogSink { tx }, LogWriter { handle }))
}

fn run_writer(mut store: EventStore, rx: Receiver<WriterMsg>) -> WriterReport {
    let mut report = WriterReport {
        last_sequence: store.last_sequence(),
        ..WriterReport::default()
    };

    for msg in rx {
        match msg {
            WriterMsg::Event(event) => {
                let record = LogRecord {
                    sequence: store.last_sequence() + 1,
                    timestamp_ms: now_ms(),
                    event,
                };
                match store.append(&record) {
                    Ok(()) => {
                        report.written += 1;
                        report.last_sequence = record.sequence;
                    }
                    Err(err) => {
                        report.failed += 1;
                        error!(
                            path = %store.path().display(),
                            sequence = record.sequence,
                            error = %err,
                            "event log append failed"
                        );
                    }
                }
            }
            WriterMsg::Flush(ack) => {
                // The requester may have given up waiting.
                let _ = ack.send(store.last_sequence());
            }
        }
    }

    debug!(
        written = report.written,
        failed = report.failed,
        "event log writer stopped"
    );
    report
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
