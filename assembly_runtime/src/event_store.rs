//! Append-only assembly event log.
//!
//! Storage format: length-prefixed protobuf frames.
//!   [4-byte LE length][ProtoRecord bytes][4-byte LE length][ProtoRecord bytes]...
//!
//! Rules:
//!   - Strict append only, no rewrite or truncation
//!   - fsync after every write
//!   - Sequence numbers start at 1 and grow by exactly one

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::Message;

use crate::error::{RuntimeError, RuntimeResult};
use crate::proto_bridge::{proto_to_record, record_to_proto, LogRecord};
use crate::proto_types::ProtoRecord;

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Append-only event log backed by a binary file.
#[derive(Debug)]
pub struct EventStore {
    path: PathBuf,
    last_sequence: u64,
}

impl EventStore {
    /// Open or create a log at `path`. Existing frames are read and
    /// checked so the next append continues the sequence.
    pub fn open(path: &Path) -> RuntimeResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RuntimeError::io(parent, e))?;
        }

        let last_sequence = if path.exists() {
            let frames = read_frames(path)?;
            frames.last().map(|r| r.sequence).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            path: path.to_path_buf(),
            last_sequence,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Its sequence must be `last_sequence() + 1`.
    pub fn append(&mut self, record: &LogRecord) -> RuntimeResult<()> {
        let expected = self.last_sequence + 1;
        if record.sequence != expected {
            return Err(RuntimeError::SequenceViolation {
                expected,
                found: record.sequence,
            });
        }

        let buf = record_to_proto(record).encode_to_vec();
        self.write_frame(&buf).map_err(|e| RuntimeError::io(&self.path, e))?;

        self.last_sequence = record.sequence;
        Ok(())
    }

    fn write_frame(&self, buf: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        {
            let mut writer = BufWriter::new(&mut file);
            writer.write_all(&(buf.len() as u32).to_le_bytes())?;
            writer.write_all(buf)?;
            writer.flush()?;
        }
        file.sync_all()
    }

    /// Load every record in file order.
    pub fn load_all(&self) -> RuntimeResult<Vec<LogRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_frames(&self.path)?.iter().map(proto_to_record).collect()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn is_empty(&self) -> bool {
        self.last_sequence == 0
    }
}

/// Read all frames, validating lengths and decode. Offsets in errors are
/// byte positions of the frame's length prefix.
fn read_frames(path: &Path) -> RuntimeResult<Vec<ProtoRecord>> {
    let file = File::open(path).map_err(|e| RuntimeError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut len_buf = [0u8; 4];
    let mut offset: u64 = 0;

    loop {
        match read_prefix(&mut reader, &mut len_buf) {
            Ok(0) => break,
            Ok(4) => {}
            Ok(_) => return Err(RuntimeError::TruncatedFrame { offset }),
            Err(e) => return Err(RuntimeError::io(path, e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(RuntimeError::InvalidFrameLength { offset, len });
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => RuntimeError::TruncatedFrame { offset },
            _ => RuntimeError::io(path, e),
        })?;

        let record = ProtoRecord::decode(frame.as_slice())
            .map_err(|source| RuntimeError::Decode { offset, source })?;
        records.push(record);
        offset += 4 + len as u64;
    }

    Ok(records)
}

/// Fill the 4-byte prefix, returning how many bytes were available.
/// Zero means a clean end of file.
fn read_prefix(reader: &mut impl Read, buf: &mut [u8; 4]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
