//! Persistence sinks
//!
//! The engine forwards every normalized record, aggregate, loop, tag and state
//! vector to a [`PersistenceSink`]. Sink failures are reported back as
//! [`EngineError`]s, which the engine logs and swallows.

use crate::error::EngineError;
use crate::types::NormalizedRecord;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default number of buffered records that triggers a file flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;

/// Category of a persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    RawKeydown,
    RawKeyup,
    RawMousemove,
    RawMousedown,
    RawMouseup,
    RawClick,
    RawFocusIn,
    RawFocusOut,
    RawScroll,
    #[serde(rename = "aggregate_5s")]
    Aggregate5s,
    #[serde(rename = "aggregate_30s")]
    Aggregate30s,
    #[serde(rename = "aggregate_60s")]
    Aggregate60s,
    CognitiveLoop,
    StateVector,
    UserTag,
    CognitiveEvent,
}

impl RecordKind {
    /// Sink category for a normalized record
    pub fn for_record(record: &NormalizedRecord) -> Self {
        use crate::types::{FocusKind, KeyPhase, PointerKind};
        match record {
            NormalizedRecord::Key(k) => match k.event_type {
                KeyPhase::Keydown => RecordKind::RawKeydown,
                KeyPhase::Keyup => RecordKind::RawKeyup,
            },
            NormalizedRecord::Pointer(p) => match p.event_type {
                PointerKind::Move => RecordKind::RawMousemove,
                PointerKind::Down => RecordKind::RawMousedown,
                PointerKind::Up => RecordKind::RawMouseup,
                PointerKind::Click => RecordKind::RawClick,
            },
            NormalizedRecord::Focus(f) => match f.event_type {
                FocusKind::FocusIn => RecordKind::RawFocusIn,
                FocusKind::FocusOut => RecordKind::RawFocusOut,
            },
            NormalizedRecord::Scroll(_) => RecordKind::RawScroll,
        }
    }
}

/// One persisted line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub kind: RecordKind,
    pub payload: serde_json::Value,
}

/// Destination for engine records
pub trait PersistenceSink: Send {
    /// Accept one record; may buffer
    fn save_record(
        &mut self,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> Result<(), EngineError>;

    /// Write out anything buffered
    fn flush_buffer(&mut self) -> Result<(), EngineError>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn save_record(
        &mut self,
        _kind: RecordKind,
        _payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// In-memory sink; clones share the same record list
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<SinkRecord>>>,
    flushes: Arc<Mutex<u64>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record saved so far
    pub fn records(&self) -> Vec<SinkRecord> {
        lock(&self.records).clone()
    }

    /// Payloads saved under `kind`
    pub fn payloads(&self, kind: RecordKind) -> Vec<serde_json::Value> {
        lock(&self.records)
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.payload.clone())
            .collect()
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        lock(&self.records).iter().filter(|r| r.kind == kind).count()
    }

    /// How many times the engine flushed this sink
    pub fn flush_count(&self) -> u64 {
        *lock(&self.flushes)
    }
}

impl PersistenceSink for MemorySink {
    fn save_record(
        &mut self,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        lock(&self.records).push(SinkRecord { kind, payload });
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<(), EngineError> {
        *lock(&self.flushes) += 1;
        Ok(())
    }
}

// A poisoned lock only means a panicking test thread; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Appends records as NDJSON, flushing every `threshold` records
#[derive(Debug)]
pub struct NdjsonFileSink {
    path: PathBuf,
    buffer: Vec<SinkRecord>,
    threshold: usize,
}

impl NdjsonFileSink {
    /// Sink appending to `path` (created on first flush)
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_threshold(path, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(path: impl AsRef<Path>, threshold: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            buffer: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn open(&self) -> Result<File, EngineError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::SinkUnavailable(format!("{}: {e}", self.path.display())))
    }

    /// Write buffered records one line at a time
    ///
    /// Lines that made it out are removed from the buffer even when a later
    /// line fails, so a retry never writes them twice.
    fn write_lines<W: Write>(&mut self, writer: &mut W) -> Result<(), EngineError> {
        let mut written = 0;
        let mut result = Ok(());
        for record in &self.buffer {
            let line = serde_json::to_vec(record).map(|mut line| {
                line.push(b'\n');
                line
            });
            let attempt = match line {
                Ok(line) => writer.write_all(&line).map_err(EngineError::from),
                Err(e) => Err(EngineError::from(e)),
            };
            if let Err(e) = attempt {
                result = Err(e);
                break;
            }
            written += 1;
        }
        if result.is_ok() {
            result = writer.flush().map_err(EngineError::from);
        }
        self.buffer.drain(..written);
        result
    }
}

impl PersistenceSink for NdjsonFileSink {
    fn save_record(
        &mut self,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.buffer.push(SinkRecord { kind, payload });
        if self.buffer.len() >= self.threshold {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// On failure the buffer is kept for the next flush, capped at ten thresholds
    fn flush_buffer(&mut self) -> Result<(), EngineError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = self
            .open()
            .and_then(|mut file| self.write_lines(&mut file));
        if result.is_err() {
            let cap = self.threshold.saturating_mul(10);
            let excess = self.buffer.len().saturating_sub(cap);
            self.buffer.drain(..excess);
        }
        result
    }
}

impl Drop for NdjsonFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush_buffer() {
            tracing::warn!(
                error = %e,
                path = %self.path.display(),
                "dropping unflushed records"
            );
        }
    }
}
