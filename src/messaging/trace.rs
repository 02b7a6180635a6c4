// Message tracing
// Append-only JSONL record of delivered messages, written from the worker thread

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::message::{Argument, Message};

/// Errors that can occur during trace operations
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// One traced message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 wall-clock time the entry was recorded
    pub wall_time: String,

    pub address: String,

    /// Session sample index carried by the message
    pub timestamp: u64,

    pub args: Vec<Argument>,
}

impl TraceEntry {
    pub fn from_message(message: &Message) -> Self {
        TraceEntry {
            wall_time: Utc::now().to_rfc3339(),
            address: message.address.to_string(),
            timestamp: message.timestamp,
            args: message.args.to_vec(),
        }
    }

    /// Rebuild the message this entry recorded
    pub fn to_message(&self) -> Message {
        let mut message = Message::new(self.address.clone(), self.timestamp);
        message.args.extend(self.args.iter().cloned());
        message
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Trace file writer.
/// The file is opened in append mode once and buffered; `flush` pushes entries to disk.
pub struct TraceWriter {
    file_path: PathBuf,
    out: BufWriter<File>,
    written: u64,
}

impl TraceWriter {
    /// Open (or create) the trace file for appending
    pub fn new(file_path: PathBuf) -> Result<Self, TraceError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        Ok(TraceWriter {
            file_path,
            out: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn write(&mut self, entry: &TraceEntry) -> Result<(), TraceError> {
        let json_line = entry.to_json_line()?;
        self.out.write_all(json_line.as_bytes())?;
        self.written += 1;
        Ok(())
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), TraceError> {
        self.write(&TraceEntry::from_message(message))
    }

    pub fn write_batch(&mut self, entries: &[TraceEntry]) -> Result<(), TraceError> {
        for entry in entries {
            self.write(entry)?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.out.flush()?;
        Ok(())
    }

    /// Entries written by this writer
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            log::warn!("Failed to flush trace {}: {}", self.file_path.display(), e);
        }
    }
}

/// Hub callback that appends every message it sees to `writer`.
/// Write failures are logged; the first one is reported, later ones only counted.
pub fn trace_subscriber(writer: Arc<Mutex<TraceWriter>>) -> impl FnMut(&Message) + Send + 'static {
    let mut failures = 0u64;
    move |message| {
        let result = match writer.lock() {
            Ok(mut writer) => writer.write_message(message),
            Err(_) => return,
        };
        if let Err(e) = result {
            failures += 1;
            if failures == 1 {
                log::warn!("Trace write failed: {}", e);
            }
        }
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let entry: TraceEntry = serde_json::from_str(line)?;
        entries.push(entry);
    }

    Ok(entries)
}
