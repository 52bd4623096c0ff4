//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Append-only JSONL log of telemetry and alarm events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tracing::{debug, info, warn};

use crate::{PersistenceError, Result};

/// Format version written into the header line.
pub const EVENT_LOG_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl EventLogHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!(
            "{:x}",
            sha2::Sha256::digest(created_at.to_rfc3339().as_bytes())
        );
        Self {
            version: EVENT_LOG_VERSION,
            created_at,
            hash,
        }
    }
}

/// Category of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// One telemetry sample.
    Telemetry,
    /// One raised alarm.
    Alarm,
}

/// Single line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp of the underlying sample or alarm.
    pub timestamp: DateTime<Utc>,
    /// Event category.
    pub kind: EventKind,
    /// Serialized sample or alarm.
    pub payload: serde_json::Value,
}

impl EventLogEntry {
    /// Construct an entry; the sequence is assigned on append.
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>, payload: serde_json::Value) -> Self {
        Self {
            sequence: 0,
            timestamp,
            kind,
            payload,
        }
    }

    /// Serialize `value` into an entry payload.
    pub fn from_serializable<T: Serialize>(
        kind: EventKind,
        timestamp: DateTime<Utc>,
        value: &T,
    ) -> Result<Self> {
        Ok(Self::new(kind, timestamp, serde_json::to_value(value)?))
    }
}

/// Append-only writer for the event log.
#[derive(Debug)]
pub struct EventLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl EventLogWriter {
    /// Open an event log for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        let next_sequence = if fresh {
            let line = serde_json::to_string(&EventLogHeader::new())?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            info!(path = %path.display(), version = EVENT_LOG_VERSION, "event log created");
            0
        } else {
            let last = last_sequence(path)?;
            if !ends_with_newline(path)? {
                warn!(path = %path.display(), "event log ends mid-line; terminating it before appending");
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
            info!(path = %path.display(), last_sequence = last, "event log reopened");
            last
        };

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a new entry and return the assigned sequence number and byte count.
    pub fn append(&mut self, entry: EventLogEntry) -> Result<(u64, usize)> {
        let appended = self.write_entry(entry)?;
        self.flush()?;
        Ok(appended)
    }

    /// Append several entries with a single flush; returns the bytes written.
    pub fn append_batch<I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = EventLogEntry>,
    {
        let mut bytes = 0;
        for entry in entries {
            bytes += self.write_entry(entry)?.1;
        }
        self.flush()?;
        debug!(path = %self.path.display(), bytes, last_sequence = self.next_sequence, "event batch appended");
        Ok(bytes)
    }

    // The sequence only advances once the line is handed to the writer.
    fn write_entry(&mut self, mut entry: EventLogEntry) -> Result<(u64, usize)> {
        let sequence = self.next_sequence + 1;
        entry.sequence = sequence;
        let line = serde_json::to_string(&entry)?;
        let written = self
            .writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(err) = written {
            warn!(path = %self.path.display(), sequence, kind = ?entry.kind, error = %err, "event log append failed");
            return Err(err.into());
        }
        self.next_sequence = sequence;
        Ok((sequence, line.len() + 1))
    }

    /// Flush buffered writes to the underlying file handle.
    pub fn flush(&mut self) -> Result<()> {
        if let Err(err) = self.writer.flush() {
            warn!(path = %self.path.display(), last_sequence = self.next_sequence, error = %err, "event log flush failed");
            return Err(err.into());
        }
        Ok(())
    }

    /// Sequence number of the most recently appended entry.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Location of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_header(reader: &mut BufReader<File>) -> Result<EventLogHeader> {
    let mut first_line = String::new();
    if reader.read_line(&mut first_line)? == 0 {
        return Err(PersistenceError::InvalidHeader("empty file".into()));
    }
    serde_json::from_str(first_line.trim())
        .map_err(|err| PersistenceError::InvalidHeader(err.to_string()))
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    if file.seek(SeekFrom::End(0))? == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    read_header(&mut reader)?;
    let mut last_seq = 0u64;
    let mut skipped = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // a torn final line is tolerated; later appends continue the sequence
        match serde_json::from_str::<EventLogEntry>(&line) {
            Ok(entry) => last_seq = entry.sequence,
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, last_sequence = last_seq, "unreadable event log lines skipped");
    }
    Ok(last_seq)
}

/// Replay the log in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(EventLogEntry) -> Result<()>,
{
    let mut count = 0usize;
    for entry in EventLogReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over the log entries.
#[derive(Debug)]
pub struct EventLogReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl EventLogReader {
    /// Open the log for sequential reading, validating the header line.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = read_header(&mut reader)?;
        if header.version > EVENT_LOG_VERSION {
            return Err(PersistenceError::InvalidHeader(format!(
                "unsupported version {}",
                header.version
            )));
        }
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for EventLogReader {
    type Item = Result<EventLogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(serde_json::from_str(&line).map_err(PersistenceError::from)),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
