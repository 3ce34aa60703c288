//! Append-only dose log.
//!
//! Dose records are appended to a JSONL (JSON Lines) file with file
//! locking to ensure safe concurrent access. A record is never rewritten
//! in place: completing a `scheduled` dose appends a second line with the
//! same id, and readers fold the two.

use crate::{DoseHistory, Result};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Dose sink trait for persisting dose records
pub trait DoseSink {
    fn append(&mut self, record: &DoseHistory) -> Result<()>;
}

/// JSONL-based dose sink with file locking
pub struct JsonlDoseLog {
    path: PathBuf,
}

impl JsonlDoseLog {
    /// Create a new JSONL dose log for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the parent directory exists
    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl DoseSink for JsonlDoseLog {
    fn append(&mut self, record: &DoseHistory) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!(
            "Appended dose {} ({}) to log",
            record.id,
            record.status.kind()
        );
        Ok(())
    }
}

/// Read every dose record from a log file
///
/// Malformed lines are skipped. When an id appears more than once, a later
/// line replaces the earlier record only if it is a legal
/// `scheduled -> final` transition; anything else is ignored. Records keep
/// the order in which their id first appeared.
pub fn read_log(path: &Path) -> Result<Vec<DoseHistory>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records: Vec<DoseHistory> = Vec::new();
    let mut index = HashMap::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<DoseHistory>(&line) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Failed to parse dose at line {}: {}", line_num + 1, e);
                continue;
            }
        };

        match index.get(&record.id).copied() {
            None => {
                index.insert(record.id, records.len());
                records.push(record);
            }
            Some(pos) => {
                match records[pos].transition(record.status) {
                    Ok(_) => records[pos] = record,
                    Err(e) => tracing::warn!(
                        "Ignoring dose {} at line {}: {}",
                        record.id,
                        line_num + 1,
                        e
                    ),
                }
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} dose records from log", records.len());
    Ok(records)
}
