//! CSV export of dose history.
//!
//! Writes one row per dose record for spreadsheets and clinicians. The
//! file is flushed and synced before returning.

use crate::{DoseHistory, Result};
use std::fs::File;
use std::path::Path;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    user_id: String,
    medication_id: String,
    schedule_id: String,
    scheduled_time: String,
    status: String,
    taken_at: Option<String>,
    late_minutes: Option<i64>,
    notes: Option<String>,
}

impl From<&DoseHistory> for CsvRow {
    fn from(record: &DoseHistory) -> Self {
        CsvRow {
            id: record.id.to_string(),
            user_id: record.user_id.clone(),
            medication_id: record.medication_id.clone(),
            schedule_id: record.schedule_id.to_string(),
            scheduled_time: record.scheduled_time.format(TIME_FORMAT).to_string(),
            status: record.status.kind().to_string(),
            taken_at: record
                .status
                .taken_at()
                .map(|t| t.format(TIME_FORMAT).to_string()),
            late_minutes: record.late_minutes(),
            notes: record.notes.clone(),
        }
    }
}

/// Write `history` to a CSV file at `path`, replacing any existing file
///
/// Returns the number of rows written.
pub fn export_csv(history: &[DoseHistory], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    for record in history {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Exported {} dose records to {:?}", history.len(), path);
    Ok(history.len())
}
