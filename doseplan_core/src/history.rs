//! Dose history queries.
//!
//! This module loads dose records from the dose log and narrows them down
//! to what a report or the sweep needs.

use crate::{DoseHistory, DoseStatusKind, Result};
use chrono::NaiveDateTime;
use std::path::Path;

/// Criteria for selecting dose records
///
/// `start` is inclusive and `end` exclusive, both matched against
/// `scheduled_time`.
#[derive(Clone, Debug, Default)]
pub struct DoseHistoryFilter {
    pub user_id: String,
    pub medication_id: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub statuses: Option<Vec<DoseStatusKind>>,
}

impl DoseHistoryFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn medication(mut self, medication_id: impl Into<String>) -> Self {
        self.medication_id = Some(medication_id.into());
        self
    }

    pub fn between(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn statuses(mut self, statuses: Vec<DoseStatusKind>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn matches(&self, record: &DoseHistory) -> bool {
        record.user_id == self.user_id
            && self
                .medication_id
                .as_ref()
                .map_or(true, |m| &record.medication_id == m)
            && self.start.map_or(true, |s| record.scheduled_time >= s)
            && self.end.map_or(true, |e| record.scheduled_time < e)
            && self
                .statuses
                .as_ref()
                .map_or(true, |kinds| kinds.contains(&record.status.kind()))
    }
}

/// Load dose records matching `filter` from the dose log
///
/// Returns records sorted by scheduled_time (newest first).
pub fn load_history(log_path: &Path, filter: &DoseHistoryFilter) -> Result<Vec<DoseHistory>> {
    let mut records: Vec<DoseHistory> = crate::dose_log::read_log(log_path)?
        .into_iter()
        .filter(|r| filter.matches(r))
        .collect();

    records.sort_by(|a, b| b.scheduled_time.cmp(&a.scheduled_time));

    tracing::debug!(
        "Loaded {} dose records for user {}",
        records.len(),
        filter.user_id
    );

    Ok(records)
}

/// Records still waiting for an outcome
pub fn pending_doses(history: &[DoseHistory]) -> Vec<&DoseHistory> {
    history
        .iter()
        .filter(|r| r.status.kind() == DoseStatusKind::Scheduled)
        .collect()
}
