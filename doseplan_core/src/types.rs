//! Core domain types for the doseplan system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Recurrence rules (schedules) and their daily dose times
//! - Dose history records with a type-enforced status lifecycle
//! - Adherence statistics and classification values
//!
//! All instants are local wall-clock times (`NaiveDateTime`); no timezone
//! conversion happens anywhere in the core.

use crate::{Error, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default number of minutes a reminder fires before a dose
pub const DEFAULT_REMINDER_OFFSET_MINUTES: u32 = 15;

// ============================================================================
// Schedule Types
// ============================================================================

/// How often a medication is due
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    /// SOS medication: logged ad hoc, never projected
    AsNeeded,
    SpecificDays,
}

impl Frequency {
    /// Whether `days_of_week` restricts the admissible days for this frequency
    pub fn uses_weekdays(&self) -> bool {
        matches!(self, Frequency::Weekly | Frequency::SpecificDays)
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "as_needed" | "as-needed" | "sos" => Ok(Frequency::AsNeeded),
            "specific_days" | "specific-days" => Ok(Frequency::SpecificDays),
            other => Err(Error::InvalidSchedule(format!(
                "unknown frequency: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::AsNeeded => write!(f, "as_needed"),
            Frequency::SpecificDays => write!(f, "specific_days"),
        }
    }
}

/// Relation of a dose to a meal (informational)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MealRelation {
    Before,
    After,
    With,
    Anytime,
}

impl FromStr for MealRelation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "before" => Ok(MealRelation::Before),
            "after" => Ok(MealRelation::After),
            "with" => Ok(MealRelation::With),
            "anytime" => Ok(MealRelation::Anytime),
            other => Err(Error::Other(format!("unknown meal relation: {}", other))),
        }
    }
}

/// One recurrence rule for one medication
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MedicationSchedule {
    pub id: Uuid,
    pub medication_id: String,
    pub user_id: String,
    pub frequency: Frequency,
    pub times_per_day: u32,
    /// Weekday indices, 0 = Sunday .. 6 = Saturday
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,
    pub start_date: NaiveDate,
    /// Inclusive; `None` means continuous treatment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub is_recurring: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MedicationSchedule {
    /// Create a recurring schedule starting on `start_date`
    pub fn new(
        medication_id: impl Into<String>,
        user_id: impl Into<String>,
        frequency: Frequency,
        start_date: NaiveDate,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            medication_id: medication_id.into(),
            user_id: user_id.into(),
            frequency,
            times_per_day: 1,
            days_of_week: None,
            start_date,
            end_date: None,
            is_recurring: frequency != Frequency::AsNeeded,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the rule for data-entry defects.
    ///
    /// The projector itself tolerates all of these; this is meant for the
    /// boundary where schedules are created or edited.
    pub fn validate(&self) -> Result<()> {
        if self.times_per_day == 0 {
            return Err(Error::InvalidSchedule(
                "times_per_day must be positive".into(),
            ));
        }

        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(Error::InvalidSchedule(format!(
                    "end date {} is before start date {}",
                    end, self.start_date
                )));
            }
        }

        if let Some(days) = &self.days_of_week {
            if let Some(bad) = days.iter().find(|d| **d > 6) {
                return Err(Error::InvalidSchedule(format!(
                    "weekday index {} out of range 0..=6",
                    bad
                )));
            }
            if days.is_empty() && self.frequency.uses_weekdays() {
                return Err(Error::InvalidSchedule(format!(
                    "{} schedule has an empty days_of_week list",
                    self.frequency
                )));
            }
        }

        Ok(())
    }
}

/// One daily time-of-day slot within a schedule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseTime {
    pub id: Uuid,
    pub schedule_id: Uuid,
    /// Wall-clock "HH:mm"
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_relation: Option<MealRelation>,
    #[serde(default = "default_reminder_offset")]
    pub reminder_offset_minutes: u32,
    pub created_at: NaiveDateTime,
}

fn default_reminder_offset() -> u32 {
    DEFAULT_REMINDER_OFFSET_MINUTES
}

impl DoseTime {
    pub fn new(schedule_id: Uuid, time: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            time: time.into(),
            meal_relation: None,
            reminder_offset_minutes: DEFAULT_REMINDER_OFFSET_MINUTES,
            created_at: now,
        }
    }

    /// Strictly parse `time` as a 24-hour `HH:mm` pair
    pub fn parse_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|e| Error::InvalidDoseTime(format!("{:?}: {}", self.time, e)))
    }

    /// Best-effort parse used by the projector.
    ///
    /// Missing or non-numeric components count as `0` and only leading
    /// digits of each component are read, so `"8"` is 08:00 and `"7:5x"`
    /// is 07:05. Returns `None` when the result is not a valid clock time.
    pub fn lenient_time(&self) -> Option<NaiveTime> {
        let mut parts = self.time.trim().split(':');
        let hours = leading_number(parts.next().unwrap_or(""));
        let minutes = leading_number(parts.next().unwrap_or(""));
        NaiveTime::from_hms_opt(hours, minutes, 0)
    }
}

fn leading_number(s: &str) -> u32 {
    let digits: String = s
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    digits.parse().unwrap_or(0)
}

// ============================================================================
// Dose History Types
// ============================================================================

/// Status of a dose event.
///
/// `taken_at` only exists on the variants where the dose was actually
/// administered, so "taken time present iff taken/late" holds by construction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DoseStatus {
    Scheduled,
    Taken { taken_at: NaiveDateTime },
    Missed,
    Skipped,
    Late { taken_at: NaiveDateTime },
}

impl DoseStatus {
    pub fn kind(&self) -> DoseStatusKind {
        match self {
            DoseStatus::Scheduled => DoseStatusKind::Scheduled,
            DoseStatus::Taken { .. } => DoseStatusKind::Taken,
            DoseStatus::Missed => DoseStatusKind::Missed,
            DoseStatus::Skipped => DoseStatusKind::Skipped,
            DoseStatus::Late { .. } => DoseStatusKind::Late,
        }
    }

    pub fn taken_at(&self) -> Option<NaiveDateTime> {
        match self {
            DoseStatus::Taken { taken_at } | DoseStatus::Late { taken_at } => Some(*taken_at),
            _ => None,
        }
    }

    /// Whether the dose was administered (on time or late)
    pub fn is_administered(&self) -> bool {
        self.taken_at().is_some()
    }
}

/// Payload-free status tag, used for filtering and display
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatusKind {
    Scheduled,
    Taken,
    Missed,
    Skipped,
    Late,
}

impl FromStr for DoseStatusKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(DoseStatusKind::Scheduled),
            "taken" => Ok(DoseStatusKind::Taken),
            "missed" => Ok(DoseStatusKind::Missed),
            "skipped" => Ok(DoseStatusKind::Skipped),
            "late" => Ok(DoseStatusKind::Late),
            other => Err(Error::Other(format!("unknown dose status: {}", other))),
        }
    }
}

impl fmt::Display for DoseStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DoseStatusKind::Scheduled => "scheduled",
            DoseStatusKind::Taken => "taken",
            DoseStatusKind::Missed => "missed",
            DoseStatusKind::Skipped => "skipped",
            DoseStatusKind::Late => "late",
        };
        f.write_str(s)
    }
}

/// One actual or expected dose event
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseHistory {
    pub id: Uuid,
    pub user_id: String,
    pub medication_id: String,
    pub schedule_id: Uuid,
    pub scheduled_time: NaiveDateTime,
    #[serde(flatten)]
    pub status: DoseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl DoseHistory {
    /// Build a record for a dose of `schedule` due at `scheduled_time`
    pub fn for_schedule(
        schedule: &MedicationSchedule,
        scheduled_time: NaiveDateTime,
        status: DoseStatus,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: schedule.user_id.clone(),
            medication_id: schedule.medication_id.clone(),
            schedule_id: schedule.id,
            scheduled_time,
            status,
            notes: None,
            created_at: now,
        }
    }

    /// Minutes between due time and intake, clamped at zero.
    ///
    /// `None` unless the dose was administered.
    pub fn late_minutes(&self) -> Option<i64> {
        self.status
            .taken_at()
            .map(|taken| crate::schedule::late_minutes(self.scheduled_time, taken))
    }

    /// Move a `scheduled` record to its final status.
    ///
    /// Records transition exactly once; anything other than
    /// `scheduled -> {taken, missed, skipped, late}` is rejected.
    pub fn transition(&self, next: DoseStatus) -> Result<DoseHistory> {
        if self.status != DoseStatus::Scheduled || next == DoseStatus::Scheduled {
            return Err(Error::InvalidTransition {
                from: self.status.kind(),
                to: next.kind(),
            });
        }

        Ok(DoseHistory {
            status: next,
            ..self.clone()
        })
    }

    /// Whether this record is still `scheduled` and past `scheduled_time + grace`
    pub fn is_overdue(&self, now: NaiveDateTime, grace: Duration) -> bool {
        self.status == DoseStatus::Scheduled
            && self
                .scheduled_time
                .checked_add_signed(grace)
                .map_or(false, |due| due < now)
    }
}

// ============================================================================
// Adherence Types
// ============================================================================

/// Aggregate adherence metrics, computed on demand and never persisted
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct AdherenceStats {
    pub total_doses: usize,
    pub taken_doses: usize,
    pub missed_doses: usize,
    pub skipped_doses: usize,
    pub late_doses: usize,
    pub adherence_percentage: f64,
    pub average_late_minutes: f64,
}

/// Coarse adherence classification
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdherenceLevel {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl fmt::Display for AdherenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdherenceLevel::Excellent => "excellent",
            AdherenceLevel::Good => "good",
            AdherenceLevel::Moderate => "moderate",
            AdherenceLevel::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Adherence within one trailing period `[start, end)`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeriodAdherence {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub adherence_percentage: f64,
}
