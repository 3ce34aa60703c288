//! Dose logging decisions.
//!
//! Turns user actions and the passage of time into final dose statuses:
//! - Intake at a given time becomes `taken` or `late` by tolerance
//! - Overdue `scheduled` records are swept to `missed`

use crate::schedule::is_late;
use crate::{DoseHistory, DoseStatus};
use chrono::{Duration, NaiveDateTime};

/// Status for an intake at `taken_at` of a dose due at `scheduled`
pub fn intake_status(
    scheduled: NaiveDateTime,
    taken_at: NaiveDateTime,
    tolerance_minutes: i64,
) -> DoseStatus {
    if is_late(scheduled, taken_at, tolerance_minutes) {
        DoseStatus::Late { taken_at }
    } else {
        DoseStatus::Taken { taken_at }
    }
}

/// Complete a record with an intake at `taken_at`
///
/// Fails if the record already has a final status.
pub fn record_taken(
    entry: &DoseHistory,
    taken_at: NaiveDateTime,
    tolerance_minutes: i64,
) -> crate::Result<DoseHistory> {
    entry.transition(intake_status(entry.scheduled_time, taken_at, tolerance_minutes))
}

/// `missed` transitions for every pending record overdue at `now`
///
/// A record is overdue once `scheduled_time + grace_minutes` lies strictly
/// before `now`. The input is not modified; callers persist the result.
pub fn sweep_overdue(
    history: &[DoseHistory],
    now: NaiveDateTime,
    grace_minutes: i64,
) -> Vec<DoseHistory> {
    let Some(grace) = Duration::try_minutes(grace_minutes) else {
        tracing::warn!("Grace window of {} minutes is out of range", grace_minutes);
        return Vec::new();
    };

    let swept: Vec<DoseHistory> = history
        .iter()
        .filter(|r| r.is_overdue(now, grace))
        .filter_map(|r| r.transition(DoseStatus::Missed).ok())
        .collect();

    if !swept.is_empty() {
        tracing::info!("Sweeping {} overdue doses to missed", swept.len());
    }

    swept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DoseStatusKind, Frequency, MedicationSchedule};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn create_pending(scheduled: &str) -> DoseHistory {
        let now = at("2024-01-01 00:00");
        let schedule = MedicationSchedule::new("med_1", "user_1", Frequency::Daily, now.date(), now);
        DoseHistory::for_schedule(&schedule, at(scheduled), DoseStatus::Scheduled, now)
    }

    #[test]
    fn test_intake_within_tolerance_is_taken() {
        let status = intake_status(at("2024-01-10 08:00"), at("2024-01-10 08:30"), 30);
        assert_eq!(
            status,
            DoseStatus::Taken {
                taken_at: at("2024-01-10 08:30")
            }
        );
    }

    #[test]
    fn test_intake_past_tolerance_is_late() {
        let pending = create_pending("2024-01-10 08:00");
        let done = record_taken(&pending, at("2024-01-10 09:10"), 30).unwrap();

        assert_eq!(done.status.kind(), DoseStatusKind::Late);
        assert_eq!(done.late_minutes(), Some(70));
        assert!(record_taken(&done, at("2024-01-10 09:20"), 30).is_err());
    }

    #[test]
    fn test_sweep_marks_only_overdue_pending() {
        let overdue = create_pending("2024-01-10 06:00");
        let within_grace = create_pending("2024-01-10 07:30");
        let already_done = overdue
            .transition(DoseStatus::Skipped)
            .map(|mut r| {
                r.id = uuid::Uuid::new_v4();
                r
            })
            .unwrap();

        let history = vec![overdue.clone(), within_grace, already_done];
        let swept = sweep_overdue(&history, at("2024-01-10 08:00"), 60);

        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, overdue.id);
        assert_eq!(swept[0].status, DoseStatus::Missed);
    }

    #[test]
    fn test_sweep_grace_boundary() {
        let pending = create_pending("2024-01-10 07:00");
        assert!(sweep_overdue(&[pending.clone()], at("2024-01-10 08:00"), 60).is_empty());
        assert_eq!(sweep_overdue(&[pending], at("2024-01-10 08:01"), 60).len(), 1);
    }

    #[test]
    fn test_sweep_with_unrepresentable_grace_marks_nothing() {
        let pending = create_pending("2024-01-10 07:00");
        assert!(sweep_overdue(&[pending.clone()], at("2024-03-10 08:00"), i64::MAX).is_empty());
        assert!(!pending.is_overdue(at("2024-03-10 08:00"), Duration::days(365 * 270_000)));
    }
}
