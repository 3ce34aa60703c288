//! Occurrence projection for recurring dose schedules.
//!
//! This module expands a recurrence rule into concrete dose timestamps:
//! - Day admissibility by frequency and weekday filter
//! - Forward projection of the next N occurrences after "now"
//! - Lateness helpers shared with the dose logging flow
//!
//! Everything here is pure. "now" is always passed in by the caller.

use crate::{DoseTime, Frequency, MedicationSchedule};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;

/// Number of occurrences projected when the caller has no preference
pub const DEFAULT_PROJECTION_COUNT: usize = 10;

/// Upper bound on occurrences projected in one call
pub const MAX_PROJECTION_COUNT: usize = 1000;

/// Minutes after the due time before an intake counts as late
pub const DEFAULT_LATE_TOLERANCE_MINUTES: i64 = 30;

/// Longest accepted late or missed grace window (one week)
pub const MAX_GRACE_MINUTES: i64 = 7 * 24 * 60;

/// Check whether `date` is a day on which `schedule` is due
///
/// Weekly and specific-day rules without a `days_of_week` list admit every
/// day.
pub fn is_day_admissible(schedule: &MedicationSchedule, date: NaiveDate) -> bool {
    match schedule.frequency {
        Frequency::Daily => true,
        Frequency::Weekly | Frequency::SpecificDays => match &schedule.days_of_week {
            Some(days) => {
                let weekday = date.weekday().num_days_from_sunday() as u8;
                days.contains(&weekday)
            }
            None => true,
        },
        Frequency::AsNeeded => false,
    }
}

/// A weekday list that names no valid weekday can never admit a day
fn admits_some_weekday(schedule: &MedicationSchedule) -> bool {
    if !schedule.frequency.uses_weekdays() {
        return true;
    }
    match &schedule.days_of_week {
        Some(days) => days.iter().any(|d| *d <= 6),
        None => true,
    }
}

/// Project the next `count` dose occurrences strictly after `now`
///
/// ## Projection rules
///
/// 1. **Nothing to project**: `as_needed` schedules, empty dose times,
///    a zero count, or an `end_date` before today yield an empty list.
///    Counts above [`MAX_PROJECTION_COUNT`] are clamped to it.
///
/// 2. **Start**: iteration begins at midnight of `max(start_date, today)`,
///    so later slots today are still included while elapsed ones are not.
///
/// 3. **Walk**: each admissible day contributes one candidate per dose
///    time; the walk stops once `count` distinct candidates exist or the
///    day passes `end_date`.
///
/// The result is ascending and duplicate-free. A short result means the
/// window closed first; that is not an error.
pub fn project_occurrences(
    schedule: &MedicationSchedule,
    dose_times: &[DoseTime],
    now: NaiveDateTime,
    count: usize,
) -> Vec<NaiveDateTime> {
    if count == 0 || dose_times.is_empty() {
        return Vec::new();
    }
    let count = count.min(MAX_PROJECTION_COUNT);

    if schedule.frequency == Frequency::AsNeeded {
        tracing::debug!(
            "Schedule {} is as-needed, nothing to project",
            schedule.id
        );
        return Vec::new();
    }

    if let Some(end) = schedule.end_date {
        if end < now.date() {
            tracing::debug!("Schedule {} ended on {}", schedule.id, end);
            return Vec::new();
        }
    }

    if !admits_some_weekday(schedule) {
        tracing::warn!(
            "Schedule {} has no valid weekday in {:?}, nothing to project",
            schedule.id,
            schedule.days_of_week
        );
        return Vec::new();
    }

    let times: Vec<NaiveTime> = dose_times
        .iter()
        .filter_map(|dose_time| {
            let parsed = dose_time.lenient_time();
            if parsed.is_none() {
                tracing::warn!(
                    "Skipping dose time {:?} of schedule {}: not a valid clock time",
                    dose_time.time,
                    schedule.id
                );
            }
            parsed
        })
        .collect();

    if times.is_empty() {
        return Vec::new();
    }

    let mut day = schedule.start_date.max(now.date());
    let mut found = BTreeSet::new();

    while found.len() < count {
        if let Some(end) = schedule.end_date {
            if day > end {
                break;
            }
        }

        if is_day_admissible(schedule, day) {
            for time in &times {
                let candidate = day.and_time(*time);
                if candidate > now {
                    found.insert(candidate);
                }
            }
        }

        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    // A day may overshoot `count`; keep the earliest ones
    let occurrences: Vec<NaiveDateTime> = found.into_iter().take(count).collect();

    tracing::debug!(
        "Projected {} of {} occurrences for schedule {}",
        occurrences.len(),
        count,
        schedule.id
    );

    occurrences
}

/// The single next occurrence, or `None` when nothing is due
pub fn next_occurrence(
    schedule: &MedicationSchedule,
    dose_times: &[DoseTime],
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    project_occurrences(schedule, dose_times, now, 1)
        .into_iter()
        .next()
}

/// When the reminder for `occurrence` should fire
pub fn reminder_time(occurrence: NaiveDateTime, dose_time: &DoseTime) -> NaiveDateTime {
    occurrence
        .checked_sub_signed(Duration::minutes(i64::from(dose_time.reminder_offset_minutes)))
        .unwrap_or(occurrence)
}

/// Whether an intake at `taken` is later than `tolerance_minutes` past `scheduled`
///
/// Exactly at the tolerance is still on time. A tolerance too large to
/// represent never expires.
pub fn is_late(scheduled: NaiveDateTime, taken: NaiveDateTime, tolerance_minutes: i64) -> bool {
    Duration::try_minutes(tolerance_minutes)
        .map_or(false, |tolerance| taken - scheduled > tolerance)
}

/// Whole minutes of delay, zero for early or on-time intakes
pub fn late_minutes(scheduled: NaiveDateTime, taken: NaiveDateTime) -> i64 {
    (taken - scheduled).num_minutes().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn create_schedule(frequency: Frequency, start: &str) -> MedicationSchedule {
        MedicationSchedule::new("med_1", "user_1", frequency, date(start), at("2024-01-01 00:00"))
    }

    fn create_times(schedule: &MedicationSchedule, times: &[&str]) -> Vec<DoseTime> {
        times
            .iter()
            .map(|t| DoseTime::new(schedule.id, *t, at("2024-01-01 00:00")))
            .collect()
    }

    #[test]
    fn test_daily_projection_includes_later_today() {
        crate::logging::init_test();
        let schedule = create_schedule(Frequency::Daily, "2024-01-01");
        let times = create_times(&schedule, &["08:00"]);

        let doses = project_occurrences(&schedule, &times, at("2024-01-03 07:00"), 3);

        assert_eq!(
            doses,
            vec![
                at("2024-01-03 08:00"),
                at("2024-01-04 08:00"),
                at("2024-01-05 08:00")
            ]
        );
    }

    #[test]
    fn test_daily_projection_skips_elapsed_slot() {
        let schedule = create_schedule(Frequency::Daily, "2024-01-01");
        let times = create_times(&schedule, &["08:00"]);

        let first = next_occurrence(&schedule, &times, at("2024-01-03 08:01"));
        assert_eq!(first, Some(at("2024-01-04 08:00")));

        // Exactly at the slot is not "after now"
        let first = next_occurrence(&schedule, &times, at("2024-01-03 08:00"));
        assert_eq!(first, Some(at("2024-01-04 08:00")));
    }

    #[test]
    fn test_weekly_projection_respects_weekdays() {
        let mut schedule = create_schedule(Frequency::Weekly, "2024-01-01");
        schedule.days_of_week = Some(vec![1, 3, 5]);
        let times = create_times(&schedule, &["09:00"]);

        let doses = project_occurrences(&schedule, &times, at("2024-01-01 10:00"), 10);

        assert_eq!(doses.len(), 10);
        for dose in &doses {
            let weekday = dose.date().weekday().num_days_from_sunday();
            assert!([1, 3, 5].contains(&weekday), "unexpected weekday for {}", dose);
        }
        // Monday 09:00 already passed, so Wednesday comes first
        assert_eq!(doses[0], at("2024-01-03 09:00"));
    }

    #[test]
    fn test_weekly_without_days_admits_every_day() {
        let schedule = create_schedule(Frequency::SpecificDays, "2024-01-01");
        let times = create_times(&schedule, &["09:00"]);

        let doses = project_occurrences(&schedule, &times, at("2024-01-01 00:00"), 7);

        assert_eq!(doses.len(), 7);
        assert_eq!(doses[6], at("2024-01-07 09:00"));
    }

    #[test]
    fn test_weekday_list_without_valid_days_is_empty() {
        let mut schedule = create_schedule(Frequency::Weekly, "2024-01-01");
        let times = create_times(&schedule, &["09:00"]);

        schedule.days_of_week = Some(vec![]);
        assert!(project_occurrences(&schedule, &times, at("2024-01-01 00:00"), 3).is_empty());

        schedule.days_of_week = Some(vec![7, 9]);
        assert!(project_occurrences(&schedule, &times, at("2024-01-01 00:00"), 3).is_empty());
    }

    #[test]
    fn test_as_needed_never_projects() {
        let schedule = create_schedule(Frequency::AsNeeded, "2024-01-01");
        let times = create_times(&schedule, &["08:00", "20:00"]);

        assert!(project_occurrences(&schedule, &times, at("2024-01-03 07:00"), 5).is_empty());
        assert_eq!(next_occurrence(&schedule, &times, at("2024-01-03 07:00")), None);
    }

    #[test]
    fn test_ended_schedule_is_empty() {
        let mut schedule = create_schedule(Frequency::Daily, "2024-01-01");
        schedule.end_date = Some(date("2024-01-02"));
        let times = create_times(&schedule, &["08:00"]);

        assert!(project_occurrences(&schedule, &times, at("2024-01-03 07:00"), 3).is_empty());
    }

    #[test]
    fn test_end_date_is_inclusive_and_bounds_the_walk() {
        let mut schedule = create_schedule(Frequency::Daily, "2024-01-01");
        schedule.end_date = Some(date("2024-01-04"));
        let times = create_times(&schedule, &["08:00", "20:00"]);

        let doses = project_occurrences(&schedule, &times, at("2024-01-03 12:00"), 10);

        assert_eq!(
            doses,
            vec![
                at("2024-01-03 20:00"),
                at("2024-01-04 08:00"),
                at("2024-01-04 20:00")
            ]
        );
    }

    #[test]
    fn test_future_start_date() {
        let schedule = create_schedule(Frequency::Daily, "2024-02-01");
        let times = create_times(&schedule, &["06:30"]);

        let first = next_occurrence(&schedule, &times, at("2024-01-15 12:00"));
        assert_eq!(first, Some(at("2024-02-01 06:30")));
    }

    #[test]
    fn test_unordered_and_duplicate_times_are_sorted_and_deduplicated() {
        let schedule = create_schedule(Frequency::Daily, "2024-01-01");
        let times = create_times(&schedule, &["20:00", "08:00", "08:00"]);

        let doses = project_occurrences(&schedule, &times, at("2024-01-03 07:00"), 3);

        assert_eq!(
            doses,
            vec![
                at("2024-01-03 08:00"),
                at("2024-01-03 20:00"),
                at("2024-01-04 08:00")
            ]
        );
    }

    #[test]
    fn test_empty_dose_times_and_zero_count() {
        let schedule = create_schedule(Frequency::Daily, "2024-01-01");
        assert!(project_occurrences(&schedule, &[], at("2024-01-03 07:00"), 3).is_empty());

        let times = create_times(&schedule, &["08:00"]);
        assert!(project_occurrences(&schedule, &times, at("2024-01-03 07:00"), 0).is_empty());
    }

    #[test]
    fn test_invalid_dose_time_is_skipped() {
        let schedule = create_schedule(Frequency::Daily, "2024-01-01");
        let times = create_times(&schedule, &["31:00", "9"]);

        let doses = project_occurrences(&schedule, &times, at("2024-01-03 07:00"), 2);
        assert_eq!(doses, vec![at("2024-01-03 09:00"), at("2024-01-04 09:00")]);
    }

    #[test]
    fn test_projection_is_deterministic() {
        let mut schedule = create_schedule(Frequency::SpecificDays, "2024-01-01");
        schedule.days_of_week = Some(vec![0, 6]);
        let times = create_times(&schedule, &["10:00", "22:00"]);
        let now = at("2024-01-05 23:00");

        let first = project_occurrences(&schedule, &times, now, 6);
        let second = project_occurrences(&schedule, &times, now, 6);
        assert_eq!(first, second);
        assert_eq!(first[0], at("2024-01-06 10:00"));
    }

    #[test]
    fn test_reminder_time_uses_offset() {
        let schedule = create_schedule(Frequency::Daily, "2024-01-01");
        let mut dose_time = DoseTime::new(schedule.id, "08:00", at("2024-01-01 00:00"));
        assert_eq!(
            reminder_time(at("2024-01-03 08:00"), &dose_time),
            at("2024-01-03 07:45")
        );

        dose_time.reminder_offset_minutes = 0;
        assert_eq!(
            reminder_time(at("2024-01-03 08:00"), &dose_time),
            at("2024-01-03 08:00")
        );
    }

    #[test]
    fn test_is_late_boundary() {
        let scheduled = at("2024-01-03 08:00");
        assert!(!is_late(scheduled, at("2024-01-03 08:30"), 30));
        assert!(is_late(scheduled, at("2024-01-03 08:31"), 30));
        assert!(!is_late(scheduled, at("2024-01-03 07:00"), 30));
        assert!(is_late(scheduled, at("2024-01-03 08:06"), 5));
    }

    #[test]
    fn test_late_minutes_clamps_early_doses() {
        let scheduled = at("2024-01-03 08:00");
        assert_eq!(late_minutes(scheduled, at("2024-01-03 08:45")), 45);
        assert_eq!(late_minutes(scheduled, at("2024-01-03 08:00")), 0);
        assert_eq!(late_minutes(scheduled, at("2024-01-03 07:30")), 0);

        let taken = scheduled + Duration::seconds(90);
        assert_eq!(late_minutes(scheduled, taken), 1);
    }

    #[test]
    fn test_is_day_admissible() {
        let mut schedule = create_schedule(Frequency::Weekly, "2024-01-01");
        schedule.days_of_week = Some(vec![0]);
        assert!(is_day_admissible(&schedule, date("2024-01-07"))); // Sunday
        assert!(!is_day_admissible(&schedule, date("2024-01-08")));

        let daily = create_schedule(Frequency::Daily, "2024-01-01");
        assert!(is_day_admissible(&daily, date("2024-01-08")));

        let sos = create_schedule(Frequency::AsNeeded, "2024-01-01");
        assert!(!is_day_admissible(&sos, date("2024-01-08")));
    }

    #[test]
    fn test_projection_count_is_clamped() {
        let schedule = create_schedule(Frequency::Daily, "2024-01-01");
        let times = create_times(&schedule, &["08:00", "20:00"]);

        let occurrences =
            project_occurrences(&schedule, &times, at("2024-01-01 07:00"), usize::MAX);

        assert_eq!(occurrences.len(), MAX_PROJECTION_COUNT);
        assert_eq!(occurrences[0], at("2024-01-01 08:00"));
    }

    #[test]
    fn test_huge_tolerance_never_late() {
        let scheduled = at("2024-01-01 08:00");
        assert!(!is_late(scheduled, at("2024-03-01 08:00"), i64::MAX));
        assert!(is_late(scheduled, at("2024-01-01 08:31"), 30));
    }
}
