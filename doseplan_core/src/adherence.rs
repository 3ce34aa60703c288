//! Adherence statistics over dose history.
//!
//! This module reduces dose records into reporting metrics:
//! - Aggregate counts and adherence percentage
//! - Trailing per-period trend buckets
//! - Adherence level classification
//! - Consecutive fully-adhered day streaks

use crate::{AdherenceLevel, AdherenceStats, DoseHistory, DoseStatus, PeriodAdherence};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

/// Number of trailing periods in a trend series
pub const ADHERENCE_PERIODS: u32 = 4;

/// Default period length for trend series, in days
pub const DEFAULT_PERIOD_DAYS: u32 = 7;

/// Longest accepted trend period, in days
pub const MAX_PERIOD_DAYS: u32 = 3660;

/// Percentage at or above which adherence counts as good
pub const GOOD_ADHERENCE_THRESHOLD: f64 = 80.0;

/// Round half-up to two decimal places.
///
/// Every percentage and average leaving this module goes through here so
/// reports are reproducible for the same input.
pub fn round2(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

/// Compute aggregate adherence statistics
///
/// Late doses count as adhered since they were administered; only missed
/// and skipped doses count against adherence. The late-minute average only
/// covers administered doses that were actually delayed.
pub fn calculate_stats(history: &[DoseHistory]) -> AdherenceStats {
    if history.is_empty() {
        return AdherenceStats::default();
    }

    let mut stats = AdherenceStats {
        total_doses: history.len(),
        ..AdherenceStats::default()
    };

    let mut late_sum: i64 = 0;
    let mut late_count: i64 = 0;

    for record in history {
        match record.status {
            DoseStatus::Taken { .. } => stats.taken_doses += 1,
            DoseStatus::Late { .. } => stats.late_doses += 1,
            DoseStatus::Missed => stats.missed_doses += 1,
            DoseStatus::Skipped => stats.skipped_doses += 1,
            DoseStatus::Scheduled => {}
        }

        if let Some(minutes) = record.late_minutes().filter(|m| *m > 0) {
            late_sum += minutes;
            late_count += 1;
        }
    }

    let adhered = (stats.taken_doses + stats.late_doses) as f64;
    stats.adherence_percentage = round2(adhered / stats.total_doses as f64 * 100.0);

    if late_count > 0 {
        stats.average_late_minutes = round2(late_sum as f64 / late_count as f64);
    }

    stats
}

/// Adherence for the trailing periods ending at `now`, oldest first
///
/// Period k (k = 4..1) covers `[now - k*period_days, now - (k-1)*period_days)`,
/// matched against each record's `scheduled_time`.
pub fn calculate_by_period(
    history: &[DoseHistory],
    period_days: u32,
    now: NaiveDateTime,
) -> Vec<PeriodAdherence> {
    // Boundaries past the calendar's range clamp to its earliest instant
    let boundary = |k: u32| {
        Duration::try_days(i64::from(period_days) * i64::from(k))
            .and_then(|offset| now.checked_sub_signed(offset))
            .unwrap_or(NaiveDateTime::MIN)
    };

    (1..=ADHERENCE_PERIODS)
        .rev()
        .map(|k| {
            let start = boundary(k);
            let end = boundary(k - 1);

            let bucket: Vec<DoseHistory> = history
                .iter()
                .filter(|d| d.scheduled_time >= start && d.scheduled_time < end)
                .cloned()
                .collect();

            PeriodAdherence {
                start,
                end,
                adherence_percentage: calculate_stats(&bucket).adherence_percentage,
            }
        })
        .collect()
}

/// Classify an adherence percentage
pub fn classify_adherence(percentage: f64) -> AdherenceLevel {
    if percentage >= 95.0 {
        AdherenceLevel::Excellent
    } else if percentage >= GOOD_ADHERENCE_THRESHOLD {
        AdherenceLevel::Good
    } else if percentage >= 60.0 {
        AdherenceLevel::Moderate
    } else {
        AdherenceLevel::Poor
    }
}

pub fn is_good_adherence(percentage: f64) -> bool {
    percentage >= GOOD_ADHERENCE_THRESHOLD
}

/// Count consecutive most-recent days on which every dose was administered
///
/// Days are grouped by the local date of `scheduled_time`. Days with no
/// records are not in the map, so they neither extend nor break a streak.
pub fn calculate_streak(history: &[DoseHistory]) -> u32 {
    let mut days: BTreeMap<NaiveDate, bool> = BTreeMap::new();

    for record in history {
        let all_adhered = days.entry(record.scheduled_time.date()).or_insert(true);
        *all_adhered &= record.status.is_administered();
    }

    let streak = days
        .values()
        .rev()
        .take_while(|all_adhered| **all_adhered)
        .count() as u32;

    tracing::debug!(
        "Streak of {} days across {} recorded days",
        streak,
        days.len()
    );

    streak
}
