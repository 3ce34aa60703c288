#![forbid(unsafe_code)]

//! Core domain model and business logic for the doseplan system.
//!
//! This crate provides:
//! - Domain types (schedules, dose times, dose history, adherence values)
//! - Occurrence projection for recurring schedules
//! - Adherence statistics, trends and streaks
//! - Local persistence (treatment plan, dose log, CSV export)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod schedule;
pub mod adherence;
pub mod plan;
pub mod dose_log;
pub mod history;
pub mod recording;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use schedule::{
    is_day_admissible, is_late, late_minutes, next_occurrence, project_occurrences,
    reminder_time,
};
pub use adherence::{
    calculate_by_period, calculate_stats, calculate_streak, classify_adherence,
    is_good_adherence,
};
pub use plan::{TreatmentPlan, UpcomingDose};
pub use dose_log::{DoseSink, JsonlDoseLog};
pub use history::{load_history, DoseHistoryFilter};
pub use recording::{record_taken, sweep_overdue};
pub use export::export_csv;
