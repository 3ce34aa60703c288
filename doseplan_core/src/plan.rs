//! Treatment plan persistence with file locking.
//!
//! The plan holds every schedule together with the dose times it owns.
//! It is saved as a single JSON document so a schedule and its dose
//! times are always written together.

use crate::schedule::{project_occurrences, reminder_time};
use crate::{DoseTime, Error, MedicationSchedule, Result};
use chrono::NaiveDateTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// All schedules and dose times known to this installation
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct TreatmentPlan {
    #[serde(default)]
    pub schedules: Vec<MedicationSchedule>,
    #[serde(default)]
    pub dose_times: Vec<DoseTime>,
}

/// One projected dose with the schedule it came from
#[derive(Clone, Debug, PartialEq)]
pub struct UpcomingDose {
    pub schedule_id: Uuid,
    pub medication_id: String,
    pub at: NaiveDateTime,
    pub remind_at: NaiveDateTime,
}

impl TreatmentPlan {
    /// Load the plan from a file with shared locking
    ///
    /// Returns an empty plan if the file doesn't exist.
    /// If the file is corrupted, logs a warning and returns an empty plan.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No plan file found, starting with an empty plan");
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        match serde_json::from_str::<TreatmentPlan>(&contents) {
            Ok(plan) => {
                tracing::debug!(
                    "Loaded plan with {} schedules from {:?}",
                    plan.schedules.len(),
                    path
                );
                Ok(plan)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse plan file {:?}: {}. Using an empty plan.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    /// Save the plan to a file with exclusive locking
    ///
    /// Atomically writes the plan by:
    /// 1. Writing to a temp file
    /// 2. Syncing to disk
    /// 3. Renaming over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Other(format!("plan path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string_pretty(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved plan to {:?}", path);
        Ok(())
    }

    /// Load the plan, modify it, and save it back
    ///
    /// Holds an exclusive lock on a sidecar `<plan>.lock` file for the whole
    /// read-modify-write, so concurrent updates apply one after another.
    /// Nothing is saved if `f` fails.
    pub fn update<F, T>(path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut TreatmentPlan) -> Result<T>,
    {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.with_extension("lock"))?;
        lock.lock_exclusive()?;

        let result = Self::load(path).and_then(|mut plan| {
            let value = f(&mut plan)?;
            plan.save(path)?;
            Ok(value)
        });

        lock.unlock()?;
        result
    }

    /// Add a schedule together with the dose times it owns
    ///
    /// The schedule and every dose time are validated first; nothing is
    /// added if any of them is malformed.
    pub fn add_schedule(
        &mut self,
        schedule: MedicationSchedule,
        dose_times: Vec<DoseTime>,
    ) -> Result<Uuid> {
        schedule.validate()?;
        for dose_time in &dose_times {
            dose_time.parse_time()?;
        }

        if self.schedule(schedule.id).is_some() {
            return Err(Error::InvalidSchedule(format!(
                "schedule {} already exists",
                schedule.id
            )));
        }

        let id = schedule.id;
        self.dose_times
            .extend(dose_times.into_iter().map(|dt| DoseTime {
                schedule_id: id,
                ..dt
            }));
        self.schedules.push(schedule);

        tracing::info!("Added schedule {}", id);
        Ok(id)
    }

    pub fn schedule(&self, id: Uuid) -> Option<&MedicationSchedule> {
        self.schedules.iter().find(|s| s.id == id)
    }

    /// Schedules belonging to one medication
    pub fn schedules_for(&self, medication_id: &str) -> Vec<&MedicationSchedule> {
        self.schedules
            .iter()
            .filter(|s| s.medication_id == medication_id)
            .collect()
    }

    /// Dose times owned by a schedule, in clock order
    pub fn dose_times_for(&self, schedule_id: Uuid) -> Vec<DoseTime> {
        let mut times: Vec<DoseTime> = self
            .dose_times
            .iter()
            .filter(|dt| dt.schedule_id == schedule_id)
            .cloned()
            .collect();
        times.sort_by_key(|dt| dt.lenient_time());
        times
    }

    /// Remove a schedule and every dose time it owns
    pub fn remove_schedule(&mut self, id: Uuid) -> Result<MedicationSchedule> {
        let index = self
            .schedules
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("schedule {}", id)))?;

        let removed = self.schedules.remove(index);
        let before = self.dose_times.len();
        self.dose_times.retain(|dt| dt.schedule_id != id);

        tracing::info!(
            "Removed schedule {} and {} dose times",
            id,
            before - self.dose_times.len()
        );
        Ok(removed)
    }

    /// Replace a stored schedule with an edited copy
    ///
    /// The copy is validated and stamped with `now`; its creation stamp is
    /// kept from the stored schedule.
    pub fn update_schedule(
        &mut self,
        schedule: MedicationSchedule,
        now: NaiveDateTime,
    ) -> Result<()> {
        schedule.validate()?;

        let stored = self
            .schedules
            .iter_mut()
            .find(|s| s.id == schedule.id)
            .ok_or_else(|| Error::NotFound(format!("schedule {}", schedule.id)))?;

        *stored = MedicationSchedule {
            created_at: stored.created_at,
            updated_at: now,
            ..schedule
        };

        tracing::info!("Updated schedule {}", stored.id);
        Ok(())
    }

    /// Add one dose time to an existing schedule
    pub fn add_dose_time(&mut self, dose_time: DoseTime) -> Result<Uuid> {
        dose_time.parse_time()?;
        if self.schedule(dose_time.schedule_id).is_none() {
            return Err(Error::NotFound(format!(
                "schedule {}",
                dose_time.schedule_id
            )));
        }

        let id = dose_time.id;
        tracing::info!(
            "Added dose time {} to schedule {}",
            dose_time.time,
            dose_time.schedule_id
        );
        self.dose_times.push(dose_time);
        Ok(id)
    }

    /// Replace a stored dose time, keeping the schedule that owns it
    pub fn update_dose_time(&mut self, dose_time: DoseTime) -> Result<()> {
        dose_time.parse_time()?;

        let stored = self
            .dose_times
            .iter_mut()
            .find(|dt| dt.id == dose_time.id)
            .ok_or_else(|| Error::NotFound(format!("dose time {}", dose_time.id)))?;

        *stored = DoseTime {
            schedule_id: stored.schedule_id,
            created_at: stored.created_at,
            ..dose_time
        };
        Ok(())
    }

    /// Remove one dose time
    ///
    /// A schedule keeps at least one dose time; removing the last one is
    /// rejected.
    pub fn remove_dose_time(&mut self, id: Uuid) -> Result<DoseTime> {
        let index = self
            .dose_times
            .iter()
            .position(|dt| dt.id == id)
            .ok_or_else(|| Error::NotFound(format!("dose time {}", id)))?;

        let schedule_id = self.dose_times[index].schedule_id;
        let siblings = self
            .dose_times
            .iter()
            .filter(|dt| dt.schedule_id == schedule_id)
            .count();
        if siblings == 1 {
            return Err(Error::InvalidSchedule(format!(
                "schedule {} must keep at least one dose time",
                schedule_id
            )));
        }

        let removed = self.dose_times.remove(index);
        tracing::info!(
            "Removed dose time {} from schedule {}",
            removed.time,
            schedule_id
        );
        Ok(removed)
    }

    /// Next `count` doses across all schedules, earliest first
    ///
    /// Optionally restricted to one medication.
    pub fn upcoming(
        &self,
        now: NaiveDateTime,
        count: usize,
        medication_id: Option<&str>,
    ) -> Vec<UpcomingDose> {
        let mut doses: Vec<UpcomingDose> = self
            .schedules
            .iter()
            .filter(|s| medication_id.map_or(true, |m| s.medication_id == m))
            .flat_map(|schedule| {
                let times = self.dose_times_for(schedule.id);
                project_occurrences(schedule, &times, now, count)
                    .into_iter()
                    .map(|at| {
                        let remind_at = times
                            .iter()
                            .find(|dt| dt.lenient_time() == Some(at.time()))
                            .map_or(at, |dt| reminder_time(at, dt));
                        UpcomingDose {
                            schedule_id: schedule.id,
                            medication_id: schedule.medication_id.clone(),
                            at,
                            remind_at,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        doses.sort_by(|a, b| {
            a.at.cmp(&b.at)
                .then_with(|| a.medication_id.cmp(&b.medication_id))
        });
        doses.truncate(count);
        doses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Frequency;
    use chrono::NaiveDate;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn create_test_schedule(medication: &str) -> MedicationSchedule {
        MedicationSchedule::new(
            medication,
            "user_1",
            Frequency::Daily,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            at("2024-01-01 00:00"),
        )
    }

    fn create_test_times(times: &[&str]) -> Vec<DoseTime> {
        times
            .iter()
            .map(|t| DoseTime::new(Uuid::nil(), *t, at("2024-01-01 00:00")))
            .collect()
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan_path = temp_dir.path().join("plan.json");

        let mut plan = TreatmentPlan::default();
        let id = plan
            .add_schedule(create_test_schedule("ibuprofen"), create_test_times(&["08:00"]))
            .unwrap();

        plan.save(&plan_path).unwrap();
        let loaded = TreatmentPlan::load(&plan_path).unwrap();

        assert_eq!(loaded, plan);
        assert_eq!(loaded.dose_times_for(id).len(), 1);
        assert_eq!(loaded.dose_times[0].schedule_id, id);
    }

    #[test]
    fn test_load_nonexistent_returns_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan = TreatmentPlan::load(&temp_dir.path().join("missing.json")).unwrap();
        assert!(plan.schedules.is_empty());
        assert!(plan.dose_times.is_empty());
    }

    #[test]
    fn test_corrupted_plan_returns_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan_path = temp_dir.path().join("plan.json");
        std::fs::write(&plan_path, "{ invalid json }").unwrap();

        let plan = TreatmentPlan::load(&plan_path).unwrap();
        assert!(plan.schedules.is_empty());
    }

    #[test]
    fn test_add_schedule_rejects_bad_dose_time() {
        let mut plan = TreatmentPlan::default();
        let result = plan.add_schedule(
            create_test_schedule("ibuprofen"),
            create_test_times(&["08:00", "8pm"]),
        );

        assert!(matches!(result, Err(Error::InvalidDoseTime(_))));
        assert!(plan.schedules.is_empty());
        assert!(plan.dose_times.is_empty());
    }

    #[test]
    fn test_remove_schedule_removes_owned_times() {
        let mut plan = TreatmentPlan::default();
        let keep = plan
            .add_schedule(create_test_schedule("a"), create_test_times(&["08:00"]))
            .unwrap();
        let drop = plan
            .add_schedule(create_test_schedule("b"), create_test_times(&["09:00", "21:00"]))
            .unwrap();

        let removed = plan.remove_schedule(drop).unwrap();
        assert_eq!(removed.medication_id, "b");
        assert_eq!(plan.dose_times.len(), 1);
        assert_eq!(plan.dose_times[0].schedule_id, keep);

        assert!(matches!(
            plan.remove_schedule(drop),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_dose_times_sorted_by_clock() {
        let mut plan = TreatmentPlan::default();
        let id = plan
            .add_schedule(
                create_test_schedule("a"),
                create_test_times(&["21:00", "07:30", "12:00"]),
            )
            .unwrap();

        let times: Vec<String> = plan.dose_times_for(id).into_iter().map(|d| d.time).collect();
        assert_eq!(times, vec!["07:30", "12:00", "21:00"]);
    }

    #[test]
    fn test_upcoming_merges_schedules() {
        let mut plan = TreatmentPlan::default();
        plan.add_schedule(create_test_schedule("a"), create_test_times(&["08:00"]))
            .unwrap();
        plan.add_schedule(create_test_schedule("b"), create_test_times(&["12:00"]))
            .unwrap();

        let upcoming = plan.upcoming(at("2024-01-03 09:00"), 3, None);

        let summary: Vec<(&str, NaiveDateTime)> = upcoming
            .iter()
            .map(|d| (d.medication_id.as_str(), d.at))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("b", at("2024-01-03 12:00")),
                ("a", at("2024-01-04 08:00")),
                ("b", at("2024-01-04 12:00")),
            ]
        );
        assert_eq!(upcoming[0].remind_at, at("2024-01-03 11:45"));

        let only_a = plan.upcoming(at("2024-01-03 09:00"), 3, Some("a"));
        assert!(only_a.iter().all(|d| d.medication_id == "a"));
        assert_eq!(only_a.len(), 3);
    }

    #[test]
    fn test_update_pattern() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan_path = temp_dir.path().join("plan.json");

        let id = TreatmentPlan::update(&plan_path, |plan| {
            plan.add_schedule(create_test_schedule("a"), create_test_times(&["08:00"]))
        })
        .unwrap();

        let loaded = TreatmentPlan::load(&plan_path).unwrap();
        assert!(loaded.schedule(id).is_some());
        assert_eq!(loaded.schedules_for("a").len(), 1);
        assert!(loaded.schedules_for("b").is_empty());
    }

    #[test]
    fn test_update_schedule_end_date_limits_upcoming() {
        let mut plan = TreatmentPlan::default();
        let id = plan
            .add_schedule(create_test_schedule("a"), create_test_times(&["08:00"]))
            .unwrap();
        assert_eq!(plan.upcoming(at("2024-01-03 09:00"), 5, None).len(), 5);

        let mut edited = plan.schedule(id).unwrap().clone();
        edited.end_date = NaiveDate::from_ymd_opt(2024, 1, 5);
        edited.created_at = at("2030-01-01 00:00");
        plan.update_schedule(edited, at("2024-01-03 09:00")).unwrap();

        let upcoming: Vec<NaiveDateTime> = plan
            .upcoming(at("2024-01-03 09:00"), 5, None)
            .into_iter()
            .map(|d| d.at)
            .collect();
        assert_eq!(upcoming, vec![at("2024-01-04 08:00"), at("2024-01-05 08:00")]);

        let stored = plan.schedule(id).unwrap();
        assert_eq!(stored.updated_at, at("2024-01-03 09:00"));
        assert_eq!(stored.created_at, at("2024-01-01 00:00"));
    }

    #[test]
    fn test_update_schedule_validates() {
        let mut plan = TreatmentPlan::default();
        let id = plan
            .add_schedule(create_test_schedule("a"), create_test_times(&["08:00"]))
            .unwrap();

        let mut edited = plan.schedule(id).unwrap().clone();
        edited.end_date = NaiveDate::from_ymd_opt(2023, 12, 1);
        assert!(matches!(
            plan.update_schedule(edited, at("2024-01-03 09:00")),
            Err(Error::InvalidSchedule(_))
        ));
        assert_eq!(plan.schedule(id).unwrap().end_date, None);

        let unknown = create_test_schedule("b");
        assert!(matches!(
            plan.update_schedule(unknown, at("2024-01-03 09:00")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_dose_time_management() {
        let mut plan = TreatmentPlan::default();
        let id = plan
            .add_schedule(create_test_schedule("a"), create_test_times(&["08:00"]))
            .unwrap();
        let first = plan.dose_times_for(id)[0].clone();

        let evening = DoseTime::new(id, "20:00", at("2024-01-01 00:00"));
        plan.add_dose_time(evening.clone()).unwrap();
        assert!(matches!(
            plan.add_dose_time(DoseTime::new(id, "25:00", at("2024-01-01 00:00"))),
            Err(Error::InvalidDoseTime(_))
        ));
        assert!(matches!(
            plan.add_dose_time(DoseTime::new(Uuid::new_v4(), "09:00", at("2024-01-01 00:00"))),
            Err(Error::NotFound(_))
        ));

        let moved = DoseTime {
            time: "07:00".into(),
            reminder_offset_minutes: 5,
            schedule_id: Uuid::nil(),
            ..first.clone()
        };
        plan.update_dose_time(moved).unwrap();

        let times = plan.dose_times_for(id);
        assert_eq!(times.len(), 2);
        assert_eq!(times[0].time, "07:00");
        assert_eq!(times[0].schedule_id, id);
        assert_eq!(times[0].reminder_offset_minutes, 5);

        plan.remove_dose_time(evening.id).unwrap();
        assert!(matches!(
            plan.remove_dose_time(first.id),
            Err(Error::InvalidSchedule(_))
        ));
        assert_eq!(plan.dose_times_for(id).len(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan_path = temp_dir.path().join("plan.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let plan_path = plan_path.clone();
                std::thread::spawn(move || {
                    TreatmentPlan::update(&plan_path, |plan| {
                        plan.add_schedule(
                            create_test_schedule(&format!("med_{}", i)),
                            create_test_times(&["08:00"]),
                        )
                    })
                    .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = TreatmentPlan::load(&plan_path).unwrap();
        assert_eq!(loaded.schedules.len(), 8);
        assert_eq!(loaded.dose_times.len(), 8);
    }

    #[test]
    fn test_failed_update_does_not_save() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan_path = temp_dir.path().join("plan.json");

        let result = TreatmentPlan::update(&plan_path, |plan| {
            plan.add_schedule(create_test_schedule("a"), create_test_times(&["8pm"]))
        });

        assert!(result.is_err());
        assert!(!plan_path.exists());
    }
}
