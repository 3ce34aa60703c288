use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Args, Parser, Subcommand};
use doseplan_core::adherence::MAX_PERIOD_DAYS;
use doseplan_core::history::pending_doses;
use doseplan_core::recording::intake_status;
use doseplan_core::schedule::MAX_PROJECTION_COUNT;
use doseplan_core::*;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "doseplan")]
#[command(about = "Medication schedule and adherence tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the user whose doses are tracked
    #[arg(long, global = true)]
    user: Option<String>,

    /// Pin the current time (YYYY-MM-DDTHH:MM)
    #[arg(long, global = true, value_parser = parse_datetime)]
    at: Option<NaiveDateTime>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage medication schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommand,
    },

    /// Show upcoming doses across all schedules
    Next {
        /// Number of doses to show
        #[arg(long)]
        count: Option<usize>,

        /// Only show doses of this medication
        #[arg(long)]
        medication: Option<String>,
    },

    /// Record a dose event
    Log {
        /// Schedule the dose belongs to
        #[arg(long)]
        schedule: Uuid,

        /// When the dose was due (YYYY-MM-DDTHH:MM); taken from the entry with --id
        #[arg(long, value_parser = parse_datetime, required_unless_present = "id")]
        scheduled: Option<NaiveDateTime>,

        /// When the dose was taken; defaults to now for taken/late doses
        #[arg(long, value_parser = parse_datetime)]
        taken_at: Option<NaiveDateTime>,

        /// Explicit status (scheduled, taken, late, missed, skipped)
        #[arg(long)]
        status: Option<String>,

        /// Complete an earlier scheduled entry instead of creating a new one
        #[arg(long)]
        id: Option<Uuid>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Mark overdue scheduled doses as missed
    Sweep,

    /// Show adherence statistics
    Stats {
        #[arg(long)]
        medication: Option<String>,

        /// Length of each trend period in days
        #[arg(long)]
        period_days: Option<u32>,

        #[command(flatten)]
        range: DateRange,
    },

    /// Export dose history to CSV
    Export {
        /// Output file
        #[arg(long)]
        out: PathBuf,

        #[arg(long)]
        medication: Option<String>,

        /// Only export these statuses (e.g. taken,late)
        #[arg(long, value_delimiter = ',')]
        status: Option<Vec<String>>,

        #[command(flatten)]
        range: DateRange,
    },
}

/// Scheduled-date bounds for history queries
#[derive(Args)]
struct DateRange {
    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
}

/// Changes applied by `schedule edit`
#[derive(Args)]
struct ScheduleChanges {
    /// daily, weekly, specific_days or as_needed
    #[arg(long)]
    frequency: Option<String>,

    /// Weekday indices, 0 = Sunday (e.g. 1,3,5)
    #[arg(long, value_delimiter = ',')]
    days: Option<Vec<u8>>,

    #[arg(long)]
    start: Option<NaiveDate>,

    #[arg(long, conflicts_with = "no_end")]
    end: Option<NaiveDate>,

    /// Make the schedule open-ended
    #[arg(long)]
    no_end: bool,

    /// Add a dose time (HH:MM); repeatable
    #[arg(long = "add-time")]
    add_times: Vec<String>,

    /// Remove the dose time at HH:MM; repeatable
    #[arg(long = "remove-time")]
    remove_times: Vec<String>,

    /// Minutes before each dose to remind
    #[arg(long)]
    reminder_offset: Option<u32>,
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Add a schedule with its daily dose times
    Add {
        #[arg(long)]
        medication: String,

        /// daily, weekly, specific_days or as_needed
        #[arg(long, default_value = "daily")]
        frequency: String,

        /// Dose time (HH:MM); repeat for several doses a day
        #[arg(long = "time", required = true)]
        times: Vec<String>,

        /// Weekday indices, 0 = Sunday (e.g. 1,3,5)
        #[arg(long, value_delimiter = ',')]
        days: Option<Vec<u8>>,

        /// First day of treatment (YYYY-MM-DD), defaults to today
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last day of treatment (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// before, after, with or anytime
        #[arg(long)]
        meal: Option<String>,

        /// Minutes before each dose to remind
        #[arg(long)]
        reminder_offset: Option<u32>,
    },

    /// List schedules
    List {
        #[arg(long)]
        medication: Option<String>,
    },

    /// Change a schedule's recurrence, period or dose times
    Edit {
        id: Uuid,

        #[command(flatten)]
        changes: ScheduleChanges,
    },

    /// Remove a schedule and its dose times
    Remove { id: Uuid },
}

fn parse_datetime(s: &str) -> std::result::Result<NaiveDateTime, String> {
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| format!("expected YYYY-MM-DDTHH:MM, got {:?}", s))
}

/// Paths and settings shared by every command
struct Context {
    config: Config,
    user_id: String,
    now: NaiveDateTime,
    plan_path: PathBuf,
    log_path: PathBuf,
}

fn main() -> Result<()> {
    doseplan_core::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    tracing::debug!("Using data directory {:?}", data_dir);

    let ctx = Context {
        user_id: cli
            .user
            .clone()
            .unwrap_or_else(|| config.profile.user_id.clone()),
        now: cli
            .at
            .unwrap_or_else(|| chrono::Local::now().naive_local()),
        plan_path: Config::plan_path(&data_dir),
        log_path: Config::dose_log_path(&data_dir),
        config,
    };

    match cli.command {
        Commands::Schedule { action } => match action {
            ScheduleCommand::Add {
                medication,
                frequency,
                times,
                days,
                start,
                end,
                meal,
                reminder_offset,
            } => cmd_schedule_add(
                &ctx,
                medication,
                &frequency,
                times,
                days,
                start,
                end,
                meal,
                reminder_offset,
            ),
            ScheduleCommand::List { medication } => cmd_schedule_list(&ctx, medication),
            ScheduleCommand::Edit { id, changes } => cmd_schedule_edit(&ctx, id, changes),
            ScheduleCommand::Remove { id } => cmd_schedule_remove(&ctx, id),
        },
        Commands::Next { count, medication } => cmd_next(&ctx, count, medication),
        Commands::Log {
            schedule,
            scheduled,
            taken_at,
            status,
            id,
            notes,
        } => cmd_log(&ctx, schedule, scheduled, taken_at, status, id, notes),
        Commands::Sweep => cmd_sweep(&ctx),
        Commands::Stats {
            medication,
            period_days,
            range,
        } => cmd_stats(&ctx, medication, period_days, range),
        Commands::Export {
            out,
            medication,
            status,
            range,
        } => cmd_export(&ctx, &out, medication, status, range),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_schedule_add(
    ctx: &Context,
    medication: String,
    frequency: &str,
    times: Vec<String>,
    days: Option<Vec<u8>>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    meal: Option<String>,
    reminder_offset: Option<u32>,
) -> Result<()> {
    let frequency: Frequency = frequency.parse()?;
    let meal_relation = meal.map(|m| m.parse::<MealRelation>()).transpose()?;
    let offset =
        reminder_offset.unwrap_or(ctx.config.dosing.default_reminder_offset_minutes);

    let mut schedule = MedicationSchedule::new(
        medication,
        ctx.user_id.clone(),
        frequency,
        start.unwrap_or(ctx.now.date()),
        ctx.now,
    );
    schedule.times_per_day = times.len() as u32;
    schedule.days_of_week = days;
    schedule.end_date = end;

    let dose_times: Vec<DoseTime> = times
        .into_iter()
        .map(|time| DoseTime {
            meal_relation,
            reminder_offset_minutes: offset,
            ..DoseTime::new(schedule.id, time, ctx.now)
        })
        .collect();

    let id = TreatmentPlan::update(&ctx.plan_path, |plan| {
        plan.add_schedule(schedule, dose_times)
    })?;

    println!("✓ Added schedule {}", id);
    Ok(())
}

fn cmd_schedule_list(ctx: &Context, medication: Option<String>) -> Result<()> {
    let plan = TreatmentPlan::load(&ctx.plan_path)?;

    let schedules: Vec<&MedicationSchedule> = plan
        .schedules
        .iter()
        .filter(|s| s.user_id == ctx.user_id)
        .filter(|s| medication.as_ref().map_or(true, |m| &s.medication_id == m))
        .collect();

    if schedules.is_empty() {
        println!("No schedules.");
        return Ok(());
    }

    for schedule in schedules {
        let times: Vec<String> = plan
            .dose_times_for(schedule.id)
            .into_iter()
            .map(|dt| dt.time)
            .collect();

        println!("{}  {}", schedule.id, schedule.medication_id);
        println!("  Frequency: {}", schedule.frequency);
        println!("  Times:     {}", times.join(", "));
        if let Some(days) = &schedule.days_of_week {
            let names: Vec<&str> = days.iter().map(|d| weekday_name(*d)).collect();
            println!("  Days:      {}", names.join(", "));
        }
        match schedule.end_date {
            Some(end) => println!("  Period:    {} to {}", schedule.start_date, end),
            None => println!("  Period:    from {}", schedule.start_date),
        }
        if let Some(next) = next_occurrence(schedule, &plan.dose_times_for(schedule.id), ctx.now)
        {
            println!("  Next dose: {}", next.format("%Y-%m-%d %H:%M"));
        }
    }

    Ok(())
}

fn cmd_schedule_edit(ctx: &Context, id: Uuid, changes: ScheduleChanges) -> Result<()> {
    let frequency = changes
        .frequency
        .as_deref()
        .map(str::parse::<Frequency>)
        .transpose()?;
    let offset = changes
        .reminder_offset
        .unwrap_or(ctx.config.dosing.default_reminder_offset_minutes);

    let times = TreatmentPlan::update(&ctx.plan_path, |plan| {
        let mut schedule = owned_schedule(plan, id, &ctx.user_id)?.clone();

        // Add before removing so a single slot can be replaced in one edit
        for time in changes.add_times {
            plan.add_dose_time(DoseTime {
                reminder_offset_minutes: offset,
                ..DoseTime::new(id, time, ctx.now)
            })?;
        }
        for time in &changes.remove_times {
            let dose_time = plan
                .dose_times_for(id)
                .into_iter()
                .find(|dt| dt.time.trim() == time.trim())
                .ok_or_else(|| {
                    Error::NotFound(format!("dose time {} of schedule {}", time, id))
                })?;
            plan.remove_dose_time(dose_time.id)?;
        }
        if let Some(offset) = changes.reminder_offset {
            for dose_time in plan.dose_times_for(id) {
                plan.update_dose_time(DoseTime {
                    reminder_offset_minutes: offset,
                    ..dose_time
                })?;
            }
        }

        if let Some(frequency) = frequency {
            schedule.frequency = frequency;
            schedule.is_recurring = frequency != Frequency::AsNeeded;
        }
        if let Some(days) = changes.days {
            schedule.days_of_week = Some(days);
        }
        if let Some(start) = changes.start {
            schedule.start_date = start;
        }
        if changes.no_end {
            schedule.end_date = None;
        } else if let Some(end) = changes.end {
            schedule.end_date = Some(end);
        }
        schedule.times_per_day = plan.dose_times_for(id).len() as u32;

        plan.update_schedule(schedule, ctx.now)?;
        Ok(plan.dose_times_for(id))
    })?;

    let times: Vec<String> = times.into_iter().map(|dt| dt.time).collect();
    println!("✓ Updated schedule {}", id);
    println!("  Times: {}", times.join(", "));
    Ok(())
}

fn cmd_schedule_remove(ctx: &Context, id: Uuid) -> Result<()> {
    let removed = TreatmentPlan::update(&ctx.plan_path, |plan| {
        owned_schedule(plan, id, &ctx.user_id)?;
        plan.remove_schedule(id)
    })?;
    println!(
        "✓ Removed schedule {} ({})",
        removed.id, removed.medication_id
    );
    Ok(())
}

fn cmd_next(ctx: &Context, count: Option<usize>, medication: Option<String>) -> Result<()> {
    let plan = TreatmentPlan::load(&ctx.plan_path)?;
    let count = count.unwrap_or(ctx.config.report.projection_count);
    if count == 0 || count > MAX_PROJECTION_COUNT {
        return Err(Error::Config(format!(
            "count must be between 1 and {}",
            MAX_PROJECTION_COUNT
        )));
    }

    let user_plan = TreatmentPlan {
        schedules: plan
            .schedules
            .iter()
            .filter(|s| s.user_id == ctx.user_id)
            .cloned()
            .collect(),
        dose_times: plan.dose_times.clone(),
    };

    let upcoming = user_plan.upcoming(ctx.now, count, medication.as_deref());
    if upcoming.is_empty() {
        println!("No upcoming doses.");
        return Ok(());
    }

    println!("Upcoming doses:");
    for dose in upcoming {
        println!(
            "  {}  {}  (remind {})  [{}]",
            dose.at.format("%Y-%m-%d %H:%M"),
            dose.medication_id,
            dose.remind_at.format("%H:%M"),
            dose.schedule_id
        );
    }

    Ok(())
}

fn cmd_log(
    ctx: &Context,
    schedule_id: Uuid,
    scheduled: Option<NaiveDateTime>,
    taken_at: Option<NaiveDateTime>,
    status: Option<String>,
    id: Option<Uuid>,
    notes: Option<String>,
) -> Result<()> {
    let plan = TreatmentPlan::load(&ctx.plan_path)?;
    let schedule = owned_schedule(&plan, schedule_id, &ctx.user_id)?;

    let kind = status
        .as_deref()
        .map(str::parse::<DoseStatusKind>)
        .transpose()?;

    let existing = match id {
        Some(id) => Some(pending_entry(ctx, id, schedule_id, scheduled)?),
        None => None,
    };
    let due = match (&existing, scheduled) {
        (Some(entry), _) => entry.scheduled_time,
        (None, Some(due)) => due,
        (None, None) => {
            return Err(Error::Other("--scheduled is required for a new dose".into()));
        }
    };

    let tolerance = ctx.config.dosing.late_tolerance_minutes;
    let intake = taken_at.unwrap_or(ctx.now);

    let status = match kind {
        None => intake_status(due, intake, tolerance),
        Some(DoseStatusKind::Taken) => DoseStatus::Taken { taken_at: intake },
        Some(DoseStatusKind::Late) => DoseStatus::Late { taken_at: intake },
        Some(other) if taken_at.is_some() => {
            return Err(Error::Other(format!(
                "--taken-at does not apply to {} doses",
                other
            )));
        }
        Some(DoseStatusKind::Missed) => DoseStatus::Missed,
        Some(DoseStatusKind::Skipped) => DoseStatus::Skipped,
        Some(DoseStatusKind::Scheduled) => DoseStatus::Scheduled,
    };

    let record = match existing {
        Some(existing) => {
            let mut completed = existing.transition(status)?;
            if notes.is_some() {
                completed.notes = notes;
            }
            completed
        }
        None => {
            let mut record = DoseHistory::for_schedule(schedule, due, status, ctx.now);
            record.notes = notes;
            record
        }
    };

    let mut log = JsonlDoseLog::new(&ctx.log_path);
    log.append(&record)?;

    print!("✓ Logged {} dose {}", record.status.kind(), record.id);
    match record.late_minutes() {
        Some(minutes) if minutes > 0 => println!(" ({} min after schedule)", minutes),
        _ => println!(),
    }

    Ok(())
}

/// Look up the current user's dose `id` for completion
///
/// The entry must belong to `schedule_id`, and a given `scheduled` time
/// must match the one on record.
fn pending_entry(
    ctx: &Context,
    id: Uuid,
    schedule_id: Uuid,
    scheduled: Option<NaiveDateTime>,
) -> Result<DoseHistory> {
    let entry = load_history(&ctx.log_path, &DoseHistoryFilter::for_user(&ctx.user_id))?
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| Error::NotFound(format!("dose {}", id)))?;

    if entry.schedule_id != schedule_id {
        return Err(Error::Other(format!(
            "dose {} belongs to schedule {}, not {}",
            id, entry.schedule_id, schedule_id
        )));
    }
    if let Some(due) = scheduled.filter(|due| *due != entry.scheduled_time) {
        return Err(Error::Other(format!(
            "dose {} is due at {}, not {}",
            id,
            entry.scheduled_time.format("%Y-%m-%d %H:%M"),
            due.format("%Y-%m-%d %H:%M")
        )));
    }

    Ok(entry)
}

fn cmd_sweep(ctx: &Context) -> Result<()> {
    let history = load_history(&ctx.log_path, &DoseHistoryFilter::for_user(&ctx.user_id))?;
    let pending = pending_doses(&history).len();

    let swept = sweep_overdue(&history, ctx.now, ctx.config.dosing.missed_after_minutes);

    let mut log = JsonlDoseLog::new(&ctx.log_path);
    for record in &swept {
        log.append(record)?;
    }

    println!(
        "✓ Marked {} of {} pending doses as missed",
        swept.len(),
        pending
    );
    Ok(())
}

fn cmd_stats(
    ctx: &Context,
    medication: Option<String>,
    period_days: Option<u32>,
    range: DateRange,
) -> Result<()> {
    let period_days = period_days.unwrap_or(ctx.config.report.period_days);
    if period_days == 0 || period_days > MAX_PERIOD_DAYS {
        return Err(Error::Config(format!(
            "period length must be between 1 and {} days",
            MAX_PERIOD_DAYS
        )));
    }

    let filter = history_filter(ctx, medication.clone(), &range);
    let history = load_history(&ctx.log_path, &filter)?;

    let stats = calculate_stats(&history);
    let level = classify_adherence(stats.adherence_percentage);
    let streak = calculate_streak(&history);
    let periods = calculate_by_period(&history, period_days, ctx.now);

    match &medication {
        Some(m) => println!("Adherence for {} ({})", ctx.user_id, m),
        None => println!("Adherence for {}", ctx.user_id),
    }
    println!(
        "  Doses:      {} total ({} taken, {} late, {} missed, {} skipped)",
        stats.total_doses,
        stats.taken_doses,
        stats.late_doses,
        stats.missed_doses,
        stats.skipped_doses
    );
    println!(
        "  Adherence:  {:.2}% ({})",
        stats.adherence_percentage, level
    );
    println!("  Avg delay:  {:.2} min", stats.average_late_minutes);
    println!("  Streak:     {} days", streak);
    if !is_good_adherence(stats.adherence_percentage) && stats.total_doses > 0 {
        println!("  ⚠ Adherence is below the recommended level");
    }

    println!();
    println!("Trend ({}-day periods):", period_days);
    for period in &periods {
        println!(
            "  {} - {}  {:>6.2}%",
            period.start.format("%d %b"),
            period.end.format("%d %b"),
            period.adherence_percentage
        );
    }

    Ok(())
}

fn cmd_export(
    ctx: &Context,
    out: &Path,
    medication: Option<String>,
    status: Option<Vec<String>>,
    range: DateRange,
) -> Result<()> {
    let mut filter = history_filter(ctx, medication, &range);
    if let Some(status) = status {
        let kinds = status
            .iter()
            .map(|s| s.parse::<DoseStatusKind>())
            .collect::<Result<Vec<_>>>()?;
        filter = filter.statuses(kinds);
    }

    let history = load_history(&ctx.log_path, &filter)?;
    let count = export_csv(&history, out)?;

    println!("✓ Exported {} doses", count);
    println!("  CSV: {}", out.display());
    Ok(())
}

fn history_filter(
    ctx: &Context,
    medication: Option<String>,
    range: &DateRange,
) -> DoseHistoryFilter {
    let mut filter = DoseHistoryFilter::for_user(&ctx.user_id);
    if let Some(m) = medication {
        filter = filter.medication(m);
    }
    if range.from.is_some() || range.to.is_some() {
        // `to` is inclusive, so the bound is midnight of the following day
        let start = range
            .from
            .map_or(NaiveDateTime::MIN, |d| d.and_time(NaiveTime::MIN));
        let end = range
            .to
            .and_then(|d| d.succ_opt())
            .map_or(NaiveDateTime::MAX, |d| d.and_time(NaiveTime::MIN));
        filter = filter.between(start, end);
    }
    filter
}

/// A schedule of the current user, or `NotFound`
fn owned_schedule<'a>(
    plan: &'a TreatmentPlan,
    id: Uuid,
    user_id: &str,
) -> Result<&'a MedicationSchedule> {
    plan.schedule(id)
        .filter(|s| s.user_id == user_id)
        .ok_or_else(|| Error::NotFound(format!("schedule {}", id)))
}

fn weekday_name(index: u8) -> &'static str {
    match index {
        0 => "Sun",
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        6 => "Sat",
        _ => "?",
    }
}
