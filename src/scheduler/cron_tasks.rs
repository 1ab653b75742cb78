use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;

/// A named cron-scheduled task persisted in the `cron_tasks` table. The
/// daemon itself only has one standing cron job today (the auto-backup
/// timer defined in `pipeline`); this type exists so `oak-ci.toml` or a
/// future `/api/cron` endpoint can register more without a schema change.
#[derive(Debug, Clone)]
pub struct CronTask {
    pub name: String,
    pub expression: String,
    pub enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CronTaskError {
    #[error("invalid cron expression '{0}': {1}")]
    InvalidExpression(String, String),
}

/// Parses `task.expression` and returns the next run time after `after`.
/// `None` means the schedule has no further occurrences (a cron expression
/// can in principle describe an empty set) — the caller should disable the
/// task rather than loop forever.
pub fn next_run(task: &CronTask, after: chrono::DateTime<Utc>) -> Result<Option<chrono::DateTime<Utc>>, CronTaskError> {
    let schedule = Schedule::from_str(&task.expression)
        .map_err(|e| CronTaskError::InvalidExpression(task.expression.clone(), e.to_string()))?;
    Ok(schedule.after(&after).next())
}

/// Whether `task` is due to run given the last time it ran (or `None` if
/// it has never run).
pub fn is_due(
    task: &CronTask,
    last_run_at: Option<chrono::DateTime<Utc>>,
    now: chrono::DateTime<Utc>,
) -> Result<bool, CronTaskError> {
    if !task.enabled {
        return Ok(false);
    }
    let baseline = last_run_at.unwrap_or_else(|| now - chrono::Duration::days(1));
    match next_run(task, baseline)? {
        Some(next) => Ok(next <= now),
        None => Ok(false),
    }
}
