// Cron schedule parsing and fire-time tracking

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::domain::ConfigError;

/// A validated 5-field cron expression (minute hour day-of-month month
/// day-of-week).
///
/// The underlying `cron` crate wants a seconds field, so `0` is prepended
/// internally; callers only ever see the 5-field form.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
    expr: String,
}

impl CronSchedule {
    /// Validate and parse an expression.
    ///
    /// Fails on wrong field count before the range checks of the cron
    /// crate, so `"* * *"` reports the count, not a parse artifact.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let trimmed = expr.trim();
        let fields = trimmed.split_whitespace().count();
        if fields != 5 {
            return Err(ConfigError::InvalidCronExpression {
                expr: expr.to_string(),
                reason: format!("expected 5 fields, found {}", fields),
            });
        }
        let schedule = Schedule::from_str(&format!("0 {}", trimmed)).map_err(|e| {
            ConfigError::InvalidCronExpression {
                expr: expr.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            schedule,
            expr: trimmed.to_string(),
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Earliest fire time strictly after `now`.
    ///
    /// Never returns `now` itself, so a job cannot fire twice within one
    /// evaluation instant.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).find(|t| *t > now)
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)
    }
}

/// Per-job fire-time state.
///
/// `next_fire_at` strictly increases across ticks; a delayed or coalesced
/// tick fires once and recomputes from the new `now`, never replaying the
/// missed windows.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    last_fire_at: Option<DateTime<Utc>>,
    next_fire_at: Option<DateTime<Utc>>,
}

impl ScheduleState {
    pub fn new(schedule: &CronSchedule, now: DateTime<Utc>) -> Self {
        Self {
            last_fire_at: None,
            next_fire_at: schedule.next_after(now),
        }
    }

    pub fn last_fire_at(&self) -> Option<DateTime<Utc>> {
        self.last_fire_at
    }

    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.next_fire_at
    }

    /// Evaluate the schedule at `now`; true means one fire event.
    ///
    /// On fire the next time is recomputed from the *new* `now`, which
    /// keeps it strictly ahead of both `now` and the previous value.
    pub fn tick(&mut self, schedule: &CronSchedule, now: DateTime<Utc>) -> bool {
        match self.next_fire_at {
            Some(due) if now >= due => {
                self.last_fire_at = Some(now);
                self.next_fire_at = schedule.next_after(now);
                true
            }
            _ => false,
        }
    }
}
