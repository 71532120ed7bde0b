//! Cron matching for schedule-triggered workflows.
//!
//! The engine does not own a clock.  An external poller calls
//! [`crate::WorkflowEngine::run_due_schedules`] once a minute, and this module
//! decides which workflows are due for the given instant.

use std::fmt;

use chrono::{DateTime, TimeZone, Timelike};
use croner::Cron;
use thiserror::Error;
use tracing::warn;

use crate::models::{Trigger, WorkflowDefinition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 cron fields, found {0}")]
    FieldCount(usize),
    #[error("invalid cron expression '{expression}': {message}")]
    Invalid { expression: String, message: String },
}

/// A parsed five-field cron expression
/// (`minute hour day-of-month month day-of-week`, Sunday is 0 or 7).
pub struct CronPattern {
    expression: String,
    cron: Cron,
}

impl fmt::Debug for CronPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronPattern").field(&self.expression).finish()
    }
}

impl CronPattern {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(CronError::FieldCount(fields));
        }

        let cron = Cron::new(expression).parse().map_err(|e| CronError::Invalid {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            expression: expression.to_string(),
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// True when the minute containing `at` matches, in `at`'s own time zone.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let Some(minute) = at.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        self.cron.is_time_matching(&minute).unwrap_or(false)
    }
}

/// Whether `workflow` should run at `now`: it must be enabled, carry a
/// schedule trigger, and its cron expression must match.  Invalid
/// expressions never match.
pub fn should_run_scheduled_workflow<Tz: TimeZone>(
    workflow: &WorkflowDefinition,
    now: &DateTime<Tz>,
) -> bool {
    if !workflow.enabled {
        return false;
    }
    let Trigger::Schedule { cron } = &workflow.trigger else {
        return false;
    };

    match CronPattern::parse(cron) {
        Ok(pattern) => pattern.matches(now),
        Err(e) => {
            warn!(workflow_id = %workflow.id, cron = %cron, "invalid cron expression: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn scheduled(cron: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(
            "digest",
            Trigger::Schedule { cron: cron.into() },
            vec![],
            vec![],
        )
    }

    #[test]
    fn monday_nine_am_only() {
        // 2024-01-01 was a Monday.
        let wf = scheduled("0 9 * * 1");
        assert!(should_run_scheduled_workflow(&wf, &at(2024, 1, 1, 9, 0)));
        assert!(!should_run_scheduled_workflow(&wf, &at(2024, 1, 1, 9, 1)));
        assert!(!should_run_scheduled_workflow(&wf, &at(2024, 1, 2, 9, 0)));
    }

    #[test]
    fn steps_ranges_and_lists() {
        let p = CronPattern::parse("*/15 8-17/2 1,15 * *").unwrap();
        assert!(p.matches(&at(2024, 3, 1, 8, 45)));
        assert!(p.matches(&at(2024, 3, 15, 16, 0)));
        assert!(!p.matches(&at(2024, 3, 15, 9, 0)));
        assert!(!p.matches(&at(2024, 3, 2, 8, 0)));
        assert!(!p.matches(&at(2024, 3, 1, 8, 10)));

        let offset = CronPattern::parse("5/20 * * * *").unwrap();
        assert!(offset.matches(&at(2024, 3, 1, 0, 25)));
        assert!(!offset.matches(&at(2024, 3, 1, 0, 20)));
    }

    #[test]
    fn sunday_is_zero_or_seven() {
        // 2024-01-07 was a Sunday.
        let sunday = at(2024, 1, 7, 0, 0);
        assert!(CronPattern::parse("0 0 * * 0").unwrap().matches(&sunday));
        assert!(CronPattern::parse("0 0 * * 7").unwrap().matches(&sunday));
        assert!(!CronPattern::parse("0 0 * * 1-6").unwrap().matches(&sunday));
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        assert!(matches!(CronPattern::parse("* * * *"), Err(CronError::FieldCount(4))));
        assert!(matches!(CronPattern::parse("0 0 9 * * 1"), Err(CronError::FieldCount(6))));
        for bad in ["60 * * * *", "* 24 * * *", "* * 0 * *", "* * * 13 *", "*/0 * * * *", "x * * * *"] {
            assert!(CronPattern::parse(bad).is_err(), "{bad}");
        }
        assert!(!should_run_scheduled_workflow(&scheduled("nope"), &at(2024, 1, 1, 0, 0)));
    }

    #[test]
    fn seconds_within_the_minute_still_match() {
        let wf = scheduled("30 6 * * *");
        let mid_minute = Utc.with_ymd_and_hms(2024, 5, 3, 6, 30, 42).unwrap();
        assert!(should_run_scheduled_workflow(&wf, &mid_minute));
        assert_eq!(CronPattern::parse("30 6 * * *").unwrap().expression(), "30 6 * * *");
    }

    #[test]
    fn disabled_or_unscheduled_workflows_never_run() {
        let mut wf = scheduled("* * * * *");
        assert!(should_run_scheduled_workflow(&wf, &at(2024, 1, 1, 0, 0)));
        wf.enabled = false;
        assert!(!should_run_scheduled_workflow(&wf, &at(2024, 1, 1, 0, 0)));

        let manual = WorkflowDefinition::new("m", Trigger::Manual, vec![], vec![]);
        assert!(!should_run_scheduled_workflow(&manual, &at(2024, 1, 1, 0, 0)));
    }
}
