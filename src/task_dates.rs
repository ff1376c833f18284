//! Final end date of a task.
//!
//! `end_date_final` is stored, but [`recalc_task_end_date`] is its only
//! writer. Every task create and update, and every issue create, update and
//! delete, goes through it inside the same transaction as the mutation.

use chrono::NaiveDate;

use crate::dates::add_days;
use crate::db::Store;
use crate::error::{DomainError, DomainResult};
use crate::models::Task;

/// Baseline end date pushed out by the explicit delay plus every issue.
pub fn compute_final_end_date(
    end_date_original: NaiveDate,
    delay_days: u32,
    issue_durations: &[u32],
) -> DomainResult<NaiveDate> {
    let total_delay = u64::from(delay_days)
        + issue_durations
            .iter()
            .map(|&days| u64::from(days))
            .sum::<u64>();
    add_days(end_date_original, total_delay)
}

/// Reload a task and its issues, then persist the recomputed final end date.
pub fn recalc_task_end_date(store: &Store<'_>, task_id: &str) -> DomainResult<Task> {
    let mut task = store
        .find_task(task_id)?
        .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))?;
    let durations = store.issue_durations(task_id)?;

    let end_date_final = compute_final_end_date(task.end_date_original, task.delay_days, &durations)?;
    if !store.write_end_date_final(task_id, end_date_final)? {
        return Err(DomainError::TaskNotFound(task_id.to_string()));
    }

    if task.end_date_final != end_date_final {
        tracing::debug!(
            task_id,
            from = %task.end_date_final,
            to = %end_date_final,
            issues = durations.len(),
            "Final end date recalculated"
        );
    }
    task.end_date_final = end_date_final;
    Ok(task)
}
