//! Deterministic step → story status combination.

use crate::core::types::Status;

/// Combine step statuses into one story status.
///
/// Fixed priority scan, first match wins:
/// `error` → `running` → `skipped` → `fail` → `pass`.
/// `pass` requires every step to pass, which holds vacuously for no steps.
pub fn combine_step_statuses<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut seen_running = false;
    let mut seen_skipped = false;
    let mut seen_fail = false;

    for status in statuses {
        match status {
            Status::Error => return Status::Error,
            Status::Running => seen_running = true,
            Status::Skipped => seen_skipped = true,
            Status::Fail => seen_fail = true,
            Status::Pass => {}
        }
    }

    if seen_running {
        Status::Running
    } else if seen_skipped {
        Status::Skipped
    } else if seen_fail {
        Status::Fail
    } else {
        Status::Pass
    }
}
