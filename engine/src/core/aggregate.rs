//! Run-level verdict from per-story outcomes.
//!
//! Pure function: the same statuses always produce the same counts, verdict and
//! summary text.

use crate::core::types::{Counts, Status};

/// Aggregated verdict for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub counts: Counts,
    pub final_status: Status,
}

impl Aggregate {
    /// Fixed-format summary consumed verbatim by the check-run reporter.
    pub fn summary_text(&self) -> String {
        summary_text(&self.counts)
    }
}

/// Map per-story statuses to one run verdict.
///
/// - any `error` → `error`
/// - else any `fail` → `fail`
/// - else every story `pass` (and at least one story) → `pass`
/// - else → `skipped`
pub fn aggregate<I>(statuses: I) -> Aggregate
where
    I: IntoIterator<Item = Status>,
{
    let mut counts = Counts::default();
    let mut total = 0usize;
    for status in statuses {
        total += 1;
        match status {
            Status::Pass => counts.pass += 1,
            Status::Fail => counts.fail += 1,
            Status::Error => counts.error += 1,
            Status::Running | Status::Skipped => {}
        }
    }

    let final_status = if counts.error > 0 {
        Status::Error
    } else if counts.fail > 0 {
        Status::Fail
    } else if total > 0 && counts.pass == total {
        Status::Pass
    } else {
        Status::Skipped
    };

    Aggregate {
        counts,
        final_status,
    }
}

pub fn summary_text(counts: &Counts) -> String {
    format!(
        "{} passed, {} failed, {} errors",
        counts.pass, counts.fail, counts.error
    )
}
