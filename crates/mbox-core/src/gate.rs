//! One-shot deferred apply gate.
//!
//! Given the readback's `nextApplyAfter` and the current time, decide whether
//! staged set-points may be committed on this iteration.

use crate::record::{BookKeeping, Stamp};
use mbox_common::error::MboxResult;
use mbox_common::time::{difference, is_due, Timestamp};
use tracing::debug;

/// Outcome of evaluating the gate once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Nothing is scheduled.
    NotScheduled,
    /// Scheduled for `due`, which has not passed yet.
    Pending {
        /// Scheduled due-time.
        due: Timestamp,
    },
    /// `due` has passed; commit now.
    Due {
        /// Scheduled due-time.
        due: Timestamp,
        /// How far past the due-time this evaluation is.
        late_by: Timestamp,
    },
}

impl GateDecision {
    /// True for [`GateDecision::Due`].
    #[must_use]
    pub fn is_due(&self) -> bool {
        matches!(self, Self::Due { .. })
    }
}

/// Evaluate the gate for `schedule` at `now`.
///
/// # Errors
///
/// Only a broken [`is_due`]/[`difference`] contract can fail here, which the
/// caller should treat as fatal.
pub fn evaluate(schedule: Option<Timestamp>, now: Timestamp) -> MboxResult<GateDecision> {
    let Some(due) = schedule else {
        return Ok(GateDecision::NotScheduled);
    };
    if !is_due(now, due, true) {
        return Ok(GateDecision::Pending { due });
    }
    let late_by = difference(now, due)?;
    debug!(%due, %now, %late_by, "Deferred apply is due");
    Ok(GateDecision::Due { due, late_by })
}

/// Stamp a commit into the bookkeeping and disarm the one-shot schedule.
pub fn commit(book_keeping: &mut BookKeeping, now: Timestamp, count: u64) {
    book_keeping.last_applied = Stamp {
        when: now,
        at_count: count,
    };
    book_keeping.next_apply_after = None;
}
