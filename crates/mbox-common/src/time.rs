//! Wall-clock timestamps with due-time comparison and ordered differences.
//!
//! A [`Timestamp`] is a `(seconds, nanoseconds)` pair past the Unix epoch.
//! A timestamp whose `seconds` is zero is the reserved "unset" sentinel: it
//! marks "nothing scheduled" on the field boundary. Inside the crates the
//! sentinel is converted to `Option<Timestamp>` as early as possible.

use crate::error::{MboxError, MboxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sub-second units per second (the sub-second field holds nanoseconds).
pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Wall-clock time as seconds and nanoseconds past the Unix epoch.
///
/// Invariant: `nanoseconds < NANOS_PER_SECOND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp {
    /// Whole seconds past the epoch.
    #[serde(rename = "secondsPastEpoch")]
    pub seconds: u64,
    /// Nanoseconds within the second.
    pub nanoseconds: u32,
}

impl Timestamp {
    /// The "nothing scheduled" sentinel.
    pub const UNSET: Timestamp = Timestamp {
        seconds: 0,
        nanoseconds: 0,
    };

    /// Build a timestamp, carrying excess nanoseconds into seconds.
    #[must_use]
    pub fn new(seconds: u64, nanoseconds: u32) -> Self {
        Self {
            seconds: seconds.saturating_add(u64::from(nanoseconds / NANOS_PER_SECOND)),
            nanoseconds: nanoseconds % NANOS_PER_SECOND,
        }
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from(since_epoch)
    }

    /// True for the zero-seconds sentinel.
    #[inline]
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.seconds == 0
    }

    /// True if the sub-second field is below one second.
    #[inline]
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.nanoseconds < NANOS_PER_SECOND
    }

    /// Map the sentinel to `None`.
    #[must_use]
    pub fn into_option(self) -> Option<Timestamp> {
        if self.is_unset() {
            None
        } else {
            Some(self)
        }
    }

    /// This timestamp shifted forward by `delta`.
    #[must_use]
    pub fn saturating_add(self, delta: Duration) -> Self {
        let nanos = u64::from(self.nanoseconds) + u64::from(delta.subsec_nanos());
        let carry = nanos / u64::from(NANOS_PER_SECOND);
        Self {
            seconds: self
                .seconds
                .saturating_add(delta.as_secs())
                .saturating_add(carry),
            nanoseconds: (nanos % u64::from(NANOS_PER_SECOND)) as u32,
        }
    }

    /// `self - reference` as a non-negative duration, see [`difference`].
    pub fn difference(self, reference: Timestamp) -> MboxResult<Timestamp> {
        difference(self, reference)
    }

    /// The timestamp interpreted as a duration since the epoch.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanoseconds)
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self {
            seconds: d.as_secs(),
            nanoseconds: d.subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// Has `now` strictly passed `reference`?
///
/// With `ignore_unset`, a sentinel `reference` is never due regardless of
/// its nanoseconds. Equal timestamps are not due.
#[must_use]
pub fn is_due(now: Timestamp, reference: Timestamp, ignore_unset: bool) -> bool {
    if ignore_unset && reference.is_unset() {
        return false;
    }
    if now.seconds > reference.seconds {
        return true;
    }
    now.seconds == reference.seconds && now.nanoseconds > reference.nanoseconds
}

/// Compute `now - reference` as a normalized duration.
///
/// # Errors
///
/// Returns [`MboxError::Ordering`] if `now` is earlier than `reference`.
pub fn difference(now: Timestamp, reference: Timestamp) -> MboxResult<Timestamp> {
    let ordering_error = || MboxError::Ordering {
        now: now.to_string(),
        reference: reference.to_string(),
    };

    let mut seconds = now
        .seconds
        .checked_sub(reference.seconds)
        .ok_or_else(ordering_error)?;

    // Inputs may come straight off the wire, so normalize rather than trust them.
    let now_nanos = u64::from(now.nanoseconds) % u64::from(NANOS_PER_SECOND);
    let now_seconds_carry = u64::from(now.nanoseconds) / u64::from(NANOS_PER_SECOND);
    let ref_nanos = u64::from(reference.nanoseconds) % u64::from(NANOS_PER_SECOND);
    let ref_seconds_carry = u64::from(reference.nanoseconds) / u64::from(NANOS_PER_SECOND);
    seconds = (seconds + now_seconds_carry)
        .checked_sub(ref_seconds_carry)
        .ok_or_else(ordering_error)?;

    let nanoseconds = if now_nanos >= ref_nanos {
        now_nanos - ref_nanos
    } else {
        // Borrow one second.
        seconds = seconds.checked_sub(1).ok_or_else(ordering_error)?;
        now_nanos + u64::from(NANOS_PER_SECOND) - ref_nanos
    };

    Ok(Timestamp {
        seconds,
        nanoseconds: nanoseconds as u32,
    })
}
