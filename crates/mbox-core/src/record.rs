//! Record shapes: the readback published by the control loop and the
//! settings written by external parties.
//!
//! Field paths are dotted (`bookKeeping.lastApplied.atCount`). Each record
//! lists its leaves in [`Structure::FIELDS`]; interior paths address a whole
//! sub-structure.

use crate::value::FieldValue;
use mbox_common::error::{MboxError, MboxResult};
use mbox_common::time::{Timestamp, NANOS_PER_SECOND};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured record addressable by field path.
pub trait Structure: Clone + Send + Sync + fmt::Debug + 'static {
    /// Leaf field paths in declaration order.
    const FIELDS: &'static [&'static str];

    /// Read one leaf.
    fn field(&self, path: &str) -> Option<FieldValue>;

    /// Write one leaf or a whole sub-structure.
    ///
    /// # Errors
    ///
    /// [`MboxError::UnknownFieldPath`] if the path cannot be written, or
    /// [`MboxError::TypeMismatch`] if the value has the wrong kind.
    fn set_field(&mut self, path: &str, value: &FieldValue) -> MboxResult<()>;
}

fn unknown(path: &str) -> MboxError {
    MboxError::UnknownFieldPath(path.to_owned())
}

fn stamp_field(stamp: &Timestamp, rest: &str) -> Option<FieldValue> {
    match rest {
        "secondsPastEpoch" => Some(stamp.seconds.into()),
        "nanoseconds" => Some(stamp.nanoseconds.into()),
        _ => None,
    }
}

fn set_stamp_field(stamp: &mut Timestamp, path: &str, rest: &str, value: &FieldValue) -> MboxResult<()> {
    match rest {
        "" => *stamp = value.to_timestamp(path)?,
        "secondsPastEpoch" => stamp.seconds = value.to_u64(path)?,
        "nanoseconds" => {
            let nanos = value.to_u32(path)?;
            if nanos >= NANOS_PER_SECOND {
                return Err(MboxError::OutOfRange {
                    path: path.to_owned(),
                    value: nanos.to_string(),
                });
            }
            stamp.nanoseconds = nanos;
        }
        _ => return Err(unknown(path)),
    }
    Ok(())
}

/// Pair of horizontal/vertical waveforms, e.g. beam position monitors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Planes {
    /// Horizontal plane.
    pub x: Vec<f64>,
    /// Vertical plane.
    pub y: Vec<f64>,
}

impl Planes {
    fn field(&self, rest: &str) -> Option<FieldValue> {
        match rest {
            "x" => Some(self.x.clone().into()),
            "y" => Some(self.y.clone().into()),
            _ => None,
        }
    }

    fn set_field(&mut self, path: &str, rest: &str, value: &FieldValue) -> MboxResult<()> {
        match rest {
            "x" => self.x = value.to_f64_array(path)?,
            "y" => self.y = value.to_f64_array(path)?,
            _ => return Err(unknown(path)),
        }
        Ok(())
    }
}

/// Steerer set-points, one per plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Steerers {
    /// Horizontal set-point.
    pub x: f64,
    /// Vertical set-point.
    pub y: f64,
}

impl Steerers {
    fn field(&self, rest: &str) -> Option<FieldValue> {
        match rest {
            "x" => Some(self.x.into()),
            "y" => Some(self.y.into()),
            _ => None,
        }
    }

    fn set_field(&mut self, path: &str, rest: &str, value: &FieldValue) -> MboxResult<()> {
        match rest {
            "x" => self.x = value.to_f64(path)?,
            "y" => self.y = value.to_f64(path)?,
            _ => return Err(unknown(path)),
        }
        Ok(())
    }
}

/// When something happened, and at which loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    /// Wall-clock time.
    #[serde(rename = "timeStamp")]
    pub when: Timestamp,
    /// Loop iteration count at that time.
    pub at_count: u64,
}

impl Stamp {
    fn field(&self, rest: &str) -> Option<FieldValue> {
        match rest.split_once('.') {
            Some(("timeStamp", leaf)) => stamp_field(&self.when, leaf),
            _ if rest == "atCount" => Some(self.at_count.into()),
            _ => None,
        }
    }
}

/// Loop bookkeeping published with every readback.
///
/// Invariants: `count` increases by one per iteration,
/// `last_applied.at_count <= last.at_count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookKeeping {
    /// Iterations completed.
    pub count: u64,
    /// Last iteration.
    pub last: Stamp,
    /// Last time staged set-points were committed.
    pub last_applied: Stamp,
    /// Pending one-shot due-time, `None` when nothing is scheduled.
    pub next_apply_after: Option<Timestamp>,
}

impl BookKeeping {
    fn field(&self, rest: &str) -> Option<FieldValue> {
        if rest == "count" {
            return Some(self.count.into());
        }
        let (head, tail) = rest.split_once('.')?;
        match head {
            "last" => self.last.field(tail),
            "lastApplied" => self.last_applied.field(tail),
            "nextApplyAfter" => {
                stamp_field(&self.next_apply_after.unwrap_or(Timestamp::UNSET), tail)
            }
            _ => None,
        }
    }
}

/// The authoritative record published by the control loop (`<prefix>:rbk`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readback {
    /// Time of the last post.
    pub time_stamp: Timestamp,
    /// Beam position waveforms.
    pub bpms: Planes,
    /// Currently applied steerer set-points.
    pub steerers: Steerers,
    /// Loop bookkeeping.
    pub book_keeping: BookKeeping,
}

impl Readback {
    /// Initial readback for a loop starting at `now`.
    #[must_use]
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            time_stamp: now,
            book_keeping: BookKeeping {
                last: Stamp {
                    when: now,
                    at_count: 0,
                },
                ..BookKeeping::default()
            },
            ..Self::default()
        }
    }

    /// Commit staged set-points.
    pub fn apply(&mut self, settings: &Settings) {
        self.steerers = settings.steerers;
    }
}

impl Structure for Readback {
    const FIELDS: &'static [&'static str] = &[
        "timeStamp.secondsPastEpoch",
        "timeStamp.nanoseconds",
        "bpms.x",
        "bpms.y",
        "steerers.x",
        "steerers.y",
        "bookKeeping.count",
        "bookKeeping.last.timeStamp.secondsPastEpoch",
        "bookKeeping.last.timeStamp.nanoseconds",
        "bookKeeping.last.atCount",
        "bookKeeping.lastApplied.timeStamp.secondsPastEpoch",
        "bookKeeping.lastApplied.timeStamp.nanoseconds",
        "bookKeeping.lastApplied.atCount",
        "bookKeeping.nextApplyAfter.secondsPastEpoch",
        "bookKeeping.nextApplyAfter.nanoseconds",
    ];

    fn field(&self, path: &str) -> Option<FieldValue> {
        let (head, rest) = path.split_once('.')?;
        match head {
            "timeStamp" => stamp_field(&self.time_stamp, rest),
            "bpms" => self.bpms.field(rest),
            "steerers" => self.steerers.field(rest),
            "bookKeeping" => self.book_keeping.field(rest),
            _ => None,
        }
    }

    /// Only telemetry leaves are writable through paths; bookkeeping belongs to the loop.
    fn set_field(&mut self, path: &str, value: &FieldValue) -> MboxResult<()> {
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
        match head {
            "timeStamp" => set_stamp_field(&mut self.time_stamp, path, rest, value),
            "bpms" => self.bpms.set_field(path, rest, value),
            "steerers" => self.steerers.set_field(path, rest, value),
            _ => Err(unknown(path)),
        }
    }
}

/// Command-side record written by external parties (`<prefix>:set`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Requested steerer set-points.
    pub steerers: Steerers,
    /// Requested due-time; zero seconds means "no schedule".
    pub next_apply_after: Timestamp,
}

/// Interior path of the schedule in [`Settings`].
pub const NEXT_APPLY_AFTER: &str = "nextApplyAfter";
/// Interior path of the set-points in [`Settings`].
pub const STEERERS: &str = "steerers";

impl Settings {
    /// Settings mirroring what a readback currently has applied.
    #[must_use]
    pub fn from_readback(readback: &Readback) -> Self {
        Self {
            steerers: readback.steerers,
            next_apply_after: Timestamp::UNSET,
        }
    }

    /// The requested schedule, with the sentinel mapped to `None`.
    #[must_use]
    pub fn schedule(&self) -> Option<Timestamp> {
        self.next_apply_after.into_option()
    }
}

impl Structure for Settings {
    const FIELDS: &'static [&'static str] = &[
        "steerers.x",
        "steerers.y",
        "nextApplyAfter.secondsPastEpoch",
        "nextApplyAfter.nanoseconds",
    ];

    fn field(&self, path: &str) -> Option<FieldValue> {
        let (head, rest) = path.split_once('.')?;
        match head {
            STEERERS => self.steerers.field(rest),
            NEXT_APPLY_AFTER => stamp_field(&self.next_apply_after, rest),
            _ => None,
        }
    }

    fn set_field(&mut self, path: &str, value: &FieldValue) -> MboxResult<()> {
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
        match head {
            STEERERS => self.steerers.set_field(path, rest, value),
            NEXT_APPLY_AFTER => set_stamp_field(&mut self.next_apply_after, path, rest, value),
            _ => Err(unknown(path)),
        }
    }
}
