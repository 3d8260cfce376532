//! Field values carried by external writes and record snapshots.

use mbox_common::error::{MboxError, MboxResult};
use mbox_common::time::Timestamp;
use serde::{Deserialize, Serialize};

/// A single field value addressed by a dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Double precision scalar.
    Float64(f64),
    /// Double precision waveform.
    Float64Array(Vec<f64>),
    /// A whole `time_t` sub-structure.
    Timestamp(Timestamp),
}

impl FieldValue {
    /// Human readable kind name, used in type mismatch errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UInt64(_) => "uint64",
            Self::UInt32(_) => "uint32",
            Self::Float64(_) => "float64",
            Self::Float64Array(_) => "float64[]",
            Self::Timestamp(_) => "time_t",
        }
    }

    fn mismatch(&self, path: &str, expected: &'static str) -> MboxError {
        MboxError::TypeMismatch {
            path: path.to_owned(),
            expected,
            found: self.kind(),
        }
    }

    /// Read as a scalar double. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self, path: &str) -> MboxResult<f64> {
        match *self {
            Self::Float64(v) => Ok(v),
            Self::UInt64(v) => Ok(v as f64),
            Self::UInt32(v) => Ok(f64::from(v)),
            _ => Err(self.mismatch(path, "float64")),
        }
    }

    /// Read as an unsigned 64-bit integer.
    pub fn to_u64(&self, path: &str) -> MboxResult<u64> {
        match *self {
            Self::UInt64(v) => Ok(v),
            Self::UInt32(v) => Ok(u64::from(v)),
            _ => Err(self.mismatch(path, "uint64")),
        }
    }

    /// Read as an unsigned 32-bit integer, rejecting values that do not fit.
    pub fn to_u32(&self, path: &str) -> MboxResult<u32> {
        match *self {
            Self::UInt32(v) => Ok(v),
            Self::UInt64(v) => u32::try_from(v).map_err(|_| self.mismatch(path, "uint32")),
            _ => Err(self.mismatch(path, "uint32")),
        }
    }

    /// Read as a waveform.
    pub fn to_f64_array(&self, path: &str) -> MboxResult<Vec<f64>> {
        match self {
            Self::Float64Array(v) => Ok(v.clone()),
            _ => Err(self.mismatch(path, "float64[]")),
        }
    }

    /// Read as a whole timestamp, rejecting a sub-second field of one second or more.
    pub fn to_timestamp(&self, path: &str) -> MboxResult<Timestamp> {
        match *self {
            Self::Timestamp(t) if t.is_normalized() => Ok(t),
            Self::Timestamp(t) => Err(MboxError::OutOfRange {
                path: path.to_owned(),
                value: format!("{}s {}ns", t.seconds, t.nanoseconds),
            }),
            _ => Err(self.mismatch(path, "time_t")),
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Vec<f64>> for FieldValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Float64Array(v)
    }
}

impl From<Timestamp> for FieldValue {
    fn from(v: Timestamp) -> Self {
        Self::Timestamp(v)
    }
}

/// An external write: a full or partial set of field values.
///
/// Fields are applied in order, so a later entry for the same path wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Put {
    fields: Vec<(String, FieldValue)>,
}

impl Put {
    /// An empty write.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field to the write.
    #[must_use]
    pub fn field(mut self, path: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    /// The fields in write order.
    #[must_use]
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// True if the write carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl IntoIterator for Put {
    type Item = (String, FieldValue);
    type IntoIter = std::vec::IntoIter<(String, FieldValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Point-in-time copy of every leaf of a record, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSnapshot {
    /// Record name.
    pub name: String,
    /// `(path, value)` for every leaf.
    pub fields: Vec<(String, FieldValue)>,
}

impl FieldSnapshot {
    /// Look up one leaf.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(p, _)| p == path).map(|(_, v)| v)
    }
}
