use thiserror::Error;

/// Mailbox error types covering timestamp contracts, record lifecycle and writes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MboxError {
    /// `difference` was asked for `now - reference` with `now` earlier than `reference`.
    ///
    /// This is a contract violation by the caller, not a recoverable condition.
    #[error("timestamp ordering violated: now {now} is earlier than reference {reference}")]
    Ordering {
        /// The later timestamp the caller claimed.
        now: String,
        /// The reference timestamp.
        reference: String,
    },

    /// A record was posted or fetched before it was opened.
    #[error("record {0} is not open")]
    NotOpen(String),

    /// A record was opened a second time.
    #[error("record {0} is already open")]
    AlreadyOpen(String),

    /// A field path that is not part of the record's shape.
    #[error("unknown field path: {0:?}")]
    UnknownFieldPath(String),

    /// A field was written with a value of the wrong kind.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Field path that was written.
        path: String,
        /// Kind the field holds.
        expected: &'static str,
        /// Kind that was supplied.
        found: &'static str,
    },

    /// A field was written with a value of the right kind that the field cannot hold.
    #[error("value out of range at {path}: {value}")]
    OutOfRange {
        /// Field path that was written.
        path: String,
        /// The rejected value.
        value: String,
    },

    /// An external write arrived for a record with no write handler.
    #[error("record {0} does not accept writes")]
    NoWriteHandler(String),

    /// A second write handler was registered on the same record.
    #[error("record {0} already has a write handler")]
    HandlerAlreadyRegistered(String),

    /// A record name the service does not know.
    #[error("unknown record: {0}")]
    UnknownRecord(String),

    /// A record name registered twice with the service.
    #[error("record {0} is already registered")]
    DuplicateRecord(String),

    /// The service thread is gone and can no longer accept requests.
    #[error("service stopped")]
    ServiceStopped,

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for mailbox operations.
pub type MboxResult<T> = Result<T, MboxError>;
