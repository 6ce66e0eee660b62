//! Typed error kinds for the broker core.
//!
//! Propagation policy (see spec §7): `Empty` maps to HTTP 204, `Conflict` is
//! always retried internally and never escapes a driver call, long-poll
//! cancellation maps to `Empty` at the manager boundary, everything else maps
//! to HTTP 500.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluqError {
    #[error("no message available")]
    Empty,

    #[error("unknown, expired, or already-consumed ephemeral id")]
    InvalidEphemeralId,

    #[error("id generator observed a non-monotone clock")]
    ClockBackwards,

    #[error("hash-encoded id could not be decoded")]
    InvalidId,

    /// Internal only: a schedule key collision. Always retried by the
    /// driver loop that produced it; must never be returned to a caller.
    #[error("schedule key conflict")]
    Conflict,

    #[error("storage bucket missing: {0}")]
    BucketMissing(&'static str),

    #[error("message missing for id {0}")]
    MessageMissing(u64),

    #[error("wait request canceled")]
    Canceled,

    #[error("storage backend error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, PluqError>;

impl From<redb::Error> for PluqError {
    fn from(e: redb::Error) -> Self {
        PluqError::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for PluqError {
    fn from(e: redb::TransactionError) -> Self {
        PluqError::Storage(e.to_string())
    }
}

impl From<redb::TableError> for PluqError {
    fn from(e: redb::TableError) -> Self {
        PluqError::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for PluqError {
    fn from(e: redb::StorageError) -> Self {
        PluqError::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for PluqError {
    fn from(e: redb::CommitError) -> Self {
        PluqError::Storage(e.to_string())
    }
}

impl From<redb::DatabaseError> for PluqError {
    fn from(e: redb::DatabaseError) -> Self {
        PluqError::Storage(e.to_string())
    }
}
