//! Error types for the segment allocator.
//!
//! Every fallible operation in this crate returns [`Error`]. Backend-native
//! failures (`sqlx`, `mongodb`) are rolled back inside the backend and
//! translated to [`Error::StoreUnavailable`] before they cross the [`Store`]
//! boundary, so callers only ever see the categories below.
//!
//! ## Error Cases
//! - `StoreUnavailable`: a reservation round-trip failed (after the preload
//!   retry budget, when raised on the preload path).
//! - `SegmentNotReady`: a caller's bounded wait expired before a preload
//!   completed. Safe to retry.
//! - `InvalidConfiguration`: malformed settings or a violated `bigger_than`
//!   startup guard.
//! - `UnknownKey`: an administrative lookup for a key that has no row.
//! - `InvalidRequest`: a malformed administrative request.
//! - `Shutdown`: the sequencer has been closed.
//!
//! [`Store`]: crate::Store

use core::fmt::Display;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the allocator, its stores and the facade.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The backing store could not complete a reservation or lookup.
    #[error("store unavailable for `{key}`: {reason}")]
    StoreUnavailable { key: String, reason: String },

    /// Both buffers stayed empty for the whole bounded wait.
    #[error("segment not ready for `{key}`")]
    SegmentNotReady { key: String },

    /// Configuration was rejected at startup.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// No persisted row exists for the key.
    #[error("unknown biz tag `{key}`")]
    UnknownKey { key: String },

    /// The request was malformed or conflicts with existing state.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The sequencer is shutting down or already closed.
    #[error("sequencer is shut down")]
    Shutdown,
}

impl Error {
    pub(crate) fn store(key: &str, reason: impl Display) -> Self {
        Self::StoreUnavailable {
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub(crate) fn request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_ready(key: &str) -> Self {
        Self::SegmentNotReady {
            key: key.to_owned(),
        }
    }

    pub(crate) fn unknown(key: &str) -> Self {
        Self::UnknownKey {
            key: key.to_owned(),
        }
    }

    /// Returns `true` when retrying the whole operation may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SegmentNotReady { .. } | Self::StoreUnavailable { .. }
        )
    }
}
