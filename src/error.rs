//! Canonical error type for the receive engine.
//!
//! `ReceiverError` is the single error surface exposed by the crate. Setup
//! failures (`DuplicateListener`), lifecycle failures (`LinkClosed`,
//! `Cancelled`), protocol violations (`MessageSizeExceeded`,
//! `IllegalState`), and per-operation failures (`Timeout`, `NotFound`) all
//! share it so callers match on one enum.

use thiserror::Error;

use crate::message::DeliveryTag;

/// Errors surfaced by the receive engine.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReceiverError {
    /// The link has been closed or aborted; no further operations are
    /// accepted.
    #[error("link is closed")]
    LinkClosed,

    /// A delivery exceeded the negotiated maximum message size.
    ///
    /// Fatal to the link when raised from the transfer path.
    #[error("message size {attempted} exceeds the maximum of {limit} bytes")]
    MessageSizeExceeded {
        /// Cumulative delivery size that triggered the guard.
        attempted: u64,
        /// Negotiated maximum message size.
        limit: u64,
    },

    /// The peer or caller supplied a state the protocol does not allow
    /// here, such as a non-terminal disposition outcome or a second
    /// disposition for a tag that already has one pending.
    #[error("illegal delivery state: {0}")]
    IllegalState(String),

    /// An awaited disposition was not reciprocated in time.
    #[error("disposition timed out")]
    Timeout,

    /// The operation was cancelled by link teardown.
    #[error("operation cancelled{}", source.as_deref().map(|s| format!(": {s}")).unwrap_or_default())]
    Cancelled {
        /// Terminal error recorded on the link, when one exists.
        source: Option<Box<ReceiverError>>,
    },

    /// No unsettled delivery matches the given tag.
    #[error("no unsettled delivery with tag {0}")]
    NotFound(DeliveryTag),

    /// A message listener is already installed on this link.
    #[error("a message listener is already registered")]
    DuplicateListener,

    /// The link was detached by the peer with an error condition.
    #[error("link detached: {condition}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Detached {
        /// Symbolic error condition reported by the peer.
        condition: String,
        /// Optional description reported by the peer.
        description: Option<String>,
    },
}

impl ReceiverError {
    /// Build a [`ReceiverError::Cancelled`] carrying the link's terminal
    /// error, when one is set.
    #[must_use]
    pub fn cancelled(source: Option<ReceiverError>) -> Self {
        Self::Cancelled {
            source: source.map(Box::new),
        }
    }
}
