//! Delivery outcomes and the wider delivery-state union.
//!
//! An [`Outcome`] is a terminal verdict on a delivery. [`DeliveryState`]
//! widens that with the non-terminal `Received` progress marker and the
//! transactional wrapper, which carries a transaction id alongside an inner
//! outcome. The disposition completion path unwraps transactional states to
//! their inner outcome; anything without one is a protocol-state error.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Application-level error attached to a rejected delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCondition {
    /// Symbolic error condition (e.g. `amqp:internal-error`).
    pub condition: String,
    /// Optional human-readable description.
    pub description: Option<String>,
}

impl ErrorCondition {
    /// Build a condition without a description.
    #[must_use]
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: None,
        }
    }

    /// Attach a description to the condition.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Terminal verdict on a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The message was consumed successfully.
    Accepted,
    /// The message was rejected as invalid, carrying the reason.
    Rejected(ErrorCondition),
    /// The message was not and will not be processed; redelivery is allowed.
    Released,
    /// The message was modified by the receiver before being released.
    Modified {
        /// Whether the delivery counts as a failed attempt.
        delivery_failed: bool,
        /// Whether the message must not be redelivered to this receiver.
        undeliverable_here: bool,
        /// Annotations to merge into the message before redelivery.
        annotations: Option<BTreeMap<String, String>>,
    },
}

/// State of a delivery as carried on a disposition frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    /// A terminal outcome.
    Outcome(Outcome),
    /// An outcome wrapped with the transaction it belongs to.
    ///
    /// The transaction id is peer-provided and carried verbatim; `outcome`
    /// is absent while the transactional work is still provisional.
    Transactional {
        /// Identifier of the transaction the disposition belongs to.
        txn_id: Bytes,
        /// Inner outcome, once decided.
        outcome: Option<Outcome>,
    },
    /// Partial-transfer progress marker; not a terminal state.
    Received {
        /// Number of the last section received in full.
        section_number: u32,
        /// Byte offset within that section.
        section_offset: u64,
    },
}

impl DeliveryState {
    /// Wrap `outcome` in a transactional state when `txn_id` is present.
    #[must_use]
    pub fn for_transaction(txn_id: Option<Bytes>, outcome: Outcome) -> Self {
        match txn_id {
            Some(txn_id) => Self::Transactional {
                txn_id,
                outcome: Some(outcome),
            },
            None => Self::Outcome(outcome),
        }
    }

    /// Reduce the state to its terminal outcome, unwrapping a transactional
    /// wrapper.
    ///
    /// # Errors
    ///
    /// Returns the original state when it carries no outcome: a `Received`
    /// marker, or a transactional wrapper whose work is still provisional.
    pub fn into_outcome(self) -> Result<Outcome, DeliveryState> {
        match self {
            Self::Outcome(outcome)
            | Self::Transactional {
                outcome: Some(outcome),
                ..
            } => Ok(outcome),
            other => Err(other),
        }
    }

    /// Whether the state is a terminal outcome (directly or transactionally).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Outcome(_)
                | Self::Transactional {
                    outcome: Some(_),
                    ..
                }
        )
    }
}

impl From<Outcome> for DeliveryState {
    fn from(outcome: Outcome) -> Self { Self::Outcome(outcome) }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
