//! In-flight delivery-outcome updates keyed by delivery tag.
//!
//! When a caller asks for an awaitable disposition, the registry records a
//! pending entry for the tag, sends the disposition frame unsettled, and
//! resolves the entry when the peer reciprocates, the timeout elapses, or
//! the link tears down. Timeout and completion race by removing the entry
//! from the map; whichever removal wins decides the result.
//!
//! Tags are ordered byte-wise, so the map key order matches the wire
//! comparison of delivery tags.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use bytes::Bytes;
use log::debug;
use tokio::{sync::oneshot, time};

use crate::{
    endpoint::LinkEndpoint,
    error::ReceiverError,
    message::{Delivery, DeliveryTag},
    outcome::{DeliveryState, Outcome},
};

type DispositionResult = Result<Outcome, ReceiverError>;

struct PendingDisposition {
    tx: oneshot::Sender<DispositionResult>,
}

/// Registry of dispositions awaiting the peer's reciprocation.
#[derive(Clone, Default)]
pub(crate) struct DispositionRegistry {
    pending: Arc<Mutex<BTreeMap<DeliveryTag, PendingDisposition>>>,
}

impl DispositionRegistry {
    pub(crate) fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<DeliveryTag, PendingDisposition>> {
        self.pending.lock().expect("disposition registry lock poisoned")
    }

    /// Number of dispositions still awaiting the peer.
    pub(crate) fn pending_count(&self) -> usize { self.lock().len() }

    /// Send a disposition for `tag` and await the peer's answer.
    ///
    /// The frame is sent unsettled; `txn_id` wraps the outcome in a
    /// transactional state. At most one disposition may be outstanding per
    /// tag.
    ///
    /// # Errors
    ///
    /// `IllegalState` when a disposition for the tag is already pending,
    /// `NotFound` when the link has no matching unsettled delivery,
    /// `Timeout` when the peer does not reciprocate within `timeout`, and
    /// `Cancelled` when the registry is aborted by link teardown.
    pub(crate) async fn start<E: LinkEndpoint>(
        &self,
        endpoint: &E,
        tag: DeliveryTag,
        txn_id: Option<Bytes>,
        outcome: Outcome,
        batchable: bool,
        timeout: Duration,
    ) -> DispositionResult {
        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = self.lock();
            if pending.contains_key(&tag) {
                return Err(ReceiverError::IllegalState(format!(
                    "a disposition for tag {tag} is already pending"
                )));
            }
            pending.insert(tag.clone(), PendingDisposition { tx });
        }

        let state = DeliveryState::for_transaction(txn_id, outcome);
        if !endpoint.dispose_delivery(&tag, false, state, batchable) {
            self.lock().remove(&tag);
            return Err(ReceiverError::NotFound(tag));
        }

        match time::timeout(timeout, &mut rx).await {
            Ok(result) => result.unwrap_or_else(|_| Err(ReceiverError::cancelled(None))),
            Err(_elapsed) => {
                if self.lock().remove(&tag).is_some() {
                    debug!("disposition for tag {tag} timed out after {timeout:?}");
                    return Err(ReceiverError::Timeout);
                }
                // A completion removed the entry first; its result is ready.
                rx.await.unwrap_or_else(|_| Err(ReceiverError::cancelled(None)))
            }
        }
    }

    /// Resolve a pending disposition from a peer disposition frame.
    ///
    /// Transactional wrappers are unwrapped to their inner outcome; a state
    /// with no terminal outcome fails the waiter with `IllegalState`.
    /// Unknown tags and stateless dispositions are ignored.
    pub(crate) fn complete_peer(&self, delivery: &Delivery) {
        let Some(state) = delivery.state.clone() else {
            return;
        };
        let Some(entry) = self.lock().remove(&delivery.tag) else {
            return;
        };
        let result = match state.into_outcome() {
            Ok(outcome) => Ok(outcome),
            Err(other) => Err(ReceiverError::IllegalState(format!(
                "peer disposed tag {tag} with non-terminal state {other:?}",
                tag = delivery.tag,
            ))),
        };
        let _ = entry.tx.send(result);
    }

    /// Fail every pending disposition with a cancellation carrying the
    /// link's terminal error, when one is set.
    pub(crate) fn abort(&self, terminal: Option<ReceiverError>) {
        let drained = {
            let mut pending = self.lock();
            std::mem::take(&mut *pending)
        };
        if !drained.is_empty() {
            debug!("aborting {count} pending dispositions", count = drained.len());
        }
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(ReceiverError::cancelled(terminal.clone())));
        }
    }
}

#[cfg(test)]
#[path = "disposition_tests.rs"]
mod tests;
