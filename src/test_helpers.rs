#![cfg(any(test, feature = "test-helpers"))]
//! Test-only helpers shared by unit and integration tests.

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use bytes::Bytes;

use crate::{
    endpoint::LinkEndpoint,
    error::ReceiverError,
    message::{DeliveryNumber, DeliveryTag, Message, TransferFrame},
    outcome::DeliveryState,
};

/// One call observed by [`RecordingEndpoint`].
#[derive(Clone, Debug, PartialEq)]
pub enum EndpointCall {
    /// `issue_credit` was invoked.
    IssueCredit {
        /// Absolute credit carried by the flow frame.
        credit: u32,
        /// Drain flag.
        drain: bool,
    },
    /// `send_flow` was invoked.
    SendFlow {
        /// Echo flag.
        echo: bool,
    },
    /// `set_total_link_credit` was invoked.
    SetTotalLinkCredit {
        /// New credit ceiling.
        credit: u32,
        /// Whether the base was asked to re-evaluate pending transfers.
        update_queue: bool,
        /// Auto-flow switch, when changed.
        set_auto_flow: Option<bool>,
    },
    /// `dispose_delivery` was invoked.
    DisposeDelivery {
        /// Tag the disposition targets.
        tag: DeliveryTag,
        /// Settled flag on the frame.
        settled: bool,
        /// Delivery state carried by the frame.
        state: DeliveryState,
        /// Batchable hint.
        batchable: bool,
    },
}

#[derive(Default)]
struct RecordingInner {
    calls: Mutex<Vec<EndpointCall>>,
    link_credit: AtomicU32,
    closing: AtomicBool,
    terminal: Mutex<Option<ReceiverError>>,
    unknown_tags: Mutex<BTreeSet<DeliveryTag>>,
}

/// A [`LinkEndpoint`] that records every call for assertions.
///
/// Credit-bearing calls update the fake link credit so on-demand
/// computations observe the value a real link base would report. Clones
/// share state, letting a test keep a handle after moving the endpoint
/// into the receiver.
#[derive(Clone, Default)]
pub struct RecordingEndpoint(Arc<RecordingInner>);

impl RecordingEndpoint {
    /// Create an endpoint with zero link credit.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EndpointCall> {
        self.0.calls.lock().expect("recording lock poisoned").clone()
    }

    /// Credits carried by `issue_credit` calls, in order.
    #[must_use]
    pub fn issued_credits(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EndpointCall::IssueCredit { credit, .. } => Some(credit),
                _ => None,
            })
            .collect()
    }

    /// Ceilings carried by `set_total_link_credit` calls, in order.
    #[must_use]
    pub fn total_credits(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EndpointCall::SetTotalLinkCredit { credit, .. } => Some(credit),
                _ => None,
            })
            .collect()
    }

    /// Dispositions observed so far, in order.
    #[must_use]
    pub fn dispositions(&self) -> Vec<(DeliveryTag, bool, DeliveryState)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EndpointCall::DisposeDelivery {
                    tag,
                    settled,
                    state,
                    ..
                } => Some((tag, settled, state)),
                _ => None,
            })
            .collect()
    }

    /// Pretend the link entered its closing phase.
    pub fn set_closing(&self, closing: bool) { self.0.closing.store(closing, Ordering::SeqCst); }

    /// Record a terminal error on the link.
    pub fn set_terminal(&self, error: ReceiverError) {
        *self.0.terminal.lock().expect("recording lock poisoned") = Some(error);
    }

    /// Make `dispose_delivery` report `tag` as unknown.
    pub fn mark_unknown_tag(&self, tag: DeliveryTag) {
        self.0
            .unknown_tags
            .lock()
            .expect("recording lock poisoned")
            .insert(tag);
    }
}

impl LinkEndpoint for RecordingEndpoint {
    fn issue_credit(&self, credit: u32, drain: bool, _txn_id: Option<Bytes>) {
        self.0.link_credit.store(credit, Ordering::SeqCst);
        self.0
            .calls
            .lock()
            .expect("recording lock poisoned")
            .push(EndpointCall::IssueCredit { credit, drain });
    }

    fn send_flow(&self, echo: bool) {
        self.0
            .calls
            .lock()
            .expect("recording lock poisoned")
            .push(EndpointCall::SendFlow { echo });
    }

    fn set_total_link_credit(&self, credit: u32, update_queue: bool, set_auto_flow: Option<bool>) {
        self.0.link_credit.store(credit, Ordering::SeqCst);
        self.0.calls.lock().expect("recording lock poisoned").push(
            EndpointCall::SetTotalLinkCredit {
                credit,
                update_queue,
                set_auto_flow,
            },
        );
    }

    fn dispose_delivery(
        &self,
        tag: &DeliveryTag,
        settled: bool,
        state: DeliveryState,
        batchable: bool,
    ) -> bool {
        let known = !self
            .0
            .unknown_tags
            .lock()
            .expect("recording lock poisoned")
            .contains(tag);
        self.0.calls.lock().expect("recording lock poisoned").push(
            EndpointCall::DisposeDelivery {
                tag: tag.clone(),
                settled,
                state,
                batchable,
            },
        );
        known
    }

    fn link_credit(&self) -> u32 { self.0.link_credit.load(Ordering::SeqCst) }

    fn is_closing(&self) -> bool { self.0.closing.load(Ordering::SeqCst) }

    fn terminal_error(&self) -> Option<ReceiverError> {
        self.0.terminal.lock().expect("recording lock poisoned").clone()
    }
}

/// Build a single-frame transfer.
#[must_use]
pub fn transfer(number: u64, tag: &[u8], payload: &[u8]) -> TransferFrame {
    transfer_part(number, tag, payload, false)
}

/// Build one frame of a multi-frame transfer.
#[must_use]
pub fn transfer_part(number: u64, tag: &[u8], payload: &[u8], more: bool) -> TransferFrame {
    TransferFrame {
        delivery_number: DeliveryNumber(number),
        delivery_tag: DeliveryTag::from(tag),
        payload: Bytes::copy_from_slice(payload),
        more,
        settled: false,
        batchable: false,
    }
}

/// Build a reassembled message of `size` zero bytes.
#[must_use]
pub fn message_of_size(number: u64, tag: &[u8], size: usize) -> Message {
    Message::new(
        DeliveryNumber(number),
        DeliveryTag::from(tag),
        vec![Bytes::from(vec![0u8; size])],
        false,
    )
}
