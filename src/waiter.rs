//! Pending receive requests and their completion state machine.
//!
//! Each call to `receive` that cannot be served from the buffer enrols a
//! [`ReceiveWaiter`]: a requested message count, an optional batch-gather
//! window, a gather list, and a oneshot completion channel. The
//! [`WaiterList`] keeps waiters in enrolment order; the coordinator feeds
//! arriving messages to the front waiter until it is satisfied.
//!
//! A waiter completes exactly once — satisfaction, batch-window expiry,
//! overall deadline, link close, or cancellation — because completion
//! consumes the waiter and its channel sender. The gather list is frozen
//! from that point by construction.

use std::{collections::VecDeque, time::Duration};

use log::debug;
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{error::ReceiverError, message::Message};

/// Messages handed to one receive call, plus whether they arrived before
/// the overall deadline.
#[derive(Debug)]
pub struct ReceivedBatch {
    messages: Vec<Message>,
    within_deadline: bool,
}

impl ReceivedBatch {
    pub(crate) fn new(messages: Vec<Message>, within_deadline: bool) -> Self {
        Self {
            messages,
            within_deadline,
        }
    }

    /// Borrow the received messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] { &self.messages }

    /// Consume the batch, returning its messages.
    #[must_use]
    pub fn into_messages(self) -> Vec<Message> { self.messages }

    /// Number of received messages.
    #[must_use]
    pub fn len(&self) -> usize { self.messages.len() }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.messages.is_empty() }

    /// `true` when the messages were gathered before the overall deadline;
    /// `false` when the deadline delivered a partial (possibly empty)
    /// batch or the link closed.
    #[must_use]
    pub fn within_deadline(&self) -> bool { self.within_deadline }
}

pub(crate) type WaiterResult = Result<ReceivedBatch, ReceiverError>;

/// Terminal state a waiter completed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaiterStatus {
    /// Completed with gathered messages (count satisfied, batch window
    /// elapsed, or graceful close).
    Signalled,
    /// The overall deadline elapsed.
    TimedOut,
    /// Link abort or explicit cancellation.
    Cancelled,
}

/// A completed waiter whose result has not yet been delivered.
///
/// Firing happens with the coordinator lock released so consumer code never
/// runs on the frame-ingress path.
#[derive(Debug)]
pub(crate) struct FinishedWaiter {
    tx: oneshot::Sender<WaiterResult>,
    result: WaiterResult,
}

impl FinishedWaiter {
    /// Deliver the result to the awaiting receive call.
    pub(crate) fn fire(self) {
        // The receive future may have been dropped; that is not an error.
        let _ = self.tx.send(self.result);
    }
}

/// One pending receive request.
#[derive(Debug)]
pub(crate) struct ReceiveWaiter {
    id: u64,
    requested: usize,
    batch_wait: Option<Duration>,
    gathered: Vec<Message>,
    tx: oneshot::Sender<WaiterResult>,
    timer: Option<JoinHandle<()>>,
}

impl ReceiveWaiter {
    pub(crate) fn new(
        id: u64,
        requested: usize,
        batch_wait: Option<Duration>,
        tx: oneshot::Sender<WaiterResult>,
    ) -> Self {
        Self {
            id,
            requested,
            batch_wait,
            gathered: Vec::new(),
            tx,
            timer: None,
        }
    }

    pub(crate) fn id(&self) -> u64 { self.id }

    pub(crate) fn requested(&self) -> usize { self.requested }

    pub(crate) fn batch_wait(&self) -> Option<Duration> { self.batch_wait }

    pub(crate) fn gathered_len(&self) -> usize { self.gathered.len() }

    /// Append an arrived message to the gather list.
    pub(crate) fn push(&mut self, message: Message) { self.gathered.push(message); }

    /// Whether the waiter has gathered everything it asked for.
    pub(crate) fn is_satisfied(&self) -> bool { self.gathered.len() >= self.requested }

    /// Replace the waiter's timer, cancelling the previous arm.
    pub(crate) fn replace_timer(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.timer.replace(handle) {
            previous.abort();
        }
    }

    /// Take the gathered messages, leaving the waiter to complete empty.
    ///
    /// Used at graceful close, where partially gathered messages are
    /// released back to the peer rather than handed to the receiver.
    pub(crate) fn take_gathered(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.gathered)
    }

    /// Complete the waiter with its gathered messages.
    pub(crate) fn finish(mut self, status: WaiterStatus, within_deadline: bool) -> FinishedWaiter {
        debug_assert_ne!(status, WaiterStatus::Cancelled, "use cancel() for cancellation");
        self.stop_timer();
        debug!(
            "waiter {id} finished {status:?}: {gathered}/{requested} messages, within \
             deadline: {within_deadline}",
            id = self.id,
            gathered = self.gathered.len(),
            requested = self.requested,
        );
        FinishedWaiter {
            tx: self.tx,
            result: Ok(ReceivedBatch::new(self.gathered, within_deadline)),
        }
    }

    /// Complete the waiter with a cancellation error carrying the link's
    /// terminal error, when one is set.
    pub(crate) fn cancel(mut self, terminal: Option<ReceiverError>) -> FinishedWaiter {
        self.stop_timer();
        debug!(
            "waiter {id} finished {status:?} with {gathered} gathered",
            id = self.id,
            status = WaiterStatus::Cancelled,
            gathered = self.gathered.len(),
        );
        FinishedWaiter {
            tx: self.tx,
            result: Err(ReceiverError::cancelled(terminal)),
        }
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// FIFO list of pending receive requests.
#[derive(Debug, Default)]
pub(crate) struct WaiterList {
    waiters: VecDeque<ReceiveWaiter>,
}

impl WaiterList {
    pub(crate) fn len(&self) -> usize { self.waiters.len() }

    pub(crate) fn is_empty(&self) -> bool { self.waiters.is_empty() }

    /// Sum of requested counts across enrolled waiters.
    pub(crate) fn total_requested(&self) -> u64 {
        self.waiters.iter().map(|w| w.requested as u64).sum()
    }

    /// Append a waiter in enrolment order.
    pub(crate) fn enrol(&mut self, waiter: ReceiveWaiter) { self.waiters.push_back(waiter); }

    /// Borrow the waiter next in line for arriving messages.
    pub(crate) fn front_mut(&mut self) -> Option<&mut ReceiveWaiter> { self.waiters.front_mut() }

    /// Remove the front waiter.
    pub(crate) fn pop_front(&mut self) -> Option<ReceiveWaiter> { self.waiters.pop_front() }

    /// Remove a waiter by id, wherever it sits in the list.
    pub(crate) fn remove(&mut self, id: u64) -> Option<ReceiveWaiter> {
        let index = self.waiters.iter().position(|w| w.id() == id)?;
        self.waiters.remove(index)
    }

    /// Borrow a waiter by id.
    pub(crate) fn get_mut(&mut self, id: u64) -> Option<&mut ReceiveWaiter> {
        self.waiters.iter_mut().find(|w| w.id() == id)
    }

    /// Remove every waiter, preserving enrolment order.
    pub(crate) fn drain_all(&mut self) -> Vec<ReceiveWaiter> {
        self.waiters.drain(..).collect()
    }
}

#[cfg(test)]
#[path = "waiter_tests.rs"]
mod tests;
