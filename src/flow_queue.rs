//! Prefetch buffer with byte-budget credit derivation.
//!
//! `FlowQueue` buffers reassembled messages until a receiver drains them.
//! In count mode it is a plain FIFO and the link base replenishes credit on
//! its own. In size mode (a byte budget is configured) the queue converts
//! the remaining budget into a message-count credit using a live average
//! message size, with hysteresis: credit falls once buffered bytes pass 90 %
//! of the budget and rises again only after the queue drains below 50 %.
//! Inside the last 10 % a trickle credit of one message keeps the link from
//! stalling while the consumer catches up.
//!
//! The queue only ever *reports* credit changes; applying them to the link
//! is the coordinator's job, with its lock released.

use std::collections::VecDeque;

use log::debug;

use crate::message::Message;

/// Assumed message size until real messages teach us better.
pub(crate) const DEFAULT_AVG_MESSAGE_SIZE: u64 = 256 * 1024;

/// Upper bound on the credit carried by a single flow frame.
pub(crate) const MAX_CREDIT_PER_FLOW: u32 = 500;

/// FIFO buffer of prefetched messages with size-mode credit accounting.
#[derive(Debug)]
pub(crate) struct FlowQueue {
    messages: VecDeque<Message>,
    /// Byte budget; `Some` selects size mode.
    total_cache_bytes: Option<u64>,
    /// Remaining budget in bytes. May go briefly negative when a message
    /// larger than the remainder is accepted against in-flight credit.
    cache_size_credit: i64,
    /// Live average message size, never zero.
    avg_message_size: u64,
    /// Refill threshold: credit is recomputed upwards only once the
    /// remaining budget climbs back past half the total.
    low_watermark: i64,
    /// Overflow buffer: the last tenth of the budget, within which only a
    /// trickle credit of one is granted.
    high_overflow_buffer: i64,
    /// Current derived credit, `0..=MAX_CREDIT_PER_FLOW`.
    bounded_credit: u32,
}

impl FlowQueue {
    /// Create a queue; `total_cache_bytes` selects size mode when present.
    pub(crate) fn new(total_cache_bytes: Option<u64>) -> Self {
        let mut queue = Self {
            messages: VecDeque::new(),
            total_cache_bytes: None,
            cache_size_credit: 0,
            avg_message_size: DEFAULT_AVG_MESSAGE_SIZE,
            low_watermark: 0,
            high_overflow_buffer: 0,
            bounded_credit: 0,
        };
        queue.set_budget(total_cache_bytes);
        queue
    }

    /// Number of buffered messages.
    pub(crate) fn len(&self) -> usize { self.messages.len() }

    /// Whether the buffer is empty.
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool { self.messages.is_empty() }

    /// Whether credit is derived from the byte budget.
    pub(crate) fn is_size_mode(&self) -> bool { self.total_cache_bytes.is_some() }

    /// Current derived credit.
    pub(crate) fn bounded_credit(&self) -> u32 { self.bounded_credit }

    /// Remaining byte budget; meaningful only in size mode.
    #[cfg(test)]
    pub(crate) fn cache_size_credit(&self) -> i64 { self.cache_size_credit }

    /// Live average message size.
    #[cfg(test)]
    pub(crate) fn avg_message_size(&self) -> u64 { self.avg_message_size }

    /// Install or clear the byte budget, retaining buffered messages.
    ///
    /// The new remaining budget accounts for bytes already buffered, so a
    /// shrunken budget can start out negative and throttle immediately.
    pub(crate) fn set_budget(&mut self, total_cache_bytes: Option<u64>) {
        self.total_cache_bytes = total_cache_bytes;
        match total_cache_bytes {
            Some(total) => {
                let buffered: u64 = self.messages.iter().map(Message::serialized_size).sum();
                self.cache_size_credit = total as i64 - buffered as i64;
                self.low_watermark = (total / 2) as i64;
                self.high_overflow_buffer = (total / 10) as i64;
            }
            None => {
                self.cache_size_credit = 0;
                self.low_watermark = 0;
                self.high_overflow_buffer = 0;
                self.bounded_credit = 0;
            }
        }
    }

    /// Buffer a message handed up from the assembler.
    ///
    /// Returns `true` when the derived credit changed and the link's total
    /// credit should be updated.
    pub(crate) fn enqueue(&mut self, message: Message) -> bool {
        if !self.is_size_mode() {
            self.messages.push_back(message);
            return false;
        }

        let before = self.bounded_credit;
        self.cache_size_credit -= message.serialized_size() as i64;
        self.messages.push_back(message);

        if self.cache_size_credit > self.high_overflow_buffer {
            self.recompute(None);
        } else if self.cache_size_credit <= 0 {
            self.bounded_credit = 0;
        } else {
            // Inside the last tenth of the budget: trickle one at a time.
            self.bounded_credit = 1;
        }

        self.note_transition(before)
    }

    /// Hand the oldest buffered message to a receiver.
    ///
    /// The returned flag is `true` when the derived credit changed. Credit
    /// only recovers in bulk once the remaining budget climbs back past the
    /// low watermark; below it a single trickle credit is maintained.
    pub(crate) fn dequeue(&mut self) -> Option<(Message, bool)> {
        let message = self.messages.pop_front()?;
        if !self.is_size_mode() {
            return Some((message, false));
        }

        let before = self.bounded_credit;
        self.cache_size_credit += message.serialized_size() as i64;

        if self.cache_size_credit >= self.low_watermark {
            self.recompute(None);
        } else if self.cache_size_credit > 0 {
            self.bounded_credit = 1;
        }

        let changed = self.note_transition(before);
        Some((message, changed))
    }

    /// Drain up to `max` messages, reporting whether credit changed at all.
    pub(crate) fn drain(&mut self, max: usize) -> (Vec<Message>, bool) {
        let mut drained = Vec::new();
        let mut changed = false;
        while drained.len() < max {
            match self.dequeue() {
                Some((message, credit_changed)) => {
                    changed |= credit_changed;
                    drained.push(message);
                }
                None => break,
            }
        }
        (drained, changed)
    }

    /// Remove every buffered message without touching credit state.
    ///
    /// Used at teardown, when the link no longer issues credit.
    pub(crate) fn take_all(&mut self) -> Vec<Message> {
        self.messages.drain(..).collect()
    }

    /// Recompute the average message size and derived credit.
    ///
    /// `extra` accounts for a message that bypassed the queue (handed
    /// straight to a receiver) but should still teach the average.
    /// Returns `true` when the derived credit changed.
    pub(crate) fn update_credit(&mut self, extra: Option<&Message>) -> bool {
        if !self.is_size_mode() {
            return false;
        }
        let before = self.bounded_credit;
        self.recompute(extra);
        self.note_transition(before)
    }

    fn recompute(&mut self, extra: Option<&Message>) {
        let Some(total) = self.total_cache_bytes else {
            return;
        };

        let mut count = self.messages.len() as u64;
        let mut occupied = total as i64 - self.cache_size_credit;
        if let Some(message) = extra {
            count += 1;
            occupied += message.serialized_size() as i64;
        }
        if count > 0 && occupied > 0 {
            self.avg_message_size = (occupied as u64 / count).max(1);
        }

        self.bounded_credit = if self.cache_size_credit <= 0 {
            0
        } else {
            let quotient = self.cache_size_credit as u64 / self.avg_message_size;
            // A single message larger than the remaining budget truncates
            // the quotient to zero; keep one credit so the link cannot
            // deadlock with budget left and nothing requested.
            quotient.max(1).min(u64::from(MAX_CREDIT_PER_FLOW)) as u32
        };
    }

    fn note_transition(&self, before: u32) -> bool {
        let changed = before != self.bounded_credit;
        if changed {
            debug!(
                "flow credit {before} -> {now}: remaining budget {credit} bytes, avg message \
                 {avg} bytes, {queued} queued",
                now = self.bounded_credit,
                credit = self.cache_size_credit,
                avg = self.avg_message_size,
                queued = self.messages.len(),
            );
        }
        changed
    }
}

#[cfg(test)]
#[path = "flow_queue_tests.rs"]
mod tests;
