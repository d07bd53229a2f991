//! Reassembly of multi-frame transfers into messages.
//!
//! A delivery may span several transfer frames; all frames of one delivery
//! arrive back to back on the link. `TransferAssembler` therefore tracks at
//! most one in-progress delivery, appending each frame's payload as a
//! shared slice of the transport buffer and enforcing the maximum message
//! size cumulatively. When a frame arrives with `more` unset, the delivery
//! is complete and handed up as a [`Message`].

use log::warn;

use crate::{
    error::ReceiverError,
    message::{Message, TransferFrame},
};

/// Stitches consecutive transfer frames into one message at a time.
#[derive(Debug, Default)]
pub(crate) struct TransferAssembler {
    current: Option<PartialDelivery>,
    max_message_size: Option<u64>,
}

#[derive(Debug)]
struct PartialDelivery {
    message: Message,
}

impl PartialDelivery {
    fn begin(frame: &TransferFrame) -> Self {
        Self {
            message: Message::new(
                frame.delivery_number,
                frame.delivery_tag.clone(),
                Vec::new(),
                frame.batchable,
            ),
        }
    }

    fn attach(&mut self, frame: TransferFrame) { self.message.attach_segment(frame.payload); }

    fn received_bytes(&self) -> u64 { self.message.serialized_size() }
}

impl TransferAssembler {
    pub(crate) fn new(max_message_size: Option<u64>) -> Self {
        Self {
            current: None,
            max_message_size,
        }
    }

    /// Negotiated maximum message size, when limited.
    pub(crate) fn max_message_size(&self) -> Option<u64> { self.max_message_size }

    /// Adopt a (re)negotiated maximum message size.
    pub(crate) fn set_max_message_size(&mut self, limit: Option<u64>) {
        self.max_message_size = limit;
    }

    /// Whether a delivery is partially assembled.
    #[cfg(test)]
    pub(crate) fn in_progress(&self) -> bool { self.current.is_some() }

    /// Drop any partially assembled delivery.
    pub(crate) fn clear(&mut self) { self.current = None; }

    /// Feed one transfer frame.
    ///
    /// Returns `Ok(Some(message))` when the frame completes a delivery and
    /// `Ok(None)` while more frames are expected. An oversized delivery is
    /// fatal unless the link is already `closing`, in which case the frame
    /// and the partial delivery are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiverError::MessageSizeExceeded`] when the cumulative
    /// delivery size passes the configured limit on an open link.
    pub(crate) fn on_transfer(
        &mut self,
        frame: TransferFrame,
        closing: bool,
    ) -> Result<Option<Message>, ReceiverError> {
        if let Some(limit) = self.max_message_size {
            let received = self.current.as_ref().map_or(0, PartialDelivery::received_bytes);
            let attempted = received.saturating_add(frame.payload.len() as u64);
            if attempted > limit {
                self.current = None;
                if closing {
                    warn!(
                        "discarding {attempted}-byte delivery {number} on closing link \
                         (limit {limit})",
                        number = frame.delivery_number,
                    );
                    return Ok(None);
                }
                return Err(ReceiverError::MessageSizeExceeded { attempted, limit });
            }
        }

        let mut partial = match self.current.take() {
            Some(partial) => partial,
            None => PartialDelivery::begin(&frame),
        };
        let more = frame.more;
        partial.attach(frame);

        if more {
            self.current = Some(partial);
            Ok(None)
        } else {
            Ok(Some(partial.message))
        }
    }
}

#[cfg(test)]
#[path = "assembler_tests.rs"]
mod tests;
