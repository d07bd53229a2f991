//! Delivery-level data model for the receive path.
//!
//! A [`TransferFrame`] is what the frame decoder hands to the engine: one
//! transfer performative with its payload slice. The assembler stitches one
//! or more frames into a [`Message`], which owns shared references to the
//! frames' backing buffers rather than copies of them. [`Delivery`] carries
//! the peer-reported unsettled state back into the disposition path.

use std::fmt;

use bytes::{Bytes, BytesMut};

/// Opaque byte-string identifying an unsettled delivery uniquely on a link.
///
/// Tags are compared byte-wise; the derived `Ord` gives the lexicographic
/// order the disposition registry keys on. Tags are echoed verbatim on the
/// wire, so the newtype never normalises or truncates its contents.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(Bytes);

impl DeliveryTag {
    /// Wrap raw tag bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    /// Borrow the raw tag bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl From<&[u8]> for DeliveryTag {
    fn from(bytes: &[u8]) -> Self { Self(Bytes::copy_from_slice(bytes)) }
}

impl fmt::Debug for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeliveryTag({self})")
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Delivery number (RFC `delivery-id`) assigned by the frame decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryNumber(pub u64);

impl From<u64> for DeliveryNumber {
    fn from(value: u64) -> Self { Self(value) }
}

impl fmt::Display for DeliveryNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// One decoded transfer performative plus its payload slice.
///
/// `payload` is a view into the transport's receive buffer; attaching it to
/// a message clones the handle, so the buffer stays alive for as long as
/// either the frame path or the message needs it.
#[derive(Clone, Debug)]
pub struct TransferFrame {
    /// Delivery number assigned by the frame decoder.
    pub delivery_number: DeliveryNumber,
    /// Delivery tag carried by the transfer.
    pub delivery_tag: DeliveryTag,
    /// Payload bytes for this frame.
    pub payload: Bytes,
    /// `true` while further frames of the same delivery are expected.
    pub more: bool,
    /// Whether the sender pre-settled the delivery.
    pub settled: bool,
    /// Hint that the delivery's disposition may be coalesced with others.
    pub batchable: bool,
}

/// A fully reassembled inbound message.
///
/// The payload is held as the sequence of frame slices it arrived in; each
/// segment shares its backing buffer with the transport until dropped.
/// `serialized_size` is stable once assembly completes and is the quantity
/// the byte-budget credit mode accounts with.
#[derive(Clone, Debug)]
pub struct Message {
    delivery_number: DeliveryNumber,
    delivery_tag: DeliveryTag,
    segments: Vec<Bytes>,
    serialized_size: u64,
    batchable: bool,
}

impl Message {
    /// Assemble a message from its frame segments.
    #[must_use]
    pub fn new(
        delivery_number: DeliveryNumber,
        delivery_tag: DeliveryTag,
        segments: Vec<Bytes>,
        batchable: bool,
    ) -> Self {
        let serialized_size = segments.iter().map(|s| s.len() as u64).sum();
        Self {
            delivery_number,
            delivery_tag,
            segments,
            serialized_size,
            batchable,
        }
    }

    /// Delivery number assigned by the frame decoder.
    #[must_use]
    pub fn delivery_number(&self) -> DeliveryNumber { self.delivery_number }

    /// Delivery tag identifying this message among unsettled deliveries.
    #[must_use]
    pub fn delivery_tag(&self) -> &DeliveryTag { &self.delivery_tag }

    /// Serialized size of the message in bytes.
    #[must_use]
    pub fn serialized_size(&self) -> u64 { self.serialized_size }

    /// Whether dispositions for this message may be coalesced.
    #[must_use]
    pub fn batchable(&self) -> bool { self.batchable }

    /// Mark the message's dispositions as batchable or not.
    pub fn set_batchable(&mut self, batchable: bool) { self.batchable = batchable; }

    /// Borrow the payload segments in arrival order.
    #[must_use]
    pub fn segments(&self) -> &[Bytes] { &self.segments }

    /// Append a payload segment, sharing the frame's backing buffer.
    pub(crate) fn attach_segment(&mut self, segment: Bytes) {
        self.serialized_size += segment.len() as u64;
        self.segments.push(segment);
    }

    /// Consume the message, returning a single contiguous payload.
    ///
    /// A single-frame message hands back its original buffer slice without
    /// copying; multi-frame payloads are coalesced.
    #[must_use]
    pub fn into_payload(mut self) -> Bytes {
        if self.segments.len() == 1 {
            return self.segments.pop().unwrap_or_default();
        }
        let mut joined = BytesMut::with_capacity(self.serialized_size as usize);
        for segment in &self.segments {
            joined.extend_from_slice(segment);
        }
        joined.freeze()
    }
}

/// Peer-reported state of one unsettled delivery, as carried by an inbound
/// disposition frame.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Tag of the delivery the disposition refers to.
    pub tag: DeliveryTag,
    /// Delivery number of the delivery.
    pub number: DeliveryNumber,
    /// Whether the peer settled the delivery.
    pub settled: bool,
    /// Delivery state reported by the peer, if any.
    pub state: Option<crate::outcome::DeliveryState>,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
