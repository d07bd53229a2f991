//! The link/session surface the receive engine drives.
//!
//! `LinkEndpoint` abstracts the shared link base: flow-frame emission,
//! session-visible credit, and disposition frames. The engine computes
//! credit and outcomes under its own lock, then calls these methods with
//! the lock released, so implementations are free to take session locks or
//! perform I/O.

use bytes::Bytes;

use crate::{error::ReceiverError, message::DeliveryTag, outcome::DeliveryState};

/// Operations the receive engine requires from the link base.
///
/// The mutating methods (`issue_credit`, `send_flow`,
/// `set_total_link_credit`, `dispose_delivery`) are always invoked with the
/// engine's lock released and may block or re-enter the session. The
/// getters (`link_credit`, `is_closing`, `terminal_error`) may be called
/// under the engine's lock and must be non-blocking and must not call back
/// into the engine.
pub trait LinkEndpoint: Send + Sync + 'static {
    /// Emit a flow frame granting the sender `credit` messages.
    ///
    /// `credit` is an absolute, non-negative total, never a delta. `drain`
    /// asks the sender to exhaust the credit or advance its state to the
    /// limit; `txn_id` scopes the flow to a transaction.
    fn issue_credit(&self, credit: u32, drain: bool, txn_id: Option<Bytes>);

    /// Emit a flow frame carrying current link state; `echo` requests a
    /// reciprocal flow from the peer.
    fn send_flow(&self, echo: bool);

    /// Update the link's session-visible credit ceiling.
    ///
    /// `update_queue` asks the base to re-evaluate pending transfers
    /// against the new ceiling; `set_auto_flow` switches automatic
    /// replenishment on or off alongside the update.
    fn set_total_link_credit(&self, credit: u32, update_queue: bool, set_auto_flow: Option<bool>);

    /// Send a disposition frame for the delivery identified by `tag`.
    ///
    /// Returns `false` when no matching unsettled delivery exists on the
    /// link, in which case no frame was sent.
    fn dispose_delivery(
        &self,
        tag: &DeliveryTag,
        settled: bool,
        state: DeliveryState,
        batchable: bool,
    ) -> bool;

    /// Credit currently extended to the sender.
    fn link_credit(&self) -> u32;

    /// Whether the link has begun closing.
    fn is_closing(&self) -> bool;

    /// Terminal error recorded on the link, if it failed.
    fn terminal_error(&self) -> Option<ReceiverError>;
}
