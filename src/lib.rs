#![doc(html_root_url = "https://docs.rs/linkflow/latest")]
//! Receive-side credit engine for an AMQP 1.0 link endpoint.
//!
//! This crate accepts decoded transfer frames, reassembles them into
//! messages, hands messages to waiting consumers or a registered listener,
//! tracks delivery-outcome (disposition) exchanges, and regulates link
//! credit — the flow-control grant that tells the sender how many messages
//! it may push.
//!
//! Credit runs in three regimes: automatic count-based prefetch, byte-budget
//! prefetch that converts a cache budget into message credit via a live
//! average message size, and on-demand credit issued only as receive calls
//! arrive. The frame codec, the transport, and the link/session base are
//! external collaborators reached through [`LinkEndpoint`].

mod assembler;
pub mod config;
mod disposition;
pub mod endpoint;
pub mod error;
mod flow_queue;
pub mod message;
pub mod outcome;
pub mod receiver;
mod waiter;

pub use config::{ReceiverConfig, SettleMode};
pub use endpoint::LinkEndpoint;
pub use error::ReceiverError;
pub use message::{Delivery, DeliveryNumber, DeliveryTag, Message, TransferFrame};
pub use outcome::{DeliveryState, ErrorCondition, Outcome};
pub use receiver::{MessageListener, ReceiverLink};
pub use waiter::ReceivedBatch;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
