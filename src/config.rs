//! Receiver-side link settings.
//!
//! `ReceiverConfig` mirrors the knobs the link base negotiates at attach
//! time: settlement mode, automatic flow, the prefetch credit ceiling, the
//! optional byte budget that switches credit into size mode, and the
//! maximum message size this endpoint accepts.

/// When deliveries are settled relative to their disposition exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SettleMode {
    /// The sender settles before the message is delivered.
    SettleOnSend,
    /// The receiver settles as soon as the message is received.
    SettleOnReceive,
    /// The receiver settles only once the application disposes the message.
    #[default]
    SettleOnDispose,
}

/// Configuration for a receiving link endpoint.
#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    /// Whether the link base replenishes credit automatically as messages
    /// are consumed. When `false`, credit is issued on demand as receivers
    /// arrive.
    pub auto_send_flow: bool,
    /// Settlement mode negotiated for the link.
    pub settle_mode: SettleMode,
    /// Message-count credit ceiling used when prefetching by count.
    pub total_link_credit: u32,
    /// Byte budget for prefetched messages. `Some` switches credit
    /// computation into size mode.
    pub total_cache_bytes: Option<u64>,
    /// Maximum message size this endpoint accepts, when limited.
    pub max_message_size: Option<u64>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            auto_send_flow: true,
            settle_mode: SettleMode::default(),
            total_link_credit: 0,
            total_cache_bytes: None,
            max_message_size: None,
        }
    }
}

impl ReceiverConfig {
    /// Prefetch up to `credit` messages by count with automatic flow.
    #[must_use]
    pub fn with_prefetch(mut self, credit: u32) -> Self {
        self.auto_send_flow = true;
        self.total_link_credit = credit;
        self
    }

    /// Prefetch against a byte budget instead of a message count.
    #[must_use]
    pub fn with_cache_bytes(mut self, bytes: u64) -> Self {
        self.total_cache_bytes = Some(bytes);
        self
    }

    /// Disable prefetching; credit is issued only as receivers arrive.
    #[must_use]
    pub fn with_on_demand_credit(mut self) -> Self {
        self.auto_send_flow = false;
        self.total_link_credit = 0;
        self
    }

    /// Set the settlement mode.
    #[must_use]
    pub fn with_settle_mode(mut self, mode: SettleMode) -> Self {
        self.settle_mode = mode;
        self
    }

    /// Limit the maximum accepted message size.
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: u64) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    /// Whether messages should be settled as part of disposing them.
    ///
    /// Under [`SettleMode::SettleOnDispose`] the disposition is sent
    /// unsettled and the delivery settles once the peer reciprocates; under
    /// the other modes the disposition itself settles the delivery.
    #[must_use]
    pub fn settled_on_dispose(&self) -> bool { self.settle_mode != SettleMode::SettleOnDispose }
}
