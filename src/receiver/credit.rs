//! On-demand credit computation for non-prefetching receivers.
//!
//! When automatic flow is off, credit is extended only as receive calls
//! arrive. Issuing a flow frame per receiver would storm the wire under
//! bursts, so demand is batched: once current credit is non-zero and the
//! outstanding demand is short of a batch boundary, the issue is held and
//! more receivers are allowed to accumulate against the already-granted
//! credit.

/// Ceiling on credit granted to cover single-message receivers.
pub(crate) const MAX_ON_DEMAND_CREDIT: u32 = 200;

/// Batch granularity for the single-message regime.
pub(crate) const SINGLE_MESSAGE_BATCH: u32 = 20;

/// Batch granularity (in pending receivers) for the mixed regime.
pub(crate) const PENDING_WAITER_BATCH: u32 = 20;

/// Compute the credit to issue for the current demand.
///
/// `current` is the credit already extended to the sender, `waiters` the
/// number of pending receivers, and `requested_total` the sum of their
/// requested message counts. Returns the *absolute* total credit to issue,
/// or `None` to hold the flow frame and let demand accumulate. The result
/// is never below `current`.
pub(crate) fn on_demand_credit(current: u32, waiters: u32, requested_total: u64) -> Option<u32> {
    if waiters == 0 {
        return None;
    }

    if u64::from(waiters) == requested_total {
        // Every receiver wants exactly one message: grow credit towards the
        // waiter count, capped, and only at batch boundaries once primed.
        if waiters > current && current < MAX_ON_DEMAND_CREDIT {
            let need = waiters.min(MAX_ON_DEMAND_CREDIT) - current;
            if waiters <= SINGLE_MESSAGE_BATCH || current == 0 || need % SINGLE_MESSAGE_BATCH == 0
            {
                return Some(current + need);
            }
        }
        return None;
    }

    // Mixed demand: cover the aggregate request, batching on the number of
    // pending receivers rather than the message count.
    if requested_total > u64::from(current) {
        let need = requested_total - u64::from(current);
        if waiters <= PENDING_WAITER_BATCH || current == 0 || waiters % PENDING_WAITER_BATCH == 0 {
            let total = u64::from(current).saturating_add(need);
            return Some(total.min(u64::from(u32::MAX)) as u32);
        }
    }
    None
}

#[cfg(test)]
#[path = "credit_tests.rs"]
mod tests;
