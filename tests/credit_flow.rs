//! End-to-end credit scenarios: byte-budget prefetch and on-demand flow.

use std::time::Duration;

use linkflow::{
    ReceiverConfig, ReceiverLink,
    test_helpers::{RecordingEndpoint, transfer},
};
use tokio::{task, time};

const KIB: usize = 1024;
const MIB: u64 = 1024 * 1024;
const WAIT: Duration = Duration::from_secs(60);

async fn wait_for_waiters(link: &ReceiverLink<RecordingEndpoint>, count: usize) {
    while link.pending_receiver_count() < count {
        task::yield_now().await;
    }
}

#[tokio::test]
async fn byte_budget_fills_then_reissues_on_drain() {
    let endpoint = RecordingEndpoint::new();
    let link = ReceiverLink::new(
        endpoint.clone(),
        ReceiverConfig::default().with_cache_bytes(MIB),
    );

    // Four 256 KiB messages consume the whole budget.
    for number in 0..4u64 {
        let tag = [b't', number as u8];
        link.on_transfer(transfer(number, &tag, &vec![0u8; 256 * KIB]))
            .expect("transfer accepted");
    }
    assert_eq!(link.buffered_message_count(), 4);

    // Credit walked down from the initial grant to a full stop.
    assert_eq!(endpoint.total_credits(), [4, 3, 2, 1, 0]);

    // First drain leaves the queue above half occupancy: trickle credit.
    let batch = link.receive(1, None, WAIT).await.expect("first drain");
    assert_eq!(batch.len(), 1);
    assert_eq!(endpoint.total_credits().last(), Some(&1));

    // Second drain crosses the low watermark: credit recomputes in bulk.
    let batch = link.receive(1, None, WAIT).await.expect("second drain");
    assert_eq!(batch.len(), 1);
    assert_eq!(endpoint.total_credits(), [4, 3, 2, 1, 0, 1, 2]);
}

#[tokio::test]
async fn single_message_receivers_batch_their_credit_requests() {
    time::pause();
    let endpoint = RecordingEndpoint::new();
    let link = ReceiverLink::new(
        endpoint.clone(),
        ReceiverConfig::default().with_on_demand_credit(),
    );

    let mut pending = Vec::new();
    for expected_waiters in 1..=25usize {
        let handle = {
            let link = link.clone();
            tokio::spawn(async move { link.receive(1, None, WAIT).await })
        };
        pending.push(handle);
        wait_for_waiters(&link, expected_waiters).await;
    }

    // The first twenty receivers each bump the grant; past the batch
    // threshold the issue is held until demand reaches the next boundary.
    let expected: Vec<u32> = (1..=20).collect();
    assert_eq!(endpoint.issued_credits(), expected);

    link.close();
    for handle in pending {
        let batch = handle.await.expect("task").expect("close completes empty");
        assert!(batch.is_empty());
        assert!(!batch.within_deadline());
    }
}

#[tokio::test]
async fn bulk_receiver_gets_the_aggregate_grant_up_front() {
    let endpoint = RecordingEndpoint::new();
    let link = ReceiverLink::new(
        endpoint.clone(),
        ReceiverConfig::default().with_on_demand_credit(),
    );

    let pending = {
        let link = link.clone();
        tokio::spawn(async move { link.receive(50, None, WAIT).await })
    };
    wait_for_waiters(&link, 1).await;

    assert_eq!(endpoint.issued_credits(), [50]);

    for number in 0..50u64 {
        let tag = [b'b', number as u8];
        link.on_transfer(transfer(number, &tag, b"unit"))
            .expect("transfer accepted");
    }

    let batch = pending.await.expect("task").expect("gathered");
    assert_eq!(batch.len(), 50);
    assert!(batch.within_deadline());
    assert_eq!(link.pending_receiver_count(), 0);
}

#[tokio::test]
async fn bypassing_deliveries_still_update_size_credit() {
    let endpoint = RecordingEndpoint::new();
    let link = ReceiverLink::new(
        endpoint.clone(),
        ReceiverConfig::default().with_cache_bytes(MIB),
    );

    let pending = {
        let link = link.clone();
        tokio::spawn(async move { link.receive(1, None, WAIT).await })
    };
    wait_for_waiters(&link, 1).await;

    // A 512 KiB delivery handed straight to the waiter halves the derived
    // credit: the live average doubles without consuming any budget.
    link.on_transfer(transfer(1, b"w1", &vec![0u8; 512 * KIB]))
        .expect("transfer accepted");

    let batch = pending.await.expect("task").expect("received");
    assert_eq!(batch.len(), 1);
    assert_eq!(endpoint.total_credits(), [4, 2]);
}
