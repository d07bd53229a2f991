//! Timed receive behaviour: batch-gather windows, overall deadlines, and
//! the remote-call minimum wait.

use std::time::Duration;

use linkflow::{
    ReceiverConfig, ReceiverError, ReceiverLink,
    test_helpers::{RecordingEndpoint, transfer},
};
use tokio::{task, time};

const WAIT: Duration = Duration::from_secs(10);

async fn wait_for_waiters(link: &ReceiverLink<RecordingEndpoint>, count: usize) {
    while link.pending_receiver_count() < count {
        task::yield_now().await;
    }
}

fn auto_link(endpoint: &RecordingEndpoint) -> ReceiverLink<RecordingEndpoint> {
    ReceiverLink::new(endpoint.clone(), ReceiverConfig::default().with_prefetch(100))
}

#[tokio::test]
async fn batch_window_completes_a_partial_gather() {
    time::pause();
    let endpoint = RecordingEndpoint::new();
    let link = auto_link(&endpoint);

    let pending = {
        let link = link.clone();
        tokio::spawn(async move {
            link.receive(10, Some(Duration::from_millis(200)), WAIT).await
        })
    };
    wait_for_waiters(&link, 1).await;

    for number in 0..3u64 {
        let tag = [b'g', number as u8];
        link.on_transfer(transfer(number, &tag, b"part"))
            .expect("transfer accepted");
    }

    // The 200 ms window after the first message is the earliest timer; the
    // paused clock advances straight to it.
    let batch = pending.await.expect("task").expect("gathered");
    assert_eq!(batch.len(), 3);
    assert!(batch.within_deadline(), "the window closed before the deadline");
}

#[tokio::test]
async fn overall_deadline_completes_empty() {
    time::pause();
    let endpoint = RecordingEndpoint::new();
    let link = auto_link(&endpoint);

    let started = time::Instant::now();
    let batch = link
        .receive(10, Some(Duration::from_millis(200)), Duration::from_secs(1))
        .await
        .expect("deadline completion");

    assert!(batch.is_empty());
    assert!(!batch.within_deadline());
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn overall_deadline_returns_a_partial_batch() {
    time::pause();
    let endpoint = RecordingEndpoint::new();
    let link = auto_link(&endpoint);

    let pending = {
        let link = link.clone();
        tokio::spawn(async move { link.receive(10, None, Duration::from_secs(1)).await })
    };
    wait_for_waiters(&link, 1).await;

    for number in 0..3u64 {
        let tag = [b'p', number as u8];
        link.on_transfer(transfer(number, &tag, b"part"))
            .expect("transfer accepted");
    }

    // No batch window was requested, so only the overall deadline can end
    // the gather; it reports the partial batch as late.
    let batch = pending.await.expect("task").expect("deadline completion");
    assert_eq!(batch.len(), 3);
    assert!(!batch.within_deadline());
}

#[tokio::test]
async fn remote_receive_raises_a_zero_timeout_to_the_minimum() {
    time::pause();
    let endpoint = RecordingEndpoint::new();
    let link = auto_link(&endpoint);

    let started = time::Instant::now();
    let batch = link
        .receive_remote(1, None, Duration::ZERO)
        .await
        .expect("service wait completes");

    assert!(batch.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(10), "zero means linger");
}

#[tokio::test]
async fn local_receive_keeps_zero_timeout_immediate() {
    let endpoint = RecordingEndpoint::new();
    let link = auto_link(&endpoint);

    let batch = link
        .receive(1, None, Duration::ZERO)
        .await
        .expect("immediate return");
    assert!(batch.is_empty());
    assert_eq!(link.pending_receiver_count(), 0);
}

#[tokio::test]
async fn satisfied_request_beats_both_timers() {
    time::pause();
    let endpoint = RecordingEndpoint::new();
    let link = auto_link(&endpoint);

    let pending = {
        let link = link.clone();
        tokio::spawn(async move {
            link.receive(2, Some(Duration::from_millis(200)), WAIT).await
        })
    };
    wait_for_waiters(&link, 1).await;

    link.on_transfer(transfer(1, b"s1", b"one")).expect("accepted");
    link.on_transfer(transfer(2, b"s2", b"two")).expect("accepted");

    let batch = pending.await.expect("task").expect("count satisfied");
    assert_eq!(batch.len(), 2);
    assert!(batch.within_deadline());
}

#[tokio::test]
async fn oversized_delivery_tears_down_only_open_links() {
    let endpoint = RecordingEndpoint::new();
    let link = ReceiverLink::new(
        endpoint.clone(),
        ReceiverConfig::default()
            .with_prefetch(10)
            .with_max_message_size(1024),
    );

    endpoint.set_closing(true);
    link.on_transfer(transfer(1, b"o1", &vec![0u8; 4096]))
        .expect("discarded while closing");

    endpoint.set_closing(false);
    let err = link
        .on_transfer(transfer(2, b"o2", &vec![0u8; 4096]))
        .expect_err("fatal on an open link");
    assert_eq!(
        err,
        ReceiverError::MessageSizeExceeded {
            attempted: 4096,
            limit: 1024,
        }
    );
}
