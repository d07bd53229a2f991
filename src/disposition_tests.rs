//! Unit tests for the disposition registry.

use std::time::Duration;

use bytes::Bytes;
use tokio::{task, time};

use super::DispositionRegistry;
use crate::{
    error::ReceiverError,
    message::{Delivery, DeliveryNumber, DeliveryTag},
    outcome::{DeliveryState, Outcome},
    test_helpers::RecordingEndpoint,
};

fn tag(bytes: &[u8]) -> DeliveryTag { DeliveryTag::from(bytes) }

fn peer_disposition(tag: &DeliveryTag, state: Option<DeliveryState>) -> Delivery {
    Delivery {
        tag: tag.clone(),
        number: DeliveryNumber(1),
        settled: false,
        state,
    }
}

async fn wait_for_frame(endpoint: &RecordingEndpoint) {
    while endpoint.calls().is_empty() {
        task::yield_now().await;
    }
}

#[tokio::test]
async fn peer_outcome_completes_the_disposition() {
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();
    let tag = tag(b"d1");

    let pending = {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        let tag = tag.clone();
        tokio::spawn(async move {
            registry
                .start(&endpoint, tag, None, Outcome::Accepted, false, Duration::from_secs(5))
                .await
        })
    };

    wait_for_frame(&endpoint).await;
    assert_eq!(registry.pending_count(), 1);

    registry.complete_peer(&peer_disposition(
        &tag,
        Some(DeliveryState::Outcome(Outcome::Accepted)),
    ));

    let outcome = pending.await.expect("task").expect("disposition succeeded");
    assert_eq!(outcome, Outcome::Accepted);
    assert_eq!(registry.pending_count(), 0);

    let (_, settled, state) = endpoint.dispositions().remove(0);
    assert!(!settled, "awaitable dispositions go out unsettled");
    assert_eq!(state, DeliveryState::Outcome(Outcome::Accepted));
}

#[tokio::test]
async fn transactional_reply_unwraps_to_the_inner_outcome() {
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();
    let tag = tag(b"d2");
    let txn = Bytes::from_static(b"txn-9");

    let pending = {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        let tag = tag.clone();
        let txn = txn.clone();
        tokio::spawn(async move {
            registry
                .start(
                    &endpoint,
                    tag,
                    Some(txn),
                    Outcome::Released,
                    true,
                    Duration::from_secs(5),
                )
                .await
        })
    };

    wait_for_frame(&endpoint).await;
    // The outgoing frame carries the transaction id verbatim.
    let (_, _, outgoing) = endpoint.dispositions().remove(0);
    assert_eq!(
        outgoing,
        DeliveryState::Transactional {
            txn_id: txn.clone(),
            outcome: Some(Outcome::Released),
        }
    );

    registry.complete_peer(&peer_disposition(
        &tag,
        Some(DeliveryState::Transactional {
            txn_id: txn,
            outcome: Some(Outcome::Accepted),
        }),
    ));

    let outcome = pending.await.expect("task").expect("disposition succeeded");
    assert_eq!(outcome, Outcome::Accepted);
}

#[tokio::test]
async fn second_disposition_for_the_same_tag_is_rejected() {
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();
    let tag = tag(b"d3");

    let first = {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        let tag = tag.clone();
        tokio::spawn(async move {
            registry
                .start(&endpoint, tag, None, Outcome::Accepted, false, Duration::from_secs(5))
                .await
        })
    };
    wait_for_frame(&endpoint).await;

    let duplicate = registry
        .start(
            &endpoint,
            tag.clone(),
            None,
            Outcome::Released,
            false,
            Duration::from_secs(5),
        )
        .await;
    assert!(matches!(duplicate, Err(ReceiverError::IllegalState(_))));

    registry.complete_peer(&peer_disposition(
        &tag,
        Some(DeliveryState::Outcome(Outcome::Accepted)),
    ));
    first.await.expect("task").expect("first disposition unaffected");
}

#[tokio::test]
async fn unknown_tag_fails_fast() {
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();
    let tag = tag(b"missing");
    endpoint.mark_unknown_tag(tag.clone());

    let result = registry
        .start(&endpoint, tag.clone(), None, Outcome::Accepted, false, Duration::from_secs(5))
        .await;

    assert_eq!(result, Err(ReceiverError::NotFound(tag)));
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test]
async fn unanswered_disposition_times_out() {
    time::pause();
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();
    let tag = tag(b"d4");

    let pending = {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        let tag = tag.clone();
        tokio::spawn(async move {
            registry
                .start(&endpoint, tag, None, Outcome::Accepted, false, Duration::from_secs(1))
                .await
        })
    };
    wait_for_frame(&endpoint).await;

    time::advance(Duration::from_secs(2)).await;

    let result = pending.await.expect("task");
    assert_eq!(result, Err(ReceiverError::Timeout));
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test]
async fn non_terminal_peer_state_is_an_illegal_state() {
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();
    let tag = tag(b"d5");

    let pending = {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        let tag = tag.clone();
        tokio::spawn(async move {
            registry
                .start(&endpoint, tag, None, Outcome::Accepted, false, Duration::from_secs(5))
                .await
        })
    };
    wait_for_frame(&endpoint).await;

    registry.complete_peer(&peer_disposition(
        &tag,
        Some(DeliveryState::Received {
            section_number: 0,
            section_offset: 64,
        }),
    ));

    let result = pending.await.expect("task");
    assert!(matches!(result, Err(ReceiverError::IllegalState(_))));
}

#[tokio::test]
async fn stateless_peer_disposition_leaves_the_entry_pending() {
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();
    let tag = tag(b"d6");

    let pending = {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        let tag = tag.clone();
        tokio::spawn(async move {
            registry
                .start(&endpoint, tag, None, Outcome::Accepted, false, Duration::from_secs(5))
                .await
        })
    };
    wait_for_frame(&endpoint).await;

    registry.complete_peer(&peer_disposition(&tag, None));
    assert_eq!(registry.pending_count(), 1, "no state, no completion");

    registry.complete_peer(&peer_disposition(
        &tag,
        Some(DeliveryState::Outcome(Outcome::Accepted)),
    ));
    pending.await.expect("task").expect("completed by the second frame");
}

#[tokio::test]
async fn abort_cancels_every_pending_disposition() {
    let registry = DispositionRegistry::new();
    let endpoint = RecordingEndpoint::new();

    let mut handles = Vec::new();
    for name in [&b"a1"[..], &b"a2"[..]] {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        let tag = tag(name);
        handles.push(tokio::spawn(async move {
            registry
                .start(&endpoint, tag, None, Outcome::Accepted, false, Duration::from_secs(5))
                .await
        }));
    }
    while registry.pending_count() < 2 {
        task::yield_now().await;
    }

    let terminal = ReceiverError::Detached {
        condition: "amqp:link:detach-forced".into(),
        description: None,
    };
    registry.abort(Some(terminal.clone()));

    for handle in handles {
        let result = handle.await.expect("task");
        assert_eq!(result, Err(ReceiverError::cancelled(Some(terminal.clone()))));
    }
    assert_eq!(registry.pending_count(), 0);
}
