//! Unit tests for the waiter list and completion state machine.

use tokio::sync::oneshot;

use super::{ReceiveWaiter, WaiterList, WaiterStatus};
use crate::{error::ReceiverError, test_helpers::message_of_size, waiter::WaiterResult};

fn waiter(id: u64, requested: usize) -> (ReceiveWaiter, oneshot::Receiver<WaiterResult>) {
    let (tx, rx) = oneshot::channel();
    (ReceiveWaiter::new(id, requested, None, tx), rx)
}

#[test]
fn list_preserves_enrolment_order() {
    let mut list = WaiterList::default();
    for id in 0..3 {
        let (w, _rx) = waiter(id, 1);
        list.enrol(w);
    }

    assert_eq!(list.len(), 3);
    assert_eq!(list.pop_front().map(|w| w.id()), Some(0));
    assert_eq!(list.pop_front().map(|w| w.id()), Some(1));
    assert_eq!(list.pop_front().map(|w| w.id()), Some(2));
    assert!(list.is_empty());
}

#[test]
fn total_requested_sums_all_waiters() {
    let mut list = WaiterList::default();
    let (a, _rx_a) = waiter(1, 1);
    let (b, _rx_b) = waiter(2, 50);
    list.enrol(a);
    list.enrol(b);
    assert_eq!(list.total_requested(), 51);
}

#[test]
fn remove_by_id_reaches_the_middle_of_the_list() {
    let mut list = WaiterList::default();
    for id in 0..3 {
        let (w, _rx) = waiter(id, 1);
        list.enrol(w);
    }

    let removed = list.remove(1).expect("waiter 1 enrolled");
    assert_eq!(removed.id(), 1);
    assert_eq!(list.len(), 2);
    assert!(list.remove(1).is_none());
}

#[test]
fn satisfaction_tracks_the_requested_count() {
    let (mut w, _rx) = waiter(1, 2);
    assert!(!w.is_satisfied());

    w.push(message_of_size(1, b"a", 16));
    assert!(!w.is_satisfied());
    assert_eq!(w.gathered_len(), 1);

    w.push(message_of_size(2, b"b", 16));
    assert!(w.is_satisfied());
}

#[test]
fn finish_delivers_the_gathered_messages() {
    let (mut w, mut rx) = waiter(1, 2);
    w.push(message_of_size(1, b"a", 16));
    w.push(message_of_size(2, b"b", 16));

    w.finish(WaiterStatus::Signalled, true).fire();

    let batch = rx
        .try_recv()
        .expect("completion delivered")
        .expect("successful batch");
    assert_eq!(batch.len(), 2);
    assert!(batch.within_deadline());
}

#[test]
fn deadline_completion_reports_a_partial_batch() {
    let (mut w, mut rx) = waiter(1, 10);
    w.push(message_of_size(1, b"a", 16));

    w.finish(WaiterStatus::TimedOut, false).fire();

    let batch = rx
        .try_recv()
        .expect("completion delivered")
        .expect("timeout still yields the partial batch");
    assert_eq!(batch.len(), 1);
    assert!(!batch.within_deadline());
}

#[test]
fn cancel_carries_the_terminal_error() {
    let (w, mut rx) = waiter(1, 1);
    let terminal = ReceiverError::Detached {
        condition: "amqp:connection:forced".into(),
        description: None,
    };

    w.cancel(Some(terminal.clone())).fire();

    let err = rx
        .try_recv()
        .expect("completion delivered")
        .expect_err("cancellation is an error");
    assert_eq!(err, ReceiverError::cancelled(Some(terminal)));
}

#[test]
fn cancel_without_terminal_error_is_a_bare_cancellation() {
    let (w, mut rx) = waiter(1, 1);
    w.cancel(None).fire();

    let err = rx.try_recv().expect("completion delivered").expect_err("cancelled");
    assert_eq!(err, ReceiverError::cancelled(None));
}

#[test]
fn drain_all_empties_in_enrolment_order() {
    let mut list = WaiterList::default();
    let mut receivers = Vec::new();
    for id in 0..4 {
        let (w, rx) = waiter(id, 1);
        list.enrol(w);
        receivers.push(rx);
    }

    let drained = list.drain_all();
    assert_eq!(drained.iter().map(ReceiveWaiter::id).collect::<Vec<_>>(), [0, 1, 2, 3]);
    assert!(list.is_empty());
}

#[test]
fn firing_into_a_dropped_receiver_is_harmless() {
    let (w, rx) = waiter(1, 1);
    drop(rx);
    w.finish(WaiterStatus::Signalled, true).fire();
}
