//! The receiving link coordinator.
//!
//! `ReceiverLink` is the public surface of the engine and its single
//! synchronisation point: one mutex covers the flow queue, the waiter
//! list, the transfer assembler, and the listener slot. Everything that
//! can block, suspend, or run consumer code — endpoint calls, waiter
//! completion, the listener — happens with that lock released, so the
//! ingress path can never be re-entered from under itself and the peer
//! only ever observes whole credit states.
//!
//! Ingress flows transport → [`on_transfer`](ReceiverLink::on_transfer) →
//! assembler → listener, front waiter, or flow queue. Egress flows
//! [`receive`](ReceiverLink::receive) → immediate drain or an enrolled
//! waiter that completes on arrival, batch-window expiry, overall
//! deadline, or teardown.

mod credit;

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use bytes::Bytes;
use log::{debug, trace};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    assembler::TransferAssembler,
    config::{ReceiverConfig, SettleMode},
    disposition::DispositionRegistry,
    endpoint::LinkEndpoint,
    error::ReceiverError,
    flow_queue::FlowQueue,
    message::{Delivery, DeliveryTag, Message, TransferFrame},
    outcome::{DeliveryState, ErrorCondition, Outcome},
    waiter::{FinishedWaiter, ReceiveWaiter, ReceivedBatch, WaiterList, WaiterStatus},
};

/// Minimum wait applied when a remote receive is asked for a zero timeout;
/// a service call is expected to linger rather than poll.
const MIN_REMOTE_WAIT: Duration = Duration::from_secs(10);

/// Callback invoked with each inbound message while registered.
pub type MessageListener = Arc<dyn Fn(Message) + Send + Sync>;

/// State guarded by the coordinator lock.
struct ReceiverState {
    queue: FlowQueue,
    waiters: WaiterList,
    assembler: TransferAssembler,
    listener: Option<MessageListener>,
    closed: bool,
    next_waiter_id: u64,
}

struct Shared<E> {
    endpoint: E,
    config: ReceiverConfig,
    state: Mutex<ReceiverState>,
    dispositions: DispositionRegistry,
    shutdown: CancellationToken,
}

/// What a waiter timer fired for.
#[derive(Clone, Copy, Debug)]
enum WaiterExpiry {
    /// The batch-gather window after the first message elapsed.
    BatchWindow,
    /// The overall deadline elapsed.
    OverallDeadline,
}

/// Endpoint calls and completions collected under the lock, executed after
/// it is released.
#[derive(Default)]
struct SideEffects {
    set_total_credit: Option<u32>,
    issue_credit: Option<u32>,
    release: Option<Message>,
    finished: Vec<FinishedWaiter>,
    listener: Option<(MessageListener, Message)>,
}

impl SideEffects {
    fn run<E: LinkEndpoint>(self, inner: &Arc<Shared<E>>) {
        if let Some(credit) = self.set_total_credit {
            inner.endpoint.set_total_link_credit(credit, true, None);
        }
        if let Some(total) = self.issue_credit {
            inner.endpoint.issue_credit(total, false, None);
        }
        if let Some(message) = self.release {
            let tag = message.delivery_tag().clone();
            if !inner
                .endpoint
                .dispose_delivery(&tag, true, Outcome::Released.into(), false)
            {
                debug!("release of unrequested message {tag} found no unsettled delivery");
            }
        }
        for finished in self.finished {
            finished.fire();
        }
        if let Some((listener, message)) = self.listener {
            listener(message);
        }
    }
}

/// Receive half of an AMQP 1.0 link endpoint.
///
/// Cheap to clone; clones share the same link state.
pub struct ReceiverLink<E: LinkEndpoint> {
    inner: Arc<Shared<E>>,
}

impl<E: LinkEndpoint> Clone for ReceiverLink<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: LinkEndpoint> ReceiverLink<E> {
    /// Open a receiving link over `endpoint`.
    ///
    /// Sends the initial flow: in size mode the byte budget is converted
    /// to credit immediately; otherwise a configured prefetch count is
    /// applied with automatic flow.
    #[must_use]
    pub fn new(endpoint: E, config: ReceiverConfig) -> Self {
        let state = ReceiverState {
            queue: FlowQueue::new(config.total_cache_bytes),
            waiters: WaiterList::default(),
            assembler: TransferAssembler::new(config.max_message_size),
            listener: None,
            closed: false,
            next_waiter_id: 0,
        };
        let link = Self {
            inner: Arc::new(Shared {
                endpoint,
                config,
                state: Mutex::new(state),
                dispositions: DispositionRegistry::new(),
                shutdown: CancellationToken::new(),
            }),
        };
        link.send_initial_flow();
        link
    }

    /// The peer's attach confirmed the link; re-apply the size-mode credit
    /// now that the negotiated maximum message size is known.
    ///
    /// When this endpoint set no limit of its own, the peer's is adopted
    /// for transfer enforcement. The count-mode initial flow is sent once
    /// at open and is not repeated here.
    pub fn on_attach_confirmed(&self, peer_max_message_size: Option<u64>) {
        {
            let mut st = self.inner.state();
            if st.closed {
                return;
            }
            if st.assembler.max_message_size().is_none() {
                st.assembler.set_max_message_size(peer_max_message_size);
            }
        }
        self.apply_size_credit();
    }

    /// Convert the byte budget to credit and apply it; a no-op outside
    /// size mode.
    fn apply_size_credit(&self) {
        let credit = {
            let mut st = self.inner.state();
            if !st.queue.is_size_mode() {
                return;
            }
            st.queue.update_credit(None);
            st.queue.bounded_credit()
        };
        self.inner
            .endpoint
            .set_total_link_credit(credit, true, Some(true));
    }

    fn send_initial_flow(&self) {
        if self.inner.state().queue.is_size_mode() {
            self.apply_size_credit();
        } else if self.inner.config.auto_send_flow && self.inner.config.total_link_credit > 0 {
            self.inner.endpoint.set_total_link_credit(
                self.inner.config.total_link_credit,
                false,
                Some(true),
            );
            self.inner.endpoint.send_flow(false);
        }
    }

    /// Install the single message listener.
    ///
    /// While a listener is installed, inbound messages bypass the flow
    /// queue and waiter list and are delivered straight to it, with the
    /// coordinator lock released.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::LinkClosed`] after teardown;
    /// [`ReceiverError::DuplicateListener`] when a listener is already
    /// installed.
    pub fn register_listener(
        &self,
        listener: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<(), ReceiverError> {
        let mut st = self.inner.state();
        if st.closed {
            return Err(ReceiverError::LinkClosed);
        }
        if st.listener.is_some() {
            return Err(ReceiverError::DuplicateListener);
        }
        st.listener = Some(Arc::new(listener));
        Ok(())
    }

    /// Receive up to `count` messages.
    ///
    /// Buffered messages are drained synchronously. Otherwise the call
    /// waits: it completes with everything gathered once `count` is
    /// reached, once `batch_wait` elapses after the first message (when
    /// more than one was requested), or at the `overall` deadline with a
    /// partial — possibly empty — batch. A zero `overall` timeout returns
    /// an empty batch immediately instead of waiting.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::LinkClosed`] when called after teardown;
    /// [`ReceiverError::Cancelled`] when the link aborts mid-wait.
    pub async fn receive(
        &self,
        count: usize,
        batch_wait: Option<Duration>,
        overall: Duration,
    ) -> Result<ReceivedBatch, ReceiverError> {
        self.receive_inner(count, batch_wait, overall).await
    }

    /// Receive as a remote service call.
    ///
    /// Identical to [`receive`](Self::receive) except a zero `overall`
    /// timeout is raised to a ten-second minimum: a service consumer asks
    /// the server to linger, it does not poll.
    ///
    /// # Errors
    ///
    /// As [`receive`](Self::receive).
    pub async fn receive_remote(
        &self,
        count: usize,
        batch_wait: Option<Duration>,
        overall: Duration,
    ) -> Result<ReceivedBatch, ReceiverError> {
        let overall = if overall.is_zero() {
            MIN_REMOTE_WAIT
        } else {
            overall
        };
        self.receive_inner(count, batch_wait, overall).await
    }

    async fn receive_inner(
        &self,
        count: usize,
        batch_wait: Option<Duration>,
        overall: Duration,
    ) -> Result<ReceivedBatch, ReceiverError> {
        let deadline = Instant::now() + overall;

        let (rx, issue) = {
            let mut st = self.inner.state();
            if st.closed {
                return Err(ReceiverError::LinkClosed);
            }
            if count == 0 {
                return Ok(ReceivedBatch::new(Vec::new(), true));
            }

            let (drained, credit_changed) = st.queue.drain(count);
            if !drained.is_empty() {
                let credit = credit_changed.then(|| st.queue.bounded_credit());
                drop(st);
                if let Some(credit) = credit {
                    self.inner.endpoint.set_total_link_credit(credit, true, None);
                }
                return Ok(ReceivedBatch::new(drained, true));
            }

            if overall.is_zero() {
                return Ok(ReceivedBatch::new(Vec::new(), false));
            }

            let (tx, rx) = oneshot::channel();
            let waiter_id = st.next_waiter_id;
            st.next_waiter_id += 1;
            st.waiters.enrol(ReceiveWaiter::new(waiter_id, count, batch_wait, tx));
            trace!(
                "enrolled waiter {waiter_id} for {count} messages, overall timeout {overall:?}"
            );

            // The timer is attached before the lock drops so a message
            // arriving on another thread cannot re-arm the waiter first and
            // have its batch window clobbered by a stale overall arm.
            let timer = Shared::spawn_overall_timer(&self.inner, waiter_id, deadline);
            if let Some(waiter) = st.waiters.get_mut(waiter_id) {
                waiter.replace_timer(timer);
            }

            let issue = if self.inner.config.auto_send_flow {
                None
            } else {
                credit::on_demand_credit(
                    self.inner.endpoint.link_credit(),
                    st.waiters.len() as u32,
                    st.waiters.total_requested(),
                )
            };
            (rx, issue)
        };

        if let Some(total) = issue {
            debug!("issuing on-demand credit of {total}");
            self.inner.endpoint.issue_credit(total, false, None);
        }

        rx.await.map_err(|_| ReceiverError::LinkClosed)?
    }

    /// Feed one decoded transfer frame from the transport.
    ///
    /// Completed deliveries are routed to the listener, the front waiter,
    /// or the flow queue; credit side effects are applied with the lock
    /// released. Frames arriving after teardown are dropped.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::MessageSizeExceeded`] when a delivery passes the
    /// negotiated limit on an open link; fatal to the link.
    pub fn on_transfer(&self, frame: TransferFrame) -> Result<(), ReceiverError> {
        let mut effects = SideEffects::default();
        {
            let mut st = self.inner.state();
            if st.closed {
                trace!(
                    "dropping transfer {number} after close",
                    number = frame.delivery_number,
                );
                return Ok(());
            }
            let closing = self.inner.endpoint.is_closing();
            if let Some(message) = st.assembler.on_transfer(frame, closing)? {
                Self::route_message(&self.inner, &mut st, message, &mut effects);
            }
        }
        effects.run(&self.inner);
        Ok(())
    }

    /// Resolve a pending awaitable disposition from a peer disposition.
    pub fn on_peer_disposition(&self, delivery: &Delivery) {
        self.inner.dispositions.complete_peer(delivery);
    }

    /// Accept `message`.
    pub fn accept_message(&self, message: &mut Message) {
        self.dispose_message(
            message,
            Outcome::Accepted.into(),
            self.inner.config.settled_on_dispose(),
            false,
        );
    }

    /// Reject `message` with an error condition.
    pub fn reject_message(&self, message: &mut Message, error: ErrorCondition) {
        self.dispose_message(
            message,
            Outcome::Rejected(error).into(),
            self.inner.config.settled_on_dispose(),
            false,
        );
    }

    /// Release `message` for redelivery.
    pub fn release_message(&self, message: &mut Message) {
        self.dispose_message(
            message,
            Outcome::Released.into(),
            self.inner.config.settled_on_dispose(),
            false,
        );
    }

    /// Modify `message` before releasing it.
    pub fn modify_message(
        &self,
        message: &mut Message,
        delivery_failed: bool,
        undeliverable_here: bool,
        annotations: Option<BTreeMap<String, String>>,
    ) {
        self.dispose_message(
            message,
            Outcome::Modified {
                delivery_failed,
                undeliverable_here,
                annotations,
            }
            .into(),
            self.inner.config.settled_on_dispose(),
            false,
        );
    }

    /// Send a fire-and-forget disposition for `message`.
    ///
    /// Marks the message's dispositions batchable (or not) and delegates
    /// to the link base; an unknown tag is logged and dropped.
    pub fn dispose_message(
        &self,
        message: &mut Message,
        state: DeliveryState,
        settled: bool,
        batchable: bool,
    ) {
        message.set_batchable(batchable);
        if !self
            .inner
            .endpoint
            .dispose_delivery(message.delivery_tag(), settled, state, batchable)
        {
            debug!(
                "no unsettled delivery for tag {tag}; disposition dropped",
                tag = message.delivery_tag(),
            );
        }
    }

    /// Send a disposition for `tag` and await the peer's reciprocation.
    ///
    /// `txn_id` wraps `outcome` in a transactional state carried verbatim.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::LinkClosed`] after teardown; otherwise as
    /// documented on the disposition registry: `IllegalState` for a
    /// duplicate pending tag, `NotFound` for an unknown tag, `Timeout`,
    /// and `Cancelled` on teardown mid-wait.
    pub async fn dispose_async(
        &self,
        tag: DeliveryTag,
        txn_id: Option<Bytes>,
        outcome: Outcome,
        batchable: bool,
        timeout: Duration,
    ) -> Result<Outcome, ReceiverError> {
        if self.inner.state().closed {
            return Err(ReceiverError::LinkClosed);
        }
        self.inner
            .dispositions
            .start(&self.inner.endpoint, tag, txn_id, outcome, batchable, timeout)
            .await
    }

    /// Install, change, or clear the prefetch byte budget.
    pub fn set_cache_bytes(&self, total_cache_bytes: Option<u64>) {
        let credit = {
            let mut st = self.inner.state();
            if st.closed {
                return;
            }
            st.queue.set_budget(total_cache_bytes);
            st.queue
                .update_credit(None)
                .then(|| st.queue.bounded_credit())
        };
        if let Some(credit) = credit {
            self.inner
                .endpoint
                .set_total_link_credit(credit, true, Some(true));
        }
    }

    /// Close the link gracefully.
    ///
    /// Buffered and partially gathered messages are released back to the
    /// peer; pending receives complete empty with
    /// `within_deadline = false`; pending dispositions are cancelled.
    pub fn close(&self) {
        let Some((messages, mut waiters)) = self.teardown() else {
            return;
        };
        let gathered = waiters.iter_mut().flat_map(ReceiveWaiter::take_gathered);
        for message in messages.into_iter().chain(gathered) {
            let tag = message.delivery_tag().clone();
            if !self
                .inner
                .endpoint
                .dispose_delivery(&tag, true, Outcome::Released.into(), false)
            {
                debug!("buffered message {tag} had no unsettled delivery at close");
            }
        }
        for waiter in waiters {
            waiter.finish(WaiterStatus::Signalled, false).fire();
        }
        self.inner.dispositions.abort(None);
    }

    /// Abort the link.
    ///
    /// Pending receives and dispositions fail with a cancellation carrying
    /// the link's terminal error; buffered messages are dropped without
    /// dispositions.
    pub fn abort(&self) {
        let Some((messages, waiters)) = self.teardown() else {
            return;
        };
        let terminal = self.inner.endpoint.terminal_error();
        drop(messages);
        for waiter in waiters {
            waiter.cancel(terminal.clone()).fire();
        }
        self.inner.dispositions.abort(terminal);
    }

    /// Steal the queue and waiter list under the lock; `None` when already
    /// torn down.
    fn teardown(&self) -> Option<(Vec<Message>, Vec<ReceiveWaiter>)> {
        let stolen = {
            let mut st = self.inner.state();
            if st.closed {
                return None;
            }
            st.closed = true;
            st.listener = None;
            st.assembler.clear();
            (st.queue.take_all(), st.waiters.drain_all())
        };
        self.inner.shutdown.cancel();
        debug!(
            "link torn down with {buffered} buffered messages and {pending} pending receives",
            buffered = stolen.0.len(),
            pending = stolen.1.len(),
        );
        Some(stolen)
    }

    /// Whether the link has been closed or aborted.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.state().closed }

    /// Number of prefetched messages currently buffered.
    #[must_use]
    pub fn buffered_message_count(&self) -> usize { self.inner.state().queue.len() }

    /// Number of receive calls currently waiting for messages.
    #[must_use]
    pub fn pending_receiver_count(&self) -> usize { self.inner.state().waiters.len() }

    /// Number of dispositions awaiting the peer.
    #[must_use]
    pub fn pending_disposition_count(&self) -> usize { self.inner.dispositions.pending_count() }

    /// Route a completed delivery per the arrival rules.
    fn route_message(
        inner: &Arc<Shared<E>>,
        st: &mut ReceiverState,
        message: Message,
        effects: &mut SideEffects,
    ) {
        if let Some(listener) = &st.listener {
            effects.listener = Some((Arc::clone(listener), message));
            return;
        }

        if !st.waiters.is_empty() {
            // A message bypassing the queue still teaches the live average.
            if st.queue.is_size_mode() && st.queue.update_credit(Some(&message)) {
                effects.set_total_credit = Some(st.queue.bounded_credit());
            }

            let mut satisfied = false;
            let mut arm = None;
            if let Some(front) = st.waiters.front_mut() {
                front.push(message);
                satisfied = front.is_satisfied();
                if !satisfied && front.gathered_len() == 1 && front.requested() > 1 {
                    arm = front.batch_wait().map(|wait| (front.id(), wait));
                }
            }

            if satisfied {
                if let Some(waiter) = st.waiters.pop_front() {
                    effects.finished.push(waiter.finish(WaiterStatus::Signalled, true));
                }
                if !inner.config.auto_send_flow {
                    effects.issue_credit = credit::on_demand_credit(
                        inner.endpoint.link_credit(),
                        st.waiters.len() as u32,
                        st.waiters.total_requested(),
                    );
                }
            } else if let Some((waiter_id, wait)) = arm {
                // Re-arm under the lock: the batch window replaces the
                // overall timer atomically with the gather it belongs to.
                let timer = Shared::spawn_batch_timer(inner, waiter_id, wait);
                if let Some(waiter) = st.waiters.get_mut(waiter_id) {
                    waiter.replace_timer(timer);
                }
            }
            return;
        }

        if !inner.config.auto_send_flow && inner.config.settle_mode != SettleMode::SettleOnSend {
            // Nobody asked for this message; hand it straight back.
            debug!(
                "releasing unrequested message {tag}",
                tag = message.delivery_tag(),
            );
            effects.release = Some(message);
            return;
        }

        if st.queue.enqueue(message) {
            effects.set_total_credit = Some(st.queue.bounded_credit());
        }
    }
}

impl<E: LinkEndpoint> Shared<E> {
    fn state(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().expect("receiver state lock poisoned")
    }

    /// Spawn a task that completes the waiter at its overall deadline.
    ///
    /// The caller attaches the returned handle to the waiter while still
    /// holding the coordinator lock.
    fn spawn_overall_timer(inner: &Arc<Self>, waiter_id: u64, deadline: Instant) -> JoinHandle<()> {
        let weak = Arc::downgrade(inner);
        let token = inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = time::sleep_until(deadline) => {
                    if let Some(inner) = weak.upgrade() {
                        Self::expire_waiter(&inner, waiter_id, WaiterExpiry::OverallDeadline);
                    }
                }
            }
        })
    }

    /// Spawn a task that completes the waiter when its batch-gather window
    /// closes. Attached under the coordinator lock like the overall timer.
    fn spawn_batch_timer(inner: &Arc<Self>, waiter_id: u64, wait: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(inner);
        let token = inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = time::sleep(wait) => {
                    if let Some(inner) = weak.upgrade() {
                        Self::expire_waiter(&inner, waiter_id, WaiterExpiry::BatchWindow);
                    }
                }
            }
        })
    }

    /// Timer callback: complete a still-pending waiter.
    fn expire_waiter(inner: &Arc<Self>, waiter_id: u64, expiry: WaiterExpiry) {
        let finished = {
            let mut st = inner.state();
            st.waiters.remove(waiter_id).map(|waiter| match expiry {
                WaiterExpiry::BatchWindow => waiter.finish(WaiterStatus::Signalled, true),
                WaiterExpiry::OverallDeadline => waiter.finish(WaiterStatus::TimedOut, false),
            })
        };
        if let Some(finished) = finished {
            trace!("waiter {waiter_id} expired via {expiry:?}");
            finished.fire();
        }
    }
}
