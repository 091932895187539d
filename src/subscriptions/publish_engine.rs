// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the `PublishEngine` - the multiplexer that owns a session's subscriptions, pairs
//! incoming publish requests with the notification messages subscriptions produce, and handles
//! the session level events (timeouts, closure, channel renegotiation, transfer) around them.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::config::PublishLimits;
use crate::core::handle::AtomicHandle;
use crate::subscriptions::publish_queue::PublishQueue;
use crate::subscriptions::subscription::{
    Subscription, SubscriptionState, TickOutcome, TickReason,
};
use crate::subscriptions::{PendingPublish, PendingPublishResponse};
use crate::types::{
    DateTime, DateTimeUtc, NotificationMessage, PublishRequest, PublishResponse, RequestHeader,
    ResponseHeader, ServiceFault, StatusCode, SupportedMessage,
};

pub type PublishEngineId = u32;

/// Engine ids are issued process-wide so a subscription's back-reference can name its owner
/// unambiguously for the process lifetime.
static NEXT_ENGINE_ID: AtomicHandle = AtomicHandle::new(1);

/// Counters exposed for server diagnostics.
#[derive(Debug, Serialize)]
pub struct Metrics {
    pub subscription_count: usize,
    pub publish_request_queue_len: usize,
    pub pending_publish_response_len: usize,
    pub closed_subscription_count: usize,
    pub is_session_closed: bool,
}

/// The publish engine of a single session.
///
/// Incoming publish requests are either answered at once - from a held back response, or with a
/// fault - or queued. Subscriptions produce notification messages when the engine ticks them;
/// each message consumes the oldest queued request. A message produced while no request waits
/// (only ever the case for forced sends such as transfer status changes) is held back until the
/// next request arrives. At most one of the two queues is non-empty at any time.
pub struct PublishEngine {
    engine_id: PublishEngineId,
    limits: PublishLimits,
    /// Subscriptions attached to this engine, by id.
    subscriptions: BTreeMap<u32, Subscription>,
    /// The publish request queue (requests by the client on the session).
    publish_request_queue: PublishQueue,
    /// Responses held back because they were produced while no request was waiting.
    pending_publish_responses: VecDeque<PendingPublishResponse>,
    /// Closed subscriptions that still hold retained notifications owed to the client. Drained
    /// head first by incoming publish requests, then discarded.
    closed_subscriptions: VecDeque<Subscription>,
    /// Set once the session closes - every subsequent publish request is refused.
    is_session_closed: bool,
    /// Set by `shutdown`, stops the polling timer.
    is_shutdown: bool,
}

impl PublishEngine {
    pub fn new(limits: PublishLimits) -> PublishEngine {
        PublishEngine {
            engine_id: NEXT_ENGINE_ID.next(),
            subscriptions: BTreeMap::new(),
            publish_request_queue: PublishQueue::new(limits.max_publish_request_in_queue),
            pending_publish_responses: VecDeque::new(),
            closed_subscriptions: VecDeque::new(),
            is_session_closed: false,
            is_shutdown: false,
            limits,
        }
    }

    pub fn engine_id(&self) -> PublishEngineId {
        self.engine_id
    }

    pub fn limits(&self) -> &PublishLimits {
        &self.limits
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn pending_publish_request_count(&self) -> usize {
        self.publish_request_queue.len()
    }

    pub fn pending_publish_response_count(&self) -> usize {
        self.pending_publish_responses.len()
    }

    pub fn closed_subscription_count(&self) -> usize {
        self.closed_subscriptions.len()
    }

    pub fn is_session_closed(&self) -> bool {
        self.is_session_closed
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub fn contains_subscription(&self, subscription_id: u32) -> bool {
        self.subscriptions.contains_key(&subscription_id)
    }

    pub fn get(&self, subscription_id: u32) -> Option<&Subscription> {
        self.subscriptions.get(&subscription_id)
    }

    pub fn get_mut(&mut self, subscription_id: u32) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(&subscription_id)
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            subscription_count: self.subscriptions.len(),
            publish_request_queue_len: self.publish_request_queue.len(),
            pending_publish_response_len: self.pending_publish_responses.len(),
            closed_subscription_count: self.closed_subscriptions.len(),
            is_session_closed: self.is_session_closed,
        }
    }

    /// Attaches a subscription to this engine. The subscription must not be attached anywhere
    /// else - that is a programming error, not a runtime condition.
    pub fn add_subscription(&mut self, mut subscription: Subscription) {
        assert!(
            subscription.publish_engine().is_none(),
            "Subscription {} is already attached to an engine",
            subscription.id()
        );
        assert!(
            !self.subscriptions.contains_key(&subscription.id()),
            "Subscription id {} is already in use on this engine",
            subscription.id()
        );
        debug!(
            "Subscription {} attached to engine {}",
            subscription.id(),
            self.engine_id
        );
        subscription.set_publish_engine(Some(self.engine_id));
        self.subscriptions.insert(subscription.id(), subscription);
    }

    /// Detaches a subscription, clearing its back-reference. The subscription must be attached
    /// to this engine.
    pub fn detach_subscription(&mut self, subscription_id: u32) -> Subscription {
        let mut subscription = self
            .subscriptions
            .remove(&subscription_id)
            .unwrap_or_else(|| {
                panic!(
                    "Subscription {} is not attached to engine {}",
                    subscription_id, self.engine_id
                )
            });
        assert_eq!(subscription.publish_engine(), Some(self.engine_id));
        debug!(
            "Subscription {} detached from engine {}",
            subscription_id, self.engine_id
        );
        subscription.set_publish_engine(None);
        subscription
    }

    /// Handles a publish request from the client. The request is completed exactly once through
    /// `response` - possibly from within this call, possibly later.
    pub fn on_publish_request(
        &mut self,
        now: &DateTimeUtc,
        now_instant: Instant,
        request: PublishRequest,
        response: oneshot::Sender<SupportedMessage>,
    ) {
        // Acknowledgements are applied before anything else so that whatever response this
        // request picks up reflects them
        let ack_results = self.process_subscription_acknowledgements(&request);
        self.purge_drained_closed_subscriptions();

        if !self.pending_publish_responses.is_empty() {
            // A held back response exists, which means the request queue is empty - answer
            // immediately. If the invariant were ever violated we still answer the new request,
            // oldest response first.
            debug_assert!(
                self.publish_request_queue.is_empty(),
                "A held back response exists while requests are queued"
            );
            let pending = self.pending_publish_responses.pop_front().unwrap();
            let publish_response =
                self.complete_pending_response(now, pending, &request.request_header, ack_results);
            let _ = response.send(publish_response.into());
            return;
        }

        if self.is_session_closed {
            debug!(
                "Publish request {} is rejected, the session is closed",
                request.request_header.request_handle
            );
            let _ = response.send(
                ServiceFault::new(&request.request_header, StatusCode::BadSessionClosed).into(),
            );
            return;
        }

        if self.subscriptions.is_empty() {
            let head_holds_notifications = self
                .closed_subscriptions
                .front()
                .map_or(false, |s| s.has_retained_notifications());
            if head_holds_notifications {
                // The request exists solely to carry what the closed subscription still owes
                self.publish_request_queue.enqueue(PendingPublish::new(
                    now_instant,
                    request,
                    ack_results,
                    response,
                ));
                let drained = self.feed_closed_subscription(now);
                debug_assert!(drained && self.publish_request_queue.is_empty());
                return;
            }
            debug!(
                "Publish request {} is rejected, there is no subscription",
                request.request_header.request_handle
            );
            let _ = response.send(
                ServiceFault::new(&request.request_header, StatusCode::BadNoSubscription).into(),
            );
            return;
        }

        self.publish_request_queue.enqueue(PendingPublish::new(
            now_instant,
            request,
            ack_results,
            response,
        ));
        // A late subscription may have been waiting for exactly this request
        self.feed_late_subscription(now);
        self.feed_closed_subscription(now);
        // Enforce the queue bound last - the feeds above may have consumed the queue back under
        // the limit
        if let Some(evicted) = self.publish_request_queue.evict_over_capacity() {
            warn!(
                "Too many publish requests, answering the oldest (handle {}) with BadTooManyPublishRequests",
                evicted.request.request_header.request_handle
            );
            let _ = evicted.response.send(
                ServiceFault::new(
                    &evicted.request.request_header,
                    StatusCode::BadTooManyPublishRequests,
                )
                .into(),
            );
        }
    }

    /// Sends a notification message for a subscription, either paired with the oldest waiting
    /// publish request or - when forced and no request waits - held back until one arrives.
    /// Returns true if the message went out with a request.
    pub(crate) fn send_notification_message(
        &mut self,
        now: &DateTimeUtc,
        subscription_id: u32,
        notification: NotificationMessage,
        more_notifications: bool,
        force: bool,
    ) -> bool {
        debug_assert!(
            !self.publish_request_queue.is_empty() || force,
            "A notification message requires a pending publish request unless forced"
        );
        if !self.publish_request_queue.is_empty() {
            let available = self.resolve_available_sequence_numbers(subscription_id);
            self.pair_and_send(now, subscription_id, notification, more_notifications, available)
        } else if force {
            // Held back until the next publish request. The header, acknowledgement results and
            // available sequence numbers are refreshed at delivery time.
            trace!(
                "Notification for subscription {} is held back until a publish request arrives",
                subscription_id
            );
            let available = self.resolve_available_sequence_numbers(subscription_id);
            self.pending_publish_responses
                .push_back(PendingPublishResponse {
                    subscription_id,
                    response: PublishResponse {
                        response_header: ResponseHeader::null(),
                        subscription_id,
                        available_sequence_numbers: available,
                        more_notifications,
                        notification_message: notification,
                        results: None,
                    },
                });
            false
        } else {
            warn!(
                "Notification message for subscription {} was dropped - no pending publish request",
                subscription_id
            );
            false
        }
    }

    /// Sends an empty keep alive response for the subscription carrying the sequence number of
    /// its next real notification. Returns false when no publish request is pending - the
    /// subscription stays in its keep alive state.
    pub(crate) fn send_keep_alive_response(
        &mut self,
        now: &DateTimeUtc,
        subscription_id: u32,
        sequence_number: u32,
    ) -> bool {
        if self.publish_request_queue.is_empty() {
            debug!(
                "Keep alive for subscription {} has no pending publish request",
                subscription_id
            );
            return false;
        }
        let available = self.resolve_available_sequence_numbers(subscription_id);
        let notification = NotificationMessage::keep_alive(sequence_number, DateTime::from(*now));
        self.pair_and_send(now, subscription_id, notification, false, available)
    }

    /// The engine tick - expires stale publish requests, then lets every subscription decide
    /// whether its interval elapsed and something has to go out.
    pub fn tick(&mut self, now: &DateTimeUtc, now_instant: Instant) {
        for entry in self.publish_request_queue.purge_timed_out(now_instant) {
            debug!(
                "Publish request {} has timed out",
                entry.request.request_header.request_handle
            );
            let _ = entry.response.send(
                ServiceFault::new(&entry.request.request_header, StatusCode::BadTimeout).into(),
            );
        }

        // Highest priority first; equal priorities serve whoever is closest to expiry first
        let subscription_ids = {
            let mut subscription_priority: Vec<(u32, u8, u32)> = self
                .subscriptions
                .values()
                .map(|s| (s.id(), s.priority(), s.time_to_expiration()))
                .collect();
            subscription_priority.sort_by(|s1, s2| s2.1.cmp(&s1.1).then(s1.2.cmp(&s2.2)));
            subscription_priority
                .into_iter()
                .map(|s| s.0)
                .collect::<Vec<u32>>()
        };

        for subscription_id in subscription_ids {
            let publishing_req_queued = !self.publish_request_queue.is_empty();
            let Some(subscription) = self.subscriptions.get_mut(&subscription_id) else {
                continue;
            };
            let outcome = subscription.tick(
                now,
                now_instant,
                TickReason::TickTimerFired,
                publishing_req_queued,
            );
            self.dispatch_tick_outcome(now, subscription_id, outcome);
        }
    }

    /// Removes a subscription from the engine. Anything it still owes the client parks on the
    /// closed drain list; when the last subscription goes, whatever cannot be delivered to the
    /// queued requests is cancelled.
    pub fn on_close_subscription(&mut self, now: &DateTimeUtc, subscription_id: u32) {
        let Some(mut subscription) = self.subscriptions.remove(&subscription_id) else {
            debug!("Subscription {} is not attached, nothing to close", subscription_id);
            return;
        };
        assert_eq!(subscription.publish_engine(), Some(self.engine_id));
        subscription.set_publish_engine(None);
        if subscription.has_retained_notifications() {
            debug!(
                "Closed subscription {} still holds retained notifications and parks on the drain list",
                subscription_id
            );
            self.closed_subscriptions.push_back(subscription);
        } else {
            debug!("Subscription {} closed", subscription_id);
        }

        if self.subscriptions.is_empty() {
            // Deliver what the drain list can to the waiting requests, cancel the rest
            while !self.publish_request_queue.is_empty() {
                if !self.feed_closed_subscription(now) {
                    break;
                }
            }
            for entry in self.publish_request_queue.cancel_all() {
                let _ = entry.response.send(
                    ServiceFault::new(
                        &entry.request.request_header,
                        StatusCode::BadNoSubscription,
                    )
                    .into(),
                );
            }
        }
    }

    /// Cancels every pending publish request with `BadSessionClosed` and refuses everything
    /// that arrives afterwards.
    pub fn on_session_close(&mut self) {
        info!(
            "Session close cancels {} pending publish requests",
            self.publish_request_queue.len()
        );
        for entry in self.publish_request_queue.cancel_all() {
            let _ = entry.response.send(
                ServiceFault::new(&entry.request.request_header, StatusCode::BadSessionClosed)
                    .into(),
            );
        }
        self.is_session_closed = true;
    }

    /// Cancels every pending publish request with `BadSecureChannelClosed`. Used when the
    /// secure channel is renegotiated under the same session - the client resends its publish
    /// requests on the new channel.
    pub fn cancel_pending_publish_request_before_channel_change(&mut self) {
        debug!(
            "Channel change cancels {} pending publish requests",
            self.publish_request_queue.len()
        );
        for entry in self.publish_request_queue.cancel_all() {
            let _ = entry.response.send(
                ServiceFault::new(
                    &entry.request.request_header,
                    StatusCode::BadSecureChannelClosed,
                )
                .into(),
            );
        }
    }

    /// Discards the queues. All subscriptions must have been detached or closed and the pending
    /// requests drained first.
    pub fn shutdown(&mut self) {
        assert!(
            self.subscriptions.is_empty(),
            "Shutdown requires every subscription to be detached first"
        );
        // Dropped without callbacks - the transport has gone away
        let _ = self.publish_request_queue.cancel_all();
        self.pending_publish_responses.clear();
        self.closed_subscriptions.clear();
        self.is_shutdown = true;
    }

    /// Finds a retained message for republish. The closed drain list participates - republish
    /// is what retained notifications of a closed subscription exist for.
    pub fn find_notification_message(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<NotificationMessage, StatusCode> {
        if let Some(subscription) = self.subscriptions.get(&subscription_id) {
            subscription.find_notification_message(sequence_number)
        } else if let Some(subscription) = self
            .closed_subscriptions
            .iter()
            .find(|s| s.id() == subscription_id)
        {
            subscription.find_notification_message(sequence_number)
        } else {
            Err(StatusCode::BadSubscriptionIdInvalid)
        }
    }

    /// Moves a live subscription from one engine to another, preserving its retained messages
    /// and sequence numbers. The source session learns of the transfer through a status change
    /// on its own publish path.
    pub fn transfer(
        source: &mut PublishEngine,
        destination: &mut PublishEngine,
        now: &DateTimeUtc,
        subscription_id: u32,
        send_initial_values: bool,
    ) -> Result<(), StatusCode> {
        if !source.subscriptions.contains_key(&subscription_id) {
            return Err(StatusCode::BadSubscriptionIdInvalid);
        }
        info!(
            "Transferring subscription {} from engine {} to engine {}",
            subscription_id, source.engine_id, destination.engine_id
        );
        let message = source
            .subscriptions
            .get_mut(&subscription_id)
            .unwrap()
            .notify_transfer(now);
        source.send_notification_message(now, subscription_id, message, false, true);

        let subscription = source.detach_subscription(subscription_id);
        destination.add_subscription(subscription);
        let subscription = destination.subscriptions.get_mut(&subscription_id).unwrap();
        subscription.reset_lifetime_counter();
        if send_initial_values {
            subscription.resend_initial_values();
        }
        Ok(())
    }

    /// Transfers every subscription from one engine to another, in id order. The source holds
    /// no subscriptions afterwards.
    pub fn transfer_all(
        source: &mut PublishEngine,
        destination: &mut PublishEngine,
        now: &DateTimeUtc,
        send_initial_values: bool,
    ) {
        let subscription_ids: Vec<u32> = source.subscriptions.keys().copied().collect();
        for subscription_id in subscription_ids {
            let _ = PublishEngine::transfer(
                source,
                destination,
                now,
                subscription_id,
                send_initial_values,
            );
        }
        assert!(source.subscriptions.is_empty());
    }

    /// Applies a tick's outcome for one subscription.
    pub(crate) fn dispatch_tick_outcome(
        &mut self,
        now: &DateTimeUtc,
        subscription_id: u32,
        outcome: TickOutcome,
    ) {
        match outcome {
            TickOutcome::None => {}
            TickOutcome::KeepAlive {
                next_sequence_number,
            } => {
                // False means no request was pending and the subscription stays in keep alive
                let _ = self.send_keep_alive_response(now, subscription_id, next_sequence_number);
            }
            TickOutcome::Notification(message) => {
                let more_notifications = self
                    .subscriptions
                    .get(&subscription_id)
                    .map_or(false, |s| s.more_notifications());
                self.send_notification_message(
                    now,
                    subscription_id,
                    message,
                    more_notifications,
                    false,
                );
            }
            TickOutcome::Expired(message) => {
                if !self.publish_request_queue.is_empty() {
                    self.send_notification_message(now, subscription_id, message, false, true);
                } else if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
                    // No request to carry the expiry - park it so a later request picks it up
                    // through the closed drain list
                    subscription.park_notification(message);
                }
                self.on_close_subscription(now, subscription_id);
            }
        }
    }

    /// Deletes acknowledged notifications, returning a status code for each acknowledgement
    /// according to whether the subscription and sequence number were found.
    fn process_subscription_acknowledgements(
        &mut self,
        request: &PublishRequest,
    ) -> Option<Vec<StatusCode>> {
        trace!("Processing subscription acknowledgements");
        let acks = request.subscription_acknowledgements.as_ref()?;
        if acks.is_empty() {
            return None;
        }
        let results = acks
            .iter()
            .map(|ack| {
                if let Some(subscription) = self.subscriptions.get_mut(&ack.subscription_id) {
                    subscription.acknowledge_notification(ack.sequence_number)
                } else if let Some(subscription) = self
                    .closed_subscriptions
                    .iter_mut()
                    .find(|s| s.id() == ack.subscription_id)
                {
                    subscription.acknowledge_notification(ack.sequence_number)
                } else {
                    debug!(
                        "Cannot find acknowledged notification subscription id {}",
                        ack.subscription_id
                    );
                    StatusCode::BadSubscriptionIdInvalid
                }
            })
            .collect();
        Some(results)
    }

    /// Discards closed subscriptions whose retained messages were all acknowledged - there is
    /// nothing left to drain.
    fn purge_drained_closed_subscriptions(&mut self) {
        self.closed_subscriptions
            .retain(|s| s.has_retained_notifications());
    }

    /// Picks the late subscription most deserving of the newly queued request and lets it
    /// publish. Subscriptions that have never delivered go first, whoever dies soonest ahead;
    /// otherwise the highest priority wins and equal priorities go to the most endangered.
    fn feed_late_subscription(&mut self, now: &DateTimeUtc) {
        if self.publish_request_queue.is_empty() {
            return;
        }
        let candidate = self
            .subscriptions
            .values()
            .filter(|s| s.state() == SubscriptionState::Late && !s.message_sent())
            .min_by_key(|s| s.time_to_expiration())
            .map(|s| s.id())
            .or_else(|| {
                self.subscriptions
                    .values()
                    .filter(|s| s.state() == SubscriptionState::Late && s.publishing_enabled())
                    .min_by(|a, b| {
                        b.priority()
                            .cmp(&a.priority())
                            .then(a.time_to_expiration().cmp(&b.time_to_expiration()))
                    })
                    .map(|s| s.id())
            });
        if let Some(subscription_id) = candidate {
            trace!("Feeding late subscription {}", subscription_id);
            let outcome = self
                .subscriptions
                .get_mut(&subscription_id)
                .unwrap()
                .process_subscription(now);
            self.dispatch_tick_outcome(now, subscription_id, outcome);
        }
    }

    /// Delivers the oldest retained message of the closed drain list's head to the oldest
    /// queued request. Returns true if a response went out.
    fn feed_closed_subscription(&mut self, now: &DateTimeUtc) -> bool {
        if self.publish_request_queue.is_empty() {
            return false;
        }
        let (subscription_id, message, more_notifications, available) = {
            let Some(head) = self.closed_subscriptions.front_mut() else {
                return false;
            };
            let Some(message) = head.pop_retained_notification() else {
                return false;
            };
            (
                head.id(),
                message,
                head.has_retained_notifications(),
                head.available_sequence_numbers(),
            )
        };
        let sent = self.pair_and_send(now, subscription_id, message, more_notifications, available);
        if !self
            .closed_subscriptions
            .front()
            .map_or(false, |s| s.has_retained_notifications())
        {
            if let Some(subscription) = self.closed_subscriptions.pop_front() {
                debug!(
                    "Closed subscription {} has drained and is discarded",
                    subscription.id()
                );
            }
        }
        sent
    }

    /// Builds a publish response around the notification and completes the oldest queued
    /// request with it.
    fn pair_and_send(
        &mut self,
        now: &DateTimeUtc,
        subscription_id: u32,
        notification: NotificationMessage,
        more_notifications: bool,
        available_sequence_numbers: Option<Vec<u32>>,
    ) -> bool {
        let Some(entry) = self.publish_request_queue.dequeue() else {
            return false;
        };
        trace!(
            "Publish request {} is answered with sequence number {} of subscription {}",
            entry.request.request_header.request_handle,
            notification.sequence_number,
            subscription_id
        );
        let response = PublishResponse {
            response_header: ResponseHeader::new_timestamped_service_result(
                DateTime::from(*now),
                &entry.request.request_header,
                StatusCode::Good,
            ),
            subscription_id,
            available_sequence_numbers,
            more_notifications,
            notification_message: notification,
            results: entry.ack_results,
        };
        let _ = entry.response.send(response.into());
        true
    }

    /// Attaches the new request's handle and acknowledgement results to a held back response
    /// and refreshes its available sequence numbers if the subscription still exists.
    fn complete_pending_response(
        &mut self,
        now: &DateTimeUtc,
        pending: PendingPublishResponse,
        request_header: &RequestHeader,
        ack_results: Option<Vec<StatusCode>>,
    ) -> PublishResponse {
        let PendingPublishResponse {
            subscription_id,
            mut response,
        } = pending;
        response.response_header = ResponseHeader::new_timestamped_service_result(
            DateTime::from(*now),
            request_header,
            response.response_header.service_result,
        );
        response.results = ack_results;
        if self.contains_subscription(subscription_id)
            || self
                .closed_subscriptions
                .iter()
                .any(|s| s.id() == subscription_id)
        {
            // Acknowledgements on this very request may have released retained messages
            response.available_sequence_numbers =
                self.resolve_available_sequence_numbers(subscription_id);
        }
        response
    }

    /// Returns the array of available sequence numbers for the specified subscription, looking
    /// through the live map and the closed drain list.
    fn resolve_available_sequence_numbers(&self, subscription_id: u32) -> Option<Vec<u32>> {
        if let Some(subscription) = self.subscriptions.get(&subscription_id) {
            subscription.available_sequence_numbers()
        } else {
            self.closed_subscriptions
                .iter()
                .find(|s| s.id() == subscription_id)
                .and_then(|s| s.available_sequence_numbers())
        }
    }
}
