// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the `Subscription` - the per subscription state machine that decides on every tick
//! whether to emit a notification message, a keep alive, or nothing at all, and the
//! `NotificationSource` trait through which monitored item batches reach it.

use std::time::{Duration, Instant};

use crate::config::PublishLimits;
use crate::core::handle::Handle;
use crate::subscriptions::notification_ring::NotificationRing;
use crate::subscriptions::timer::SubscriptionTimer;
use crate::types::{
    DateTime, DateTimeUtc, NotificationData, NotificationMessage, StatusChangeNotification,
    StatusCode,
};

/// Supplies a subscription with its notification payloads. Monitored item sampling is
/// implemented elsewhere; the subscription only needs to know whether anything is queued and to
/// drain it in batches when it decides to publish.
pub trait NotificationSource {
    /// Number of monitored items feeding this source, for diagnostics.
    fn monitored_item_count(&self) -> usize;
    /// True when the source holds queued notifications.
    fn has_notifications(&self) -> bool;
    /// Drains up to `max_notifications` queued monitored item notifications, batched into
    /// notification payloads. `max_notifications` of 0 means no limit.
    fn take_notifications(&mut self, max_notifications: usize) -> Vec<NotificationData>;
    /// Requests that the current value of every monitored item is queued again, so that the
    /// next publish carries a full snapshot. Used when a subscription changes session.
    fn resend_initial_values(&mut self);
}

/// The state of the subscription
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub enum SubscriptionState {
    Closed,
    Creating,
    Normal,
    Late,
    KeepAlive,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TickReason {
    ReceivePublishRequest,
    TickTimerFired,
}

#[derive(Debug)]
pub(crate) struct SubscriptionStateParams {
    pub notifications_available: bool,
    pub publishing_req_queued: bool,
}

/// This is for debugging purposes. It allows the caller to validate the output state if required.
///
/// Values correspond to state table in OPC UA Part 4 5.13.1.2
///
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum HandledState {
    None0 = 0,
    Create3 = 3,
    Normal4 = 4,
    Normal5 = 5,
    IntervalElapsed6 = 6,
    IntervalElapsed7 = 7,
    IntervalElapsed8 = 8,
    IntervalElapsed9 = 9,
    Late10 = 10,
    Late11 = 11,
    Late12 = 12,
    KeepAlive13 = 13,
    KeepAlive14 = 14,
    KeepAlive15 = 15,
    KeepAlive16 = 16,
    KeepAlive17 = 17,
    Closed27 = 27,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum UpdateStateAction {
    None,
    // Return a keep alive
    ReturnKeepAlive,
    // Return notifications
    ReturnNotifications,
    // The subscription was created normally
    SubscriptionCreated,
    // The subscription has expired and must be closed
    SubscriptionExpired,
}

/// What a tick asks the engine to do for this subscription.
pub(crate) enum TickOutcome {
    /// Nothing to send.
    None,
    /// Send a keep alive carrying the sequence number of the next real notification.
    KeepAlive { next_sequence_number: u32 },
    /// Send this notification message. It has been stored in the retained ring already.
    Notification(NotificationMessage),
    /// The lifetime expired. The engine delivers the status change if it can, parks it on the
    /// subscription otherwise, and closes the subscription either way.
    Expired(NotificationMessage),
}

/// A single subscription. The engine drives it through `tick` / `process_subscription` and it
/// answers with at most one message per call; it never reaches back into the engine itself.
#[derive(Serialize)]
pub struct Subscription {
    /// Subscription id
    subscription_id: u32,
    /// Relative priority of the subscription. When more than one subscription needs to send
    /// notifications the highest priority subscription should be sent first.
    priority: u8,
    /// The parameter that requests publishing to be enabled or disabled.
    publishing_enabled: bool,
    /// State of the subscription
    state: SubscriptionState,
    /// A boolean value that is set to true to mean that either a NotificationMessage or a
    /// keep-alive Message has been sent on the Subscription. It is a flag that is used to ensure
    /// that either a NotificationMessage or a keep-alive Message is sent out the first time the
    /// publishing timer expires.
    message_sent: bool,
    /// Interval, keep alive and lifetime pacing.
    timer: SubscriptionTimer,
    /// The next sequence number to be assigned. Starts at 1 and skips 0 when it wraps.
    sequence_number: Handle,
    /// Last assigned sequence number, used as a sanity check that production stays sequential.
    last_sequence_number: u32,
    /// Sent messages retained until acknowledged.
    retained: NotificationRing,
    /// Maximum number of monitored item notifications batched into one message.
    max_notifications_per_publish: usize,
    /// A flag that tells the subscription to publish a full snapshot of current values on its
    /// next emission.
    resend_data: bool,
    /// Cached result of the source's liveness the last time this subscription ticked.
    has_monitored_item_notifications: bool,
    /// Where the payloads come from.
    #[serde(skip)]
    source: Box<dyn NotificationSource + Send + Sync>,
    /// Id of the engine this subscription is attached to. Set on attach, cleared on detach,
    /// never written by the subscription itself.
    publish_engine: Option<u32>,
}

impl Subscription {
    pub fn new(
        subscription_id: u32,
        publishing_enabled: bool,
        publishing_interval: Duration,
        lifetime_count: u32,
        keep_alive_count: u32,
        priority: u8,
        limits: &PublishLimits,
        source: Box<dyn NotificationSource + Send + Sync>,
    ) -> Subscription {
        Subscription {
            subscription_id,
            priority,
            publishing_enabled,
            state: SubscriptionState::Creating,
            message_sent: false,
            timer: SubscriptionTimer::new(
                publishing_interval,
                lifetime_count,
                keep_alive_count,
                Instant::now(),
            ),
            sequence_number: Handle::new(1),
            last_sequence_number: 0,
            retained: NotificationRing::new(limits.max_retained_notifications()),
            max_notifications_per_publish: limits.max_notifications_per_publish,
            resend_data: false,
            has_monitored_item_notifications: false,
            source,
            publish_engine: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.subscription_id
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn publishing_enabled(&self) -> bool {
        self.publishing_enabled
    }

    /// True once any notification or keep alive has been delivered for this subscription.
    pub fn message_sent(&self) -> bool {
        self.message_sent
    }

    pub fn monitored_item_count(&self) -> usize {
        self.source.monitored_item_count()
    }

    /// Publishing intervals remaining before the lifetime expires.
    pub fn time_to_expiration(&self) -> u32 {
        self.timer.time_to_expiration()
    }

    /// Publishing intervals remaining before a keep alive is due.
    pub fn time_to_keep_alive(&self) -> u32 {
        self.timer.time_to_keep_alive()
    }

    /// Cached producer side liveness signal, refreshed on every tick.
    pub fn has_monitored_item_notifications(&self) -> bool {
        self.has_monitored_item_notifications
    }

    /// True when the subscription still has something a publish response could carry - either
    /// retained messages or queued producer notifications.
    pub fn has_pending_notifications(&self) -> bool {
        !self.retained.is_empty() || self.source.has_notifications()
    }

    /// True when the subscription holds sent-but-unacknowledged messages.
    pub fn has_retained_notifications(&self) -> bool {
        !self.retained.is_empty()
    }

    /// True when the producer still holds queued items beyond what was just emitted - the
    /// moreNotifications flag of a publish response.
    pub fn more_notifications(&self) -> bool {
        self.source.has_notifications()
    }

    /// The engine this subscription is attached to, if any.
    pub fn publish_engine(&self) -> Option<u32> {
        self.publish_engine
    }

    pub(crate) fn set_publish_engine(&mut self, publish_engine: Option<u32>) {
        self.publish_engine = publish_engine;
    }

    /// Acknowledges a retained notification by sequence number.
    pub fn acknowledge_notification(&mut self, sequence_number: u32) -> StatusCode {
        self.retained.acknowledge(sequence_number)
    }

    /// The sequence numbers currently held for republish.
    pub fn available_sequence_numbers(&self) -> Option<Vec<u32>> {
        self.retained.available_sequence_numbers()
    }

    /// Finds a retained message by sequence number, for republish.
    pub fn find_notification_message(
        &self,
        sequence_number: u32,
    ) -> Result<NotificationMessage, StatusCode> {
        self.retained
            .find(sequence_number)
            .cloned()
            .ok_or(StatusCode::BadMessageNotAvailable)
    }

    /// Removes and returns the oldest retained message. The closed-drain path delivers what is
    /// left of a subscription after it is gone from the engine map.
    pub(crate) fn pop_retained_notification(&mut self) -> Option<NotificationMessage> {
        self.retained.pop_oldest()
    }

    /// Reset the lifetime counter to the value specified for the life time of the subscription
    /// in the create subscription service
    pub fn reset_lifetime_counter(&mut self) {
        self.timer.reset_lifetime_counter();
    }

    /// Requests a full snapshot of current values on the next publish. Used after a transfer
    /// when the new session asks for initial values.
    pub fn resend_initial_values(&mut self) {
        self.resend_data = true;
        self.source.resend_initial_values();
    }

    /// Builds the status change message that tells the old session its subscription has moved.
    /// The message carries the next sequence number without consuming it, so the sequence the
    /// new session observes stays gap free.
    pub(crate) fn notify_transfer(&mut self, now: &DateTimeUtc) -> NotificationMessage {
        NotificationMessage::status_change(
            self.sequence_number.peek(),
            DateTime::from(*now),
            StatusCode::GoodSubscriptionTransferred,
        )
    }

    pub fn set_publishing_enabled(&mut self, publishing_enabled: bool) {
        self.publishing_enabled = publishing_enabled;
        self.timer.reset_lifetime_counter();
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub fn set_publishing_interval(&mut self, publishing_interval: Duration) {
        self.timer.set_publishing_interval(publishing_interval);
    }

    pub fn set_max_keep_alive_count(&mut self, max_keep_alive_count: u32) {
        self.timer.set_max_keep_alive_count(max_keep_alive_count);
        self.timer.reset_keep_alive_counter();
    }

    pub fn set_max_lifetime_count(&mut self, max_lifetime_count: u32) {
        self.timer.set_max_lifetime_count(max_lifetime_count);
        self.timer.reset_lifetime_counter();
    }

    /// The engine wants this subscription to emit now because a publish request is available
    /// for it - the fairness path for late subscriptions.
    pub(crate) fn process_subscription(&mut self, now: &DateTimeUtc) -> TickOutcome {
        self.tick_inner(now, TickReason::ReceivePublishRequest, true, false)
    }

    /// Checks the subscription state against the tick and decides what the engine should send
    /// on its behalf, if anything.
    pub(crate) fn tick(
        &mut self,
        now: &DateTimeUtc,
        now_instant: Instant,
        tick_reason: TickReason,
        publishing_req_queued: bool,
    ) -> TickOutcome {
        // Check if the publishing interval has elapsed. Only checks on the tick timer.
        let publishing_interval_elapsed = match tick_reason {
            TickReason::ReceivePublishRequest => false,
            TickReason::TickTimerFired => {
                if self.state == SubscriptionState::Creating {
                    true
                } else {
                    self.timer.interval_elapsed(now_instant)
                }
            }
        };
        if tick_reason == TickReason::TickTimerFired && !publishing_interval_elapsed {
            return TickOutcome::None;
        }
        self.tick_inner(now, tick_reason, publishing_req_queued, true)
    }

    fn tick_inner(
        &mut self,
        now: &DateTimeUtc,
        tick_reason: TickReason,
        publishing_req_queued: bool,
        interval_elapsed: bool,
    ) -> TickOutcome {
        self.has_monitored_item_notifications = self.source.has_notifications();
        let p = SubscriptionStateParams {
            notifications_available: self.has_monitored_item_notifications || self.resend_data,
            publishing_req_queued,
        };

        let transition = self.get_state_transition(tick_reason, interval_elapsed, &p);
        trace!(
            "subscription {} tick - transition {:?} from state {:?}",
            self.subscription_id,
            transition,
            self.state
        );
        let action = self.handle_state_transition(transition);

        match action {
            UpdateStateAction::None | UpdateStateAction::SubscriptionCreated => TickOutcome::None,
            UpdateStateAction::ReturnKeepAlive => TickOutcome::KeepAlive {
                next_sequence_number: self.sequence_number.peek(),
            },
            UpdateStateAction::ReturnNotifications => match self.produce_notification(now) {
                Some(message) => TickOutcome::Notification(message),
                None => {
                    // The source reported notifications but produced none. Nothing to send.
                    warn!(
                        "Subscription {} produced no message despite reporting notifications",
                        self.subscription_id
                    );
                    TickOutcome::None
                }
            },
            UpdateStateAction::SubscriptionExpired => {
                debug!("Subscription {} has expired", self.subscription_id);
                let message = NotificationMessage::status_change(
                    self.next_sequence_number(),
                    DateTime::from(*now),
                    StatusCode::BadTimeout,
                );
                TickOutcome::Expired(message)
            }
        }
    }

    /// Pulls a batch from the source, wraps it into a message, retains it and returns it for
    /// the engine to send.
    fn produce_notification(&mut self, now: &DateTimeUtc) -> Option<NotificationMessage> {
        self.resend_data = false;
        let mut notification_data = self
            .source
            .take_notifications(self.max_notifications_per_publish);
        if self.retained.take_notifications_lost() {
            // Tell the client that retained messages were dropped
            notification_data.insert(
                0,
                NotificationData::StatusChange(StatusChangeNotification {
                    status: StatusCode::BadOutOfMemory,
                }),
            );
        }
        if notification_data.is_empty() {
            return None;
        }
        let message = NotificationMessage::data_change(
            self.next_sequence_number(),
            DateTime::from(*now),
            notification_data,
        );
        self.retained.store(message.clone());
        Some(message)
    }

    /// Parks a message on the retained ring. The engine uses this for an expiry status change
    /// that had no publish request to travel on.
    pub(crate) fn park_notification(&mut self, message: NotificationMessage) {
        self.retained.store(message);
    }

    /// Assigns the next sequence number, asserting it stays sequential. Sequence numbers start
    /// from 1 and wrap to 1 - if that doesn't happen something went wrong somewhere.
    fn next_sequence_number(&mut self) -> u32 {
        let sequence_number = self.sequence_number.next();
        let expected = if self.last_sequence_number == u32::MAX {
            1
        } else {
            self.last_sequence_number + 1
        };
        if self.last_sequence_number != 0 && sequence_number != expected {
            panic!(
                "Sequence number is not sequential, expecting {}, got {}",
                expected, sequence_number
            );
        }
        self.last_sequence_number = sequence_number;
        sequence_number
    }

    // See OPC UA Part 4 5.13.1.2 State Table
    //
    // This function determines the row of the state transition table the tick falls in. The
    // exact layout is written to stay as close as possible to the state transition table so it
    // can be checked against the document - avoid cleaning up redundant checks.
    fn get_state_transition(
        &self,
        tick_reason: TickReason,
        interval_elapsed: bool,
        p: &SubscriptionStateParams,
    ) -> HandledState {
        match (self.state, tick_reason) {
            (SubscriptionState::Creating, _) => HandledState::Create3,
            (SubscriptionState::Normal, TickReason::ReceivePublishRequest)
                if !self.publishing_enabled
                    || self.publishing_enabled && !p.notifications_available =>
            {
                HandledState::Normal4
            }
            (SubscriptionState::Normal, TickReason::ReceivePublishRequest)
                if self.publishing_enabled && p.notifications_available =>
            {
                HandledState::Normal5
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if interval_elapsed
                    && p.publishing_req_queued
                    && self.publishing_enabled
                    && p.notifications_available =>
            {
                HandledState::IntervalElapsed6
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if interval_elapsed
                    && p.publishing_req_queued
                    && !self.message_sent
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::IntervalElapsed7
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if interval_elapsed
                    && !p.publishing_req_queued
                    && (!self.message_sent
                        || self.publishing_enabled && p.notifications_available) =>
            {
                HandledState::IntervalElapsed8
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if interval_elapsed
                    && self.message_sent
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::IntervalElapsed9
            }
            (SubscriptionState::Late, TickReason::ReceivePublishRequest)
                if self.publishing_enabled && p.notifications_available =>
            {
                HandledState::Late10
            }
            (SubscriptionState::Late, TickReason::ReceivePublishRequest)
                if !self.publishing_enabled
                    || self.publishing_enabled && !p.notifications_available =>
            {
                HandledState::Late11
            }
            // This check is not in the spec, but without it the lifetime counter won't behave
            // properly. This is probably an error in the standard.
            (SubscriptionState::Late, TickReason::TickTimerFired)
                if interval_elapsed && self.timer.lifetime_counter() > 1 =>
            {
                HandledState::Late12
            }
            (SubscriptionState::KeepAlive, TickReason::ReceivePublishRequest) => {
                HandledState::KeepAlive13
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if interval_elapsed
                    && self.publishing_enabled
                    && p.notifications_available
                    && p.publishing_req_queued =>
            {
                HandledState::KeepAlive14
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if interval_elapsed
                    && p.publishing_req_queued
                    && self.timer.keep_alive_counter() == 1
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::KeepAlive15
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if interval_elapsed
                    && self.timer.keep_alive_counter() > 1
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::KeepAlive16
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if interval_elapsed
                    && !p.publishing_req_queued
                    && (self.timer.keep_alive_counter() == 1
                        || self.timer.keep_alive_counter() > 1
                            && self.publishing_enabled
                            && p.notifications_available) =>
            {
                HandledState::KeepAlive17
            }
            (
                SubscriptionState::Normal | SubscriptionState::Late | SubscriptionState::KeepAlive,
                TickReason::TickTimerFired,
            ) if interval_elapsed && self.timer.lifetime_counter() <= 1 => HandledState::Closed27,
            _ => HandledState::None0,
        }
    }

    fn handle_state_transition(&mut self, transition: HandledState) -> UpdateStateAction {
        match transition {
            HandledState::None0 => UpdateStateAction::None,
            HandledState::Create3 => {
                self.state = SubscriptionState::Normal;
                self.message_sent = false;
                UpdateStateAction::SubscriptionCreated
            }
            HandledState::Normal4 => {
                // Publish request gets queued by the engine.
                UpdateStateAction::None
            }
            HandledState::Normal5 => {
                self.timer.reset_lifetime_counter();
                self.message_sent = true;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::IntervalElapsed6 => {
                self.timer.reset_lifetime_counter();
                self.timer.start_publishing_timer();
                self.message_sent = true;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::IntervalElapsed7 => {
                self.timer.reset_lifetime_counter();
                self.timer.start_publishing_timer();
                self.message_sent = true;
                UpdateStateAction::ReturnKeepAlive
            }
            HandledState::IntervalElapsed8 => {
                self.timer.start_publishing_timer();
                self.state = SubscriptionState::Late;
                UpdateStateAction::None
            }
            HandledState::IntervalElapsed9 => {
                self.timer.start_publishing_timer();
                self.timer.reset_keep_alive_counter();
                self.state = SubscriptionState::KeepAlive;
                UpdateStateAction::None
            }
            HandledState::Late10 => {
                self.timer.reset_lifetime_counter();
                self.message_sent = true;
                self.state = SubscriptionState::Normal;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::Late11 => {
                self.timer.reset_lifetime_counter();
                self.message_sent = true;
                self.state = SubscriptionState::KeepAlive;
                UpdateStateAction::ReturnKeepAlive
            }
            HandledState::Late12 => {
                self.timer.start_publishing_timer();
                UpdateStateAction::None
            }
            HandledState::KeepAlive13 => {
                // Publish request gets queued by the engine.
                UpdateStateAction::None
            }
            HandledState::KeepAlive14 => {
                self.timer.reset_lifetime_counter();
                self.timer.start_publishing_timer();
                self.message_sent = true;
                self.state = SubscriptionState::Normal;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::KeepAlive15 => {
                self.timer.start_publishing_timer();
                self.timer.reset_keep_alive_counter();
                UpdateStateAction::ReturnKeepAlive
            }
            HandledState::KeepAlive16 => {
                self.timer.start_publishing_timer();
                self.timer.decrement_keep_alive_counter();
                UpdateStateAction::None
            }
            HandledState::KeepAlive17 => {
                self.timer.start_publishing_timer();
                self.state = SubscriptionState::Late;
                UpdateStateAction::None
            }
            HandledState::Closed27 => {
                self.state = SubscriptionState::Closed;
                UpdateStateAction::SubscriptionExpired
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_state(&mut self, state: SubscriptionState) {
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn set_message_sent(&mut self, message_sent: bool) {
        self.message_sent = message_sent;
    }

    #[cfg(test)]
    pub(crate) fn timer_mut(&mut self) -> &mut SubscriptionTimer {
        &mut self.timer
    }

    #[cfg(test)]
    pub(crate) fn timer(&self) -> &SubscriptionTimer {
        &self.timer
    }
}
