// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the `SubscriptionTimer` - the publishing interval, keep alive and lifetime counter
//! state that paces a single subscription.

use std::time::{Duration, Instant};

use crate::constants;

/// Paces a subscription. The publishing interval is measured on the monotonic clock; the keep
/// alive and lifetime counters are measured in elapsed publishing intervals.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionTimer {
    /// The revised publishing interval.
    publishing_interval: Duration,
    /// The max lifetime count (not the current lifetime count).
    max_lifetime_count: u32,
    /// Keep alive count enforced.
    max_keep_alive_count: u32,
    /// A value that contains the number of consecutive publishing timer expirations without
    /// client activity before the subscription is terminated.
    lifetime_counter: u32,
    /// Keep alive counter decrements when there are no notifications to publish and when it
    /// expires requests to send an empty notification as a keep alive event.
    keep_alive_counter: u32,
    /// The time the publishing interval last elapsed.
    #[serde(skip)]
    last_interval_elapsed: Instant,
}

impl SubscriptionTimer {
    /// Creates a timer with revised values - the interval is clamped to the server's floor and
    /// the lifetime count must cover at least three keep alive periods.
    pub fn new(
        publishing_interval: Duration,
        lifetime_count: u32,
        keep_alive_count: u32,
        now: Instant,
    ) -> SubscriptionTimer {
        let publishing_interval = publishing_interval
            .max(Duration::from_millis(constants::MIN_PUBLISHING_INTERVAL_MS));
        let keep_alive_count = keep_alive_count
            .clamp(1, constants::MAX_KEEP_ALIVE_COUNT);
        let lifetime_count =
            lifetime_count.max(keep_alive_count * constants::MIN_LIFETIME_MULTIPLIER);
        SubscriptionTimer {
            publishing_interval,
            max_lifetime_count: lifetime_count,
            max_keep_alive_count: keep_alive_count,
            lifetime_counter: lifetime_count,
            keep_alive_counter: keep_alive_count,
            last_interval_elapsed: now,
        }
    }

    /// Tests if the publishing interval has elapsed since the last time this function returned
    /// true, in which case it updates its internal state.
    pub fn interval_elapsed(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_interval_elapsed);
        if elapsed >= self.publishing_interval {
            self.last_interval_elapsed = now;
            true
        } else {
            false
        }
    }

    /// Reset the keep-alive counter to the maximum keep-alive count of the Subscription.
    /// The maximum keep-alive count is set by the Client when the Subscription is created
    /// and may be modified using the ModifySubscription Service
    pub fn reset_keep_alive_counter(&mut self) {
        self.keep_alive_counter = self.max_keep_alive_count;
    }

    /// Reset the lifetime counter to the value specified for the life time of the subscription
    /// in the create subscription service
    pub fn reset_lifetime_counter(&mut self) {
        self.lifetime_counter = self.max_lifetime_count;
    }

    /// Start or restart the publishing timer and decrement the LifetimeCounter Variable.
    pub fn start_publishing_timer(&mut self) {
        self.lifetime_counter = self.lifetime_counter.saturating_sub(1);
        trace!("Decrementing life time counter {}", self.lifetime_counter);
    }

    pub fn decrement_keep_alive_counter(&mut self) {
        self.keep_alive_counter = self.keep_alive_counter.saturating_sub(1);
    }

    /// Publishing intervals remaining before the subscription expires.
    pub fn time_to_expiration(&self) -> u32 {
        self.lifetime_counter
    }

    /// Publishing intervals remaining before a keep alive is due.
    pub fn time_to_keep_alive(&self) -> u32 {
        self.keep_alive_counter
    }

    /// True when the lifetime counter has run down and the subscription must close.
    pub fn has_expired(&self) -> bool {
        self.lifetime_counter <= 1
    }

    pub fn keep_alive_counter(&self) -> u32 {
        self.keep_alive_counter
    }

    pub fn lifetime_counter(&self) -> u32 {
        self.lifetime_counter
    }

    pub fn publishing_interval(&self) -> Duration {
        self.publishing_interval
    }

    pub fn set_publishing_interval(&mut self, publishing_interval: Duration) {
        self.publishing_interval = publishing_interval
            .max(Duration::from_millis(constants::MIN_PUBLISHING_INTERVAL_MS));
        self.reset_lifetime_counter();
    }

    pub fn set_max_keep_alive_count(&mut self, max_keep_alive_count: u32) {
        self.max_keep_alive_count = max_keep_alive_count.clamp(1, constants::MAX_KEEP_ALIVE_COUNT);
    }

    pub fn set_max_lifetime_count(&mut self, max_lifetime_count: u32) {
        self.max_lifetime_count = max_lifetime_count
            .max(self.max_keep_alive_count * constants::MIN_LIFETIME_MULTIPLIER);
    }

    #[cfg(test)]
    pub(crate) fn set_lifetime_counter(&mut self, lifetime_counter: u32) {
        self.lifetime_counter = lifetime_counter;
    }

    #[cfg(test)]
    pub(crate) fn set_keep_alive_counter(&mut self, keep_alive_counter: u32) {
        self.keep_alive_counter = keep_alive_counter;
    }
}
