// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! The publish engine module contains the server side publish / subscription machinery -
//! subscriptions, their state machines, the retained notification queues and the engine that
//! pairs client `PublishRequest`s with the notifications that subscriptions produce.
//!
//! The transport, address space, monitored item sampling and session management all live
//! elsewhere. This crate consumes decoded `PublishRequest` structs and completes each one with a
//! decoded `PublishResponse` or `ServiceFault` through a one-shot channel.

#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate serde_derive;

/// Tracing macro for obtaining a lock on a `Mutex`. Sometimes deadlocks can happen in code,
/// and if they do, this macro is useful for finding out where they happened.
#[macro_export]
macro_rules! trace_lock {
    ( $x:expr ) => {{
        let v = $x.lock();
        v
    }};
}

/// Tracing macro for obtaining a read lock on a `RwLock`.
#[macro_export]
macro_rules! trace_read_lock {
    ( $x:expr ) => {{
        let v = $x.read();
        v
    }};
}

/// Tracing macro for obtaining a write lock on a `RwLock`.
#[macro_export]
macro_rules! trace_write_lock {
    ( $x:expr ) => {{
        let v = $x.write();
        v
    }};
}

pub mod config;
pub mod core;
pub mod subscriptions;
pub mod sync;
pub mod types;
pub mod util;

pub mod prelude {
    pub use crate::config::PublishLimits;
    pub use crate::subscriptions::notification_ring::NotificationRing;
    pub use crate::subscriptions::publish_engine::PublishEngine;
    pub use crate::subscriptions::publish_queue::PublishQueue;
    pub use crate::subscriptions::subscription::{
        NotificationSource, Subscription, SubscriptionState,
    };
    pub use crate::subscriptions::PendingPublish;
    pub use crate::types::*;
}

/// Constants that govern the internal workings of the publish engine.
pub mod constants {
    /// Default maximum number of publish requests that may wait in a session's queue before the
    /// oldest is evicted with `BadTooManyPublishRequests`.
    pub const DEFAULT_MAX_PUBLISH_REQUEST_QUEUE_SIZE: usize = 100;
    /// Default maximum number of notifications batched into a single publish response.
    pub const DEFAULT_MAX_NOTIFICATIONS_PER_PUBLISH: usize = 100;
    /// Default number of unacknowledged messages retained per subscription, as a multiple of
    /// the max notifications per publish.
    pub const DEFAULT_MAX_REPUBLISH_DEPTH: usize = 2;
    /// The polling interval in millis on subscriptions. The more finegrained this is, the more
    /// often subscriptions will be checked for changes. The minimum publish interval cannot be
    /// less than this.
    pub const SUBSCRIPTION_TIMER_RATE_MS: u64 = 100;
    /// Minimum publishing interval for subscriptions in millis.
    pub const MIN_PUBLISHING_INTERVAL_MS: u64 = SUBSCRIPTION_TIMER_RATE_MS;
    /// Default keep alive count.
    pub const DEFAULT_KEEP_ALIVE_COUNT: u32 = 10;
    /// Maximum keep alive count.
    pub const MAX_KEEP_ALIVE_COUNT: u32 = 30000;
    /// Lifetime count must be at least this multiple of the keep alive count.
    pub const MIN_LIFETIME_MULTIPLIER: u32 = 3;
}

#[cfg(test)]
mod tests;
