// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::types::{PublishRequest, PublishResponse, StatusCode, SupportedMessage};

/// A publish request the engine has accepted but not yet answered. The one-shot sender is the
/// completion callback - the type system guarantees a request is answered at most once, and the
/// engine guarantees at least once.
pub struct PendingPublish {
    /// Completes the request. The receiving half may be dropped by the transport, in which case
    /// the send result is ignored.
    pub response: oneshot::Sender<SupportedMessage>,
    /// The request itself.
    pub request: Box<PublishRequest>,
    /// The result of clearing acknowledgments when the request was received.
    pub ack_results: Option<Vec<StatusCode>>,
    /// When the request was received, on the monotonic clock.
    pub received_at: Instant,
    /// The instant after which the request is answered with `BadTimeout`. None when the client
    /// sent no timeout hint.
    pub deadline: Option<Instant>,
}

impl PendingPublish {
    pub fn new(
        received_at: Instant,
        request: PublishRequest,
        ack_results: Option<Vec<StatusCode>>,
        response: oneshot::Sender<SupportedMessage>,
    ) -> Self {
        // A zero timeout hint disables the timeout
        let timeout_hint = request.request_header.timeout_hint;
        let deadline = if timeout_hint > 0 {
            Some(received_at + Duration::from_millis(timeout_hint as u64))
        } else {
            None
        };
        PendingPublish {
            response,
            request: Box::new(request),
            ack_results,
            received_at,
            deadline,
        }
    }
}

/// A publish response produced while no publish request was waiting. It is held back until the
/// next request arrives, which attaches that request's handle and acknowledgement results. Such
/// responses exist only while the request queue is empty.
pub(crate) struct PendingPublishResponse {
    pub subscription_id: u32,
    pub response: PublishResponse,
}

pub mod notification_ring;
pub mod publish_engine;
pub mod publish_queue;
pub mod subscription;
pub mod timer;

pub use publish_engine::PublishEngine;
pub use subscription::{NotificationSource, Subscription, SubscriptionState};
