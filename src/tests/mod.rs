// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Helpers shared by the engine level scenario tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::config::PublishLimits;
use crate::subscriptions::publish_engine::PublishEngine;
use crate::subscriptions::subscription::{NotificationSource, Subscription};
use crate::sync::Mutex;
use crate::types::{
    DataChangeNotification, DataValue, DateTime, DateTimeUtc, MonitoredItemNotification,
    NotificationData, PublishRequest, PublishResponse, RequestHeader, ServiceFault,
    SubscriptionAcknowledgement, SupportedMessage,
};

mod publish_engine;
mod transfer;

/// Shared handle onto a scripted notification source. Values pushed through the handle come out
/// of the subscription's next emission.
#[derive(Clone, Default)]
pub struct SourceHandle {
    queue: Arc<Mutex<VecDeque<MonitoredItemNotification>>>,
    resend_requests: Arc<AtomicUsize>,
}

impl SourceHandle {
    pub fn push_value(&self, client_handle: u32, value: DataValue) {
        let mut queue = trace_lock!(self.queue);
        queue.push_back(MonitoredItemNotification {
            client_handle,
            value,
        });
    }

    pub fn resend_requests(&self) -> usize {
        self.resend_requests.load(Ordering::SeqCst)
    }
}

struct ScriptedSource {
    handle: SourceHandle,
}

impl NotificationSource for ScriptedSource {
    fn monitored_item_count(&self) -> usize {
        1
    }

    fn has_notifications(&self) -> bool {
        !trace_lock!(self.handle.queue).is_empty()
    }

    fn take_notifications(&mut self, max_notifications: usize) -> Vec<NotificationData> {
        let mut queue = trace_lock!(self.handle.queue);
        let take = if max_notifications == 0 {
            queue.len()
        } else {
            max_notifications.min(queue.len())
        };
        if take == 0 {
            return Vec::new();
        }
        let monitored_items: Vec<_> = queue.drain(..take).collect();
        vec![NotificationData::DataChange(DataChangeNotification {
            monitored_items: Some(monitored_items),
        })]
    }

    fn resend_initial_values(&mut self) {
        self.handle.resend_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sets up test logging, filtered through RUST_LOG as usual. Safe to call from every test -
/// only the first call installs the logger.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

pub fn make_engine(max_publish_request_in_queue: usize) -> PublishEngine {
    init_logging();
    PublishEngine::new(PublishLimits {
        max_publish_request_in_queue,
        ..Default::default()
    })
}

pub fn make_subscription(
    subscription_id: u32,
    priority: u8,
    limits: &PublishLimits,
) -> (Subscription, SourceHandle) {
    let handle = SourceHandle::default();
    let source = ScriptedSource {
        handle: handle.clone(),
    };
    let subscription = Subscription::new(
        subscription_id,
        true,
        Duration::from_millis(100),
        300,
        100,
        priority,
        limits,
        Box::new(source),
    );
    (subscription, handle)
}

pub fn publish_request(
    request_handle: u32,
    timeout_hint: u32,
    subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
) -> PublishRequest {
    PublishRequest {
        request_header: RequestHeader {
            timestamp: DateTime::now(),
            request_handle,
            return_diagnostics: 0,
            timeout_hint,
        },
        subscription_acknowledgements,
    }
}

pub fn send_publish(
    engine: &mut PublishEngine,
    now: &DateTimeUtc,
    now_instant: Instant,
    request: PublishRequest,
) -> oneshot::Receiver<SupportedMessage> {
    let (tx, rx) = oneshot::channel();
    engine.on_publish_request(now, now_instant, request, tx);
    rx
}

/// Advances both clocks by the supplied number of milliseconds.
pub fn offset(start: DateTimeUtc, start_instant: Instant, ms: u64) -> (DateTimeUtc, Instant) {
    (
        start + chrono::Duration::milliseconds(ms as i64),
        start_instant + Duration::from_millis(ms),
    )
}

pub fn expect_publish_response(rx: &mut oneshot::Receiver<SupportedMessage>) -> PublishResponse {
    match rx.try_recv().expect("Expected a response to have been delivered") {
        SupportedMessage::PublishResponse(response) => response,
        SupportedMessage::ServiceFault(fault) => panic!(
            "Expected a publish response, got a fault with {}",
            fault.response_header.service_result
        ),
    }
}

pub fn expect_service_fault(rx: &mut oneshot::Receiver<SupportedMessage>) -> ServiceFault {
    match rx.try_recv().expect("Expected a response to have been delivered") {
        SupportedMessage::ServiceFault(fault) => fault,
        SupportedMessage::PublishResponse(response) => panic!(
            "Expected a fault, got a publish response for subscription {}",
            response.subscription_id
        ),
    }
}

pub fn expect_no_response(rx: &mut oneshot::Receiver<SupportedMessage>) {
    assert!(
        rx.try_recv().is_err(),
        "Expected the request to still be pending"
    );
}
