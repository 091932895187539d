// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

use std::time::Instant;

use chrono::Utc;

use super::*;
use crate::subscriptions::subscription::SubscriptionState;
use crate::types::StatusCode;

/// A publish request paired with a data change produced on the next tick.
#[test]
fn publish_request_answered_by_notification() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    // First tick takes the subscription out of creating
    engine.tick(&start_dt, start);
    assert_eq!(
        engine.get(1).unwrap().state(),
        SubscriptionState::Normal
    );

    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(42, 5000, None));
    expect_no_response(&mut rx);
    assert_eq!(engine.pending_publish_request_count(), 1);

    source.push_value(100, DataValue::new_now(1234i32));
    let (now, now_instant) = offset(start_dt, start, 200);
    engine.tick(&now, now_instant);

    let response = expect_publish_response(&mut rx);
    assert_eq!(response.response_header.request_handle, 42);
    assert_eq!(response.response_header.service_result, StatusCode::Good);
    assert_eq!(response.subscription_id, 1);
    assert_eq!(response.available_sequence_numbers, Some(vec![1]));
    assert!(!response.more_notifications);
    assert_eq!(response.notification_message.sequence_number, 1);
    assert_eq!(response.notification_message.data_change_notifications().len(), 1);

    assert_eq!(engine.pending_publish_request_count(), 0);
    assert_eq!(engine.pending_publish_response_count(), 0);
}

/// One over the queue limit answers the oldest request with BadTooManyPublishRequests.
#[test]
fn too_many_publish_requests() {
    let mut engine = make_engine(2);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx1 = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    let mut rx2 = send_publish(&mut engine, &start_dt, start, publish_request(2, 0, None));
    assert_eq!(engine.pending_publish_request_count(), 2);

    let mut rx3 = send_publish(&mut engine, &start_dt, start, publish_request(3, 0, None));
    let fault = expect_service_fault(&mut rx1);
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BadTooManyPublishRequests
    );
    assert_eq!(fault.response_header.request_handle, 1);
    // The younger requests are still queued
    expect_no_response(&mut rx2);
    expect_no_response(&mut rx3);
    assert_eq!(engine.pending_publish_request_count(), 2);
}

/// A publish request against an engine with no subscriptions at all is refused at once.
#[test]
fn no_subscription() {
    let mut engine = make_engine(100);
    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(7, 0, None));
    let fault = expect_service_fault(&mut rx);
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BadNoSubscription
    );
    assert_eq!(fault.response_header.request_handle, 7);
}

/// A closed subscription's unacknowledged notifications are still delivered to later publish
/// requests, one per request, before the engine starts refusing them.
#[test]
fn closed_subscription_drains_retained_notifications() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    engine.tick(&start_dt, start);

    // Deliver two messages, acknowledge neither
    source.push_value(1, DataValue::new_now(1i32));
    let mut rx1 = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    let (now, now_instant) = offset(start_dt, start, 200);
    engine.tick(&now, now_instant);
    assert_eq!(expect_publish_response(&mut rx1).notification_message.sequence_number, 1);

    source.push_value(1, DataValue::new_now(2i32));
    let mut rx2 = send_publish(&mut engine, &now, now_instant, publish_request(2, 0, None));
    let (now, now_instant) = offset(start_dt, start, 400);
    engine.tick(&now, now_instant);
    let response = expect_publish_response(&mut rx2);
    assert_eq!(response.notification_message.sequence_number, 2);
    assert_eq!(response.available_sequence_numbers, Some(vec![1, 2]));

    engine.on_close_subscription(&now, 1);
    assert_eq!(engine.subscription_count(), 0);
    assert_eq!(engine.closed_subscription_count(), 1);

    // Each new request drains one retained message, oldest first
    let mut rx3 = send_publish(&mut engine, &now, now_instant, publish_request(3, 0, None));
    let response = expect_publish_response(&mut rx3);
    assert_eq!(response.subscription_id, 1);
    assert_eq!(response.notification_message.sequence_number, 1);
    assert_eq!(response.available_sequence_numbers, Some(vec![2]));
    assert!(response.more_notifications);

    let mut rx4 = send_publish(&mut engine, &now, now_instant, publish_request(4, 0, None));
    let response = expect_publish_response(&mut rx4);
    assert_eq!(response.notification_message.sequence_number, 2);
    assert_eq!(response.available_sequence_numbers, None);
    assert!(!response.more_notifications);
    assert_eq!(engine.closed_subscription_count(), 0);

    let mut rx5 = send_publish(&mut engine, &now, now_instant, publish_request(5, 0, None));
    let fault = expect_service_fault(&mut rx5);
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BadNoSubscription
    );
}

/// The tick answers requests whose timeout hint has passed with BadTimeout.
#[test]
fn publish_request_timeout() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(11, 1000, None));
    expect_no_response(&mut rx);

    let (now, now_instant) = offset(start_dt, start, 1500);
    engine.tick(&now, now_instant);
    let fault = expect_service_fault(&mut rx);
    assert_eq!(fault.response_header.service_result, StatusCode::BadTimeout);
    assert_eq!(fault.response_header.request_handle, 11);
    assert_eq!(engine.pending_publish_request_count(), 0);
}

/// A request without a timeout hint never times out.
#[test]
fn no_timeout_hint_never_expires() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    let (now, now_instant) = offset(start_dt, start, 3_600_000);
    engine.tick(&now, now_instant);
    expect_no_response(&mut rx);
}

/// An idle subscription that has never published sends a keep alive on its first interval.
#[test]
fn keep_alive_on_first_interval() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    engine.tick(&start_dt, start);

    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(9, 0, None));
    let (now, now_instant) = offset(start_dt, start, 200);
    engine.tick(&now, now_instant);

    let response = expect_publish_response(&mut rx);
    assert!(response.notification_message.is_keep_alive());
    // A keep alive carries the sequence number the next real notification will use
    assert_eq!(response.notification_message.sequence_number, 1);
    assert_eq!(response.available_sequence_numbers, None);
    assert!(!response.more_notifications);
    assert!(engine.get(1).unwrap().message_sent());
}

/// Acknowledgements on a request are applied before anything is delivered through it.
#[test]
fn acknowledgements_release_retained_notifications() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    engine.tick(&start_dt, start);

    // Two delivered, unacknowledged messages
    for (i, handle) in [(1i32, 1u32), (2i32, 2u32)] {
        source.push_value(1, DataValue::new_now(i));
        let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(handle, 0, None));
        let (now, now_instant) = offset(start_dt, start, 200 * handle as u64);
        engine.tick(&now, now_instant);
        let _ = expect_publish_response(&mut rx);
    }

    // The third request acknowledges sequence number 1 and names a bogus subscription
    source.push_value(1, DataValue::new_now(3i32));
    let (now, now_instant) = offset(start_dt, start, 600);
    let acks = vec![
        SubscriptionAcknowledgement {
            subscription_id: 1,
            sequence_number: 1,
        },
        SubscriptionAcknowledgement {
            subscription_id: 99,
            sequence_number: 1,
        },
    ];
    let mut rx = send_publish(
        &mut engine,
        &now,
        now_instant,
        publish_request(3, 0, Some(acks)),
    );
    let (now, now_instant) = offset(start_dt, start, 800);
    engine.tick(&now, now_instant);

    let response = expect_publish_response(&mut rx);
    assert_eq!(
        response.results,
        Some(vec![StatusCode::Good, StatusCode::BadSubscriptionIdInvalid])
    );
    // Sequence number 1 is gone from the retained set
    assert_eq!(response.available_sequence_numbers, Some(vec![2, 3]));
    assert_eq!(response.notification_message.sequence_number, 3);
}

/// Session closure cancels pending requests and refuses later ones.
#[test]
fn session_close_cancels_pending_requests() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx1 = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    engine.on_session_close();

    let fault = expect_service_fault(&mut rx1);
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BadSessionClosed
    );
    assert!(engine.is_session_closed());

    let mut rx2 = send_publish(&mut engine, &start_dt, start, publish_request(2, 0, None));
    let fault = expect_service_fault(&mut rx2);
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BadSessionClosed
    );
}

/// A channel renegotiation cancels pending requests with BadSecureChannelClosed but leaves the
/// session usable.
#[test]
fn channel_change_cancels_pending_requests() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx1 = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    engine.cancel_pending_publish_request_before_channel_change();

    let fault = expect_service_fault(&mut rx1);
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BadSecureChannelClosed
    );

    // The session is still alive - a new request on the new channel queues as usual
    let mut rx2 = send_publish(&mut engine, &start_dt, start, publish_request(2, 0, None));
    expect_no_response(&mut rx2);
    assert_eq!(engine.pending_publish_request_count(), 1);
}

/// A late subscription that has never delivered takes precedence over a higher priority one.
#[test]
fn late_feed_prefers_first_publish() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription1, source1) = make_subscription(1, 0, &limits);
    let (subscription2, source2) = make_subscription(2, 200, &limits);
    engine.add_subscription(subscription1);
    engine.add_subscription(subscription2);

    {
        let subscription1 = engine.get_mut(1).unwrap();
        subscription1.set_state(SubscriptionState::Late);
        let subscription2 = engine.get_mut(2).unwrap();
        subscription2.set_state(SubscriptionState::Late);
        subscription2.set_message_sent(true);
    }
    source1.push_value(1, DataValue::new_now(1i32));
    source2.push_value(1, DataValue::new_now(2i32));

    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    let response = expect_publish_response(&mut rx);
    // Subscription 2 has the higher priority but subscription 1 never delivered anything
    assert_eq!(response.subscription_id, 1);
}

/// Among late subscriptions that have delivered before, the highest priority wins.
#[test]
fn late_feed_serves_highest_priority() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription1, source1) = make_subscription(1, 0, &limits);
    let (subscription2, source2) = make_subscription(2, 200, &limits);
    engine.add_subscription(subscription1);
    engine.add_subscription(subscription2);

    for id in [1, 2] {
        let subscription = engine.get_mut(id).unwrap();
        subscription.set_state(SubscriptionState::Late);
        subscription.set_message_sent(true);
    }
    source1.push_value(1, DataValue::new_now(1i32));
    source2.push_value(1, DataValue::new_now(2i32));

    let start = Instant::now();
    let start_dt = Utc::now();
    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    let response = expect_publish_response(&mut rx);
    assert_eq!(response.subscription_id, 2);
    // The request was consumed by the feed, not queued
    assert_eq!(engine.pending_publish_request_count(), 0);
}

/// Lifetime expiry closes the subscription and the status change reaches the client through the
/// closed drain path when no request is waiting.
#[test]
fn lifetime_expiry_reports_status_change() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    {
        let subscription = engine.get_mut(1).unwrap();
        subscription.set_state(SubscriptionState::Late);
        subscription.timer_mut().set_lifetime_counter(1);
    }
    let (now, now_instant) = offset(start_dt, start, 200);
    engine.tick(&now, now_instant);
    assert_eq!(engine.subscription_count(), 0);
    assert_eq!(engine.closed_subscription_count(), 1);

    let mut rx = send_publish(&mut engine, &now, now_instant, publish_request(1, 0, None));
    let response = expect_publish_response(&mut rx);
    let status_changes = response.notification_message.status_change_notifications();
    assert_eq!(status_changes.len(), 1);
    assert_eq!(status_changes[0].status, StatusCode::BadTimeout);

    let mut rx = send_publish(&mut engine, &now, now_instant, publish_request(2, 0, None));
    let fault = expect_service_fault(&mut rx);
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BadNoSubscription
    );
}

/// Republish finds retained messages in the live map and the closed drain list.
#[test]
fn republish_finds_retained_messages() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    engine.tick(&start_dt, start);
    source.push_value(1, DataValue::new_now(1i32));
    let mut rx = send_publish(&mut engine, &start_dt, start, publish_request(1, 0, None));
    let (now, now_instant) = offset(start_dt, start, 200);
    engine.tick(&now, now_instant);
    let _ = expect_publish_response(&mut rx);

    assert_eq!(
        engine.find_notification_message(1, 1).unwrap().sequence_number,
        1
    );
    assert_eq!(
        engine.find_notification_message(1, 9).unwrap_err(),
        StatusCode::BadMessageNotAvailable
    );
    assert_eq!(
        engine.find_notification_message(99, 1).unwrap_err(),
        StatusCode::BadSubscriptionIdInvalid
    );

    // Still available for republish after the subscription closes
    engine.on_close_subscription(&now, 1);
    assert_eq!(
        engine.find_notification_message(1, 1).unwrap().sequence_number,
        1
    );
}

#[test]
fn shutdown_discards_queues() {
    let mut engine = make_engine(100);
    engine.shutdown();
    assert!(engine.is_shutdown());
    assert_eq!(engine.pending_publish_request_count(), 0);
    assert_eq!(engine.pending_publish_response_count(), 0);
}

#[test]
#[should_panic]
fn shutdown_with_subscriptions_panics() {
    let mut engine = make_engine(100);
    let limits = *engine.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine.add_subscription(subscription);
    engine.shutdown();
}

/// The polling timer drives the engine - a request with a timeout hint is eventually answered
/// with BadTimeout without anyone calling tick by hand.
#[tokio::test]
async fn polling_action_ticks_engine() {
    use crate::sync::RwLock;
    use crate::util::PollingAction;
    use std::sync::Arc;

    let engine = {
        let mut engine = make_engine(100);
        let limits = *engine.limits();
        let (subscription, _source) = make_subscription(1, 0, &limits);
        engine.add_subscription(subscription);
        Arc::new(RwLock::new(engine))
    };

    let mut rx = {
        let mut engine = trace_write_lock!(engine);
        send_publish(
            &mut engine,
            &Utc::now(),
            Instant::now(),
            publish_request(5, 100, None),
        )
    };

    let _action = PollingAction::spawn(engine.clone(), 50);
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    let fault = expect_service_fault(&mut rx);
    assert_eq!(fault.response_header.service_result, StatusCode::BadTimeout);
    assert_eq!(
        trace_read_lock!(engine).pending_publish_request_count(),
        0
    );
}

#[test]
#[should_panic]
fn detach_unknown_subscription_panics() {
    let mut engine = make_engine(100);
    let _ = engine.detach_subscription(99);
}

#[test]
fn detach_and_reattach_moves_back_reference() {
    let mut engine1 = make_engine(100);
    let mut engine2 = make_engine(100);
    let limits = *engine1.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine1.add_subscription(subscription);
    assert_eq!(
        engine1.get(1).unwrap().publish_engine(),
        Some(engine1.engine_id())
    );
    let subscription = engine1.detach_subscription(1);
    assert!(subscription.publish_engine().is_none());
    engine2.add_subscription(subscription);
    assert_eq!(
        engine2.get(1).unwrap().publish_engine(),
        Some(engine2.engine_id())
    );
}
