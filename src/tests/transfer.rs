// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

use std::time::Instant;

use chrono::Utc;

use super::*;
use crate::subscriptions::publish_engine::PublishEngine;
use crate::types::StatusCode;

/// A transfer moves the subscription with its retained messages, resets its lifetime, requests
/// an initial value snapshot and tells the old session through a status change.
#[test]
fn transfer_preserves_state_and_notifies_source_session() {
    let mut engine1 = make_engine(100);
    let mut engine2 = make_engine(100);
    let limits = *engine1.limits();
    let (subscription, source) = make_subscription(1, 0, &limits);
    engine1.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    engine1.tick(&start_dt, start);

    // Deliver one message so sequence number 1 is retained
    source.push_value(1, DataValue::new_now(1i32));
    let mut rx = send_publish(&mut engine1, &start_dt, start, publish_request(1, 0, None));
    let (now, now_instant) = offset(start_dt, start, 200);
    engine1.tick(&now, now_instant);
    let _ = expect_publish_response(&mut rx);
    // Producing the message consumed one lifetime tick
    assert_eq!(engine1.get(1).unwrap().time_to_expiration(), 299);

    PublishEngine::transfer(&mut engine1, &mut engine2, &now, 1, true).unwrap();

    assert_eq!(engine1.subscription_count(), 0);
    assert_eq!(engine2.subscription_count(), 1);
    let subscription = engine2.get(1).unwrap();
    assert_eq!(subscription.publish_engine(), Some(engine2.engine_id()));
    // Lifetime was reset and the initial value snapshot was requested exactly once
    assert_eq!(subscription.time_to_expiration(), 300);
    assert_eq!(source.resend_requests(), 1);
    // Retained messages moved with the subscription
    assert_eq!(subscription.available_sequence_numbers(), Some(vec![1]));

    // The old session had no request waiting, so the status change is held back for its next
    // publish
    assert_eq!(engine1.pending_publish_response_count(), 1);
    let mut rx = send_publish(&mut engine1, &now, now_instant, publish_request(55, 0, None));
    let response = expect_publish_response(&mut rx);
    assert_eq!(response.response_header.request_handle, 55);
    assert_eq!(response.subscription_id, 1);
    let status_changes = response.notification_message.status_change_notifications();
    assert_eq!(status_changes.len(), 1);
    assert_eq!(
        status_changes[0].status,
        StatusCode::GoodSubscriptionTransferred
    );
    assert_eq!(engine1.pending_publish_response_count(), 0);

    // Either queue may hold entries, never both
    assert!(
        engine1.pending_publish_request_count() == 0
            || engine1.pending_publish_response_count() == 0
    );
}

/// When the old session has a publish request waiting, the transfer status change goes out on
/// it immediately.
#[test]
fn transfer_answers_waiting_request_with_status_change() {
    let mut engine1 = make_engine(100);
    let mut engine2 = make_engine(100);
    let limits = *engine1.limits();
    let (subscription, _source) = make_subscription(1, 0, &limits);
    engine1.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    engine1.tick(&start_dt, start);
    let mut rx = send_publish(&mut engine1, &start_dt, start, publish_request(21, 0, None));
    expect_no_response(&mut rx);

    PublishEngine::transfer(&mut engine1, &mut engine2, &start_dt, 1, false).unwrap();

    let response = expect_publish_response(&mut rx);
    assert_eq!(response.response_header.request_handle, 21);
    let status_changes = response.notification_message.status_change_notifications();
    assert_eq!(
        status_changes[0].status,
        StatusCode::GoodSubscriptionTransferred
    );
    assert_eq!(engine1.pending_publish_response_count(), 0);
    // Initial values were not requested
    assert_eq!(_source.resend_requests(), 0);
}

/// The transferred subscription keeps publishing on the destination with an unbroken sequence.
#[test]
fn transferred_subscription_continues_sequence() {
    let mut engine1 = make_engine(100);
    let mut engine2 = make_engine(100);
    let limits = *engine1.limits();
    let (subscription, source) = make_subscription(1, 0, &limits);
    engine1.add_subscription(subscription);

    let start = Instant::now();
    let start_dt = Utc::now();
    engine1.tick(&start_dt, start);
    source.push_value(1, DataValue::new_now(1i32));
    let mut rx = send_publish(&mut engine1, &start_dt, start, publish_request(1, 0, None));
    let (now, now_instant) = offset(start_dt, start, 200);
    engine1.tick(&now, now_instant);
    assert_eq!(expect_publish_response(&mut rx).notification_message.sequence_number, 1);

    PublishEngine::transfer(&mut engine1, &mut engine2, &now, 1, false).unwrap();

    source.push_value(1, DataValue::new_now(2i32));
    let mut rx = send_publish(&mut engine2, &now, now_instant, publish_request(2, 0, None));
    let (now, now_instant) = offset(start_dt, start, 400);
    engine2.tick(&now, now_instant);
    let response = expect_publish_response(&mut rx);
    // The transfer status change did not consume a sequence number
    assert_eq!(response.notification_message.sequence_number, 2);
    assert_eq!(response.available_sequence_numbers, Some(vec![1, 2]));
}

#[test]
fn transfer_unknown_subscription() {
    let mut engine1 = make_engine(100);
    let mut engine2 = make_engine(100);
    assert_eq!(
        PublishEngine::transfer(&mut engine1, &mut engine2, &Utc::now(), 1, false).unwrap_err(),
        StatusCode::BadSubscriptionIdInvalid
    );
}

/// transfer_all moves every subscription in id order and leaves the source empty.
#[test]
fn transfer_all_moves_everything() {
    let mut engine1 = make_engine(100);
    let mut engine2 = make_engine(100);
    let limits = *engine1.limits();
    for id in [1, 2, 3] {
        let (subscription, _source) = make_subscription(id, 0, &limits);
        engine1.add_subscription(subscription);
    }
    let start_dt = Utc::now();
    PublishEngine::transfer_all(&mut engine1, &mut engine2, &start_dt, false);
    assert_eq!(engine1.subscription_count(), 0);
    assert_eq!(engine2.subscription_count(), 3);
    for id in [1, 2, 3] {
        assert_eq!(
            engine2.get(id).unwrap().publish_engine(),
            Some(engine2.engine_id())
        );
    }
    // Three status changes are waiting for the source session, one per subscription
    assert_eq!(engine1.pending_publish_response_count(), 3);
}