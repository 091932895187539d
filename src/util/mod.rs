// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Provides the polling timer that drives the publish engine's ticks.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval_at, Duration, Instant};

use crate::subscriptions::publish_engine::PublishEngine;
use crate::sync::RwLock;

/// This is a convenience for a polling action. This struct starts a repeating timer that ticks
/// the supplied engine until the engine shuts down. All engine mutation happens under the lock,
/// on the runtime this was spawned on - the engine itself stays single threaded.
pub struct PollingAction {}

impl PollingAction {
    pub fn spawn(engine: Arc<RwLock<PublishEngine>>, interval_ms: u64) -> PollingAction {
        tokio::spawn(async move {
            let mut timer = interval_at(Instant::now(), Duration::from_millis(interval_ms));
            loop {
                timer.tick().await;
                {
                    let mut engine = trace_write_lock!(engine);
                    if engine.is_shutdown() {
                        debug!("Polling action is stopping, the engine has shut down");
                        break;
                    }
                    engine.tick(&Utc::now(), std::time::Instant::now());
                }
            }
        });
        PollingAction {}
    }
}
