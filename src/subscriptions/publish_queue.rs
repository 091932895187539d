// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the `PublishQueue` - the bounded FIFO of publish requests a session has sent and the
//! server has not answered yet, with their timeout bookkeeping.

use std::collections::VecDeque;
use std::time::Instant;

use crate::subscriptions::PendingPublish;

/// Publish requests waiting to be answered, oldest first. The queue itself only stores and
/// expires entries - responding to the evicted, timed out or cancelled requests is the engine's
/// business.
pub struct PublishQueue {
    queue: VecDeque<PendingPublish>,
    /// Maximum number of queued requests. The queue may momentarily hold one more, until the
    /// engine calls `evict_over_capacity`.
    max_publish_requests: usize,
}

impl PublishQueue {
    pub fn new(max_publish_requests: usize) -> PublishQueue {
        PublishQueue {
            queue: VecDeque::with_capacity(max_publish_requests.min(64)),
            max_publish_requests: max_publish_requests.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn max_publish_requests(&self) -> usize {
        self.max_publish_requests
    }

    /// Appends a request. Admission never rejects - the engine gives feeders a chance to consume
    /// the queue before enforcing the bound.
    pub fn enqueue(&mut self, entry: PendingPublish) {
        self.queue.push_back(entry);
    }

    /// Removes and returns the oldest request.
    pub fn dequeue(&mut self) -> Option<PendingPublish> {
        self.queue.pop_front()
    }

    /// Removes and returns the oldest request if the queue is over its bound. Called after the
    /// feed steps of an admission so the bound holds when the engine returns to its caller.
    pub fn evict_over_capacity(&mut self) -> Option<PendingPublish> {
        if self.queue.len() > self.max_publish_requests {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Removes and returns every request whose deadline has passed. Requests without a timeout
    /// hint never expire.
    pub fn purge_timed_out(&mut self, now: Instant) -> Vec<PendingPublish> {
        if self.queue.is_empty() {
            return Vec::new();
        }
        let mut expired = Vec::new();
        let mut idx = 0;
        while idx < self.queue.len() {
            let timed_out = match self.queue[idx].deadline {
                Some(deadline) => deadline < now,
                None => false,
            };
            if timed_out {
                expired.push(self.queue.remove(idx).unwrap());
            } else {
                idx += 1;
            }
        }
        expired
    }

    /// Removes and returns every queued request, oldest first. Used when the session or secure
    /// channel goes away.
    pub fn cancel_all(&mut self) -> Vec<PendingPublish> {
        self.queue.drain(..).collect()
    }
}
