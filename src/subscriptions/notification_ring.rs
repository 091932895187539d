// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the `NotificationRing` - the per subscription queue of sent notification messages
//! retained for republish until the client acknowledges them.

use std::collections::VecDeque;

use crate::types::{NotificationMessage, StatusCode};

/// Sent notification messages held in insertion (= sequence) order until acknowledged, popped
/// for redelivery, or evicted because the ring is full.
#[derive(Debug, Serialize)]
pub struct NotificationRing {
    /// Retained messages, oldest first. The u32 is the message's sequence number.
    entries: VecDeque<(u32, NotificationMessage)>,
    /// Maximum number of retained messages before the oldest is dropped.
    max_retained: usize,
    /// Set when a message was dropped unacknowledged. The subscription reports the loss on its
    /// next emitted message.
    notifications_lost: bool,
}

impl NotificationRing {
    pub fn new(max_retained: usize) -> NotificationRing {
        NotificationRing {
            entries: VecDeque::with_capacity(max_retained.min(64)),
            max_retained: max_retained.max(1),
            notifications_lost: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retains a message that has just been sent. Messages must be stored in the order their
    /// sequence numbers were assigned.
    pub fn store(&mut self, message: NotificationMessage) {
        if let Some((last, _)) = self.entries.back() {
            debug_assert_ne!(*last, message.sequence_number);
        }
        self.entries.push_back((message.sequence_number, message));
        if self.entries.len() > self.max_retained {
            let (sequence_number, _) = self.entries.pop_front().unwrap();
            warn!(
                "Retained notification limit {} exceeded, dropping unacknowledged sequence number {}",
                self.max_retained, sequence_number
            );
            self.notifications_lost = true;
        }
    }

    /// Acknowledges the supplied sequence number, releasing it and every older retained entry.
    /// Removal is positional rather than numeric so that acknowledgements keep working across
    /// the sequence number wrap.
    pub fn acknowledge(&mut self, sequence_number: u32) -> StatusCode {
        if sequence_number == 0 {
            // 0 is never assigned, even after a wrap
            StatusCode::BadSequenceNumberInvalid
        } else if let Some(idx) = self
            .entries
            .iter()
            .position(|(s, _)| *s == sequence_number)
        {
            trace!(
                "Removing notification sequence number {} and {} predecessors from the ring",
                sequence_number,
                idx
            );
            self.entries.drain(..=idx);
            StatusCode::Good
        } else {
            debug!(
                "Cannot find acknowledged notification with sequence number {}",
                sequence_number
            );
            StatusCode::BadSequenceNumberUnknown
        }
    }

    /// Returns the retained sequence numbers, in order, or None when nothing is retained.
    pub fn available_sequence_numbers(&self) -> Option<Vec<u32>> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.iter().map(|(s, _)| *s).collect())
        }
    }

    /// Removes and returns the oldest retained message. Used to drain closed subscriptions.
    pub fn pop_oldest(&mut self) -> Option<NotificationMessage> {
        self.entries.pop_front().map(|(_, message)| message)
    }

    /// Finds a retained message by sequence number, for republish.
    pub fn find(&self, sequence_number: u32) -> Option<&NotificationMessage> {
        self.entries
            .iter()
            .find(|(s, _)| *s == sequence_number)
            .map(|(_, message)| message)
    }

    /// Reads and clears the lost notification flag.
    pub fn take_notifications_lost(&mut self) -> bool {
        std::mem::take(&mut self.notifications_lost)
    }
}
