// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Configured limits on the publish engine.

use crate::constants;

/// Limits on the publish machinery of a single session. Each field falls back to its default
/// when absent from a configuration file.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishLimits {
    /// Maximum number of publish requests that may wait in the queue. One over the limit causes
    /// the oldest request to be answered with `BadTooManyPublishRequests`.
    #[serde(default = "defaults::max_publish_request_in_queue")]
    pub max_publish_request_in_queue: usize,
    /// Maximum number of notifications batched into a single publish response. 0 means no limit.
    #[serde(default = "defaults::max_notifications_per_publish")]
    pub max_notifications_per_publish: usize,
    /// How many publishes worth of notifications a subscription retains for republish. The
    /// retained queue holds `max_notifications_per_publish * max_republish_depth` messages at
    /// least.
    #[serde(default = "defaults::max_republish_depth")]
    pub max_republish_depth: usize,
}

impl Default for PublishLimits {
    fn default() -> Self {
        PublishLimits {
            max_publish_request_in_queue: defaults::max_publish_request_in_queue(),
            max_notifications_per_publish: defaults::max_notifications_per_publish(),
            max_republish_depth: defaults::max_republish_depth(),
        }
    }
}

impl PublishLimits {
    /// The number of retained notification messages a subscription may hold before the oldest
    /// is dropped.
    pub fn max_retained_notifications(&self) -> usize {
        let per_publish = if self.max_notifications_per_publish == 0 {
            constants::DEFAULT_MAX_NOTIFICATIONS_PER_PUBLISH
        } else {
            self.max_notifications_per_publish
        };
        per_publish * self.max_republish_depth.max(1)
    }
}

mod defaults {
    use crate::constants;

    pub fn max_publish_request_in_queue() -> usize {
        constants::DEFAULT_MAX_PUBLISH_REQUEST_QUEUE_SIZE
    }

    pub fn max_notifications_per_publish() -> usize {
        constants::DEFAULT_MAX_NOTIFICATIONS_PER_PUBLISH
    }

    pub fn max_republish_depth() -> usize {
        constants::DEFAULT_MAX_REPUBLISH_DEPTH
    }
}

#[cfg(test)]
mod tests {
    use super::PublishLimits;

    #[test]
    fn defaults() {
        let limits = PublishLimits::default();
        assert_eq!(limits.max_publish_request_in_queue, 100);
        assert_eq!(limits.max_notifications_per_publish, 100);
        assert_eq!(limits.max_republish_depth, 2);
        assert_eq!(limits.max_retained_notifications(), 200);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let limits: PublishLimits =
            serde_json::from_str(r#"{"max_publish_request_in_queue": 2}"#).unwrap();
        assert_eq!(limits.max_publish_request_in_queue, 2);
        assert_eq!(limits.max_notifications_per_publish, 100);
        assert_eq!(limits.max_republish_depth, 2);
    }
}
