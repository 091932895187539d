// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! The decoded OPC UA type surface the publish engine consumes and produces. The secure channel
//! and chunking layers live elsewhere; everything here is the structural form of the publish
//! service set plus the scalar building blocks those structures need.

pub mod data_value;
pub mod date_time;
pub mod encoding;
pub mod notification;
pub mod request_header;
pub mod response_header;
pub mod service_types;
pub mod status_code;
pub mod variant;

/// An identifier for a client request, echoed on the response.
pub type IntegerId = u32;

pub use data_value::DataValue;
pub use date_time::{DateTime, DateTimeUtc};
pub use encoding::{BinaryEncoder, DecodingOptions, EncodingResult};
pub use notification::{
    DataChangeNotification, EventFieldList, EventNotificationList, MonitoredItemNotification,
    NotificationData, NotificationMessage, StatusChangeNotification,
};
pub use request_header::RequestHeader;
pub use response_header::ResponseHeader;
pub use service_types::{
    PublishRequest, PublishResponse, ServiceFault, SubscriptionAcknowledgement, SupportedMessage,
};
pub use status_code::StatusCode;
pub use variant::Variant;
