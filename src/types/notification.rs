// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains `NotificationMessage` and the notification payloads it can carry. The payloads are a
//! tagged enum encoded with the object id of the corresponding OPC UA binary encoding, which
//! spares this crate the extension object indirection of the full stack.

use std::io::{Read, Write};

use crate::types::{
    data_value::DataValue, date_time::DateTime, encoding::*, status_code::StatusCode,
    variant::Variant,
};

/// Object ids of the binary encodings for the notification payloads.
mod object_id {
    pub const DATA_CHANGE_NOTIFICATION: u32 = 811;
    pub const STATUS_CHANGE_NOTIFICATION: u32 = 820;
    pub const EVENT_NOTIFICATION_LIST: u32 = 916;
}

/// A value change for a single monitored item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoredItemNotification {
    /// The client supplied handle of the monitored item.
    pub client_handle: u32,
    /// The sampled value.
    pub value: DataValue,
}

impl BinaryEncoder<MonitoredItemNotification> for MonitoredItemNotification {
    fn byte_len(&self) -> usize {
        self.client_handle.byte_len() + self.value.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = self.client_handle.encode(stream)?;
        size += self.value.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let client_handle = u32::decode(stream, decoding_options)?;
        let value = DataValue::decode(stream, decoding_options)?;
        Ok(MonitoredItemNotification {
            client_handle,
            value,
        })
    }
}

/// The fields of an event for a single monitored item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFieldList {
    /// The client supplied handle of the monitored item.
    pub client_handle: u32,
    /// The selected event field values.
    pub event_fields: Option<Vec<Variant>>,
}

impl BinaryEncoder<EventFieldList> for EventFieldList {
    fn byte_len(&self) -> usize {
        self.client_handle.byte_len() + byte_len_array(&self.event_fields)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = self.client_handle.encode(stream)?;
        size += write_array(stream, &self.event_fields)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let client_handle = u32::decode(stream, decoding_options)?;
        let event_fields = read_array(stream, decoding_options)?;
        Ok(EventFieldList {
            client_handle,
            event_fields,
        })
    }
}

/// A batch of monitored item value changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataChangeNotification {
    pub monitored_items: Option<Vec<MonitoredItemNotification>>,
}

impl BinaryEncoder<DataChangeNotification> for DataChangeNotification {
    fn byte_len(&self) -> usize {
        byte_len_array(&self.monitored_items)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_array(stream, &self.monitored_items)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let monitored_items = read_array(stream, decoding_options)?;
        Ok(DataChangeNotification { monitored_items })
    }
}

/// A batch of monitored item events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventNotificationList {
    pub events: Option<Vec<EventFieldList>>,
}

impl BinaryEncoder<EventNotificationList> for EventNotificationList {
    fn byte_len(&self) -> usize {
        byte_len_array(&self.events)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_array(stream, &self.events)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let events = read_array(stream, decoding_options)?;
        Ok(EventNotificationList { events })
    }
}

/// Notifies the client that the subscription itself changed state, e.g. it timed out or was
/// transferred to another session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChangeNotification {
    pub status: StatusCode,
}

impl BinaryEncoder<StatusChangeNotification> for StatusChangeNotification {
    fn byte_len(&self) -> usize {
        self.status.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.status.encode(stream)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let status = StatusCode::decode(stream, decoding_options)?;
        Ok(StatusChangeNotification { status })
    }
}

/// One entry of a notification message. On the wire each entry is prefixed with the object id of
/// its binary encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NotificationData {
    DataChange(DataChangeNotification),
    Events(EventNotificationList),
    StatusChange(StatusChangeNotification),
}

impl BinaryEncoder<NotificationData> for NotificationData {
    fn byte_len(&self) -> usize {
        4 + match self {
            NotificationData::DataChange(ref v) => v.byte_len(),
            NotificationData::Events(ref v) => v.byte_len(),
            NotificationData::StatusChange(ref v) => v.byte_len(),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = match self {
            NotificationData::DataChange(_) => {
                write_u32(stream, object_id::DATA_CHANGE_NOTIFICATION)?
            }
            NotificationData::Events(_) => write_u32(stream, object_id::EVENT_NOTIFICATION_LIST)?,
            NotificationData::StatusChange(_) => {
                write_u32(stream, object_id::STATUS_CHANGE_NOTIFICATION)?
            }
        };
        size += match self {
            NotificationData::DataChange(ref v) => v.encode(stream)?,
            NotificationData::Events(ref v) => v.encode(stream)?,
            NotificationData::StatusChange(ref v) => v.encode(stream)?,
        };
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let object_id = read_u32(stream)?;
        match object_id {
            object_id::DATA_CHANGE_NOTIFICATION => Ok(NotificationData::DataChange(
                DataChangeNotification::decode(stream, decoding_options)?,
            )),
            object_id::EVENT_NOTIFICATION_LIST => Ok(NotificationData::Events(
                EventNotificationList::decode(stream, decoding_options)?,
            )),
            object_id::STATUS_CHANGE_NOTIFICATION => Ok(NotificationData::StatusChange(
                StatusChangeNotification::decode(stream, decoding_options)?,
            )),
            _ => {
                error!("Notification data object id {} is not recognized", object_id);
                Err(StatusCode::BadDecodingError)
            }
        }
    }
}

/// A batch of notifications attributed to one subscription, identified by its sequence number.
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    /// Sequence number of the message, starting from 1 and never 0 even after wrapping.
    pub sequence_number: u32,
    /// The time the message was produced.
    pub publish_time: DateTime,
    /// The notification payloads. None for a keep-alive.
    pub notification_data: Option<Vec<NotificationData>>,
}

impl BinaryEncoder<NotificationMessage> for NotificationMessage {
    fn byte_len(&self) -> usize {
        let mut size = self.sequence_number.byte_len();
        size += self.publish_time.byte_len();
        size += byte_len_array(&self.notification_data);
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = self.sequence_number.encode(stream)?;
        size += self.publish_time.encode(stream)?;
        size += write_array(stream, &self.notification_data)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let sequence_number = u32::decode(stream, decoding_options)?;
        let publish_time = DateTime::decode(stream, decoding_options)?;
        let notification_data = read_array(stream, decoding_options)?;
        Ok(NotificationMessage {
            sequence_number,
            publish_time,
            notification_data,
        })
    }
}

impl NotificationMessage {
    /// Create a notification message from data change and / or event batches.
    pub fn data_change(
        sequence_number: u32,
        publish_time: DateTime,
        notification_data: Vec<NotificationData>,
    ) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(notification_data),
        }
    }

    /// Create a status change notification message
    pub fn status_change(
        sequence_number: u32,
        publish_time: DateTime,
        status: StatusCode,
    ) -> NotificationMessage {
        let notification_data = NotificationData::StatusChange(StatusChangeNotification { status });
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(vec![notification_data]),
        }
    }

    /// Create a keep-alive notification message. It carries the sequence number of the next real
    /// notification and no payload.
    pub fn keep_alive(sequence_number: u32, publish_time: DateTime) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: None,
        }
    }

    /// Tests if this is a keep-alive, i.e. a message with no payload.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_ref()
            .map_or(true, |d| d.is_empty())
    }

    /// Extract data change notifications from this notification. That assumes this message
    /// actually contains data change notifications, otherwise it will return an empty list.
    pub fn data_change_notifications(&self) -> Vec<DataChangeNotification> {
        let mut result = Vec::new();
        if let Some(ref notification_data) = self.notification_data {
            for n in notification_data {
                if let NotificationData::DataChange(ref v) = n {
                    result.push(v.clone());
                }
            }
        }
        result
    }

    /// Extract status change notifications from this notification.
    pub fn status_change_notifications(&self) -> Vec<StatusChangeNotification> {
        let mut result = Vec::new();
        if let Some(ref notification_data) = self.notification_data {
            for n in notification_data {
                if let NotificationData::StatusChange(ref v) = n {
                    result.push(v.clone());
                }
            }
        }
        result
    }
}
