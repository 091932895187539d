// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the implementation of `DataValue` - the value / status / timestamp triple attached
//! to each monitored item notification.

use std::io::{Read, Write};

use crate::types::{date_time::DateTime, encoding::*, status_code::StatusCode, variant::Variant};

bitflags! {
    struct DataValueFlags: u8 {
        /// False if the Value is Null.
        const HAS_VALUE = 0x1;
        /// False if the StatusCode is Good.
        const HAS_STATUS = 0x2;
        /// False if the source timestamp is DateTime.MinValue.
        const HAS_SOURCE_TIMESTAMP = 0x4;
        /// False if the server timestamp is DateTime.MinValue.
        const HAS_SERVER_TIMESTAMP = 0x8;
    }
}

/// A value sampled from a monitored item together with quality and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataValue {
    /// The value. BaseDataType.
    pub value: Option<Variant>,
    /// The status associated with the value. Not present equals Good.
    pub status: Option<StatusCode>,
    /// The source timestamp associated with the value.
    pub source_timestamp: Option<DateTime>,
    /// The server timestamp associated with the value.
    pub server_timestamp: Option<DateTime>,
}

impl BinaryEncoder<DataValue> for DataValue {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        let encoding_flags = self.encoding_flags();
        if encoding_flags.contains(DataValueFlags::HAS_VALUE) {
            size += self.value.as_ref().unwrap().byte_len();
        }
        if encoding_flags.contains(DataValueFlags::HAS_STATUS) {
            size += self.status.as_ref().unwrap().byte_len();
        }
        if encoding_flags.contains(DataValueFlags::HAS_SOURCE_TIMESTAMP) {
            size += self.source_timestamp.as_ref().unwrap().byte_len();
        }
        if encoding_flags.contains(DataValueFlags::HAS_SERVER_TIMESTAMP) {
            size += self.server_timestamp.as_ref().unwrap().byte_len();
        }
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let encoding_flags = self.encoding_flags();
        let mut size = write_u8(stream, encoding_flags.bits())?;
        if encoding_flags.contains(DataValueFlags::HAS_VALUE) {
            size += self.value.as_ref().unwrap().encode(stream)?;
        }
        if encoding_flags.contains(DataValueFlags::HAS_STATUS) {
            size += self.status.as_ref().unwrap().encode(stream)?;
        }
        if encoding_flags.contains(DataValueFlags::HAS_SOURCE_TIMESTAMP) {
            size += self.source_timestamp.as_ref().unwrap().encode(stream)?;
        }
        if encoding_flags.contains(DataValueFlags::HAS_SERVER_TIMESTAMP) {
            size += self.server_timestamp.as_ref().unwrap().encode(stream)?;
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_flags = DataValueFlags::from_bits_truncate(read_u8(stream)?);
        let value = if encoding_flags.contains(DataValueFlags::HAS_VALUE) {
            Some(Variant::decode(stream, decoding_options)?)
        } else {
            None
        };
        let status = if encoding_flags.contains(DataValueFlags::HAS_STATUS) {
            Some(StatusCode::decode(stream, decoding_options)?)
        } else {
            None
        };
        let source_timestamp = if encoding_flags.contains(DataValueFlags::HAS_SOURCE_TIMESTAMP) {
            Some(DateTime::decode(stream, decoding_options)?)
        } else {
            None
        };
        let server_timestamp = if encoding_flags.contains(DataValueFlags::HAS_SERVER_TIMESTAMP) {
            Some(DateTime::decode(stream, decoding_options)?)
        } else {
            None
        };
        Ok(DataValue {
            value,
            status,
            source_timestamp,
            server_timestamp,
        })
    }
}

impl DataValue {
    /// Creates a data value from the supplied value, timestamped now
    pub fn new_now<V>(value: V) -> DataValue
    where
        V: Into<Variant>,
    {
        let now = DateTime::now();
        DataValue {
            value: Some(value.into()),
            status: Some(StatusCode::Good),
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// Creates a data value from the supplied value and timestamp
    pub fn new_at<V>(value: V, time: DateTime) -> DataValue
    where
        V: Into<Variant>,
    {
        DataValue {
            value: Some(value.into()),
            status: Some(StatusCode::Good),
            source_timestamp: Some(time),
            server_timestamp: Some(time),
        }
    }

    /// Returns the status code of the value, defaulting to Good when not set
    pub fn status(&self) -> StatusCode {
        self.status.map_or(StatusCode::Good, |s| s.status())
    }

    fn encoding_flags(&self) -> DataValueFlags {
        let mut encoding_flags = DataValueFlags::empty();
        if self.value.is_some() {
            encoding_flags |= DataValueFlags::HAS_VALUE;
        }
        if self.status.is_some() {
            encoding_flags |= DataValueFlags::HAS_STATUS;
        }
        if self.source_timestamp.is_some() {
            encoding_flags |= DataValueFlags::HAS_SOURCE_TIMESTAMP;
        }
        if self.server_timestamp.is_some() {
            encoding_flags |= DataValueFlags::HAS_SERVER_TIMESTAMP;
        }
        encoding_flags
    }
}
