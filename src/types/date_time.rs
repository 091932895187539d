// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the implementation of `DateTime`.

use std::{
    cmp::Ordering,
    fmt,
    io::{Read, Write},
};

use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::encoding::*;

const NANOS_PER_TICK: i64 = 100;

pub type DateTimeUtc = chrono::DateTime<Utc>;

/// A date/time value. This is a wrapper around the chrono type with extra functionality
/// for obtaining ticks in OPC UA measurements, epoch etc.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct DateTime {
    date_time: DateTimeUtc,
}

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.checked_ticks().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<DateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ticks = i64::deserialize(deserializer)?;
        Ok(DateTime::from(ticks))
    }
}

/// DateTime encoded as 64-bit signed int of ticks since the OPC UA epoch
impl BinaryEncoder<DateTime> for DateTime {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_i64(stream, self.checked_ticks())
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let ticks = read_i64(stream)?;
        let date_time = DateTime::from(ticks);
        // Client offset is a value that can be overridden to account for time discrepancies
        // between client & server.
        Ok(DateTime {
            date_time: date_time.date_time - decoding_options.client_offset,
        })
    }
}

impl Default for DateTime {
    fn default() -> Self {
        DateTime::epoch()
    }
}

impl PartialOrd for DateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.date_time.cmp(&other.date_time))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.date_time.to_rfc3339())
    }
}

impl From<DateTimeUtc> for DateTime {
    fn from(date_time: DateTimeUtc) -> Self {
        // Round to the nearest tick
        let nanos = date_time.timestamp_subsec_nanos() as i64;
        let truncated = nanos - nanos % NANOS_PER_TICK;
        let date_time = Utc
            .timestamp_opt(date_time.timestamp(), truncated as u32)
            .unwrap();
        DateTime { date_time }
    }
}

impl From<DateTime> for DateTimeUtc {
    fn from(value: DateTime) -> Self {
        value.date_time
    }
}

impl From<i64> for DateTime {
    fn from(value: i64) -> Self {
        // Value is a number of ticks since the OPC UA epoch
        let secs = value / TICKS_PER_SECOND;
        let nanos = (value - secs * TICKS_PER_SECOND) * NANOS_PER_TICK;
        let duration = Duration::seconds(secs) + Duration::nanoseconds(nanos);
        DateTime {
            date_time: DateTime::epoch_chrono() + duration,
        }
    }
}

const TICKS_PER_SECOND: i64 = 1_000_000_000 / NANOS_PER_TICK;

impl DateTime {
    /// Constructs from the current time
    pub fn now() -> DateTime {
        DateTime::from(Utc::now())
    }

    /// Constructs from the OPC UA epoch, i.e. 1601-01-01T00:00:00Z
    pub fn epoch() -> DateTime {
        DateTime {
            date_time: DateTime::epoch_chrono(),
        }
    }

    /// Returns the number of 100 nanosecond ticks since the OPC UA epoch
    pub fn ticks(&self) -> i64 {
        let duration = self.date_time.signed_duration_since(DateTime::epoch_chrono());
        let secs = duration.num_seconds();
        let nanos = (duration - Duration::seconds(secs)).num_nanoseconds().unwrap_or(0);
        secs * TICKS_PER_SECOND + nanos / NANOS_PER_TICK
    }

    /// Returns the ticks, clamped to zero if the value predates the OPC UA epoch
    pub fn checked_ticks(&self) -> i64 {
        let ticks = self.ticks();
        if ticks < 0 {
            0
        } else {
            ticks
        }
    }

    /// Returns the time in UTC
    pub fn as_chrono(&self) -> DateTimeUtc {
        self.date_time
    }

    fn epoch_chrono() -> DateTimeUtc {
        Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_zero_ticks() {
        assert_eq!(DateTime::epoch().ticks(), 0);
    }

    #[test]
    fn round_trip_ticks() {
        let now = DateTime::now();
        let ticks = now.ticks();
        assert_eq!(DateTime::from(ticks), now);
    }

    #[test]
    fn encode_decode() {
        let now = DateTime::now();
        let mut stream = std::io::Cursor::new(now.encode_to_vec());
        let decoded = DateTime::decode(&mut stream, &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, now);
    }
}
