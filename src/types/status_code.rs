// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the `StatusCode` type - the subset of OPC UA status codes that the publish engine
//! observes or produces, plus the severity / info bit masks.

use std::{
    error::Error,
    fmt,
    fmt::Formatter,
    io::{self, Read, Write},
};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::types::encoding::*;

#[allow(non_upper_case_globals)]
bitflags! {
    pub struct StatusCode: u32 {
        /// The operation succeeded.
        const Good = 0x0000_0000;
        /// The subscription was transferred to another session.
        const GoodSubscriptionTransferred = 0x002D_0000;
        /// An unexpected error occurred.
        const BadUnexpectedError = 0x8001_0000;
        /// Not enough memory to complete the operation.
        const BadOutOfMemory = 0x8003_0000;
        /// Encoding halted because of invalid data in the objects being serialized.
        const BadEncodingError = 0x8006_0000;
        /// Decoding halted because of invalid data in the stream.
        const BadDecodingError = 0x8007_0000;
        /// The operation timed out.
        const BadTimeout = 0x800A_0000;
        /// There was nothing to do because the client passed a list of operations with no elements.
        const BadNothingToDo = 0x800F_0000;
        /// The session was closed by the client.
        const BadSessionClosed = 0x8026_0000;
        /// The subscription id is not valid.
        const BadSubscriptionIdInvalid = 0x8028_0000;
        /// There are too many publish requests queued for the session.
        const BadTooManyPublishRequests = 0x8077_0000;
        /// There is no subscription available for this session.
        const BadNoSubscription = 0x8079_0000;
        /// The sequence number is unknown to the server.
        const BadSequenceNumberUnknown = 0x807A_0000;
        /// The requested notification message is no longer available.
        const BadMessageNotAvailable = 0x807B_0000;
        /// The sequence number is not valid.
        const BadSequenceNumberInvalid = 0x807F_0000;
        /// The secure channel has been closed.
        const BadSecureChannelClosed = 0x8086_0000;

        /// Set is the status code is bad
        const IS_ERROR = 0x8000_0000;
        /// Set is the status code is uncertain
        const IS_UNCERTAIN = 0x4000_0000;
        /// Mask for the status code section
        const STATUS_MASK = 0xFFFF_0000;
        /// Mask for the bits section
        const BIT_MASK = 0x0000_FFFF;
    }
}

// The bitflags! macro implements Debug for StatusCode but it fouls the display because status
// codes are a combination of bits and unique values.

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // Displays the StatusCode as it's name, or its name+bitflags
        let bits = self.bitflags();
        if bits.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}+{:?}", self.name(), bits)
        }
    }
}

impl BinaryEncoder<StatusCode> for StatusCode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u32(stream, self.bits())
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(StatusCode::from_bits_truncate(read_u32(stream)?))
    }
}

impl Error for StatusCode {}

impl StatusCode {
    /// Returns the bit flags of the status code, i.e. it masks out the actual status code value
    pub fn bitflags(&self) -> StatusCode {
        *self & StatusCode::BIT_MASK
    }

    /// Returns the status only, i.e. it masks out any bit flags that come with the status code
    pub fn status(&self) -> StatusCode {
        *self & StatusCode::STATUS_MASK
    }

    /// Tests if the status code is bad
    pub fn is_bad(&self) -> bool {
        self.contains(StatusCode::IS_ERROR)
    }

    /// Tests if the status code is uncertain
    pub fn is_uncertain(&self) -> bool {
        self.contains(StatusCode::IS_UNCERTAIN)
    }

    /// Tests if the status code is good (i.e. not bad or uncertain)
    pub fn is_good(&self) -> bool {
        !self.is_bad() && !self.is_uncertain()
    }

    /// Returns the name of the status code's value, ignoring any info bits
    pub fn name(&self) -> &'static str {
        match self.status() {
            StatusCode::Good => "Good",
            StatusCode::GoodSubscriptionTransferred => "GoodSubscriptionTransferred",
            StatusCode::BadUnexpectedError => "BadUnexpectedError",
            StatusCode::BadOutOfMemory => "BadOutOfMemory",
            StatusCode::BadEncodingError => "BadEncodingError",
            StatusCode::BadDecodingError => "BadDecodingError",
            StatusCode::BadTimeout => "BadTimeout",
            StatusCode::BadNothingToDo => "BadNothingToDo",
            StatusCode::BadSessionClosed => "BadSessionClosed",
            StatusCode::BadSubscriptionIdInvalid => "BadSubscriptionIdInvalid",
            StatusCode::BadTooManyPublishRequests => "BadTooManyPublishRequests",
            StatusCode::BadNoSubscription => "BadNoSubscription",
            StatusCode::BadSequenceNumberUnknown => "BadSequenceNumberUnknown",
            StatusCode::BadMessageNotAvailable => "BadMessageNotAvailable",
            StatusCode::BadSequenceNumberInvalid => "BadSequenceNumberInvalid",
            StatusCode::BadSecureChannelClosed => "BadSecureChannelClosed",
            _ => "UnknownStatusCode",
        }
    }
}

impl From<StatusCode> for io::Error {
    fn from(e: StatusCode) -> io::Error {
        io::Error::new(io::ErrorKind::Other, format!("StatusCode {}", e))
    }
}

// Serialize / Deserialize are manually implemented because bitflags! doesn't do it.

impl Serialize for StatusCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

struct StatusCodeVisitor;

impl<'de> Visitor<'de> for StatusCodeVisitor {
    type Value = u32;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an unsigned 32-bit integer")
    }

    fn visit_u32<E>(self, value: u32) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value as u32)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D>(deserializer: D) -> Result<StatusCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(StatusCode::from_bits_truncate(
            deserializer.deserialize_u32(StatusCodeVisitor)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::StatusCode;

    #[test]
    fn severity() {
        assert!(StatusCode::Good.is_good());
        assert!(!StatusCode::Good.is_bad());
        assert!(StatusCode::GoodSubscriptionTransferred.is_good());
        assert!(StatusCode::BadTimeout.is_bad());
        assert!(!StatusCode::BadTimeout.is_good());
    }

    #[test]
    fn name() {
        assert_eq!(StatusCode::BadNoSubscription.name(), "BadNoSubscription");
        assert_eq!(StatusCode::Good.name(), "Good");
    }
}
