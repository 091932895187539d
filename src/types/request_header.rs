// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

use std::io::{Read, Write};

use crate::types::{date_time::DateTime, encoding::*, IntegerId};

/// The `RequestHeader` contains information common to every request from client to server. The
/// engine only reads the handle and the timeout hint; authentication and audit fields belong to
/// the session layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestHeader {
    /// The time the Client sent the request.
    pub timestamp: DateTime,
    /// A requestHandle associated with the request. This client defined handle can be
    /// used to cancel the request. It is also returned in the response.
    pub request_handle: IntegerId,
    /// A bit mask that identifies the types of vendor-specific diagnostics to be returned
    /// in diagnosticInfo response parameters.
    pub return_diagnostics: u32,
    /// This timeout in milliseconds is used in the Client side Communication Stack to set the
    /// timeout on a per-call base. The Server shall check the timeoutHint parameter of a
    /// PublishRequest before processing a PublishResponse. If the request timed out, a
    /// BadTimeout Service result is sent and another PublishRequest is used. The
    /// value of 0 indicates no timeout.
    pub timeout_hint: u32,
}

impl BinaryEncoder<RequestHeader> for RequestHeader {
    fn byte_len(&self) -> usize {
        let mut size: usize = 0;
        size += self.timestamp.byte_len();
        size += self.request_handle.byte_len();
        size += self.return_diagnostics.byte_len();
        size += self.timeout_hint.byte_len();
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size: usize = 0;
        size += self.timestamp.encode(stream)?;
        size += self.request_handle.encode(stream)?;
        size += self.return_diagnostics.encode(stream)?;
        size += self.timeout_hint.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let timestamp = DateTime::decode(stream, decoding_options)?;
        let request_handle = IntegerId::decode(stream, decoding_options)?;
        let return_diagnostics = u32::decode(stream, decoding_options)?;
        let timeout_hint = u32::decode(stream, decoding_options)?;
        Ok(RequestHeader {
            timestamp,
            request_handle,
            return_diagnostics,
            timeout_hint,
        })
    }
}

impl RequestHeader {
    pub fn new(timestamp: DateTime, request_handle: IntegerId) -> RequestHeader {
        RequestHeader {
            timestamp,
            request_handle,
            return_diagnostics: 0,
            timeout_hint: 0,
        }
    }
}
