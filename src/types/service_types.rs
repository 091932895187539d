// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the publish service request / response types and the response envelope the engine
//! completes publish requests with.

use std::io::{Read, Write};

use crate::types::{
    encoding::*, notification::NotificationMessage, request_header::RequestHeader,
    response_header::ResponseHeader, status_code::StatusCode,
};

/// Object ids of the binary encodings for the messages in the envelope.
mod object_id {
    pub const SERVICE_FAULT: u32 = 397;
    pub const PUBLISH_RESPONSE: u32 = 829;
}

/// Acknowledges a previously received notification message so the server can release it from
/// its retransmission queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionAcknowledgement {
    pub subscription_id: u32,
    pub sequence_number: u32,
}

impl BinaryEncoder<SubscriptionAcknowledgement> for SubscriptionAcknowledgement {
    fn byte_len(&self) -> usize {
        self.subscription_id.byte_len() + self.sequence_number.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = self.subscription_id.encode(stream)?;
        size += self.sequence_number.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let subscription_id = u32::decode(stream, decoding_options)?;
        let sequence_number = u32::decode(stream, decoding_options)?;
        Ok(SubscriptionAcknowledgement {
            subscription_id,
            sequence_number,
        })
    }
}

/// The client's long-poll. The server holds on to it until a subscription has something to
/// deliver, or answers it immediately with a fault.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    pub request_header: RequestHeader,
    pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
}

impl BinaryEncoder<PublishRequest> for PublishRequest {
    fn byte_len(&self) -> usize {
        self.request_header.byte_len() + byte_len_array(&self.subscription_acknowledgements)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = self.request_header.encode(stream)?;
        size += write_array(stream, &self.subscription_acknowledgements)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let request_header = RequestHeader::decode(stream, decoding_options)?;
        let subscription_acknowledgements = read_array(stream, decoding_options)?;
        Ok(PublishRequest {
            request_header,
            subscription_acknowledgements,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishResponse {
    pub response_header: ResponseHeader,
    /// The subscription the notification message belongs to.
    pub subscription_id: u32,
    /// The sequence numbers still held in the subscription's retransmission queue, including the
    /// one being delivered by this response.
    pub available_sequence_numbers: Option<Vec<u32>>,
    /// True if the subscription has further notifications ready to deliver.
    pub more_notifications: bool,
    /// The notification message itself.
    pub notification_message: NotificationMessage,
    /// One status per acknowledgement in the request this response answers.
    pub results: Option<Vec<StatusCode>>,
}

impl BinaryEncoder<PublishResponse> for PublishResponse {
    fn byte_len(&self) -> usize {
        let mut size = self.response_header.byte_len();
        size += self.subscription_id.byte_len();
        size += byte_len_array(&self.available_sequence_numbers);
        size += self.more_notifications.byte_len();
        size += self.notification_message.byte_len();
        size += byte_len_array(&self.results);
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = self.response_header.encode(stream)?;
        size += self.subscription_id.encode(stream)?;
        size += write_array(stream, &self.available_sequence_numbers)?;
        size += self.more_notifications.encode(stream)?;
        size += self.notification_message.encode(stream)?;
        size += write_array(stream, &self.results)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let response_header = ResponseHeader::decode(stream, decoding_options)?;
        let subscription_id = u32::decode(stream, decoding_options)?;
        let available_sequence_numbers = read_array(stream, decoding_options)?;
        let more_notifications = bool::decode(stream, decoding_options)?;
        let notification_message = NotificationMessage::decode(stream, decoding_options)?;
        let results = read_array(stream, decoding_options)?;
        Ok(PublishResponse {
            response_header,
            subscription_id,
            available_sequence_numbers,
            more_notifications,
            notification_message,
            results,
        })
    }
}

/// The response sent when a service level error occurred, e.g. the publish request timed out or
/// there was no subscription to answer it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

impl BinaryEncoder<ServiceFault> for ServiceFault {
    fn byte_len(&self) -> usize {
        self.response_header.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.response_header.encode(stream)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let response_header = ResponseHeader::decode(stream, decoding_options)?;
        Ok(ServiceFault { response_header })
    }
}

impl ServiceFault {
    pub fn new(request_header: &RequestHeader, service_result: StatusCode) -> ServiceFault {
        ServiceFault {
            response_header: ResponseHeader::new_service_result(request_header, service_result),
        }
    }
}

/// The messages the engine completes a publish request with. Responses are wrapped in the
/// envelope so that timeouts and cancellations can travel the same one-shot channel as real
/// notification responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SupportedMessage {
    PublishResponse(PublishResponse),
    ServiceFault(ServiceFault),
}

impl From<PublishResponse> for SupportedMessage {
    fn from(value: PublishResponse) -> Self {
        SupportedMessage::PublishResponse(value)
    }
}

impl From<ServiceFault> for SupportedMessage {
    fn from(value: ServiceFault) -> Self {
        SupportedMessage::ServiceFault(value)
    }
}

impl BinaryEncoder<SupportedMessage> for SupportedMessage {
    fn byte_len(&self) -> usize {
        4 + match self {
            SupportedMessage::PublishResponse(ref v) => v.byte_len(),
            SupportedMessage::ServiceFault(ref v) => v.byte_len(),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = match self {
            SupportedMessage::PublishResponse(_) => write_u32(stream, object_id::PUBLISH_RESPONSE)?,
            SupportedMessage::ServiceFault(_) => write_u32(stream, object_id::SERVICE_FAULT)?,
        };
        size += match self {
            SupportedMessage::PublishResponse(ref v) => v.encode(stream)?,
            SupportedMessage::ServiceFault(ref v) => v.encode(stream)?,
        };
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let object_id = read_u32(stream)?;
        match object_id {
            object_id::PUBLISH_RESPONSE => Ok(SupportedMessage::PublishResponse(
                PublishResponse::decode(stream, decoding_options)?,
            )),
            object_id::SERVICE_FAULT => Ok(SupportedMessage::ServiceFault(ServiceFault::decode(
                stream,
                decoding_options,
            )?)),
            _ => {
                error!("Message object id {} is not recognized", object_id);
                Err(StatusCode::BadDecodingError)
            }
        }
    }
}

impl SupportedMessage {
    /// The request handle the message answers.
    pub fn request_handle(&self) -> u32 {
        self.response_header().request_handle
    }

    /// The service result carried on the response header.
    pub fn service_result(&self) -> StatusCode {
        self.response_header().service_result
    }

    pub fn response_header(&self) -> &ResponseHeader {
        match self {
            SupportedMessage::PublishResponse(ref v) => &v.response_header,
            SupportedMessage::ServiceFault(ref v) => &v.response_header,
        }
    }

    pub fn is_service_fault(&self) -> bool {
        matches!(self, SupportedMessage::ServiceFault(_))
    }
}
