// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2022 Adam Lock

//! Contains the `Variant` type - the scalar subset of the OPC UA variant that monitored item
//! values carry through the publish engine. Arrays and the more exotic built-in types are the
//! business of the codec layer, not of this crate.

use std::io::{Read, Write};

use crate::types::{date_time::DateTime, encoding::*, status_code::StatusCode};

/// Encoding mask values for the variant scalar types, from the OPC UA built-in type ids.
mod type_id {
    pub const EMPTY: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const BYTE: u8 = 3;
    pub const INT16: u8 = 4;
    pub const UINT16: u8 = 5;
    pub const INT32: u8 = 6;
    pub const UINT32: u8 = 7;
    pub const INT64: u8 = 8;
    pub const UINT64: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const DOUBLE: u8 = 11;
    pub const STRING: u8 = 12;
    pub const DATE_TIME: u8 = 13;
    pub const STATUS_CODE: u8 = 19;
}

/// A scalar value sampled from a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Variant {
    /// Empty / null value
    Empty,
    Boolean(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime),
    StatusCode(StatusCode),
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::UInt32(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<DateTime> for Variant {
    fn from(v: DateTime) -> Self {
        Variant::DateTime(v)
    }
}

impl BinaryEncoder<Variant> for Variant {
    fn byte_len(&self) -> usize {
        // Encoding mask, then value
        1 + match self {
            Variant::Empty => 0,
            Variant::Boolean(_) | Variant::Byte(_) => 1,
            Variant::Int16(_) | Variant::UInt16(_) => 2,
            Variant::Int32(_) | Variant::UInt32(_) | Variant::Float(_) => 4,
            Variant::Int64(_) | Variant::UInt64(_) | Variant::Double(_) => 8,
            Variant::String(ref v) => byte_len_string(Some(v.as_str())),
            Variant::DateTime(ref v) => v.byte_len(),
            Variant::StatusCode(ref v) => v.byte_len(),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = write_u8(stream, self.type_id())?;
        size += match self {
            Variant::Empty => 0,
            Variant::Boolean(v) => v.encode(stream)?,
            Variant::Byte(v) => write_u8(stream, *v)?,
            Variant::Int16(v) => write_i16(stream, *v)?,
            Variant::UInt16(v) => write_u16(stream, *v)?,
            Variant::Int32(v) => write_i32(stream, *v)?,
            Variant::UInt32(v) => write_u32(stream, *v)?,
            Variant::Int64(v) => write_i64(stream, *v)?,
            Variant::UInt64(v) => write_u64(stream, *v)?,
            Variant::Float(v) => write_f32(stream, *v)?,
            Variant::Double(v) => write_f64(stream, *v)?,
            Variant::String(ref v) => write_string(stream, Some(v.as_str()))?,
            Variant::DateTime(ref v) => v.encode(stream)?,
            Variant::StatusCode(ref v) => v.encode(stream)?,
        };
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_mask = read_u8(stream)?;
        match encoding_mask {
            type_id::EMPTY => Ok(Variant::Empty),
            type_id::BOOLEAN => Ok(Variant::Boolean(read_u8(stream)? == 1)),
            type_id::BYTE => Ok(Variant::Byte(read_u8(stream)?)),
            type_id::INT16 => Ok(Variant::Int16(read_i16(stream)?)),
            type_id::UINT16 => Ok(Variant::UInt16(read_u16(stream)?)),
            type_id::INT32 => Ok(Variant::Int32(read_i32(stream)?)),
            type_id::UINT32 => Ok(Variant::UInt32(read_u32(stream)?)),
            type_id::INT64 => Ok(Variant::Int64(read_i64(stream)?)),
            type_id::UINT64 => Ok(Variant::UInt64(read_u64(stream)?)),
            type_id::FLOAT => Ok(Variant::Float(read_f32(stream)?)),
            type_id::DOUBLE => Ok(Variant::Double(read_f64(stream)?)),
            type_id::STRING => {
                let value = read_string(stream, decoding_options)?;
                Ok(value.map_or(Variant::Empty, Variant::String))
            }
            type_id::DATE_TIME => Ok(Variant::DateTime(DateTime::decode(
                stream,
                decoding_options,
            )?)),
            type_id::STATUS_CODE => Ok(Variant::StatusCode(StatusCode::decode(
                stream,
                decoding_options,
            )?)),
            _ => {
                error!("Don't know how to decode variant type {}", encoding_mask);
                Err(StatusCode::BadDecodingError)
            }
        }
    }
}

impl Variant {
    fn type_id(&self) -> u8 {
        match self {
            Variant::Empty => type_id::EMPTY,
            Variant::Boolean(_) => type_id::BOOLEAN,
            Variant::Byte(_) => type_id::BYTE,
            Variant::Int16(_) => type_id::INT16,
            Variant::UInt16(_) => type_id::UINT16,
            Variant::Int32(_) => type_id::INT32,
            Variant::UInt32(_) => type_id::UINT32,
            Variant::Int64(_) => type_id::INT64,
            Variant::UInt64(_) => type_id::UINT64,
            Variant::Float(_) => type_id::FLOAT,
            Variant::Double(_) => type_id::DOUBLE,
            Variant::String(_) => type_id::STRING,
            Variant::DateTime(_) => type_id::DATE_TIME,
            Variant::StatusCode(_) => type_id::STATUS_CODE,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Variant) {
        let mut stream = std::io::Cursor::new(value.encode_to_vec());
        let decoded = Variant::decode(&mut stream, &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn variant_round_trips() {
        round_trip(Variant::Empty);
        round_trip(Variant::Boolean(true));
        round_trip(Variant::Int32(-123));
        round_trip(Variant::UInt32(123));
        round_trip(Variant::Double(1234.5678));
        round_trip(Variant::String("hello world".to_string()));
        round_trip(Variant::DateTime(DateTime::now()));
        round_trip(Variant::StatusCode(StatusCode::BadTimeout));
    }
}
