// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[cfg(test)]
mod tests;

use crate::TIMESTAMP_EXT;
use bytes::{Buf, Bytes};
use either::Either;
use rmp::Marker;
use shapepack_model::bigint::{BigInt, BigUint};
use shapepack_model::{Text, Timestamp};
use std::fmt::{Display, Formatter};
use std::str::Utf8Error;

/// Reading MessagePack data can fail if the bytes do not constitute valid
/// MessagePack or the buffer contains an incomplete value.
#[derive(Debug, Clone, PartialEq)]
pub enum MsgPackReadError {
    /// An unexpected MessagePack marker was encountered.
    InvalidMarker(Marker),
    /// The input terminated mid-way through a value.
    Incomplete,
    /// The MessagePack data contained invalid UTF8 in a string.
    StringDecode(Utf8Error),
    /// An extension type occurred where a different one was required.
    UnexpectedExtType(i8),
    /// A big integer contained 0 bytes (two's complement needs at least one).
    EmptyBigInt,
    /// A timestamp extension had an invalid length or out of range components.
    InvalidTimestamp,
    /// An integer did not fit the range of the requested type.
    NumberOutOfRange,
}

impl Display for MsgPackReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgPackReadError::InvalidMarker(marker) => {
                write!(f, "Unexpected message pack marker: {:?}", marker)
            }
            MsgPackReadError::Incomplete => {
                write!(f, "The input ended part way through a value.")
            }
            MsgPackReadError::StringDecode(_) => {
                write!(f, "A string value contained invalid UTF8.")
            }
            MsgPackReadError::UnexpectedExtType(code) => {
                write!(f, "{} is not the expected extension code.", code)
            }
            MsgPackReadError::EmptyBigInt => {
                write!(f, "A big integer consisted of 0 bytes.")
            }
            MsgPackReadError::InvalidTimestamp => {
                write!(f, "A timestamp extension was malformed.")
            }
            MsgPackReadError::NumberOutOfRange => {
                write!(f, "Number out of range for the expected type.")
            }
        }
    }
}

impl std::error::Error for MsgPackReadError {}

impl From<Utf8Error> for MsgPackReadError {
    fn from(err: Utf8Error) -> Self {
        MsgPackReadError::StringDecode(err)
    }
}

fn ensure<B: Buf>(input: &B, len: usize) -> Result<(), MsgPackReadError> {
    if input.remaining() < len {
        Err(MsgPackReadError::Incomplete)
    } else {
        Ok(())
    }
}

/// Reads the next marker byte, advancing the input.
pub fn read_marker<B: Buf>(input: &mut B) -> Result<Marker, MsgPackReadError> {
    ensure(input, 1)?;
    Ok(Marker::from_u8(input.get_u8()))
}

/// Reports the marker of the next value without advancing the input.
pub fn peek_marker<B: Buf>(input: &B) -> Result<Marker, MsgPackReadError> {
    match input.chunk().first() {
        Some(byte) => Ok(Marker::from_u8(*byte)),
        None => Err(MsgPackReadError::Incomplete),
    }
}

pub fn read_nil<B: Buf>(input: &mut B) -> Result<(), MsgPackReadError> {
    match read_marker(input)? {
        Marker::Null => Ok(()),
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

pub fn read_bool<B: Buf>(input: &mut B) -> Result<bool, MsgPackReadError> {
    match read_marker(input)? {
        Marker::True => Ok(true),
        Marker::False => Ok(false),
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

/// Reads any integer marker, reporting values above `i64::MAX` on the right.
pub fn read_number<B: Buf>(input: &mut B) -> Result<Either<i64, u64>, MsgPackReadError> {
    let marker = read_marker(input)?;
    number_from(input, marker)
}

fn number_from<B: Buf>(
    input: &mut B,
    marker: Marker,
) -> Result<Either<i64, u64>, MsgPackReadError> {
    match marker {
        Marker::FixPos(n) => Ok(Either::Left(n as i64)),
        Marker::FixNeg(n) => Ok(Either::Left(n as i64)),
        Marker::I8 => {
            ensure(input, 1)?;
            Ok(Either::Left(input.get_i8() as i64))
        }
        Marker::I16 => {
            ensure(input, 2)?;
            Ok(Either::Left(input.get_i16() as i64))
        }
        Marker::I32 => {
            ensure(input, 4)?;
            Ok(Either::Left(input.get_i32() as i64))
        }
        Marker::I64 => {
            ensure(input, 8)?;
            Ok(Either::Left(input.get_i64()))
        }
        Marker::U8 => {
            ensure(input, 1)?;
            Ok(Either::Left(input.get_u8() as i64))
        }
        Marker::U16 => {
            ensure(input, 2)?;
            Ok(Either::Left(input.get_u16() as i64))
        }
        Marker::U32 => {
            ensure(input, 4)?;
            Ok(Either::Left(input.get_u32() as i64))
        }
        Marker::U64 => {
            ensure(input, 8)?;
            let n = input.get_u64();
            if let Ok(m) = i64::try_from(n) {
                Ok(Either::Left(m))
            } else {
                Ok(Either::Right(n))
            }
        }
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

/// Reads any integer marker into an `i64`, failing on values above `i64::MAX`.
pub fn read_int<B: Buf>(input: &mut B) -> Result<i64, MsgPackReadError> {
    match read_number(input)? {
        Either::Left(n) => Ok(n),
        Either::Right(_) => Err(MsgPackReadError::NumberOutOfRange),
    }
}

/// Reads any non-negative integer marker into a `u64`.
pub fn read_uint<B: Buf>(input: &mut B) -> Result<u64, MsgPackReadError> {
    match read_number(input)? {
        Either::Left(n) if n >= 0 => Ok(n as u64),
        Either::Left(_) => Err(MsgPackReadError::NumberOutOfRange),
        Either::Right(n) => Ok(n),
    }
}

pub fn read_f32<B: Buf>(input: &mut B) -> Result<f32, MsgPackReadError> {
    match read_marker(input)? {
        Marker::F32 => {
            ensure(input, 4)?;
            Ok(input.get_f32())
        }
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

/// Reads a float of either width, widening single precision.
pub fn read_f64<B: Buf>(input: &mut B) -> Result<f64, MsgPackReadError> {
    match read_marker(input)? {
        Marker::F32 => {
            ensure(input, 4)?;
            Ok(input.get_f32() as f64)
        }
        Marker::F64 => {
            ensure(input, 8)?;
            Ok(input.get_f64())
        }
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

fn read_len<B: Buf>(input: &mut B, width: usize) -> Result<usize, MsgPackReadError> {
    ensure(input, width)?;
    Ok(match width {
        1 => input.get_u8() as usize,
        2 => input.get_u16() as usize,
        _ => input.get_u32() as usize,
    })
}

fn str_len<B: Buf>(input: &mut B, marker: Marker) -> Result<usize, MsgPackReadError> {
    match marker {
        Marker::FixStr(n) => Ok(n as usize),
        Marker::Str8 => read_len(input, 1),
        Marker::Str16 => read_len(input, 2),
        Marker::Str32 => read_len(input, 4),
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

/// Reads a string marker and returns the byte length of the string content,
/// leaving the input positioned at the content.
pub fn read_str_len<B: Buf>(input: &mut B) -> Result<usize, MsgPackReadError> {
    let marker = read_marker(input)?;
    str_len(input, marker)
}

/// Reads the raw bytes of a string value without validating them as UTF8. The
/// returned [`Bytes`] share the input's allocation.
pub fn read_str_bytes(input: &mut Bytes) -> Result<Bytes, MsgPackReadError> {
    let marker = read_marker(input)?;
    let len = str_len(input, marker)?;
    ensure(input, len)?;
    Ok(input.split_to(len))
}

/// Reads a string value, validating it as UTF8.
pub fn read_str(input: &mut Bytes) -> Result<Text, MsgPackReadError> {
    let bytes = read_str_bytes(input)?;
    let content = std::str::from_utf8(bytes.as_ref())?;
    Ok(Text::new(content))
}

/// Reads the raw bytes of a `bin` value. The returned [`Bytes`] share the input's
/// allocation.
pub fn read_bin_bytes(input: &mut Bytes) -> Result<Bytes, MsgPackReadError> {
    let marker = read_marker(input)?;
    let len = match marker {
        Marker::Bin8 => read_len(input, 1)?,
        Marker::Bin16 => read_len(input, 2)?,
        Marker::Bin32 => read_len(input, 4)?,
        ow => return Err(MsgPackReadError::InvalidMarker(ow)),
    };
    ensure(input, len)?;
    Ok(input.split_to(len))
}

pub fn read_array_header<B: Buf>(input: &mut B) -> Result<u32, MsgPackReadError> {
    match read_marker(input)? {
        Marker::FixArray(n) => Ok(n as u32),
        Marker::Array16 => Ok(read_len(input, 2)? as u32),
        Marker::Array32 => Ok(read_len(input, 4)? as u32),
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

pub fn read_map_header<B: Buf>(input: &mut B) -> Result<u32, MsgPackReadError> {
    match read_marker(input)? {
        Marker::FixMap(n) => Ok(n as u32),
        Marker::Map16 => Ok(read_len(input, 2)? as u32),
        Marker::Map32 => Ok(read_len(input, 4)? as u32),
        ow => Err(MsgPackReadError::InvalidMarker(ow)),
    }
}

/// Whether a marker begins an extension value.
pub fn is_ext(marker: Marker) -> bool {
    matches!(
        marker,
        Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32
    )
}

/// Reads an extension header, returning the type code and payload length. The input
/// is left positioned at the payload.
pub fn read_ext_header<B: Buf>(input: &mut B) -> Result<(i8, usize), MsgPackReadError> {
    let marker = read_marker(input)?;
    let len = match marker {
        Marker::FixExt1 => 1,
        Marker::FixExt2 => 2,
        Marker::FixExt4 => 4,
        Marker::FixExt8 => 8,
        Marker::FixExt16 => 16,
        Marker::Ext8 => read_len(input, 1)?,
        Marker::Ext16 => read_len(input, 2)?,
        Marker::Ext32 => read_len(input, 4)?,
        ow => return Err(MsgPackReadError::InvalidMarker(ow)),
    };
    ensure(input, 1)?;
    let code = input.get_i8();
    Ok((code, len))
}

/// Reads an extension value whole, returning the type code and payload.
pub fn read_ext(input: &mut Bytes) -> Result<(i8, Bytes), MsgPackReadError> {
    let (code, len) = read_ext_header(input)?;
    ensure(input, len)?;
    Ok((code, input.split_to(len)))
}

/// Decodes a big signed integer extension payload: two's complement, big endian.
pub fn decode_big_int(payload: &[u8]) -> Result<BigInt, MsgPackReadError> {
    if payload.is_empty() {
        Err(MsgPackReadError::EmptyBigInt)
    } else {
        Ok(BigInt::from_signed_bytes_be(payload))
    }
}

/// Decodes a big unsigned integer extension payload (big endian magnitude).
pub fn decode_big_uint(payload: &[u8]) -> Result<BigUint, MsgPackReadError> {
    Ok(BigUint::from_bytes_be(payload))
}

/// Reads a standard timestamp extension in any of its three forms.
pub fn read_timestamp(input: &mut Bytes) -> Result<Timestamp, MsgPackReadError> {
    let (code, payload) = read_ext(input)?;
    if code != TIMESTAMP_EXT {
        return Err(MsgPackReadError::UnexpectedExtType(code));
    }
    decode_timestamp(payload.as_ref())
}

/// Decodes a standard timestamp extension payload.
pub fn decode_timestamp(payload: &[u8]) -> Result<Timestamp, MsgPackReadError> {
    let (seconds, nanos) = match payload.len() {
        4 => (u32::from_be_bytes(payload.try_into().unwrap()) as i64, 0),
        8 => {
            let combined = u64::from_be_bytes(payload.try_into().unwrap());
            ((combined & 0x3_ffff_ffff) as i64, (combined >> 34) as u32)
        }
        12 => {
            let nanos = u32::from_be_bytes(payload[..4].try_into().unwrap());
            let seconds = i64::from_be_bytes(payload[4..].try_into().unwrap());
            (seconds, nanos)
        }
        _ => return Err(MsgPackReadError::InvalidTimestamp),
    };
    if nanos > 999_999_999 {
        return Err(MsgPackReadError::InvalidTimestamp);
    }
    Timestamp::from_parts(seconds, nanos).ok_or(MsgPackReadError::InvalidTimestamp)
}

/// Skips one complete value, descending into arrays and maps iteratively so deeply
/// nested payloads cannot overflow the stack.
pub fn skip_value<B: Buf>(input: &mut B) -> Result<(), MsgPackReadError> {
    let mut pending: u64 = 1;
    while pending > 0 {
        pending -= 1;
        let marker = read_marker(input)?;
        let payload = match marker {
            Marker::Null
            | Marker::True
            | Marker::False
            | Marker::FixPos(_)
            | Marker::FixNeg(_) => 0,
            Marker::I8 | Marker::U8 => 1,
            Marker::I16 | Marker::U16 => 2,
            Marker::I32 | Marker::U32 | Marker::F32 => 4,
            Marker::I64 | Marker::U64 | Marker::F64 => 8,
            Marker::FixStr(n) => n as usize,
            Marker::Str8 | Marker::Bin8 => read_len(input, 1)?,
            Marker::Str16 | Marker::Bin16 => read_len(input, 2)?,
            Marker::Str32 | Marker::Bin32 => read_len(input, 4)?,
            Marker::FixExt1 => 2,
            Marker::FixExt2 => 3,
            Marker::FixExt4 => 5,
            Marker::FixExt8 => 9,
            Marker::FixExt16 => 17,
            Marker::Ext8 => read_len(input, 1)? + 1,
            Marker::Ext16 => read_len(input, 2)? + 1,
            Marker::Ext32 => read_len(input, 4)? + 1,
            Marker::FixArray(n) => {
                pending += n as u64;
                0
            }
            Marker::Array16 => {
                pending += read_len(input, 2)? as u64;
                0
            }
            Marker::Array32 => {
                pending += read_len(input, 4)? as u64;
                0
            }
            Marker::FixMap(n) => {
                pending += 2 * n as u64;
                0
            }
            Marker::Map16 => {
                pending += 2 * read_len(input, 2)? as u64;
                0
            }
            Marker::Map32 => {
                pending += 2 * read_len(input, 4)? as u64;
                0
            }
            Marker::Reserved => return Err(MsgPackReadError::InvalidMarker(marker)),
        };
        ensure(input, payload)?;
        input.advance(payload);
    }
    Ok(())
}

/// Skips one complete value and returns the raw bytes that made it up, sharing the
/// input's allocation.
pub fn capture_value(input: &mut Bytes) -> Result<Bytes, MsgPackReadError> {
    let mark = input.clone();
    skip_value(input)?;
    let consumed = mark.len() - input.len();
    Ok(mark.slice(0..consumed))
}
