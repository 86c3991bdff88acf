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

use crate::{ExtensionCodes, TIMESTAMP_EXT};
use bytes::{BufMut, Bytes, BytesMut};
use shapepack_model::bigint::{BigInt, BigUint};
use shapepack_model::Timestamp;
use std::fmt::{Display, Formatter};

/// Writing out MessagePack can fail when a value exceeds the limitations of the
/// format; the buffer itself never fails.
#[derive(Debug, Clone)]
pub enum MsgPackWriteError {
    /// A record has more items than can be represented by a `u32` header.
    TooManyItems(usize),
    /// A string or blob is longer than a `u32` length can describe.
    DataTooLarge(usize),
    /// An extension payload is longer than a `u32` length can describe.
    ExtTooLarge(usize),
    /// The byte representation of a big integer could not fit an extension value.
    BigIntTooLarge(BigInt),
    /// The byte representation of a big unsigned integer could not fit an extension
    /// value.
    BigUintTooLarge(BigUint),
}

impl PartialEq for MsgPackWriteError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MsgPackWriteError::TooManyItems(n), MsgPackWriteError::TooManyItems(m)) => n == m,
            (MsgPackWriteError::DataTooLarge(n), MsgPackWriteError::DataTooLarge(m)) => n == m,
            (MsgPackWriteError::ExtTooLarge(n), MsgPackWriteError::ExtTooLarge(m)) => n == m,
            (MsgPackWriteError::BigIntTooLarge(n), MsgPackWriteError::BigIntTooLarge(m)) => n == m,
            (MsgPackWriteError::BigUintTooLarge(n), MsgPackWriteError::BigUintTooLarge(m)) => {
                n == m
            }
            _ => false,
        }
    }
}

impl Display for MsgPackWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgPackWriteError::TooManyItems(n) => {
                write!(f, "{} items is too many to encode as MessagePack.", n)
            }
            MsgPackWriteError::DataTooLarge(n) => {
                write!(f, "{} bytes is too long to encode as MessagePack.", n)
            }
            MsgPackWriteError::ExtTooLarge(n) => {
                write!(
                    f,
                    "{} bytes is too long for a MessagePack extension value.",
                    n
                )
            }
            MsgPackWriteError::BigIntTooLarge(_) | MsgPackWriteError::BigUintTooLarge(_) => {
                write!(f, "Big integer too large to be written in MessagePack.")
            }
        }
    }
}

impl std::error::Error for MsgPackWriteError {}

/// A MessagePack token writer over a [`BytesMut`] buffer. Integer writers always pick
/// the narrowest encoding that fits the value.
pub struct MsgPackWriter<'a> {
    buf: &'a mut BytesMut,
    codes: ExtensionCodes,
}

const MAX_I64_SIZE: usize = 9;
const MAX_U64_SIZE: usize = 9;
const MAX_F64_SIZE: usize = 9;
const MAX_F32_SIZE: usize = 5;

impl<'a> MsgPackWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, codes: ExtensionCodes) -> Self {
        MsgPackWriter { buf, codes }
    }

    /// The extension code assignments in effect for this writer.
    pub fn codes(&self) -> ExtensionCodes {
        self.codes
    }

    /// The number of bytes written so far.
    pub fn written(&self) -> usize {
        self.buf.len()
    }

    pub fn write_nil(&mut self) {
        self.buf.put_u8(0xc0);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { 0xc3 } else { 0xc2 });
    }

    pub fn write_int(&mut self, value: i64) {
        if value >= 0 {
            self.write_uint(value as u64);
        } else if value >= -32 {
            self.buf.put_i8(value as i8);
        } else if value >= i8::MIN as i64 {
            self.buf.put_u8(0xd0);
            self.buf.put_i8(value as i8);
        } else if value >= i16::MIN as i64 {
            self.buf.put_u8(0xd1);
            self.buf.put_i16(value as i16);
        } else if value >= i32::MIN as i64 {
            self.buf.put_u8(0xd2);
            self.buf.put_i32(value as i32);
        } else {
            self.buf.put_u8(0xd3);
            self.buf.put_i64(value);
        }
    }

    pub fn write_uint(&mut self, value: u64) {
        if value < 0x80 {
            self.buf.put_u8(value as u8);
        } else if value <= u8::MAX as u64 {
            self.buf.put_u8(0xcc);
            self.buf.put_u8(value as u8);
        } else if value <= u16::MAX as u64 {
            self.buf.put_u8(0xcd);
            self.buf.put_u16(value as u16);
        } else if value <= u32::MAX as u64 {
            self.buf.put_u8(0xce);
            self.buf.put_u32(value as u32);
        } else {
            self.buf.put_u8(0xcf);
            self.buf.put_u64(value);
        }
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_u8(0xca);
        self.buf.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_u8(0xcb);
        self.buf.put_f64(value);
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), MsgPackWriteError> {
        let len = value.len();
        if len <= 31 {
            self.buf.put_u8(0xa0 | len as u8);
        } else if len <= u8::MAX as usize {
            self.buf.put_u8(0xd9);
            self.buf.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.put_u8(0xda);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(0xdb);
            self.buf.put_u32(len as u32);
        } else {
            return Err(MsgPackWriteError::DataTooLarge(len));
        }
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_bin(&mut self, value: &[u8]) -> Result<(), MsgPackWriteError> {
        let len = value.len();
        if len <= u8::MAX as usize {
            self.buf.put_u8(0xc4);
            self.buf.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.put_u8(0xc5);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(0xc6);
            self.buf.put_u32(len as u32);
        } else {
            return Err(MsgPackWriteError::DataTooLarge(len));
        }
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn write_array_header(&mut self, len: usize) -> Result<(), MsgPackWriteError> {
        if len <= 15 {
            self.buf.put_u8(0x90 | len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.put_u8(0xdc);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(0xdd);
            self.buf.put_u32(len as u32);
        } else {
            return Err(MsgPackWriteError::TooManyItems(len));
        }
        Ok(())
    }

    pub fn write_map_header(&mut self, len: usize) -> Result<(), MsgPackWriteError> {
        if len <= 15 {
            self.buf.put_u8(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.put_u8(0xde);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(0xdf);
            self.buf.put_u32(len as u32);
        } else {
            return Err(MsgPackWriteError::TooManyItems(len));
        }
        Ok(())
    }

    pub fn write_ext(&mut self, code: i8, data: &[u8]) -> Result<(), MsgPackWriteError> {
        match data.len() {
            1 => self.buf.put_u8(0xd4),
            2 => self.buf.put_u8(0xd5),
            4 => self.buf.put_u8(0xd6),
            8 => self.buf.put_u8(0xd7),
            16 => self.buf.put_u8(0xd8),
            len if len <= u8::MAX as usize => {
                self.buf.put_u8(0xc7);
                self.buf.put_u8(len as u8);
            }
            len if len <= u16::MAX as usize => {
                self.buf.put_u8(0xc8);
                self.buf.put_u16(len as u16);
            }
            len if len <= u32::MAX as usize => {
                self.buf.put_u8(0xc9);
                self.buf.put_u32(len as u32);
            }
            len => return Err(MsgPackWriteError::ExtTooLarge(len)),
        }
        self.buf.put_i8(code);
        self.buf.put_slice(data);
        Ok(())
    }

    /// Writes a big signed integer extension: two's complement, big endian.
    pub fn write_big_int(&mut self, value: &BigInt) -> Result<(), MsgPackWriteError> {
        let payload = value.to_signed_bytes_be();
        if u32::try_from(payload.len()).is_err() {
            return Err(MsgPackWriteError::BigIntTooLarge(value.clone()));
        }
        self.write_ext(self.codes.big_int, &payload)
    }

    pub fn write_big_uint(&mut self, value: &BigUint) -> Result<(), MsgPackWriteError> {
        let bytes = value.to_bytes_be();
        if u32::try_from(bytes.len()).is_err() {
            return Err(MsgPackWriteError::BigUintTooLarge(value.clone()));
        }
        self.write_ext(self.codes.big_uint, &bytes)
    }

    pub fn write_i128(&mut self, value: i128) -> Result<(), MsgPackWriteError> {
        self.write_ext(self.codes.int128, &value.to_be_bytes())
    }

    pub fn write_u128(&mut self, value: u128) -> Result<(), MsgPackWriteError> {
        self.write_ext(self.codes.uint128, &value.to_be_bytes())
    }

    /// Writes the standard timestamp extension, choosing the shortest of the 32, 64
    /// and 96 bit forms that can represent the instant.
    pub fn write_timestamp(&mut self, value: Timestamp) -> Result<(), MsgPackWriteError> {
        let seconds = value.seconds();
        let nanos = value.subsec_nanos();
        if seconds >= 0 && (seconds >> 34) == 0 {
            let combined = ((nanos as u64) << 34) | seconds as u64;
            if combined & !(u32::MAX as u64) == 0 {
                self.write_ext(TIMESTAMP_EXT, &(combined as u32).to_be_bytes())
            } else {
                self.write_ext(TIMESTAMP_EXT, &combined.to_be_bytes())
            }
        } else {
            let mut payload = [0u8; 12];
            payload[..4].copy_from_slice(&nanos.to_be_bytes());
            payload[4..].copy_from_slice(&seconds.to_be_bytes());
            self.write_ext(TIMESTAMP_EXT, &payload)
        }
    }

    /// Writes bytes that are already valid MessagePack, verbatim.
    pub fn write_raw(&mut self, encoded: &[u8]) {
        self.buf.put_slice(encoded);
    }
}

/// Encodes a string as a standalone MessagePack token. Used to pre-encode property
/// keys once at converter build time.
pub fn encode_str_token(value: &str) -> Result<Bytes, MsgPackWriteError> {
    let mut buf = BytesMut::with_capacity(value.len() + 5);
    MsgPackWriter::new(&mut buf, ExtensionCodes::default()).write_str(value)?;
    Ok(buf.freeze())
}

macro_rules! int_slice_writer {
    ($name:ident, $ty:ty, $max:expr, $write:ident, $to:ty) => {
        impl<'a> MsgPackWriter<'a> {
            /// Width specialized fast path: reserves the worst case encoding for the
            /// whole slice up front so the element loop never renegotiates the
            /// buffer.
            pub fn $name(&mut self, values: &[$ty]) -> Result<(), MsgPackWriteError> {
                self.write_array_header(values.len())?;
                self.buf.reserve(values.len() * $max);
                for v in values {
                    self.$write(*v as $to);
                }
                Ok(())
            }
        }
    };
}

int_slice_writer!(write_i8_slice, i8, MAX_I64_SIZE, write_int, i64);
int_slice_writer!(write_i16_slice, i16, MAX_I64_SIZE, write_int, i64);
int_slice_writer!(write_i32_slice, i32, MAX_I64_SIZE, write_int, i64);
int_slice_writer!(write_i64_slice, i64, MAX_I64_SIZE, write_int, i64);
int_slice_writer!(write_u8_slice, u8, MAX_U64_SIZE, write_uint, u64);
int_slice_writer!(write_u16_slice, u16, MAX_U64_SIZE, write_uint, u64);
int_slice_writer!(write_u32_slice, u32, MAX_U64_SIZE, write_uint, u64);
int_slice_writer!(write_u64_slice, u64, MAX_U64_SIZE, write_uint, u64);
int_slice_writer!(write_f32_slice, f32, MAX_F32_SIZE, write_f32, f32);
int_slice_writer!(write_f64_slice, f64, MAX_F64_SIZE, write_f64, f64);
