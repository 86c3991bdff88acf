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

//! # Shapepack MessagePack Codec
//!
//! Low level MessagePack token reader and writer used by the shapepack engine.
//! Writing targets a [`bytes::BytesMut`] buffer; reading has two modes, a buffered
//! mode over any [`bytes::Buf`] where running out of input is an error, and an
//! incremental mode ([`stream`]) where a short read yields a request for more bytes
//! and the input is only consumed on success.

pub mod reader;
pub mod stream;
pub mod writer;

pub use reader::MsgPackReadError;
pub use writer::{MsgPackWriteError, MsgPackWriter};

/// The extension type code of the standard MessagePack timestamp, fixed by the
/// MessagePack specification.
pub const TIMESTAMP_EXT: i8 = -1;

/// Extension type codes assigned by this library. All of them can be reassigned
/// through the serializer configuration to avoid collisions with codes already in
/// use by another ecosystem sharing the same payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionCodes {
    /// Big signed integer: two's complement, big endian.
    pub big_int: i8,
    /// Big unsigned integer: big endian magnitude bytes.
    pub big_uint: i8,
    /// 128 bit signed integer: 16 bytes, big endian, two's complement.
    pub int128: i8,
    /// 128 bit unsigned integer: 16 bytes, big endian.
    pub uint128: i8,
    /// Guid: 16 bytes, little endian.
    pub guid: i8,
    /// Reference to a previously seen object or string: unsigned integer payload.
    pub reference: i8,
    /// 128 bit decimal: 16 bytes, normalized layout.
    pub decimal: i8,
    /// Half precision float: 2 bytes, big endian.
    pub float16: i8,
}

impl Default for ExtensionCodes {
    fn default() -> Self {
        ExtensionCodes {
            big_int: 0,
            big_uint: 1,
            int128: 2,
            uint128: 3,
            guid: 4,
            reference: 5,
            decimal: 6,
            float16: 7,
        }
    }
}
