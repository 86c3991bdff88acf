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

use crate::reader::MsgPackReadError;
use bytes::{Buf, Bytes, BytesMut};
use rmp::Marker;
use std::fmt::{Display, Formatter};
use tokio_util::codec::Decoder;

/// The result of an incremental read attempt. The caller's buffer is never advanced
/// by an attempt; on [`Step::Done`] the caller consumes `consumed` bytes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<T> {
    /// The value was read in full from the first `consumed` bytes of the window.
    Done { value: T, consumed: usize },
    /// At least this many further bytes are required before the read can progress.
    More(usize),
}

impl<T> Step<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Step<U> {
        match self {
            Step::Done { value, consumed } => Step::Done {
                value: f(value),
                consumed,
            },
            Step::More(n) => Step::More(n),
        }
    }
}

/// Runs a buffered read against a byte window without consuming it, translating an
/// [`MsgPackReadError::Incomplete`] into a request for more input.
pub fn attempt<T, F>(window: &[u8], op: F) -> Result<Step<T>, MsgPackReadError>
where
    F: FnOnce(&mut &[u8]) -> Result<T, MsgPackReadError>,
{
    let mut cursor = window;
    match op(&mut cursor) {
        Ok(value) => Ok(Step::Done {
            value,
            consumed: window.len() - cursor.len(),
        }),
        Err(MsgPackReadError::Incomplete) => Ok(Step::More(1)),
        Err(e) => Err(e),
    }
}

struct SkipCursor<'a> {
    window: &'a [u8],
    pos: usize,
}

enum Taken {
    Have(usize),
    Short(usize),
}

impl<'a> SkipCursor<'a> {
    fn take(&mut self, len: usize) -> Taken {
        let available = self.window.len() - self.pos;
        if available < len {
            Taken::Short(len - available)
        } else {
            let at = self.pos;
            self.pos += len;
            Taken::Have(at)
        }
    }

    fn take_len(&mut self, width: usize) -> Result<usize, Step<()>> {
        match self.take(width) {
            Taken::Short(n) => Err(Step::More(n)),
            Taken::Have(at) => Ok(match width {
                1 => self.window[at] as usize,
                2 => u16::from_be_bytes(self.window[at..at + 2].try_into().unwrap()) as usize,
                _ => u32::from_be_bytes(self.window[at..at + 4].try_into().unwrap()) as usize,
            }),
        }
    }
}

macro_rules! skip_or_more {
    ($cursor:expr, $len:expr) => {
        match $cursor.take($len) {
            Taken::Short(n) => return Ok(Step::More(n)),
            Taken::Have(_) => {}
        }
    };
}

/// Measures one complete value in the window, reporting exactly how many further
/// bytes are needed when the value is still incomplete. This is the incremental
/// counterpart of [`crate::reader::skip_value`] and the framing primitive for the
/// streaming read mode.
pub fn try_skip_value(window: &[u8]) -> Result<Step<()>, MsgPackReadError> {
    let mut cursor = SkipCursor { window, pos: 0 };
    let mut pending: u64 = 1;
    while pending > 0 {
        pending -= 1;
        let marker = match cursor.take(1) {
            Taken::Short(n) => return Ok(Step::More(n)),
            Taken::Have(at) => Marker::from_u8(window[at]),
        };
        match marker {
            Marker::Null | Marker::True | Marker::False | Marker::FixPos(_) | Marker::FixNeg(_) => {
            }
            Marker::I8 | Marker::U8 => skip_or_more!(cursor, 1),
            Marker::I16 | Marker::U16 => skip_or_more!(cursor, 2),
            Marker::I32 | Marker::U32 | Marker::F32 => skip_or_more!(cursor, 4),
            Marker::I64 | Marker::U64 | Marker::F64 => skip_or_more!(cursor, 8),
            Marker::FixStr(n) => skip_or_more!(cursor, n as usize),
            Marker::Str8 | Marker::Bin8 => match cursor.take_len(1) {
                Err(step) => return Ok(step),
                Ok(len) => skip_or_more!(cursor, len),
            },
            Marker::Str16 | Marker::Bin16 => match cursor.take_len(2) {
                Err(step) => return Ok(step),
                Ok(len) => skip_or_more!(cursor, len),
            },
            Marker::Str32 | Marker::Bin32 => match cursor.take_len(4) {
                Err(step) => return Ok(step),
                Ok(len) => skip_or_more!(cursor, len),
            },
            Marker::FixExt1 => skip_or_more!(cursor, 2),
            Marker::FixExt2 => skip_or_more!(cursor, 3),
            Marker::FixExt4 => skip_or_more!(cursor, 5),
            Marker::FixExt8 => skip_or_more!(cursor, 9),
            Marker::FixExt16 => skip_or_more!(cursor, 17),
            Marker::Ext8 => match cursor.take_len(1) {
                Err(step) => return Ok(step),
                Ok(len) => skip_or_more!(cursor, len + 1),
            },
            Marker::Ext16 => match cursor.take_len(2) {
                Err(step) => return Ok(step),
                Ok(len) => skip_or_more!(cursor, len + 1),
            },
            Marker::Ext32 => match cursor.take_len(4) {
                Err(step) => return Ok(step),
                Ok(len) => skip_or_more!(cursor, len + 1),
            },
            Marker::FixArray(n) => pending += n as u64,
            Marker::Array16 => match cursor.take_len(2) {
                Err(step) => return Ok(step),
                Ok(len) => pending += len as u64,
            },
            Marker::Array32 => match cursor.take_len(4) {
                Err(step) => return Ok(step),
                Ok(len) => pending += len as u64,
            },
            Marker::FixMap(n) => pending += 2 * n as u64,
            Marker::Map16 => match cursor.take_len(2) {
                Err(step) => return Ok(step),
                Ok(len) => pending += 2 * len as u64,
            },
            Marker::Map32 => match cursor.take_len(4) {
                Err(step) => return Ok(step),
                Ok(len) => pending += 2 * len as u64,
            },
            Marker::Reserved => return Err(MsgPackReadError::InvalidMarker(marker)),
        }
    }
    Ok(Step::Done {
        value: (),
        consumed: cursor.pos,
    })
}

/// Errors produced when framing MessagePack documents from an IO stream.
#[derive(Debug)]
pub enum FrameError {
    /// The stream contained invalid MessagePack.
    Syntax(MsgPackReadError),
    /// The underlying IO stream failed.
    Io(std::io::Error),
    /// The stream ended part way through a document.
    Truncated,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Syntax(err) => write!(f, "Invalid MessagePack in stream: {}", err),
            FrameError::Io(err) => write!(f, "An error occurred reading the stream: {}", err),
            FrameError::Truncated => write!(f, "The stream ended part way through a document."),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err)
    }
}

impl From<MsgPackReadError> for FrameError {
    fn from(err: MsgPackReadError) -> Self {
        FrameError::Syntax(err)
    }
}

/// A [`Decoder`] producing one complete top level MessagePack value, as raw bytes,
/// per frame. Used by the asynchronous facade to buffer a whole document before
/// handing it to the synchronous fast path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocFrameDecoder;

impl Decoder for DocFrameDecoder {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match try_skip_value(src.as_ref())? {
            Step::Done { consumed, .. } => Ok(Some(src.split_to(consumed).freeze())),
            Step::More(needed) => {
                src.reserve(needed);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated),
        }
    }
}

/// Consumes `consumed` bytes from the front of a buffer after a successful
/// [`attempt`] or [`try_skip_value`].
pub fn commit(buf: &mut BytesMut, consumed: usize) {
    buf.advance(consumed);
}
