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

//! Asynchronous byte sources and sinks driving the incremental codec. A source
//! retries each primitive read as bytes arrive, suspending at every point the
//! codec reports that more input is needed; a sink buffers writes and drains
//! whenever buffered output crosses the configured threshold. Cancellation is
//! checked before every suspension.

#[cfg(test)]
mod tests;

use crate::context::CancelToken;
use crate::error::Failure;
use bytes::{Buf, Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;
use rmp::Marker;
use shapepack_msgpack::stream::{attempt, try_skip_value, Step};
use shapepack_msgpack::{reader, ExtensionCodes, MsgPackReadError, MsgPackWriter};
use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt};

const READ_CHUNK: usize = 8 * 1024;

/// An object safe adapter over an asynchronous byte producer.
pub trait AsyncByteReader: Send {
    fn fill<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, std::io::Result<usize>>;
}

impl<R: AsyncRead + Unpin + Send> AsyncByteReader for R {
    fn fill<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, std::io::Result<usize>> {
        async move {
            if buf.capacity() == buf.len() {
                buf.reserve(READ_CHUNK);
            }
            self.read_buf(buf).await
        }
        .boxed()
    }
}

/// An object safe adapter over an asynchronous byte consumer.
pub trait AsyncByteWriter: Send {
    fn write_all<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>>;
    fn flush<'a>(&'a mut self) -> BoxFuture<'a, std::io::Result<()>>;
}

impl<W: AsyncWrite + Unpin + Send> AsyncByteWriter for W {
    fn write_all<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>> {
        AsyncWriteExt::write_all(self, bytes).boxed()
    }

    fn flush<'a>(&'a mut self) -> BoxFuture<'a, std::io::Result<()>> {
        AsyncWriteExt::flush(self).boxed()
    }
}

/// The buffer state of one asynchronous read call. Kept apart from
/// [`AsyncSource`] so element streaming can re-borrow the same buffer across
/// items.
pub(crate) struct SourceCore {
    pub(crate) buf: BytesMut,
    pub(crate) cancel: CancelToken,
}

impl SourceCore {
    pub(crate) fn new(cancel: CancelToken) -> Self {
        SourceCore {
            buf: BytesMut::new(),
            cancel,
        }
    }
}

/// A streaming byte source: every read either completes from buffered bytes or
/// awaits more input, and the buffer only advances when a read completes.
pub struct AsyncSource<'a> {
    core: &'a mut SourceCore,
    reader: &'a mut dyn AsyncByteReader,
}

impl<'a> AsyncSource<'a> {
    pub(crate) fn new(core: &'a mut SourceCore, reader: &'a mut dyn AsyncByteReader) -> Self {
        AsyncSource { core, reader }
    }

    async fn pull(&mut self) -> Result<(), Failure> {
        if self.core.cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        let read = self
            .reader
            .fill(&mut self.core.buf)
            .await
            .map_err(Failure::from)?;
        if read == 0 {
            Err(Failure::from(MsgPackReadError::Incomplete))
        } else {
            Ok(())
        }
    }

    async fn op<T, F>(&mut self, op: F) -> Result<T, Failure>
    where
        F: Fn(&mut &[u8]) -> Result<T, MsgPackReadError>,
    {
        loop {
            match attempt(self.core.buf.as_ref(), &op).map_err(Failure::from)? {
                Step::Done { value, consumed } => {
                    self.core.buf.advance(consumed);
                    return Ok(value);
                }
                Step::More(_) => self.pull().await?,
            }
        }
    }

    /// The marker of the next value, without consuming anything.
    pub async fn peek_marker(&mut self) -> Result<Marker, Failure> {
        loop {
            if let Some(first) = self.core.buf.first() {
                return Ok(Marker::from_u8(*first));
            }
            self.pull().await?;
        }
    }

    pub async fn read_map_header(&mut self) -> Result<u32, Failure> {
        self.op(|input| reader::read_map_header(input)).await
    }

    pub async fn read_array_header(&mut self) -> Result<u32, Failure> {
        self.op(|input| reader::read_array_header(input)).await
    }

    /// Fetches bytes until a complete string key can be decoded, then returns its
    /// contents.
    pub async fn read_str_bytes(&mut self) -> Result<Bytes, Failure> {
        loop {
            let window: &[u8] = self.core.buf.as_ref();
            let mut cursor = window;
            match reader::read_str_len(&mut cursor) {
                Ok(len) => {
                    let header = window.len() - cursor.len();
                    if window.len() >= header + len {
                        self.core.buf.advance(header);
                        return Ok(self.core.buf.split_to(len).freeze());
                    }
                }
                Err(MsgPackReadError::Incomplete) => {}
                Err(error) => return Err(Failure::from(error)),
            }
            self.pull().await?;
        }
    }

    /// Skips one complete value, fetching as required.
    pub async fn skip_value(&mut self) -> Result<(), Failure> {
        loop {
            match try_skip_value(self.core.buf.as_ref()).map_err(Failure::from)? {
                Step::Done { consumed, .. } => {
                    self.core.buf.advance(consumed);
                    return Ok(());
                }
                Step::More(_) => self.pull().await?,
            }
        }
    }

    /// Buffers one complete value and returns its raw bytes. Converters without an
    /// element-wise asynchronous path use this and run their synchronous read.
    pub async fn buffer_value(&mut self) -> Result<Bytes, Failure> {
        loop {
            match try_skip_value(self.core.buf.as_ref()).map_err(Failure::from)? {
                Step::Done { consumed, .. } => {
                    return Ok(self.core.buf.split_to(consumed).freeze());
                }
                Step::More(_) => self.pull().await?,
            }
        }
    }
}

/// A buffering byte sink. Writers emit into the buffer synchronously through
/// [`AsyncSink::writer`] and offer a drain at each atomic chunk boundary.
pub struct AsyncSink<'a> {
    writer: &'a mut dyn AsyncByteWriter,
    buf: BytesMut,
    threshold: usize,
    codes: ExtensionCodes,
    cancel: CancelToken,
}

impl<'a> AsyncSink<'a> {
    pub(crate) fn new(
        writer: &'a mut dyn AsyncByteWriter,
        threshold: usize,
        codes: ExtensionCodes,
        cancel: CancelToken,
    ) -> Self {
        AsyncSink {
            writer,
            buf: BytesMut::new(),
            threshold: threshold.max(1),
            codes,
            cancel,
        }
    }

    /// A token writer over the sink's buffer.
    pub fn writer(&mut self) -> MsgPackWriter<'_> {
        MsgPackWriter::new(&mut self.buf, self.codes)
    }

    async fn drain(&mut self) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split();
        self.writer
            .write_all(chunk.as_ref())
            .await
            .map_err(Failure::from)
    }

    /// Drains the buffer if pressure has crossed the threshold.
    pub async fn maybe_flush(&mut self) -> Result<(), Failure> {
        if self.buf.len() >= self.threshold {
            self.drain().await
        } else {
            Ok(())
        }
    }

    /// Drains whatever is buffered and flushes the underlying writer.
    pub(crate) async fn finish(&mut self) -> Result<(), Failure> {
        self.drain().await?;
        self.writer.flush().await.map_err(Failure::from)
    }
}
