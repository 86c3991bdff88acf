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

pub(crate) mod collections;
pub(crate) mod dynamic;
pub(crate) mod enums;
pub(crate) mod object;
pub(crate) mod primitive;
pub(crate) mod shared;
pub(crate) mod surrogate;
pub mod union;

#[cfg(test)]
mod tests;

use crate::context::{ReadContext, WriteContext};
use crate::error::Failure;
use crate::schema::SchemaNode;
use crate::streaming::{AsyncSink, AsyncSource};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use shapepack_msgpack::MsgPackWriter;
use std::sync::Arc;
use std::sync::OnceLock;

/// Encodes and decodes values of one type. Converters are built once per shape by
/// the [`crate::builder`] pipeline, cached, and composed recursively; their behavior
/// is fixed once they leave the cache.
pub trait Converter<T: 'static>: Send + Sync + 'static {
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure>;

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure>;

    /// Writes the value through an asynchronous sink, draining the sink's buffer
    /// whenever it crosses the configured threshold. The default writes the whole
    /// value synchronously into the buffer and offers one drain; converters for
    /// containers override this to drain between elements.
    fn write_async<'a, 'b: 'a>(
        &'a self,
        value: &'a T,
        sink: &'a mut AsyncSink<'b>,
        ctx: &'a mut WriteContext,
    ) -> BoxFuture<'a, Result<(), Failure>>
    where
        T: Send + Sync,
    {
        async move {
            {
                let mut writer = sink.writer();
                self.write(value, &mut writer, ctx)?;
            }
            sink.maybe_flush().await
        }
        .boxed()
    }

    /// Reads the value from an asynchronous source, suspending whenever the codec
    /// reports that more bytes are needed. The default buffers one complete value
    /// and runs the synchronous path; converters for containers override this to
    /// resume element by element.
    fn read_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<T, Failure>>
    where
        T: Send + Sync,
    {
        async move {
            let mut doc = source.buffer_value().await?;
            self.read(&mut doc, ctx)
        }
        .boxed()
    }

    /// Whether this converter benefits from the element-wise asynchronous paths.
    fn prefer_async(&self) -> bool {
        false
    }

    /// The JSON schema fragment for the wire form this converter produces.
    fn schema(&self) -> SchemaNode {
        SchemaNode::Any
    }
}

/// A shared handle to a built converter.
pub type ConverterRef<T> = Arc<dyn Converter<T>>;

/// Already encoded MessagePack, written to the wire verbatim and captured verbatim
/// on read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawMsgPack(pub Bytes);

impl RawMsgPack {
    pub fn from_static(bytes: &'static [u8]) -> Self {
        RawMsgPack(Bytes::from_static(bytes))
    }
}

/// The placeholder installed in the cache while a converter for a recursive shape
/// is under construction. Requests that re-enter the same shape receive the
/// placeholder; it forwards to the finished converter once construction completes.
pub(crate) struct DelayedConverter<T> {
    target: OnceLock<ConverterRef<T>>,
}

impl<T> DelayedConverter<T> {
    pub(crate) fn new() -> Self {
        DelayedConverter {
            target: OnceLock::new(),
        }
    }

    pub(crate) fn complete(&self, converter: ConverterRef<T>) {
        let _ = self.target.set(converter);
    }

    fn resolved(&self) -> Result<&ConverterRef<T>, Failure> {
        self.target
            .get()
            .ok_or_else(|| Failure::structure("A converter was used before its construction completed."))
    }
}

impl<T: Send + Sync + 'static> Converter<T> for DelayedConverter<T> {
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        self.resolved()?.write(value, writer, ctx)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        self.resolved()?.read(input, ctx)
    }

    fn write_async<'a, 'b: 'a>(
        &'a self,
        value: &'a T,
        sink: &'a mut AsyncSink<'b>,
        ctx: &'a mut WriteContext,
    ) -> BoxFuture<'a, Result<(), Failure>> {
        async move { self.resolved()?.write_async(value, sink, ctx).await }.boxed()
    }

    fn read_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<T, Failure>> {
        async move { self.resolved()?.read_async(source, ctx).await }.boxed()
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Any
    }
}
