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

use crate::builder::BuildCx;
use crate::cache::ConverterCache;
use crate::config::{ReferenceMode, SerializerOptions, SerializerOptionsBuilder};
use crate::context::{
    CancelToken, Interner, ReadContext, RefReadState, RefWriteState, WriteContext,
};
use crate::convert::ConverterRef;
use crate::error::{ConfigError, Failure, Operation};
use crate::schema::SchemaNode;
use crate::shape::registry::{shape_of, Shaped};
use crate::shape::ShapeRef;
use crate::streaming::{AsyncSink, AsyncSource, SourceCore};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use parking_lot::Mutex;
use shapepack_msgpack::stream::DocFrameDecoder;
use shapepack_msgpack::{MsgPackReadError, MsgPackWriter};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Decoder;

/// The serialization facade: an immutable configuration bundle plus its converter
/// cache. Cloning shares both; any configuration change produces a new serializer
/// with a fresh cache.
#[derive(Clone)]
pub struct Serializer {
    options: Arc<SerializerOptions>,
    cache: Arc<ConverterCache>,
    interner: Arc<Interner>,
    cross_write: Arc<Mutex<Option<RefWriteState>>>,
    cross_read: Arc<Mutex<Option<RefReadState>>>,
}

impl Default for Serializer {
    fn default() -> Self {
        Serializer::new(SerializerOptions::default())
    }
}

impl Serializer {
    pub fn new(options: SerializerOptions) -> Self {
        Serializer {
            options: Arc::new(options),
            cache: Arc::new(ConverterCache::new()),
            interner: Arc::new(Interner::default()),
            cross_write: Arc::new(Mutex::new(None)),
            cross_read: Arc::new(Mutex::new(None)),
        }
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Copy on change: applies adjustments to a copy of this configuration and
    /// returns a new serializer (with a new converter cache) for it.
    pub fn reconfigure<F>(&self, adjust: F) -> Serializer
    where
        F: FnOnce(SerializerOptionsBuilder) -> SerializerOptionsBuilder,
    {
        Serializer::new(adjust(self.options.to_builder()).build())
    }

    fn converter_for<T: Send + Sync + 'static>(
        &self,
        shape: &ShapeRef<T>,
    ) -> Result<ConverterRef<T>, ConfigError> {
        let cx = BuildCx::new(&self.options, &self.cache);
        cx.converter(shape)
    }

    /// The JSON schema fragment describing how this serializer encodes `T`.
    pub fn schema<T: Shaped>(&self) -> Result<SchemaNode, Failure> {
        let converter = self.converter_for(&shape_of::<T>()).map_err(Failure::from)?;
        Ok(converter.schema())
    }

    fn write_context(&self, cancel: &CancelToken) -> WriteContext {
        let refs = match self.options.preserve_references {
            ReferenceMode::Off => None,
            ReferenceMode::PerCall => Some(RefWriteState::default()),
            ReferenceMode::CrossCall => {
                Some(self.cross_write.lock().take().unwrap_or_default())
            }
        };
        WriteContext::new(self.options.clone(), cancel.clone(), refs)
    }

    fn restore_write_refs(&self, ctx: &mut WriteContext) {
        if matches!(self.options.preserve_references, ReferenceMode::CrossCall) {
            *self.cross_write.lock() = ctx.take_refs();
        }
    }

    fn read_context(&self, cancel: &CancelToken) -> ReadContext {
        let refs = match self.options.preserve_references {
            ReferenceMode::Off => None,
            ReferenceMode::PerCall => Some(RefReadState::default()),
            ReferenceMode::CrossCall => Some(self.cross_read.lock().take().unwrap_or_default()),
        };
        ReadContext::new(
            self.options.clone(),
            cancel.clone(),
            refs,
            Some(self.interner.clone()),
        )
    }

    fn restore_read_refs(&self, ctx: &mut ReadContext) {
        if matches!(self.options.preserve_references, ReferenceMode::CrossCall) {
            *self.cross_read.lock() = ctx.take_refs();
        }
    }

    // -----------------------------------------------------------------------
    // Synchronous, buffered
    // -----------------------------------------------------------------------

    pub fn serialize<T: Shaped>(&self, value: &T) -> Result<Bytes, Failure> {
        self.serialize_with(value, &shape_of::<T>(), &CancelToken::new())
    }

    pub fn serialize_with<T: Send + Sync + 'static>(
        &self,
        value: &T,
        shape: &ShapeRef<T>,
        cancel: &CancelToken,
    ) -> Result<Bytes, Failure> {
        let op = Operation::Serialize;
        if cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        let converter = self
            .converter_for(shape)
            .map_err(|e| Failure::from(e).in_operation(op))?;
        let mut buf = BytesMut::new();
        let mut writer = MsgPackWriter::new(&mut buf, self.options.extension_codes);
        let mut ctx = self.write_context(cancel);
        let result = converter.write(value, &mut writer, &mut ctx);
        self.restore_write_refs(&mut ctx);
        result
            .map(|_| buf.freeze())
            .map_err(|e| e.in_operation(op))
    }

    pub fn deserialize<T: Shaped>(&self, bytes: impl Into<Bytes>) -> Result<T, Failure> {
        self.deserialize_with(bytes, &shape_of::<T>(), &CancelToken::new())
    }

    pub fn deserialize_with<T: Send + Sync + 'static>(
        &self,
        bytes: impl Into<Bytes>,
        shape: &ShapeRef<T>,
        cancel: &CancelToken,
    ) -> Result<T, Failure> {
        let op = Operation::Deserialize;
        if cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        let converter = self
            .converter_for(shape)
            .map_err(|e| Failure::from(e).in_operation(op))?;
        let mut input = bytes.into();
        let mut ctx = self.read_context(cancel);
        let result = converter.read(&mut input, &mut ctx);
        self.restore_read_refs(&mut ctx);
        result.map_err(|e| e.in_operation(op))
    }

    // -----------------------------------------------------------------------
    // Asynchronous, streamed
    // -----------------------------------------------------------------------

    pub async fn serialize_to<T, W>(&self, value: &T, writer: &mut W) -> Result<(), Failure>
    where
        T: Shaped,
        W: AsyncWrite + Unpin + Send,
    {
        self.serialize_to_with(value, &shape_of::<T>(), writer, &CancelToken::new())
            .await
    }

    pub async fn serialize_to_with<T, W>(
        &self,
        value: &T,
        shape: &ShapeRef<T>,
        writer: &mut W,
        cancel: &CancelToken,
    ) -> Result<(), Failure>
    where
        T: Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let op = Operation::SerializeAsync;
        if cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        let converter = self
            .converter_for(shape)
            .map_err(|e| Failure::from(e).in_operation(op))?;
        let mut ctx = self.write_context(cancel);
        let mut sink = AsyncSink::new(
            writer,
            self.options.max_async_buffer,
            self.options.extension_codes,
            cancel.clone(),
        );
        let result = async {
            converter.write_async(value, &mut sink, &mut ctx).await?;
            sink.finish().await
        }
        .await;
        self.restore_write_refs(&mut ctx);
        result.map_err(|e| e.in_operation(op))
    }

    pub async fn deserialize_from<T, R>(&self, reader: &mut R) -> Result<T, Failure>
    where
        T: Shaped,
        R: AsyncRead + Unpin + Send,
    {
        self.deserialize_from_with(reader, &shape_of::<T>(), &CancelToken::new())
            .await
    }

    /// Reads one value from an asynchronous byte source. Up to `max_async_buffer`
    /// bytes are buffered first; if the whole document arrives within that budget
    /// the synchronous fast path runs, otherwise the streaming path takes over
    /// with whatever was already buffered.
    pub async fn deserialize_from_with<T, R>(
        &self,
        reader: &mut R,
        shape: &ShapeRef<T>,
        cancel: &CancelToken,
    ) -> Result<T, Failure>
    where
        T: Send + Sync + 'static,
        R: AsyncRead + Unpin + Send,
    {
        let op = Operation::DeserializeAsync;
        if cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        let converter = self
            .converter_for(shape)
            .map_err(|e| Failure::from(e).in_operation(op))?;
        let mut ctx = self.read_context(cancel);
        let mut core = SourceCore::new(cancel.clone());
        let mut decoder = DocFrameDecoder;
        let budget = self.options.max_async_buffer;
        let result = loop {
            match decoder.decode(&mut core.buf) {
                Ok(Some(mut doc)) => break converter.read(&mut doc, &mut ctx),
                Ok(None) => {
                    if core.buf.len() >= budget {
                        let mut source = AsyncSource::new(&mut core, reader);
                        break converter.read_async(&mut source, &mut ctx).await;
                    }
                    if cancel.is_cancelled() {
                        break Err(Failure::cancelled());
                    }
                    // The decoder has reserved at least its size hint.
                    match tokio::io::AsyncReadExt::read_buf(reader, &mut core.buf).await {
                        Ok(0) => break Err(Failure::from(MsgPackReadError::Incomplete)),
                        Ok(_) => {}
                        Err(error) => break Err(Failure::from(error)),
                    }
                }
                Err(error) => break Err(Failure::from(error)),
            }
        };
        self.restore_read_refs(&mut ctx);
        result.map_err(|e| e.in_operation(op))
    }

    /// Reads the elements of a top level array one at a time. Incompatible with
    /// reference preservation: recorded references could escape the element
    /// lifetime.
    pub fn deserialize_stream<T, R>(
        &self,
        reader: R,
        cancel: CancelToken,
    ) -> Result<impl Stream<Item = Result<T, Failure>> + Send, Failure>
    where
        T: Shaped,
        R: AsyncRead + Unpin + Send,
    {
        self.deserialize_stream_with(reader, &shape_of::<T>(), cancel)
    }

    pub fn deserialize_stream_with<T, R>(
        &self,
        reader: R,
        shape: &ShapeRef<T>,
        cancel: CancelToken,
    ) -> Result<impl Stream<Item = Result<T, Failure>> + Send, Failure>
    where
        T: Send + Sync + 'static,
        R: AsyncRead + Unpin + Send,
    {
        let op = Operation::DeserializeStream;
        if !matches!(self.options.preserve_references, ReferenceMode::Off) {
            return Err(Failure::from(ConfigError::ReferencesWithStreaming).in_operation(op));
        }
        let converter = self
            .converter_for(shape)
            .map_err(|e| Failure::from(e).in_operation(op))?;
        let ctx = ReadContext::new(
            self.options.clone(),
            cancel.clone(),
            None,
            Some(self.interner.clone()),
        );

        struct StreamState<T: 'static, R> {
            core: SourceCore,
            reader: R,
            converter: ConverterRef<T>,
            ctx: ReadContext,
            remaining: Option<u32>,
            done: bool,
        }

        let state = StreamState {
            core: SourceCore::new(cancel),
            reader,
            converter,
            ctx,
            remaining: None,
            done: false,
        };

        Ok(futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            if state.remaining.is_none() {
                let mut source = AsyncSource::new(&mut state.core, &mut state.reader);
                match source.read_array_header().await {
                    Ok(len) => state.remaining = Some(len),
                    Err(error) => {
                        state.done = true;
                        return Some((
                            Err(error.in_operation(Operation::DeserializeStream)),
                            state,
                        ));
                    }
                }
            }
            match state.remaining {
                Some(0) | None => None,
                Some(remaining) => {
                    let item = {
                        let StreamState {
                            core,
                            reader,
                            converter,
                            ctx,
                            ..
                        } = &mut state;
                        let mut source = AsyncSource::new(core, reader);
                        converter.read_async(&mut source, ctx).await
                    };
                    match item {
                        Ok(value) => {
                            state.remaining = Some(remaining - 1);
                            Some((Ok(value), state))
                        }
                        Err(error) => {
                            state.done = true;
                            Some((
                                Err(error.in_operation(Operation::DeserializeStream)),
                                state,
                            ))
                        }
                    }
                }
            }
        }))
    }
}
