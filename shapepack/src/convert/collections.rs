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
use crate::config::MultiDimFormat;
use crate::context::{ReadContext, WriteContext};
use crate::convert::{Converter, ConverterRef};
use crate::error::{ConfigError, Failure, PathSegment};
use crate::schema::SchemaNode;
use crate::shape::{
    is_value_type, DictSettings, KindGlue, MapConstruct, MapOf, MultiDimOf, OptionalOf,
    PrimSliceView, SeqConstruct, SeqOf, ShapeKind,
};
use crate::streaming::AsyncSource;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use rmp::Marker;
use shapepack_msgpack::{reader, MsgPackWriter};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Optionals
// ---------------------------------------------------------------------------

struct OptionConverter<U: 'static> {
    inner: ConverterRef<U>,
}

impl<U: Send + Sync + 'static> Converter<Option<U>> for OptionConverter<U> {
    fn write(
        &self,
        value: &Option<U>,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        match value {
            Some(inner) => self.inner.write(inner, writer, ctx),
            None => {
                writer.write_nil();
                Ok(())
            }
        }
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<Option<U>, Failure> {
        if matches!(reader::peek_marker(input), Ok(Marker::Null)) {
            reader::read_nil(input).map_err(Failure::from)?;
            Ok(None)
        } else {
            Ok(Some(self.inner.read(input, ctx)?))
        }
    }

    fn read_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<Option<U>, Failure>> {
        async move {
            if matches!(source.peek_marker().await?, Marker::Null) {
                source.skip_value().await?;
                Ok(None)
            } else {
                Ok(Some(self.inner.read_async(source, ctx).await?))
            }
        }
        .boxed()
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Optional(Box::new(self.inner.schema()))
    }
}

impl<U: Send + Sync + 'static> KindGlue<Option<U>> for OptionalOf<U> {
    fn build(&self, cx: &BuildCx<'_>) -> Result<ConverterRef<Option<U>>, ConfigError> {
        let shape = self.inner.resolve();
        let inner = cx.converter(&shape)?;
        Ok(Arc::new(OptionConverter { inner }))
    }

    fn inner_is_value(&self) -> bool {
        let shape = self.inner.resolve();
        is_value_type(&shape)
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

impl<T, E> Clone for SeqConstruct<T, E> {
    fn clone(&self) -> Self {
        match self {
            SeqConstruct::None => SeqConstruct::None,
            SeqConstruct::Mutable { new, push } => SeqConstruct::Mutable {
                new: *new,
                push: *push,
            },
            SeqConstruct::FromVec(f) => SeqConstruct::FromVec(*f),
        }
    }
}

struct SeqConverter<T: 'static, E: 'static> {
    element: ConverterRef<E>,
    len: fn(&T) -> usize,
    iter: for<'a> fn(&'a T) -> Box<dyn Iterator<Item = &'a E> + Send + 'a>,
    construct: SeqConstruct<T, E>,
    prim: Option<for<'a> fn(&'a T) -> Option<PrimSliceView<'a>>>,
}

fn write_prim_slice(
    writer: &mut MsgPackWriter<'_>,
    view: PrimSliceView<'_>,
) -> Result<(), shapepack_msgpack::MsgPackWriteError> {
    match view {
        PrimSliceView::I8(s) => writer.write_i8_slice(s),
        PrimSliceView::I16(s) => writer.write_i16_slice(s),
        PrimSliceView::I32(s) => writer.write_i32_slice(s),
        PrimSliceView::I64(s) => writer.write_i64_slice(s),
        PrimSliceView::U8(s) => writer.write_u8_slice(s),
        PrimSliceView::U16(s) => writer.write_u16_slice(s),
        PrimSliceView::U32(s) => writer.write_u32_slice(s),
        PrimSliceView::U64(s) => writer.write_u64_slice(s),
        PrimSliceView::F32(s) => writer.write_f32_slice(s),
        PrimSliceView::F64(s) => writer.write_f64_slice(s),
    }
}

impl<T, E> Converter<T> for SeqConverter<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        ctx.enter()?;
        let result = (|| {
            if !ctx.options.disable_hardware_acceleration {
                if let Some(view) = self.prim.and_then(|f| f(value)) {
                    return write_prim_slice(writer, view).map_err(Failure::from);
                }
            }
            writer
                .write_array_header((self.len)(value))
                .map_err(Failure::from)?;
            for (i, item) in (self.iter)(value).enumerate() {
                self.element
                    .write(item, writer, ctx)
                    .map_err(|e| e.at(PathSegment::Index(i)))?;
            }
            Ok(())
        })();
        ctx.leave();
        result
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        ctx.enter()?;
        let result = (|| {
            let len = reader::read_array_header(input).map_err(Failure::from)?;
            match &self.construct {
                SeqConstruct::None => Err(Failure::unsupported(
                    "the sequence is serialize only and cannot be deserialized",
                )),
                SeqConstruct::Mutable { new, push } => {
                    let mut target = new();
                    for i in 0..len {
                        let element = self
                            .element
                            .read(input, ctx)
                            .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                        push(&mut target, element);
                    }
                    Ok(target)
                }
                SeqConstruct::FromVec(finish) => {
                    let mut elements = Vec::with_capacity(len.min(4096) as usize);
                    for i in 0..len {
                        elements.push(
                            self.element
                                .read(input, ctx)
                                .map_err(|e| e.at(PathSegment::Index(i as usize)))?,
                        );
                    }
                    Ok(finish(elements))
                }
            }
        })();
        ctx.leave();
        result
    }

    fn read_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<T, Failure>> {
        async move {
            ctx.enter()?;
            let result = async {
                let len = source.read_array_header().await?;
                match &self.construct {
                    SeqConstruct::None => Err(Failure::unsupported(
                        "the sequence is serialize only and cannot be deserialized",
                    )),
                    SeqConstruct::Mutable { new, push } => {
                        let mut target = new();
                        for i in 0..len {
                            let element = self
                                .element
                                .read_async(source, ctx)
                                .await
                                .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                            push(&mut target, element);
                        }
                        Ok(target)
                    }
                    SeqConstruct::FromVec(finish) => {
                        let mut elements = Vec::with_capacity(len.min(4096) as usize);
                        for i in 0..len {
                            elements.push(
                                self.element
                                    .read_async(source, ctx)
                                    .await
                                    .map_err(|e| e.at(PathSegment::Index(i as usize)))?,
                            );
                        }
                        Ok(finish(elements))
                    }
                }
            }
            .await;
            ctx.leave();
            result
        }
        .boxed()
    }

    fn write_async<'a, 'b: 'a>(
        &'a self,
        value: &'a T,
        sink: &'a mut crate::streaming::AsyncSink<'b>,
        ctx: &'a mut WriteContext,
    ) -> BoxFuture<'a, Result<(), Failure>> {
        async move {
            ctx.enter()?;
            let result = async {
                if !ctx.options.disable_hardware_acceleration {
                    if let Some(view) = self.prim.and_then(|f| f(value)) {
                        {
                            let mut writer = sink.writer();
                            write_prim_slice(&mut writer, view).map_err(Failure::from)?;
                        }
                        return sink.maybe_flush().await;
                    }
                }
                {
                    let mut writer = sink.writer();
                    writer
                        .write_array_header((self.len)(value))
                        .map_err(Failure::from)?;
                }
                for (i, item) in (self.iter)(value).enumerate() {
                    {
                        let mut writer = sink.writer();
                        self.element
                            .write(item, &mut writer, ctx)
                            .map_err(|e| e.at(PathSegment::Index(i)))?;
                    }
                    sink.maybe_flush().await?;
                }
                Ok(())
            }
            .await;
            ctx.leave();
            result
        }
        .boxed()
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Array(Box::new(self.element.schema()))
    }
}

impl<T, E> KindGlue<T> for SeqOf<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn build(&self, cx: &BuildCx<'_>) -> Result<ConverterRef<T>, ConfigError> {
        let shape = self.element.resolve();
        let element = cx.converter(&shape)?;
        Ok(Arc::new(SeqConverter {
            element,
            len: self.len,
            iter: self.iter,
            construct: self.construct.clone(),
            prim: self.prim,
        }))
    }
}

// ---------------------------------------------------------------------------
// Multi dimensional arrays
// ---------------------------------------------------------------------------

struct MultiDimConverter<T: 'static, E: 'static> {
    element: ConverterRef<E>,
    rank: u32,
    dims: fn(&T) -> Vec<usize>,
    iter: for<'a> fn(&'a T) -> Box<dyn Iterator<Item = &'a E> + Send + 'a>,
    from_flat: fn(Vec<usize>, Vec<E>) -> Result<T, shapepack_model::Text>,
}

impl<T, E> MultiDimConverter<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn write_nested(
        &self,
        items: &[&E],
        dims: &[usize],
        level: usize,
        offset: usize,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_array_header(dims[level]).map_err(Failure::from)?;
        if level + 1 == dims.len() {
            for i in 0..dims[level] {
                self.element
                    .write(items[offset + i], writer, ctx)
                    .map_err(|e| e.at(PathSegment::Index(offset + i)))?;
            }
        } else {
            let block: usize = dims[level + 1..].iter().product();
            for i in 0..dims[level] {
                self.write_nested(items, dims, level + 1, offset + i * block, writer, ctx)?;
            }
        }
        Ok(())
    }

    fn read_nested(
        &self,
        input: &mut Bytes,
        dims: &mut Vec<Option<usize>>,
        level: usize,
        elements: &mut Vec<E>,
        ctx: &mut ReadContext,
    ) -> Result<(), Failure> {
        let len = reader::read_array_header(input).map_err(Failure::from)? as usize;
        match dims[level] {
            Some(expected) if expected != len => {
                return Err(Failure::structure(
                    "The nested arrays of a multi dimensional value are not rectangular.",
                ));
            }
            None => dims[level] = Some(len),
            _ => {}
        }
        if level + 1 == dims.len() {
            for i in 0..len {
                elements.push(
                    self.element
                        .read(input, ctx)
                        .map_err(|e| e.at(PathSegment::Index(i)))?,
                );
            }
        } else {
            for _ in 0..len {
                self.read_nested(input, dims, level + 1, elements, ctx)?;
            }
        }
        Ok(())
    }
}

impl<T, E> Converter<T> for MultiDimConverter<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        ctx.enter()?;
        let result = (|| {
            let dims = (self.dims)(value);
            match ctx.options.multi_dimensional_array_format {
                MultiDimFormat::Nested => {
                    let items: Vec<&E> = (self.iter)(value).collect();
                    self.write_nested(&items, &dims, 0, 0, writer, ctx)
                }
                MultiDimFormat::Flat => {
                    let total: usize = dims.iter().product();
                    writer
                        .write_array_header(dims.len() + total)
                        .map_err(Failure::from)?;
                    for d in &dims {
                        writer.write_uint(*d as u64);
                    }
                    for (i, item) in (self.iter)(value).enumerate() {
                        self.element
                            .write(item, writer, ctx)
                            .map_err(|e| e.at(PathSegment::Index(i)))?;
                    }
                    Ok(())
                }
            }
        })();
        ctx.leave();
        result
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        ctx.enter()?;
        let result = (|| {
            match ctx.options.multi_dimensional_array_format {
                MultiDimFormat::Nested => {
                    let mut dims: Vec<Option<usize>> = vec![None; self.rank as usize];
                    let mut elements = Vec::new();
                    self.read_nested(input, &mut dims, 0, &mut elements, ctx)?;
                    let dims: Vec<usize> = dims.into_iter().map(|d| d.unwrap_or(0)).collect();
                    (self.from_flat)(dims, elements)
                        .map_err(|message| Failure::new(crate::error::ErrorKind::Structure(message)))
                }
                MultiDimFormat::Flat => {
                    let header = reader::read_array_header(input).map_err(Failure::from)? as usize;
                    let rank = self.rank as usize;
                    if header < rank {
                        return Err(Failure::structure(
                            "A flat multi dimensional array must start with its lengths.",
                        ));
                    }
                    let mut dims = Vec::with_capacity(rank);
                    for _ in 0..rank {
                        dims.push(reader::read_uint(input).map_err(Failure::from)? as usize);
                    }
                    let total: usize = dims.iter().product();
                    if header != rank + total {
                        return Err(Failure::structure(
                            "The element count of a flat multi dimensional array does not match its lengths.",
                        ));
                    }
                    let mut elements = Vec::with_capacity(total.min(4096));
                    for i in 0..total {
                        elements.push(
                            self.element
                                .read(input, ctx)
                                .map_err(|e| e.at(PathSegment::Index(i)))?,
                        );
                    }
                    (self.from_flat)(dims, elements)
                        .map_err(|message| Failure::new(crate::error::ErrorKind::Structure(message)))
                }
            }
        })();
        ctx.leave();
        result
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> SchemaNode {
        let mut node = self.element.schema();
        for _ in 0..self.rank {
            node = SchemaNode::Array(Box::new(node));
        }
        node
    }
}

impl<T, E> KindGlue<T> for MultiDimOf<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn build(&self, cx: &BuildCx<'_>) -> Result<ConverterRef<T>, ConfigError> {
        let shape = self.element.resolve();
        let element = cx.converter(&shape)?;
        Ok(Arc::new(MultiDimConverter {
            element,
            rank: self.rank,
            dims: self.dims,
            iter: self.iter,
            from_flat: self.from_flat,
        }))
    }
}

// ---------------------------------------------------------------------------
// Dictionaries
// ---------------------------------------------------------------------------

impl<T, K, V> Clone for MapConstruct<T, K, V> {
    fn clone(&self) -> Self {
        match self {
            MapConstruct::None => MapConstruct::None,
            MapConstruct::Mutable { new, insert } => MapConstruct::Mutable {
                new: *new,
                insert: *insert,
            },
            MapConstruct::FromPairs(f) => MapConstruct::FromPairs(*f),
        }
    }
}

struct MapConverter<T: 'static, K: 'static, V: 'static> {
    key: ConverterRef<K>,
    value: ConverterRef<V>,
    len: fn(&T) -> usize,
    iter: for<'a> fn(&'a T) -> Box<dyn Iterator<Item = (&'a K, &'a V)> + Send + 'a>,
    construct: MapConstruct<T, K, V>,
    settings: DictSettings,
}

impl<T, K, V> Converter<T> for MapConverter<T, K, V>
where
    T: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        ctx.enter()?;
        let result = (|| {
            writer
                .write_map_header((self.len)(value))
                .map_err(Failure::from)?;
            for (i, (key, entry)) in (self.iter)(value).enumerate() {
                self.key
                    .write(key, writer, ctx)
                    .map_err(|e| e.at(PathSegment::Index(i)))?;
                self.value
                    .write(entry, writer, ctx)
                    .map_err(|e| e.at(PathSegment::Index(i)))?;
            }
            Ok(())
        })();
        ctx.leave();
        result
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        ctx.enter()?;
        let result = (|| {
            let len = reader::read_map_header(input).map_err(Failure::from)?;
            match &self.construct {
                MapConstruct::None => Err(Failure::unsupported(
                    "the dictionary is serialize only and cannot be deserialized",
                )),
                MapConstruct::Mutable { new, insert } => {
                    let mut target = new(&self.settings);
                    for i in 0..len {
                        let key = self
                            .key
                            .read(input, ctx)
                            .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                        let entry = self
                            .value
                            .read(input, ctx)
                            .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                        insert(&mut target, key, entry);
                    }
                    Ok(target)
                }
                MapConstruct::FromPairs(finish) => {
                    let mut pairs = Vec::with_capacity(len.min(4096) as usize);
                    for i in 0..len {
                        let key = self
                            .key
                            .read(input, ctx)
                            .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                        let entry = self
                            .value
                            .read(input, ctx)
                            .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                        pairs.push((key, entry));
                    }
                    Ok(finish(pairs))
                }
            }
        })();
        ctx.leave();
        result
    }

    fn read_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<T, Failure>> {
        async move {
            ctx.enter()?;
            let result = async {
                let len = source.read_map_header().await?;
                match &self.construct {
                    MapConstruct::None => Err(Failure::unsupported(
                        "the dictionary is serialize only and cannot be deserialized",
                    )),
                    MapConstruct::Mutable { new, insert } => {
                        let mut target = new(&self.settings);
                        for i in 0..len {
                            let key = self
                                .key
                                .read_async(source, ctx)
                                .await
                                .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                            let entry = self
                                .value
                                .read_async(source, ctx)
                                .await
                                .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                            insert(&mut target, key, entry);
                        }
                        Ok(target)
                    }
                    MapConstruct::FromPairs(finish) => {
                        let mut pairs = Vec::with_capacity(len.min(4096) as usize);
                        for i in 0..len {
                            let key = self
                                .key
                                .read_async(source, ctx)
                                .await
                                .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                            let entry = self
                                .value
                                .read_async(source, ctx)
                                .await
                                .map_err(|e| e.at(PathSegment::Index(i as usize)))?;
                            pairs.push((key, entry));
                        }
                        Ok(finish(pairs))
                    }
                }
            }
            .await;
            ctx.leave();
            result
        }
        .boxed()
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Map(Box::new(self.value.schema()))
    }
}

impl<T, K, V> KindGlue<T> for MapOf<T, K, V>
where
    T: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn build(&self, cx: &BuildCx<'_>) -> Result<ConverterRef<T>, ConfigError> {
        let key_shape = self.key.resolve();
        if !matches!(
            key_shape.kind,
            ShapeKind::Primitive | ShapeKind::Enum(_)
        ) {
            return Err(ConfigError::UnsupportedKeyShape(key_shape.name));
        }
        let value_shape = self.value.resolve();
        let key = cx.converter(&key_shape)?;
        let value = cx.converter(&value_shape)?;
        let settings = DictSettings {
            seed: cx.comparer_seed(),
        };
        Ok(Arc::new(MapConverter {
            key,
            value,
            len: self.len,
            iter: self.iter,
            construct: self.construct.clone(),
            settings,
        }))
    }
}
