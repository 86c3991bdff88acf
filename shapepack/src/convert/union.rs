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
use crate::context::{ReadContext, WriteContext};
use crate::convert::{Converter, ConverterRef};
use crate::error::{ConfigError, ErrorKind, Failure, PathSegment};
use crate::schema::SchemaNode;
use crate::shape::{
    Alias, CaseGlue, Constructor, ShapeKind, ShapeSource, UnionShape, UnionStyle,
};
use crate::streaming::AsyncSource;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use rmp::Marker;
use shapepack_model::Text;
use shapepack_msgpack::{reader, MsgPackWriter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The runtime behavior of one union case.
pub trait CaseSlot<T>: Send + Sync {
    fn write_payload(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure>;
    fn read_payload(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure>;
    fn read_payload_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<T, Failure>>;
    fn schema(&self) -> SchemaNode;
}

pub(crate) struct CaseOf<T: 'static, C: 'static> {
    pub(crate) shape: ShapeSource<C>,
    pub(crate) project: for<'a> fn(&'a T) -> Option<&'a C>,
    pub(crate) inject: fn(C) -> T,
}

impl<T, C> CaseGlue<T> for CaseOf<T, C>
where
    T: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn build(&self, cx: &BuildCx<'_>) -> Result<Box<dyn CaseSlot<T>>, ConfigError> {
        let shape = self.shape.resolve();
        let converter = cx.converter(&shape)?;
        Ok(Box::new(TypedCaseSlot {
            converter,
            project: self.project,
            inject: self.inject,
        }))
    }

    fn required_names(&self) -> Vec<&'static str> {
        let shape = self.shape.resolve();
        match &shape.kind {
            ShapeKind::Object(object) => match &object.constructor {
                Constructor::Parameterized { params, .. } => params
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name)
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

struct TypedCaseSlot<T: 'static, C: 'static> {
    converter: ConverterRef<C>,
    project: for<'a> fn(&'a T) -> Option<&'a C>,
    inject: fn(C) -> T,
}

impl<T, C> CaseSlot<T> for TypedCaseSlot<T, C>
where
    T: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn write_payload(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        let case = (self.project)(value).ok_or_else(|| {
            Failure::structure("The value does not belong to the selected union case.")
        })?;
        self.converter.write(case, writer, ctx)
    }

    fn read_payload(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        let case = self.converter.read(input, ctx)?;
        Ok((self.inject)(case))
    }

    fn read_payload_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<T, Failure>> {
        async move {
            let case = self.converter.read_async(source, ctx).await?;
            Ok((self.inject)(case))
        }
        .boxed()
    }

    fn schema(&self) -> SchemaNode {
        self.converter.schema()
    }
}

struct BuiltCase<T: 'static> {
    alias: Alias,
    name: &'static str,
    required: Vec<&'static str>,
    slot: Box<dyn CaseSlot<T>>,
}

/// Tagged variant dispatch: an ordered case list (most derived first, consulted by
/// the shape's case index on write) plus integer and UTF8 keyed tables for reads.
pub(crate) struct UnionConverter<T: 'static> {
    type_name: &'static str,
    cases: Vec<BuiltCase<T>>,
    by_int: HashMap<i64, usize>,
    by_name: HashMap<Box<[u8]>, usize>,
    base: Option<ConverterRef<T>>,
    case_index: fn(&T) -> Option<usize>,
    duck: bool,
}

impl<T: Send + Sync + 'static> UnionConverter<T> {
    fn write_discriminator(
        &self,
        alias: Option<&Alias>,
        writer: &mut MsgPackWriter<'_>,
    ) -> Result<(), Failure> {
        match alias {
            None => {
                writer.write_nil();
                Ok(())
            }
            Some(Alias::Int(n)) => {
                writer.write_int(*n);
                Ok(())
            }
            Some(Alias::Name(name)) => writer.write_str(name.as_str()).map_err(Failure::from),
        }
    }

    fn case_by_discriminator(&self, input: &mut Bytes) -> Result<Option<usize>, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        match marker {
            Marker::Null => {
                reader::read_nil(input).map_err(Failure::from)?;
                Ok(None)
            }
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                let name = reader::read_str_bytes(input).map_err(Failure::from)?;
                match self.by_name.get(name.as_ref()) {
                    Some(&index) => Ok(Some(index)),
                    None => {
                        let text = std::str::from_utf8(name.as_ref())
                            .map(Text::new)
                            .unwrap_or_else(|_| Text::new("<invalid utf8>"));
                        Err(Failure::new(ErrorKind::UnknownUnionDiscriminator(
                            Alias::Name(text),
                        )))
                    }
                }
            }
            _ => {
                let n = reader::read_int(input).map_err(Failure::from)?;
                match self.by_int.get(&n) {
                    Some(&index) => Ok(Some(index)),
                    None => Err(Failure::new(ErrorKind::UnknownUnionDiscriminator(
                        Alias::Int(n),
                    ))),
                }
            }
        }
    }

    fn base_converter(&self) -> Result<&ConverterRef<T>, Failure> {
        self.base.as_ref().ok_or_else(|| {
            Failure::structure(&format!(
                "The discriminator selects the base type but union '{}' declares no base.",
                self.type_name
            ))
        })
    }

    fn read_duck(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        if !matches!(marker, Marker::FixMap(_) | Marker::Map16 | Marker::Map32) {
            return Err(Failure::from(reader::MsgPackReadError::InvalidMarker(
                marker,
            )));
        }
        let raw = reader::capture_value(input).map_err(Failure::from)?;
        let keys = scan_map_keys(raw.clone())?;
        let mut matched: Vec<usize> = Vec::new();
        for (index, case) in self.cases.iter().enumerate() {
            if case
                .required
                .iter()
                .all(|name| keys.contains(name.as_bytes()))
            {
                matched.push(index);
            }
        }
        match matched.as_slice() {
            [] => Err(Failure::new(ErrorKind::NoUnionMatch)),
            [index] => {
                let case = &self.cases[*index];
                case.slot
                    .read_payload(&mut raw.clone(), ctx)
                    .map_err(|e| e.at(PathSegment::Case(Text::new(case.name))))
            }
            many => Err(Failure::new(ErrorKind::AmbiguousUnionMatch(
                many.iter()
                    .map(|i| Text::new(self.cases[*i].name))
                    .collect(),
            ))),
        }
    }
}

fn scan_map_keys(mut raw: Bytes) -> Result<HashSet<Vec<u8>>, Failure> {
    let entries = reader::read_map_header(&mut raw).map_err(Failure::from)?;
    let mut keys = HashSet::with_capacity(entries as usize);
    for _ in 0..entries {
        let key = reader::read_str_bytes(&mut raw).map_err(Failure::from)?;
        keys.insert(key.to_vec());
        reader::skip_value(&mut raw).map_err(Failure::from)?;
    }
    Ok(keys)
}

impl<T: Send + Sync + 'static> Converter<T> for UnionConverter<T> {
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        ctx.enter()?;
        let result = (|| {
            let selected = (self.case_index)(value);
            if self.duck {
                return match selected {
                    Some(index) => {
                        let case = &self.cases[index];
                        case.slot
                            .write_payload(value, writer, ctx)
                            .map_err(|e| e.at(PathSegment::Case(Text::new(case.name))))
                    }
                    None => self.base_converter()?.write(value, writer, ctx),
                };
            }
            let use_objects = ctx.options.use_discriminator_objects;
            if use_objects {
                writer.write_map_header(1).map_err(Failure::from)?;
            } else {
                writer.write_array_header(2).map_err(Failure::from)?;
            }
            match selected {
                Some(index) => {
                    let case = &self.cases[index];
                    self.write_discriminator(Some(&case.alias), writer)?;
                    case.slot
                        .write_payload(value, writer, ctx)
                        .map_err(|e| e.at(PathSegment::Case(Text::new(case.name))))
                }
                None => {
                    self.write_discriminator(None, writer)?;
                    self.base_converter()?.write(value, writer, ctx)
                }
            }
        })();
        ctx.leave();
        result
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        ctx.enter()?;
        let result = (|| {
            if self.duck {
                return self.read_duck(input, ctx);
            }
            let marker = reader::peek_marker(input).map_err(Failure::from)?;
            match marker {
                Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
                    let len = reader::read_array_header(input).map_err(Failure::from)?;
                    if len != 2 {
                        return Err(Failure::structure(
                            "A union payload must be a two element array.",
                        ));
                    }
                }
                Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
                    let len = reader::read_map_header(input).map_err(Failure::from)?;
                    if len != 1 {
                        return Err(Failure::structure(
                            "A union payload must be a single entry map.",
                        ));
                    }
                }
                ow => {
                    return Err(Failure::from(reader::MsgPackReadError::InvalidMarker(ow)));
                }
            }
            match self.case_by_discriminator(input)? {
                Some(index) => {
                    let case = &self.cases[index];
                    case.slot
                        .read_payload(input, ctx)
                        .map_err(|e| e.at(PathSegment::Case(Text::new(case.name))))
                }
                None => self.base_converter()?.read(input, ctx),
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
                if self.duck {
                    let mut raw = source.buffer_value().await?;
                    return self.read_duck(&mut raw, ctx);
                }
                let marker = source.peek_marker().await?;
                match marker {
                    Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
                        let len = source.read_array_header().await?;
                        if len != 2 {
                            return Err(Failure::structure(
                                "A union payload must be a two element array.",
                            ));
                        }
                    }
                    Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
                        let len = source.read_map_header().await?;
                        if len != 1 {
                            return Err(Failure::structure(
                                "A union payload must be a single entry map.",
                            ));
                        }
                    }
                    ow => {
                        return Err(Failure::from(reader::MsgPackReadError::InvalidMarker(ow)));
                    }
                }
                let mut discriminator = source.buffer_value().await?;
                match self.case_by_discriminator(&mut discriminator)? {
                    Some(index) => {
                        let case = &self.cases[index];
                        case.slot
                            .read_payload_async(source, ctx)
                            .await
                            .map_err(|e| e.at(PathSegment::Case(Text::new(case.name))))
                    }
                    None => self.base_converter()?.read_async(source, ctx).await,
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
        let mut options: Vec<SchemaNode> = self.cases.iter().map(|c| c.slot.schema()).collect();
        if let Some(base) = &self.base {
            options.push(base.schema());
        }
        SchemaNode::OneOf(options)
    }
}

/// Builds a union converter, validating alias uniqueness and, for duck typed
/// unions, that no two cases declare identical required property sets.
pub(crate) fn build_union<T: Send + Sync + 'static>(
    type_name: &'static str,
    union: &UnionShape<T>,
    base_override: Option<ConverterRef<T>>,
    cx: &BuildCx<'_>,
) -> Result<ConverterRef<T>, ConfigError> {
    let mut by_int = HashMap::new();
    let mut by_name: HashMap<Box<[u8]>, usize> = HashMap::new();
    let mut cases = Vec::with_capacity(union.cases.len());
    for (index, case) in union.cases.iter().enumerate() {
        match &case.alias {
            Alias::Int(n) => {
                if by_int.insert(*n, index).is_some() {
                    return Err(ConfigError::DuplicateUnionAlias(n.to_string(), type_name));
                }
            }
            Alias::Name(name) => {
                if by_name
                    .insert(name.as_str().as_bytes().into(), index)
                    .is_some()
                {
                    return Err(ConfigError::DuplicateUnionAlias(
                        name.to_string(),
                        type_name,
                    ));
                }
            }
        }
        cases.push(BuiltCase {
            alias: case.alias.clone(),
            name: case.name,
            required: case.glue.required_names(),
            slot: case.glue.build(cx)?,
        });
    }

    let duck = union.style == UnionStyle::DuckTyped;
    if duck {
        for (i, a) in cases.iter().enumerate() {
            let a_set: HashSet<&&str> = a.required.iter().collect();
            for b in &cases[i + 1..] {
                let b_set: HashSet<&&str> = b.required.iter().collect();
                if a_set == b_set {
                    return Err(ConfigError::AmbiguousDuckUnion(type_name, a.name, b.name));
                }
            }
        }
    }

    let base = match (&union.base, base_override) {
        (Some(object), _) => Some(crate::convert::object::build_object(
            type_name, object, cx,
        )?),
        (None, Some(converter)) => Some(converter),
        (None, None) => None,
    };

    Ok(Arc::new(UnionConverter {
        type_name,
        cases,
        by_int,
        by_name,
        base,
        case_index: union.case_index,
        duck,
    }))
}
