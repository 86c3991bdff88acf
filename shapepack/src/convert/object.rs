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
use crate::config::{DeserializeDefaults, SerializeDefaults};
use crate::context::{ReadContext, WriteContext};
use crate::convert::dynamic::ValueConverter;
use crate::convert::{Converter, ConverterRef};
use crate::error::{ConfigError, ErrorKind, Failure, PathSegment};
use crate::schema::SchemaNode;
use crate::shape::attrs::{ComparerSelector, CustomConverterSource};
use crate::shape::{
    is_value_type, Constructor, CtorGlue, DefaultValue, ErasedAssign, Getter, ObjectShape,
    Property, ShapeKind, ShapeSource,
};
use crate::streaming::AsyncSource;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use shapepack_model::{Text, Value};
use shapepack_msgpack::writer::encode_str_token;
use shapepack_msgpack::{reader, MsgPackWriter};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Bit per member progress tracking for one object read; detects double
/// assignment and drives the required property check.
pub(crate) struct Bitset {
    blocks: Vec<u64>,
}

impl Bitset {
    pub(crate) fn new(capacity: usize) -> Self {
        Bitset {
            blocks: vec![0; (capacity + 63) / 64],
        }
    }

    pub(crate) fn set(&mut self, index: usize) {
        if let Some(block) = self.blocks.get_mut(index / 64) {
            *block |= 1 << (index % 64);
        }
    }

    pub(crate) fn get(&self, index: usize) -> bool {
        self.blocks
            .get(index / 64)
            .map(|block| (block >> (index % 64)) & 1 != 0)
            .unwrap_or(false)
    }
}

/// The in-flight state of one object read: the constructor argument state (or the
/// instance itself for default constructors) plus captured unknown entries.
pub(crate) struct ObjState {
    pub(crate) state: Box<dyn Any + Send>,
    pub(crate) unknown: Vec<(Text, Value)>,
}

/// Build-time inputs for one member slot, resolved by the object builder.
pub(crate) struct SlotSpec {
    pub(crate) wire_name: Text,
    pub(crate) key_token: Bytes,
    pub(crate) required: bool,
    pub(crate) custom: Option<CustomConverterSource>,
    pub(crate) comparer: Option<ComparerSelector>,
}

/// The runtime behavior of one member inside an object converter.
pub(crate) trait MemberSlot<T>: Send + Sync {
    fn wire_name(&self) -> &Text;
    fn entry_count(&self, value: &T) -> usize;
    fn should_write(&self, value: &T, ctx: &WriteContext) -> bool;
    /// Map form: the pre-encoded key followed by the value (buckets write all
    /// their captured entries).
    fn write_entry(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure>;
    /// Array form: the value alone (or nil when unreadable).
    fn write_value(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure>;
    fn read_value(
        &self,
        state: &mut ObjState,
        input: &mut Bytes,
        ctx: &mut ReadContext,
    ) -> Result<bool, Failure>;
    fn read_value_async<'a, 'b: 'a>(
        &'a self,
        state: &'a mut ObjState,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<bool, Failure>>;
    /// Applies the declared default (or the type's absent value). Returns whether
    /// a value was provided.
    fn apply_absent(&self, state: &mut ObjState) -> Result<bool, Failure>;
    fn accept_unknown(&self, _state: &mut ObjState, _key: Text, _value: Value) {}
    fn flush_unknown(&self, _state: &mut ObjState) -> Result<(), Failure> {
        Ok(())
    }
    fn schema(&self) -> SchemaNode;
}

/// A by-reference member update used by cycle capable shared reads.
pub(crate) trait SharedSlot<T>: Send + Sync {
    fn read_into(&self, target: &T, input: &mut Bytes, ctx: &mut ReadContext)
        -> Result<(), Failure>;
}

/// Erased build hook carried by every [`Property`].
pub(crate) trait PropertyGlue<T>: Send + Sync {
    fn can_assign(&self) -> bool;
    fn param_state_type(&self) -> Option<TypeId>;
    fn build_slot(
        &self,
        cx: &BuildCx<'_>,
        spec: SlotSpec,
    ) -> Result<Box<dyn MemberSlot<T>>, ConfigError>;
    fn build_shared_slot(
        &self,
        cx: &BuildCx<'_>,
        wire_name: Text,
    ) -> Result<Option<Box<dyn SharedSlot<T>>>, ConfigError>;
}

// ---------------------------------------------------------------------------
// Typed property glue
// ---------------------------------------------------------------------------

pub(crate) struct TypedProperty<T: 'static, P: 'static> {
    pub(crate) shape: ShapeSource<P>,
    pub(crate) get: Option<Getter<T, P>>,
    pub(crate) set: Option<fn(&mut T, P)>,
    pub(crate) set_shared: Option<fn(&T, P)>,
    pub(crate) param: Option<ErasedAssign<P>>,
    pub(crate) default: Option<Arc<dyn DefaultValue<P>>>,
    pub(crate) should: Option<fn(&T) -> bool>,
}

impl<T, P> PropertyGlue<T> for TypedProperty<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn can_assign(&self) -> bool {
        self.set.is_some() || self.param.is_some()
    }

    fn param_state_type(&self) -> Option<TypeId> {
        self.param.as_ref().map(|p| p.state_type)
    }

    fn build_slot(
        &self,
        cx: &BuildCx<'_>,
        spec: SlotSpec,
    ) -> Result<Box<dyn MemberSlot<T>>, ConfigError> {
        let shape = self.shape.resolve();
        let converter = match &spec.custom {
            Some(custom) => custom
                .resolve::<P>()
                .ok_or(ConfigError::BadCustomConverter(shape.name))?,
            None => cx.converter_keyed(&shape, spec.comparer.clone())?,
        };
        Ok(Box::new(TypedMember {
            wire_name: spec.wire_name,
            key_token: spec.key_token,
            required: spec.required,
            nullable: matches!(shape.kind, ShapeKind::Optional(_)),
            value_type: is_value_type(&shape),
            absent: shape.absent,
            converter,
            get: self.get.clone(),
            set: self.set,
            param: self.param.clone(),
            default: self.default.clone(),
            should: self.should,
        }))
    }

    fn build_shared_slot(
        &self,
        cx: &BuildCx<'_>,
        wire_name: Text,
    ) -> Result<Option<Box<dyn SharedSlot<T>>>, ConfigError> {
        let Some(set_shared) = self.set_shared else {
            return Ok(None);
        };
        let shape = self.shape.resolve();
        let converter = cx.converter(&shape)?;
        Ok(Some(Box::new(TypedSharedMember {
            wire_name,
            converter,
            set_shared,
        })))
    }
}

struct TypedMember<T: 'static, P: 'static> {
    wire_name: Text,
    key_token: Bytes,
    required: bool,
    nullable: bool,
    value_type: bool,
    absent: Option<fn() -> P>,
    converter: ConverterRef<P>,
    get: Option<Getter<T, P>>,
    set: Option<fn(&mut T, P)>,
    param: Option<ErasedAssign<P>>,
    default: Option<Arc<dyn DefaultValue<P>>>,
    should: Option<fn(&T) -> bool>,
}

impl<T, P> TypedMember<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn assign(&self, state: &mut ObjState, value: P) -> Result<(), Failure> {
        if let Some(param) = &self.param {
            if (param.apply)(state.state.as_mut(), value) {
                return Ok(());
            }
            return Err(Failure::structure(
                "The constructor state does not accept this parameter.",
            ));
        }
        if let Some(set) = self.set {
            if let Some(target) = state.state.downcast_mut::<T>() {
                set(target, value);
                return Ok(());
            }
        }
        Err(Failure::structure(
            "The member cannot be assigned on this object.",
        ))
    }

    /// Nil handling for non nullable members: consume and treat as absent when the
    /// policy allows, fail otherwise. Returns whether the nil was consumed.
    fn consume_disallowed_nil(&self, ctx: &ReadContext) -> Result<(), Failure> {
        if ctx
            .options
            .deserialize_default_values
            .contains(DeserializeDefaults::ALLOW_NULL_FOR_NON_NULLABLE)
        {
            Ok(())
        } else {
            Err(Failure::new(ErrorKind::DisallowedNullValue(
                self.wire_name.clone(),
            )))
        }
    }
}

impl<T, P> MemberSlot<T> for TypedMember<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn wire_name(&self) -> &Text {
        &self.wire_name
    }

    fn entry_count(&self, _value: &T) -> usize {
        1
    }

    fn should_write(&self, value: &T, ctx: &WriteContext) -> bool {
        let Some(get) = &self.get else {
            return false;
        };
        if let Some(predicate) = self.should {
            if !predicate(value) {
                return false;
            }
        }
        let flags = ctx.options.serialize_default_values;
        if flags.contains(SerializeDefaults::ALWAYS) {
            return true;
        }
        if self.value_type && flags.contains(SerializeDefaults::VALUE_TYPES) {
            return true;
        }
        if !self.value_type && flags.contains(SerializeDefaults::REFERENCE_TYPES) {
            return true;
        }
        if self.required && flags.contains(SerializeDefaults::REQUIRED) {
            return true;
        }
        match &self.default {
            Some(default) => match get {
                Getter::Ref(get) => !default.matches(get(value)),
                Getter::Owned(get) => !default.matches(&get(value)),
            },
            None => true,
        }
    }

    fn write_entry(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_raw(&self.key_token);
        self.write_value(value, writer, ctx)
    }

    fn write_value(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        match &self.get {
            Some(Getter::Ref(get)) => self.converter.write(get(value), writer, ctx),
            Some(Getter::Owned(get)) => {
                let owned = get(value);
                self.converter.write(&owned, writer, ctx)
            }
            None => {
                writer.write_nil();
                Ok(())
            }
        }
    }

    fn read_value(
        &self,
        state: &mut ObjState,
        input: &mut Bytes,
        ctx: &mut ReadContext,
    ) -> Result<bool, Failure> {
        if !self.nullable && matches!(reader::peek_marker(input), Ok(rmp::Marker::Null)) {
            self.consume_disallowed_nil(ctx)?;
            reader::read_nil(input)?;
            return Ok(false);
        }
        let value = self.converter.read(input, ctx)?;
        self.assign(state, value)?;
        Ok(true)
    }

    fn read_value_async<'a, 'b: 'a>(
        &'a self,
        state: &'a mut ObjState,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<bool, Failure>> {
        async move {
            if !self.nullable && matches!(source.peek_marker().await?, rmp::Marker::Null) {
                self.consume_disallowed_nil(ctx)?;
                source.skip_value().await?;
                return Ok(false);
            }
            let value = self.converter.read_async(source, ctx).await?;
            self.assign(state, value)?;
            Ok(true)
        }
        .boxed()
    }

    fn apply_absent(&self, state: &mut ObjState) -> Result<bool, Failure> {
        if let Some(default) = &self.default {
            self.assign(state, default.produce())?;
            Ok(true)
        } else if let Some(absent) = self.absent {
            self.assign(state, absent())?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn schema(&self) -> SchemaNode {
        self.converter.schema()
    }
}

struct TypedSharedMember<T: 'static, P: 'static> {
    wire_name: Text,
    converter: ConverterRef<P>,
    set_shared: fn(&T, P),
}

impl<T, P> SharedSlot<T> for TypedSharedMember<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn read_into(
        &self,
        target: &T,
        input: &mut Bytes,
        ctx: &mut ReadContext,
    ) -> Result<(), Failure> {
        let value = self
            .converter
            .read(input, ctx)
            .map_err(|e| e.at(PathSegment::Property(self.wire_name.clone())))?;
        (self.set_shared)(target, value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unknown-data bucket glue
// ---------------------------------------------------------------------------

pub(crate) struct TypedBucket<T: 'static> {
    pub(crate) get: Option<fn(&T) -> &Vec<(Text, Value)>>,
    pub(crate) set: Option<fn(&mut T, Vec<(Text, Value)>)>,
    pub(crate) param: Option<ErasedAssign<Vec<(Text, Value)>>>,
}

impl<T> PropertyGlue<T> for TypedBucket<T>
where
    T: Send + Sync + 'static,
{
    fn can_assign(&self) -> bool {
        self.set.is_some() || self.param.is_some()
    }

    fn param_state_type(&self) -> Option<TypeId> {
        self.param.as_ref().map(|p| p.state_type)
    }

    fn build_slot(
        &self,
        _cx: &BuildCx<'_>,
        spec: SlotSpec,
    ) -> Result<Box<dyn MemberSlot<T>>, ConfigError> {
        Ok(Box::new(BucketSlot {
            wire_name: spec.wire_name,
            get: self.get,
            set: self.set,
            param: self.param.clone(),
        }))
    }

    fn build_shared_slot(
        &self,
        _cx: &BuildCx<'_>,
        _wire_name: Text,
    ) -> Result<Option<Box<dyn SharedSlot<T>>>, ConfigError> {
        Ok(None)
    }
}

struct BucketSlot<T: 'static> {
    wire_name: Text,
    get: Option<fn(&T) -> &Vec<(Text, Value)>>,
    set: Option<fn(&mut T, Vec<(Text, Value)>)>,
    param: Option<ErasedAssign<Vec<(Text, Value)>>>,
}

impl<T> MemberSlot<T> for BucketSlot<T>
where
    T: Send + Sync + 'static,
{
    fn wire_name(&self) -> &Text {
        &self.wire_name
    }

    fn entry_count(&self, value: &T) -> usize {
        self.get.map(|get| get(value).len()).unwrap_or(0)
    }

    fn should_write(&self, value: &T, _ctx: &WriteContext) -> bool {
        self.entry_count(value) > 0
    }

    fn write_entry(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        let Some(get) = self.get else {
            return Ok(());
        };
        for (key, entry) in get(value) {
            writer.write_str(key.as_str()).map_err(Failure::from)?;
            ValueConverter.write(entry, writer, ctx)?;
        }
        Ok(())
    }

    fn write_value(
        &self,
        _value: &T,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_nil();
        Ok(())
    }

    fn read_value(
        &self,
        _state: &mut ObjState,
        _input: &mut Bytes,
        _ctx: &mut ReadContext,
    ) -> Result<bool, Failure> {
        Err(Failure::structure(
            "The unknown-data bucket has no wire key of its own.",
        ))
    }

    fn read_value_async<'a, 'b: 'a>(
        &'a self,
        _state: &'a mut ObjState,
        _source: &'a mut AsyncSource<'b>,
        _ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<bool, Failure>> {
        async move {
            Err(Failure::structure(
                "The unknown-data bucket has no wire key of its own.",
            ))
        }
        .boxed()
    }

    fn apply_absent(&self, _state: &mut ObjState) -> Result<bool, Failure> {
        Ok(true)
    }

    fn accept_unknown(&self, state: &mut ObjState, key: Text, value: Value) {
        state.unknown.push((key, value));
    }

    fn flush_unknown(&self, state: &mut ObjState) -> Result<(), Failure> {
        let captured = std::mem::take(&mut state.unknown);
        if let Some(param) = &self.param {
            if (param.apply)(state.state.as_mut(), captured) {
                return Ok(());
            }
            return Err(Failure::structure(
                "The constructor state does not accept the unknown-data bucket.",
            ));
        }
        if let Some(set) = self.set {
            if let Some(target) = state.state.downcast_mut::<T>() {
                set(target, captured);
                return Ok(());
            }
        }
        Ok(())
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Map(Box::new(SchemaNode::Any))
    }
}

// ---------------------------------------------------------------------------
// Object converters
// ---------------------------------------------------------------------------

enum CtorRuntime<T: 'static> {
    None,
    Default { make: fn() -> T },
    Parameterized(Arc<dyn CtorGlue<T>>),
}

impl<T: Send + Sync + 'static> CtorRuntime<T> {
    fn new_state(&self, type_name: &'static str) -> Result<Box<dyn Any + Send>, Failure> {
        match self {
            CtorRuntime::None => Err(Failure::unsupported(&format!(
                "'{}' declares no construction strategy and cannot be deserialized",
                type_name
            ))),
            CtorRuntime::Default { make } => Ok(Box::new(make())),
            CtorRuntime::Parameterized(glue) => Ok(glue.new_state()),
        }
    }

    fn finish(&self, state: Box<dyn Any + Send>) -> Result<T, Failure> {
        match self {
            CtorRuntime::None => Err(Failure::structure("The type cannot be constructed.")),
            CtorRuntime::Default { .. } => match state.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(_) => Err(Failure::structure("The object state had the wrong type.")),
            },
            CtorRuntime::Parameterized(glue) => glue.finish(state),
        }
    }
}

struct MemberEntry<T: 'static> {
    slot: Box<dyn MemberSlot<T>>,
    assignable: bool,
    required: bool,
    bucket: bool,
}

/// The map wire form: `property name -> value`, unknown keys skipped or captured.
pub(crate) struct MapObjectConverter<T: 'static> {
    type_name: &'static str,
    members: Vec<MemberEntry<T>>,
    by_key: HashMap<Box<[u8]>, usize>,
    ctor: CtorRuntime<T>,
    bucket: Option<usize>,
}

impl<T: Send + Sync + 'static> MapObjectConverter<T> {
    fn check_missing(
        &self,
        state: &mut ObjState,
        progress: &Bitset,
        ctx: &ReadContext,
    ) -> Result<(), Failure> {
        let allow_missing = ctx
            .options
            .deserialize_default_values
            .contains(DeserializeDefaults::ALLOW_MISSING_REQUIRED);
        let mut missing = Vec::new();
        for (i, entry) in self.members.iter().enumerate() {
            if entry.bucket || !entry.assignable || progress.get(i) {
                continue;
            }
            let provided = entry.slot.apply_absent(state).map_err(|e| {
                e.at(PathSegment::Property(entry.slot.wire_name().clone()))
            })?;
            if !provided && entry.required && !allow_missing {
                missing.push(entry.slot.wire_name().clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Failure::new(ErrorKind::MissingRequiredProperties(missing)))
        }
    }

    fn finish(&self, mut state: ObjState) -> Result<T, Failure> {
        if let Some(bucket) = self.bucket {
            self.members[bucket].slot.flush_unknown(&mut state)?;
        }
        self.ctor.finish(state.state)
    }
}

impl<T: Send + Sync + 'static> Converter<T> for MapObjectConverter<T> {
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        ctx.enter()?;
        let result = (|| {
            let total: usize = self
                .members
                .iter()
                .filter(|m| m.slot.should_write(value, ctx))
                .map(|m| m.slot.entry_count(value))
                .sum();
            writer.write_map_header(total).map_err(Failure::from)?;
            for member in &self.members {
                if member.slot.should_write(value, ctx) {
                    member.slot.write_entry(value, writer, ctx).map_err(|e| {
                        e.at(PathSegment::Property(member.slot.wire_name().clone()))
                    })?;
                }
            }
            Ok(())
        })();
        ctx.leave();
        result
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        ctx.enter()?;
        let result = (|| {
            let entries = reader::read_map_header(input).map_err(Failure::from)?;
            let mut state = ObjState {
                state: self.ctor.new_state(self.type_name)?,
                unknown: Vec::new(),
            };
            let mut progress = Bitset::new(self.members.len());
            for _ in 0..entries {
                let key = reader::read_str_bytes(input).map_err(Failure::from)?;
                match self.by_key.get(key.as_ref()) {
                    Some(&index) => {
                        let entry = &self.members[index];
                        if !entry.assignable {
                            reader::skip_value(input).map_err(Failure::from)?;
                            continue;
                        }
                        if progress.get(index) {
                            return Err(Failure::new(ErrorKind::DoublePropertyAssignment(
                                entry.slot.wire_name().clone(),
                            )));
                        }
                        let assigned =
                            entry.slot.read_value(&mut state, input, ctx).map_err(|e| {
                                e.at(PathSegment::Property(entry.slot.wire_name().clone()))
                            })?;
                        if assigned {
                            progress.set(index);
                        }
                    }
                    None => {
                        if let Some(bucket) = self.bucket {
                            let key_text = ctx.make_text(key.as_ref())?;
                            let value = ValueConverter.read(input, ctx)?;
                            self.members[bucket]
                                .slot
                                .accept_unknown(&mut state, key_text, value);
                        } else {
                            reader::skip_value(input).map_err(Failure::from)?;
                        }
                    }
                }
            }
            self.check_missing(&mut state, &progress, ctx)?;
            self.finish(state)
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
                let entries = source.read_map_header().await?;
                let mut state = ObjState {
                    state: self.ctor.new_state(self.type_name)?,
                    unknown: Vec::new(),
                };
                let mut progress = Bitset::new(self.members.len());
                for _ in 0..entries {
                    let key = source.read_str_bytes().await?;
                    match self.by_key.get(key.as_ref()) {
                        Some(&index) => {
                            let entry = &self.members[index];
                            if !entry.assignable {
                                source.skip_value().await?;
                                continue;
                            }
                            if progress.get(index) {
                                return Err(Failure::new(ErrorKind::DoublePropertyAssignment(
                                    entry.slot.wire_name().clone(),
                                )));
                            }
                            let assigned = entry
                                .slot
                                .read_value_async(&mut state, source, ctx)
                                .await
                                .map_err(|e| {
                                    e.at(PathSegment::Property(entry.slot.wire_name().clone()))
                                })?;
                            if assigned {
                                progress.set(index);
                            }
                        }
                        None => {
                            if let Some(bucket) = self.bucket {
                                let key_text = ctx.make_text(key.as_ref())?;
                                let mut raw = source.buffer_value().await?;
                                let value = ValueConverter.read(&mut raw, ctx)?;
                                self.members[bucket]
                                    .slot
                                    .accept_unknown(&mut state, key_text, value);
                            } else {
                                source.skip_value().await?;
                            }
                        }
                    }
                }
                self.check_missing(&mut state, &progress, ctx)?;
                self.finish(state)
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
                {
                    let mut writer = sink.writer();
                    let total: usize = self
                        .members
                        .iter()
                        .filter(|m| m.slot.should_write(value, ctx))
                        .map(|m| m.slot.entry_count(value))
                        .sum();
                    writer.write_map_header(total).map_err(Failure::from)?;
                }
                for member in &self.members {
                    if member.slot.should_write(value, ctx) {
                        {
                            let mut writer = sink.writer();
                            member.slot.write_entry(value, &mut writer, ctx).map_err(
                                |e| e.at(PathSegment::Property(member.slot.wire_name().clone())),
                            )?;
                        }
                        sink.maybe_flush().await?;
                    }
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
        let mut properties = Vec::new();
        let mut required = Vec::new();
        for member in &self.members {
            if member.bucket {
                continue;
            }
            properties.push((member.slot.wire_name().clone(), member.slot.schema()));
            if member.required {
                required.push(member.slot.wire_name().clone());
            }
        }
        SchemaNode::Object {
            properties,
            required,
        }
    }
}

/// The array wire form: values by declared key index, nil for empty slots,
/// trailing defaults truncated.
pub(crate) struct ArrayObjectConverter<T: 'static> {
    type_name: &'static str,
    positions: Vec<Option<MemberEntry<T>>>,
    ctor: CtorRuntime<T>,
}

impl<T: Send + Sync + 'static> ArrayObjectConverter<T> {
    fn emit_len(&self, value: &T, ctx: &WriteContext) -> usize {
        let mut len = self.positions.len();
        while len > 0 {
            match &self.positions[len - 1] {
                None => len -= 1,
                Some(entry) => {
                    if entry.slot.should_write(value, ctx) {
                        break;
                    }
                    len -= 1;
                }
            }
        }
        len
    }

    fn finish_slots(
        &self,
        state: &mut ObjState,
        progress: &Bitset,
        ctx: &ReadContext,
    ) -> Result<(), Failure> {
        let allow_missing = ctx
            .options
            .deserialize_default_values
            .contains(DeserializeDefaults::ALLOW_MISSING_REQUIRED);
        let mut missing = Vec::new();
        for (i, entry) in self.positions.iter().enumerate() {
            let Some(entry) = entry else { continue };
            if !entry.assignable || progress.get(i) {
                continue;
            }
            let provided = entry
                .slot
                .apply_absent(state)
                .map_err(|e| e.at(PathSegment::Index(i)))?;
            if !provided && entry.required && !allow_missing {
                missing.push(entry.slot.wire_name().clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Failure::new(ErrorKind::MissingRequiredProperties(missing)))
        }
    }
}

impl<T: Send + Sync + 'static> Converter<T> for ArrayObjectConverter<T> {
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        ctx.enter()?;
        let result = (|| {
            let len = self.emit_len(value, ctx);
            writer.write_array_header(len).map_err(Failure::from)?;
            for position in &self.positions[..len] {
                match position {
                    Some(entry) => entry
                        .slot
                        .write_value(value, writer, ctx)
                        .map_err(|e| e.at(PathSegment::Property(entry.slot.wire_name().clone())))?,
                    None => writer.write_nil(),
                }
            }
            Ok(())
        })();
        ctx.leave();
        result
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        ctx.enter()?;
        let result = (|| {
            let len = reader::read_array_header(input).map_err(Failure::from)? as usize;
            let mut state = ObjState {
                state: self.ctor.new_state(self.type_name)?,
                unknown: Vec::new(),
            };
            let mut progress = Bitset::new(self.positions.len());
            for i in 0..len {
                match self.positions.get(i).and_then(Option::as_ref) {
                    Some(entry) if entry.assignable => {
                        let assigned =
                            entry.slot.read_value(&mut state, input, ctx).map_err(|e| {
                                e.at(PathSegment::Property(entry.slot.wire_name().clone()))
                            })?;
                        if assigned {
                            progress.set(i);
                        }
                    }
                    _ => {
                        reader::skip_value(input).map_err(Failure::from)?;
                    }
                }
            }
            self.finish_slots(&mut state, &progress, ctx)?;
            self.ctor.finish(state.state)
        })();
        ctx.leave();
        result
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Tuple(
            self.positions
                .iter()
                .map(|p| match p {
                    Some(entry) => entry.slot.schema(),
                    None => SchemaNode::Null,
                })
                .collect(),
        )
    }
}

/// Map-form population of an already constructed shared instance, used by cycle
/// capable reference reads.
pub(crate) struct SharedPopulate<T: 'static> {
    by_key: HashMap<Box<[u8]>, usize>,
    slots: Vec<Box<dyn SharedSlot<T>>>,
}

impl<T: Send + Sync + 'static> SharedPopulate<T> {
    pub(crate) fn read_into(
        &self,
        target: &T,
        input: &mut Bytes,
        ctx: &mut ReadContext,
    ) -> Result<(), Failure> {
        ctx.enter()?;
        let result = (|| {
            let entries = reader::read_map_header(input).map_err(Failure::from)?;
            for _ in 0..entries {
                let key = reader::read_str_bytes(input).map_err(Failure::from)?;
                match self.by_key.get(key.as_ref()) {
                    Some(&index) => self.slots[index].read_into(target, input, ctx)?,
                    None => reader::skip_value(input).map_err(Failure::from)?,
                }
            }
            Ok(())
        })();
        ctx.leave();
        result
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

struct PairedProperty<'a, T: 'static> {
    property: &'a Property<T>,
    wire_name: Text,
    required: bool,
}

fn wire_name_for<T>(property: &Property<T>, cx: &BuildCx<'_>) -> Text {
    if let Some(explicit) = &property.attrs.wire_name {
        return explicit.clone();
    }
    match &cx.options.property_naming_policy {
        Some(policy) => Text::from(policy(property.name)),
        None => Text::new(property.name),
    }
}

/// Pairs a property with the constructor parameter of the same name: case
/// sensitive first, then case insensitive unless ambiguous.
fn pair_parameter<'a>(
    name: &str,
    params: &'a [crate::shape::Parameter],
) -> Option<&'a crate::shape::Parameter> {
    if let Some(param) = params.iter().find(|p| p.name == name) {
        return Some(param);
    }
    let mut matches = params.iter().filter(|p| p.name.eq_ignore_ascii_case(name));
    match (matches.next(), matches.next()) {
        (Some(param), None) => Some(param),
        _ => None,
    }
}

fn pair_properties<'a, T: Send + Sync + 'static>(
    type_name: &'static str,
    object: &'a ObjectShape<T>,
    cx: &BuildCx<'_>,
) -> Result<Vec<PairedProperty<'a, T>>, ConfigError> {
    let params: &[crate::shape::Parameter] = match &object.constructor {
        Constructor::Parameterized { params, .. } => params,
        _ => &[],
    };
    let state_type = match &object.constructor {
        Constructor::Parameterized { glue, .. } => Some(glue.state_type()),
        _ => None,
    };
    let mut paired = Vec::with_capacity(object.properties.len());
    for property in &object.properties {
        let wire_name = wire_name_for(property, cx);
        let param = pair_parameter(property.name, params);
        if let (Some(expected), Some(declared)) = (state_type, property.glue.param_state_type()) {
            if expected != declared {
                return Err(ConfigError::ParameterTypeMismatch(
                    type_name,
                    property.name.to_string(),
                ));
            }
        }
        paired.push(PairedProperty {
            property,
            wire_name,
            required: param.map(|p| p.required).unwrap_or(false),
        });
    }
    Ok(paired)
}

fn ctor_runtime<T: 'static>(object: &ObjectShape<T>) -> CtorRuntime<T> {
    match &object.constructor {
        Constructor::None => CtorRuntime::None,
        Constructor::Default { make } => CtorRuntime::Default { make: *make },
        Constructor::Parameterized { glue, .. } => CtorRuntime::Parameterized(glue.clone()),
    }
}

/// Builds the converter for an object shape, choosing the wire form per the key
/// index declarations and configuration.
pub(crate) fn build_object<T: Send + Sync + 'static>(
    type_name: &'static str,
    object: &ObjectShape<T>,
    cx: &BuildCx<'_>,
) -> Result<ConverterRef<T>, ConfigError> {
    let buckets = object
        .properties
        .iter()
        .filter(|p| p.attrs.unknown_bucket)
        .count();
    if buckets > 1 {
        return Err(ConfigError::MultipleUnknownBuckets(type_name));
    }

    let explicit: Vec<bool> = object
        .properties
        .iter()
        .filter(|p| !p.attrs.unknown_bucket)
        .map(|p| p.attrs.key_index.is_some())
        .collect();
    let any_explicit = explicit.iter().any(|e| *e);
    if any_explicit && !explicit.iter().all(|e| *e) {
        return Err(ConfigError::MixedKeyIndexes(type_name));
    }

    let array_form = (any_explicit && !cx.options.ignore_key_attributes)
        || (cx.options.perf_over_schema_stability && !cx.options.ignore_key_attributes);

    let paired = pair_properties(type_name, object, cx)?;

    if array_form {
        let mut indexed: Vec<(u32, &PairedProperty<'_, T>)> = Vec::new();
        let mut next_implicit = 0u32;
        for entry in &paired {
            if entry.property.attrs.unknown_bucket {
                continue;
            }
            let index = match entry.property.attrs.key_index {
                Some(index) => index,
                None => {
                    let index = next_implicit;
                    next_implicit += 1;
                    index
                }
            };
            indexed.push((index, entry));
        }
        let width = indexed.iter().map(|(i, _)| *i as usize + 1).max().unwrap_or(0);
        let mut positions: Vec<Option<MemberEntry<T>>> = Vec::with_capacity(width);
        positions.resize_with(width, || None);
        for (index, entry) in indexed {
            if positions[index as usize].is_some() {
                return Err(ConfigError::DuplicateKeyIndex(type_name, index));
            }
            let slot = entry.property.glue.build_slot(
                cx,
                SlotSpec {
                    wire_name: entry.wire_name.clone(),
                    key_token: encode_str_token(entry.wire_name.as_str())
                        .map_err(|_| ConfigError::CacheInconsistency(type_name))?,
                    required: entry.required,
                    custom: entry.property.attrs.custom_converter.clone(),
                    comparer: entry.property.attrs.comparer.clone(),
                },
            )?;
            positions[index as usize] = Some(MemberEntry {
                assignable: entry.property.glue.can_assign(),
                required: entry.required,
                bucket: false,
                slot,
            });
        }
        Ok(Arc::new(ArrayObjectConverter {
            type_name,
            positions,
            ctor: ctor_runtime(object),
        }))
    } else {
        let mut members = Vec::with_capacity(paired.len());
        let mut by_key = HashMap::new();
        let mut bucket = None;
        for entry in &paired {
            let slot = entry.property.glue.build_slot(
                cx,
                SlotSpec {
                    wire_name: entry.wire_name.clone(),
                    key_token: encode_str_token(entry.wire_name.as_str())
                        .map_err(|_| ConfigError::CacheInconsistency(type_name))?,
                    required: entry.required,
                    custom: entry.property.attrs.custom_converter.clone(),
                    comparer: entry.property.attrs.comparer.clone(),
                },
            )?;
            let index = members.len();
            if entry.property.attrs.unknown_bucket {
                bucket = Some(index);
            } else {
                by_key.insert(
                    entry.wire_name.as_str().as_bytes().into(),
                    index,
                );
            }
            members.push(MemberEntry {
                assignable: entry.property.glue.can_assign(),
                required: entry.required,
                bucket: entry.property.attrs.unknown_bucket,
                slot,
            });
        }
        Ok(Arc::new(MapObjectConverter {
            type_name,
            members,
            by_key,
            ctor: ctor_runtime(object),
            bucket,
        }))
    }
}

/// Builds the by-reference populate table for a shared object, if every mutable
/// property exposes a shared setter.
pub(crate) fn build_shared_populate<T: Send + Sync + 'static>(
    object: &ObjectShape<T>,
    cx: &BuildCx<'_>,
) -> Result<Option<SharedPopulate<T>>, ConfigError> {
    let mut by_key = HashMap::new();
    let mut slots = Vec::new();
    for property in &object.properties {
        if property.attrs.unknown_bucket {
            continue;
        }
        let wire_name = wire_name_for(property, cx);
        match property.glue.build_shared_slot(cx, wire_name.clone())? {
            Some(slot) => {
                by_key.insert(wire_name.as_str().as_bytes().into(), slots.len());
                slots.push(slot);
            }
            None if property.glue.can_assign() => {
                // A mutable property without a shared setter makes the object
                // ineligible for cycle capable reads.
                return Ok(None);
            }
            None => {}
        }
    }
    if slots.is_empty() {
        return Ok(None);
    }
    Ok(Some(SharedPopulate { by_key, slots }))
}
