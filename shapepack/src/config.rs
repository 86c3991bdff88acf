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

use crate::convert::Converter;
use crate::shape::{ComparerSelector, UnionShape};
use bitflags::bitflags;
use shapepack_model::TimestampKind;
use shapepack_msgpack::ExtensionCodes;
use std::any::{Any, TypeId};
use std::sync::Arc;

bitflags! {
    /// Controls which members are emitted when their value equals the declared
    /// default.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SerializeDefaults: u8 {
        /// Every member is always emitted.
        const ALWAYS = 0b0001;
        /// Members of value types are always emitted.
        const VALUE_TYPES = 0b0010;
        /// Members of reference types are always emitted.
        const REFERENCE_TYPES = 0b0100;
        /// Required constructor parameters are always emitted.
        const REQUIRED = 0b1000;
    }
}

bitflags! {
    /// Relaxations applied while reading objects back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeserializeDefaults: u8 {
        /// Nil read for a non nullable member is treated as absent instead of
        /// failing.
        const ALLOW_NULL_FOR_NON_NULLABLE = 0b01;
        /// Required constructor parameters may be absent; their declared defaults
        /// are used.
        const ALLOW_MISSING_REQUIRED = 0b10;
    }
}

/// How long recorded object references stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceMode {
    /// No reference tracking; every occurrence is written in full.
    #[default]
    Off,
    /// References are tracked within one top level call.
    PerCall,
    /// References are tracked across calls on the same serializer.
    CrossCall,
}

/// The wire layout of multi dimensional arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiDimFormat {
    /// Arrays of arrays, one level per dimension.
    #[default]
    Nested,
    /// One flat array with the dimension lengths as a prelude.
    Flat,
}

/// The wire form of Guid values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuidFormat {
    /// A 16 byte little endian extension value.
    #[default]
    BinaryExtension,
    /// `8-4-4-4-12` hexadecimal text.
    Hyphenated,
    /// 32 hexadecimal digits.
    Simple,
    /// A `urn:uuid:` prefixed form.
    Urn,
    /// The hyphenated form wrapped in braces.
    Braced,
}

/// A function rewriting declared property names into wire names. Skipped for
/// properties carrying an explicit wire name.
pub type NamingPolicy = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Provides seeded hashing for keyed collections whose shapes opt into it through a
/// member comparer selector. Returning [`None`] keeps the platform default hasher,
/// which is already collision resistant.
pub trait ComparerProvider: Send + Sync {
    fn seed(&self, selector: &ComparerSelector) -> Option<(u64, u64)>;
}

/// A request for a custom converter, handed to registered factories in order.
#[derive(Debug, Clone, Copy)]
pub struct ConverterRequest<'a> {
    pub type_id: TypeId,
    pub type_name: &'a str,
}

/// Creates converters for types it recognizes. The returned box must contain an
/// `Arc<dyn Converter<T>>` for the requested type.
pub trait ConverterFactory: Send + Sync {
    fn create(&self, request: &ConverterRequest<'_>) -> Option<Box<dyn Any + Send + Sync>>;
}

#[derive(Clone, Default)]
pub(crate) struct CustomConverters {
    pub(crate) exact: Vec<(TypeId, Arc<dyn Any + Send + Sync>)>,
    pub(crate) factories: Vec<Arc<dyn ConverterFactory>>,
}

/// A runtime adjustment to the polymorphism declared for one base type.
#[derive(Clone)]
pub(crate) enum UnionOverride {
    /// Strip union framing from the type; the base converter is used directly.
    Disable,
    /// Replace the declared union with this one (an `Arc<UnionShape<T>>`).
    Replace(Arc<dyn Any + Send + Sync>),
}

#[derive(Clone, Default)]
pub(crate) struct UnionRegistrations {
    pub(crate) by_type: Vec<(TypeId, UnionOverride)>,
}

impl UnionRegistrations {
    pub(crate) fn lookup(&self, type_id: TypeId) -> Option<&UnionOverride> {
        self.by_type
            .iter()
            .rev()
            .find_map(|(id, ov)| (*id == type_id).then_some(ov))
    }
}

/// Per call state seeded into every serialization context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartingContext {
    /// The maximum nesting depth before a call fails with a depth error.
    pub max_depth: u32,
}

impl Default for StartingContext {
    fn default() -> Self {
        StartingContext { max_depth: 64 }
    }
}

/// The immutable configuration of a serializer. Options are assembled through
/// [`SerializerOptionsBuilder`]; changing anything produces a new serializer with a
/// fresh converter cache.
#[derive(Clone)]
pub struct SerializerOptions {
    pub multi_dimensional_array_format: MultiDimFormat,
    pub property_naming_policy: Option<NamingPolicy>,
    pub comparer_provider: Option<Arc<dyn ComparerProvider>>,
    pub perf_over_schema_stability: bool,
    pub ignore_key_attributes: bool,
    pub serialize_enum_values_by_name: bool,
    pub serialize_default_values: SerializeDefaults,
    pub deserialize_default_values: DeserializeDefaults,
    pub preserve_references: ReferenceMode,
    pub intern_strings: bool,
    pub extension_codes: ExtensionCodes,
    pub guid_format: GuidFormat,
    pub assumed_timestamp_kind: TimestampKind,
    pub use_discriminator_objects: bool,
    pub disable_hardware_acceleration: bool,
    pub max_async_buffer: usize,
    pub starting_context: StartingContext,
    pub(crate) converters: CustomConverters,
    pub(crate) unions: UnionRegistrations,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        SerializerOptions {
            multi_dimensional_array_format: MultiDimFormat::default(),
            property_naming_policy: None,
            comparer_provider: None,
            perf_over_schema_stability: false,
            ignore_key_attributes: false,
            serialize_enum_values_by_name: false,
            serialize_default_values: SerializeDefaults::ALWAYS,
            deserialize_default_values: DeserializeDefaults::empty(),
            preserve_references: ReferenceMode::Off,
            intern_strings: false,
            extension_codes: ExtensionCodes::default(),
            guid_format: GuidFormat::default(),
            assumed_timestamp_kind: TimestampKind::default(),
            use_discriminator_objects: false,
            disable_hardware_acceleration: false,
            max_async_buffer: 64 * 1024,
            starting_context: StartingContext::default(),
            converters: CustomConverters::default(),
            unions: UnionRegistrations::default(),
        }
    }
}

impl SerializerOptions {
    pub fn builder() -> SerializerOptionsBuilder {
        SerializerOptionsBuilder {
            options: SerializerOptions::default(),
        }
    }

    /// Starts a builder seeded with this configuration, for copy on change.
    pub fn to_builder(&self) -> SerializerOptionsBuilder {
        SerializerOptionsBuilder {
            options: self.clone(),
        }
    }
}

/// A fluent, owning builder for [`SerializerOptions`].
pub struct SerializerOptionsBuilder {
    options: SerializerOptions,
}

impl SerializerOptionsBuilder {
    pub fn multi_dimensional_array_format(mut self, format: MultiDimFormat) -> Self {
        self.options.multi_dimensional_array_format = format;
        self
    }

    pub fn property_naming_policy(mut self, policy: NamingPolicy) -> Self {
        self.options.property_naming_policy = Some(policy);
        self
    }

    pub fn comparer_provider(mut self, provider: Arc<dyn ComparerProvider>) -> Self {
        self.options.comparer_provider = Some(provider);
        self
    }

    pub fn perf_over_schema_stability(mut self, on: bool) -> Self {
        self.options.perf_over_schema_stability = on;
        self
    }

    pub fn ignore_key_attributes(mut self, on: bool) -> Self {
        self.options.ignore_key_attributes = on;
        self
    }

    pub fn serialize_enum_values_by_name(mut self, on: bool) -> Self {
        self.options.serialize_enum_values_by_name = on;
        self
    }

    pub fn serialize_default_values(mut self, flags: SerializeDefaults) -> Self {
        self.options.serialize_default_values = flags;
        self
    }

    pub fn deserialize_default_values(mut self, flags: DeserializeDefaults) -> Self {
        self.options.deserialize_default_values = flags;
        self
    }

    pub fn preserve_references(mut self, mode: ReferenceMode) -> Self {
        self.options.preserve_references = mode;
        self
    }

    pub fn intern_strings(mut self, on: bool) -> Self {
        self.options.intern_strings = on;
        self
    }

    pub fn extension_codes(mut self, codes: ExtensionCodes) -> Self {
        self.options.extension_codes = codes;
        self
    }

    pub fn guid_format(mut self, format: GuidFormat) -> Self {
        self.options.guid_format = format;
        self
    }

    pub fn assumed_timestamp_kind(mut self, kind: TimestampKind) -> Self {
        self.options.assumed_timestamp_kind = kind;
        self
    }

    pub fn use_discriminator_objects(mut self, on: bool) -> Self {
        self.options.use_discriminator_objects = on;
        self
    }

    pub fn disable_hardware_acceleration(mut self, on: bool) -> Self {
        self.options.disable_hardware_acceleration = on;
        self
    }

    pub fn max_async_buffer(mut self, bytes: usize) -> Self {
        self.options.max_async_buffer = bytes;
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.options.starting_context.max_depth = depth;
        self
    }

    /// Registers a custom converter for the exact type `T`. Registered converters
    /// take priority over everything the builder would otherwise construct.
    pub fn register_converter<T: 'static>(mut self, converter: Arc<dyn Converter<T>>) -> Self {
        self.options
            .converters
            .exact
            .push((TypeId::of::<T>(), Arc::new(converter)));
        self
    }

    /// Registers a converter factory, consulted in registration order after exact
    /// registrations.
    pub fn register_converter_factory(mut self, factory: Arc<dyn ConverterFactory>) -> Self {
        self.options.converters.factories.push(factory);
        self
    }

    /// Registers (or replaces) the union for base type `T` at runtime.
    pub fn register_union<T: 'static>(mut self, union: UnionShape<T>) -> Self {
        self.options.unions.by_type.push((
            TypeId::of::<T>(),
            UnionOverride::Replace(Arc::new(Arc::new(union))),
        ));
        self
    }

    /// Strips union framing from base type `T`, using its base converter directly.
    pub fn disable_union<T: 'static>(mut self) -> Self {
        self.options
            .unions
            .by_type
            .push((TypeId::of::<T>(), UnionOverride::Disable));
        self
    }

    pub fn build(self) -> SerializerOptions {
        self.options
    }
}

/// Naming policies matching common wire conventions.
pub mod naming {
    /// `camelCase`: lower cases the first character.
    pub fn camel_case(name: &str) -> String {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// `snake_case`: lower cases everything, inserting underscores at case breaks.
    pub fn snake_case(name: &str) -> String {
        let mut out = String::with_capacity(name.len() + 4);
        for (i, c) in name.chars().enumerate() {
            if c.is_uppercase() {
                if i > 0 {
                    out.push('_');
                }
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}
