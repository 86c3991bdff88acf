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

//! # Shapepack
//!
//! A MessagePack serialization engine for statically described object graphs.
//! Programs supply a [`shape::TypeShape`] for each of their types (constructors,
//! properties, union cases, surrogates, enum members and element relationships);
//! the engine compiles each shape into a cached [`Converter`] that encodes and
//! decodes instances, synchronously over buffers or asynchronously over byte
//! streams, under the configured policies (default value handling, reference
//! preservation, polymorphism, string interning and custom converters).
//!
//! The entry point is [`Serializer`]:
//!
//! ```
//! use shapepack::Serializer;
//!
//! let serializer = Serializer::default();
//! let bytes = serializer.serialize(&42i32).unwrap();
//! assert_eq!(bytes.as_ref(), &[0x2a]);
//! let back: i32 = serializer.deserialize(bytes).unwrap();
//! assert_eq!(back, 42);
//! ```

pub mod builder;
mod cache;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod schema;
pub mod serializer;
pub mod shape;
pub mod streaming;

pub use shapepack_model as model;
pub use shapepack_msgpack as msgpack;

pub use config::{
    DeserializeDefaults, GuidFormat, MultiDimFormat, ReferenceMode, SerializeDefaults,
    SerializerOptions, SerializerOptionsBuilder,
};
pub use context::CancelToken;
pub use convert::{Converter, ConverterRef, RawMsgPack};
pub use error::{ConfigError, ErrorKind, Failure, Operation, PathSegment};
pub use serializer::Serializer;
pub use shape::registry::{shape_of, Shaped};
