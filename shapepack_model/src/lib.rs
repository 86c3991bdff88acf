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

//! # Shapepack Model
//!
//! The dynamic value model underpinning the shapepack serialization engine. Provides
//! the [`Value`] sum type used as the fallback representation for payloads whose
//! runtime types have no shape, along with the leaf types shared across the
//! workspace ([`Text`], [`Blob`], [`Timestamp`], [`Version`], [`Color`],
//! [`Point`]).

mod blob;
mod color;
mod point;
mod text;
mod time;
mod value;
mod version;

pub mod bigint {
    //! Arbitrary precision integer types.
    pub use num_bigint::{BigInt, BigUint, Sign};
}

pub use bigint::{BigInt, BigUint};
pub use blob::Blob;
pub use color::Color;
pub use point::Point;
pub use text::Text;
pub use time::{Timestamp, TimestampKind};
pub use value::{Value, ValueKind};
pub use version::{InvalidVersion, Version};
