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

use crate::bigint::{BigInt, BigUint};
use crate::{Blob, Text, Timestamp};
use std::fmt::{Display, Formatter};

/// The dynamic model type. Any MessagePack document the engine can produce or consume
/// is representable as a [`Value`]; it is the target of the best-effort fallback for
/// payloads whose runtime types carry no shape, and the capture type for unused-data
/// buckets.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The MessagePack nil value.
    Nil,
    /// A boolean.
    Boolean(bool),
    /// A signed integer (any width up to 64 bits).
    Int(i64),
    /// An unsigned integer that does not fit a signed 64 bit value.
    UInt(u64),
    /// A big signed integer (written as an extension).
    BigInt(BigInt),
    /// A big unsigned integer (written as an extension).
    BigUint(BigUint),
    /// A double precision float (single precision is widened on read).
    Float(f64),
    /// A textual value.
    Text(Text),
    /// A binary blob.
    Data(Blob),
    /// An instant (the standard timestamp extension).
    Timestamp(Timestamp),
    /// A sequence of values (a MessagePack array).
    Sequence(Vec<Value>),
    /// A map of values to values (a MessagePack map, preserving entry order).
    Map(Vec<(Value, Value)>),
    /// An extension the engine does not itself interpret, kept verbatim.
    Extension(i8, Vec<u8>),
}

/// The kinds of [`Value`], used for error reporting.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ValueKind {
    Nil,
    Boolean,
    Int,
    UInt,
    BigInt,
    BigUint,
    Float,
    Text,
    Data,
    Timestamp,
    Sequence,
    Map,
    Extension,
}

impl Value {
    pub fn text(content: &str) -> Value {
        Value::Text(Text::new(content))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Int(_) => ValueKind::Int,
            Value::UInt(_) => ValueKind::UInt,
            Value::BigInt(_) => ValueKind::BigInt,
            Value::BigUint(_) => ValueKind::BigUint,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Data(_) => ValueKind::Data,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Sequence(_) => ValueKind::Sequence,
            Value::Map(_) => ValueKind::Map,
            Value::Extension(_, _) => ValueKind::Extension,
        }
    }

    /// Look up an entry of a map value by string key. Returns [`None`] for non-map
    /// values and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                Value::Text(name) if name == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        if let Ok(m) = i64::try_from(n) {
            Value::Int(m)
        } else {
            Value::UInt(n)
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(Text::from(s))
    }
}

impl From<Text> for Value {
    fn from(s: Text) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Data(Blob::from_vec(bytes))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Nil => f.write_str("Nil"),
            ValueKind::Boolean => f.write_str("Boolean"),
            ValueKind::Int => f.write_str("Int"),
            ValueKind::UInt => f.write_str("UInt"),
            ValueKind::BigInt => f.write_str("BigInt"),
            ValueKind::BigUint => f.write_str("BigUint"),
            ValueKind::Float => f.write_str("Float"),
            ValueKind::Text => f.write_str("Text"),
            ValueKind::Data => f.write_str("Data"),
            ValueKind::Timestamp => f.write_str("Timestamp"),
            ValueKind::Sequence => f.write_str("Sequence"),
            ValueKind::Map => f.write_str("Map"),
            ValueKind::Extension => f.write_str("Extension"),
        }
    }
}
