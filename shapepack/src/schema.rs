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

use shapepack_model::{Text, Value};

/// A JSON schema fragment describing the wire form a converter produces. The full
/// schema exporter lives outside this crate; converters only report their own
/// fragment so a document schema can be assembled from them.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// No constraint.
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    /// A binary blob (not representable in JSON; reported as a string with a
    /// content encoding).
    Binary,
    /// An array with homogeneous elements.
    Array(Box<SchemaNode>),
    /// A fixed length array with per position schemas.
    Tuple(Vec<SchemaNode>),
    /// A map with string keys and homogeneous values.
    Map(Box<SchemaNode>),
    /// An object with named properties.
    Object {
        properties: Vec<(Text, SchemaNode)>,
        required: Vec<Text>,
    },
    /// Any one of the listed alternatives.
    OneOf(Vec<SchemaNode>),
    /// The wrapped schema or null.
    Optional(Box<SchemaNode>),
    /// A reference to a named type, used to terminate recursive shapes.
    Named(&'static str),
}

impl SchemaNode {
    fn type_fragment(name: &str) -> Value {
        Value::Map(vec![(Value::text("type"), Value::text(name))])
    }

    /// Renders the fragment as a dynamic [`Value`] with JSON schema vocabulary.
    pub fn to_value(&self) -> Value {
        match self {
            SchemaNode::Any => Value::Map(vec![]),
            SchemaNode::Null => SchemaNode::type_fragment("null"),
            SchemaNode::Boolean => SchemaNode::type_fragment("boolean"),
            SchemaNode::Integer => SchemaNode::type_fragment("integer"),
            SchemaNode::Number => SchemaNode::type_fragment("number"),
            SchemaNode::String => SchemaNode::type_fragment("string"),
            SchemaNode::Binary => Value::Map(vec![
                (Value::text("type"), Value::text("string")),
                (Value::text("contentEncoding"), Value::text("base64")),
            ]),
            SchemaNode::Array(element) => Value::Map(vec![
                (Value::text("type"), Value::text("array")),
                (Value::text("items"), element.to_value()),
            ]),
            SchemaNode::Tuple(slots) => Value::Map(vec![
                (Value::text("type"), Value::text("array")),
                (
                    Value::text("prefixItems"),
                    Value::Sequence(slots.iter().map(SchemaNode::to_value).collect()),
                ),
                (Value::text("minItems"), Value::Int(slots.len() as i64)),
                (Value::text("maxItems"), Value::Int(slots.len() as i64)),
            ]),
            SchemaNode::Map(value) => Value::Map(vec![
                (Value::text("type"), Value::text("object")),
                (Value::text("additionalProperties"), value.to_value()),
            ]),
            SchemaNode::Object {
                properties,
                required,
            } => {
                let mut fragment = vec![
                    (Value::text("type"), Value::text("object")),
                    (
                        Value::text("properties"),
                        Value::Map(
                            properties
                                .iter()
                                .map(|(name, schema)| {
                                    (Value::Text(name.clone()), schema.to_value())
                                })
                                .collect(),
                        ),
                    ),
                ];
                if !required.is_empty() {
                    fragment.push((
                        Value::text("required"),
                        Value::Sequence(
                            required.iter().map(|name| Value::Text(name.clone())).collect(),
                        ),
                    ));
                }
                Value::Map(fragment)
            }
            SchemaNode::OneOf(options) => Value::Map(vec![(
                Value::text("oneOf"),
                Value::Sequence(options.iter().map(SchemaNode::to_value).collect()),
            )]),
            SchemaNode::Optional(inner) => Value::Map(vec![(
                Value::text("oneOf"),
                Value::Sequence(vec![SchemaNode::Null.to_value(), inner.to_value()]),
            )]),
            SchemaNode::Named(name) => Value::Map(vec![(
                Value::text("$ref"),
                Value::Text(Text::from(format!("#/$defs/{}", name))),
            )]),
        }
    }
}
