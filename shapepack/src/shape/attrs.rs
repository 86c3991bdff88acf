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

use crate::convert::ConverterRef;
use shapepack_model::Text;
use std::any::Any;
use std::sync::Arc;

/// Identifies a comparer implementation selected for one member. Participates in
/// converter cache keys so member-influenced converters are cached separately from
/// neutral ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComparerSelector {
    /// The source supplying the comparer (a type or registry name).
    pub source: Text,
    /// The member the comparer was declared on.
    pub member: Text,
}

/// A custom converter designated directly on a member or type. Holds an
/// `Arc<dyn Converter<P>>` for the member's value type.
#[derive(Clone)]
pub struct CustomConverterSource(pub(crate) Arc<dyn Any + Send + Sync>);

impl CustomConverterSource {
    pub fn new<P: 'static>(converter: ConverterRef<P>) -> Self {
        CustomConverterSource(Arc::new(converter))
    }

    pub(crate) fn resolve<P: 'static>(&self) -> Option<ConverterRef<P>> {
        self.0.downcast_ref::<ConverterRef<P>>().cloned()
    }
}

/// Directives declared on a member of an object shape.
#[derive(Clone, Default)]
pub struct MemberAttrs {
    /// Positional key index; declaring one on any member selects the array wire
    /// form for the whole object.
    pub key_index: Option<u32>,
    /// Explicit wire name, exempt from the property naming policy.
    pub wire_name: Option<Text>,
    /// Marks the member that captures map entries with unknown keys.
    pub unknown_bucket: bool,
    /// Selects a comparer for keyed collections reached through this member.
    pub comparer: Option<ComparerSelector>,
    /// A custom converter for this member only.
    pub custom_converter: Option<CustomConverterSource>,
}

impl MemberAttrs {
    pub fn key_index(index: u32) -> Self {
        MemberAttrs {
            key_index: Some(index),
            ..Default::default()
        }
    }

    pub fn wire_name(name: &str) -> Self {
        MemberAttrs {
            wire_name: Some(Text::new(name)),
            ..Default::default()
        }
    }
}
