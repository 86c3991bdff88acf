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

use crate::context::{ReadContext, WriteContext};
use crate::convert::{Converter, ConverterRef};
use crate::error::{ConfigError, Failure};
use crate::schema::SchemaNode;
use crate::shape::{EnumMember, EnumShape};
use bytes::Bytes;
use rmp::Marker;
use shapepack_msgpack::{reader, MsgPackWriter};
use std::sync::Arc;

/// Ordinal or by-name enum encoding. By-name emission falls back to the ordinal
/// when the value has no declared name (combined flag values, for example).
struct EnumConverter<T: 'static> {
    members: Vec<EnumMember>,
    to_ordinal: fn(&T) -> i64,
    from_ordinal: fn(i64) -> Option<T>,
    /// Names are matched case insensitively unless two members differ only by
    /// case.
    case_sensitive: bool,
}

impl<T: 'static> EnumConverter<T> {
    fn member_for(&self, name: &str) -> Option<&EnumMember> {
        if self.case_sensitive {
            self.members.iter().find(|m| m.name == name)
        } else {
            self.members
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case(name))
        }
    }

    fn name_for(&self, ordinal: i64) -> Option<&'static str> {
        self.members
            .iter()
            .find(|m| m.value == ordinal)
            .map(|m| m.name)
    }
}

impl<T: Send + Sync + 'static> Converter<T> for EnumConverter<T> {
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        let ordinal = (self.to_ordinal)(value);
        if ctx.options.serialize_enum_values_by_name {
            if let Some(name) = self.name_for(ordinal) {
                return writer.write_str(name).map_err(Failure::from);
            }
        }
        writer.write_int(ordinal);
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<T, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        let ordinal = match marker {
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                let name = reader::read_str(input).map_err(Failure::from)?;
                self.member_for(name.as_str())
                    .map(|m| m.value)
                    .ok_or_else(|| {
                        Failure::structure("The string does not name a member of the enum.")
                    })?
            }
            _ => reader::read_int(input).map_err(Failure::from)?,
        };
        (self.from_ordinal)(ordinal)
            .ok_or_else(|| Failure::structure("The value is outside the range of the enum."))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::OneOf(vec![SchemaNode::Integer, SchemaNode::String])
    }
}

fn has_case_collision(members: &[EnumMember]) -> bool {
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            if a.name != b.name && a.name.eq_ignore_ascii_case(b.name) {
                return true;
            }
        }
    }
    false
}

pub(crate) fn build_enum<T: Send + Sync + 'static>(
    shape: &EnumShape<T>,
) -> Result<ConverterRef<T>, ConfigError> {
    Ok(Arc::new(EnumConverter {
        members: shape.members.clone(),
        to_ordinal: shape.to_ordinal,
        from_ordinal: shape.from_ordinal,
        case_sensitive: has_case_collision(&shape.members),
    }))
}
