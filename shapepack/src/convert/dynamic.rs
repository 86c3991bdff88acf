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
use crate::convert::Converter;
use crate::error::Failure;
use crate::schema::SchemaNode;
use bytes::Bytes;
use either::Either;
use rmp::Marker;
use shapepack_model::{Blob, Value};
use shapepack_msgpack::{reader, MsgPackWriter, TIMESTAMP_EXT};

/// The best-effort converter for payloads without a shape: any MessagePack value
/// maps onto the dynamic [`Value`] model and back.
pub(crate) struct ValueConverter;

impl Converter<Value> for ValueConverter {
    fn write(
        &self,
        value: &Value,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        match value {
            Value::Nil => {
                writer.write_nil();
                Ok(())
            }
            Value::Boolean(b) => {
                writer.write_bool(*b);
                Ok(())
            }
            Value::Int(n) => {
                writer.write_int(*n);
                Ok(())
            }
            Value::UInt(n) => {
                writer.write_uint(*n);
                Ok(())
            }
            Value::BigInt(n) => writer.write_big_int(n).map_err(Failure::from),
            Value::BigUint(n) => writer.write_big_uint(n).map_err(Failure::from),
            Value::Float(x) => {
                writer.write_f64(*x);
                Ok(())
            }
            Value::Text(text) => writer.write_str(text.as_str()).map_err(Failure::from),
            Value::Data(blob) => writer.write_bin(blob.as_slice()).map_err(Failure::from),
            Value::Timestamp(ts) => writer.write_timestamp(*ts).map_err(Failure::from),
            Value::Sequence(items) => {
                ctx.enter()?;
                let result = (|| {
                    writer.write_array_header(items.len()).map_err(Failure::from)?;
                    for (i, item) in items.iter().enumerate() {
                        self.write(item, writer, ctx)
                            .map_err(|e| e.at(crate::error::PathSegment::Index(i)))?;
                    }
                    Ok(())
                })();
                ctx.leave();
                result
            }
            Value::Map(entries) => {
                ctx.enter()?;
                let result = (|| {
                    writer.write_map_header(entries.len()).map_err(Failure::from)?;
                    for (i, (key, entry)) in entries.iter().enumerate() {
                        self.write(key, writer, ctx)
                            .map_err(|e| e.at(crate::error::PathSegment::Index(i)))?;
                        self.write(entry, writer, ctx)
                            .map_err(|e| e.at(crate::error::PathSegment::Index(i)))?;
                    }
                    Ok(())
                })();
                ctx.leave();
                result
            }
            Value::Extension(code, payload) => {
                writer.write_ext(*code, payload).map_err(Failure::from)
            }
        }
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<Value, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        match marker {
            Marker::Null => {
                reader::read_nil(input).map_err(Failure::from)?;
                Ok(Value::Nil)
            }
            Marker::True | Marker::False => Ok(Value::Boolean(
                reader::read_bool(input).map_err(Failure::from)?,
            )),
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64 => Ok(match reader::read_number(input).map_err(Failure::from)? {
                Either::Left(n) => Value::Int(n),
                Either::Right(n) => Value::UInt(n),
            }),
            Marker::F32 | Marker::F64 => Ok(Value::Float(
                reader::read_f64(input).map_err(Failure::from)?,
            )),
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                let bytes = reader::read_str_bytes(input).map_err(Failure::from)?;
                Ok(Value::Text(ctx.make_text(bytes.as_ref())?))
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                let bytes = reader::read_bin_bytes(input).map_err(Failure::from)?;
                Ok(Value::Data(Blob::from(bytes.as_ref())))
            }
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
                ctx.enter()?;
                let result = (|| {
                    let len = reader::read_array_header(input).map_err(Failure::from)?;
                    let mut items = Vec::with_capacity(len.min(1024) as usize);
                    for i in 0..len {
                        items.push(
                            self.read(input, ctx)
                                .map_err(|e| e.at(crate::error::PathSegment::Index(i as usize)))?,
                        );
                    }
                    Ok(Value::Sequence(items))
                })();
                ctx.leave();
                result
            }
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
                ctx.enter()?;
                let result = (|| {
                    let len = reader::read_map_header(input).map_err(Failure::from)?;
                    let mut entries = Vec::with_capacity(len.min(1024) as usize);
                    for i in 0..len {
                        let key = self
                            .read(input, ctx)
                            .map_err(|e| e.at(crate::error::PathSegment::Index(i as usize)))?;
                        let value = self
                            .read(input, ctx)
                            .map_err(|e| e.at(crate::error::PathSegment::Index(i as usize)))?;
                        entries.push((key, value));
                    }
                    Ok(Value::Map(entries))
                })();
                ctx.leave();
                result
            }
            marker if reader::is_ext(marker) => {
                let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
                let codes = ctx.options.extension_codes;
                if code == TIMESTAMP_EXT {
                    Ok(Value::Timestamp(
                        reader::decode_timestamp(payload.as_ref()).map_err(Failure::from)?,
                    ))
                } else if code == codes.big_int {
                    Ok(Value::BigInt(
                        reader::decode_big_int(payload.as_ref()).map_err(Failure::from)?,
                    ))
                } else if code == codes.big_uint {
                    Ok(Value::BigUint(
                        reader::decode_big_uint(payload.as_ref()).map_err(Failure::from)?,
                    ))
                } else {
                    Ok(Value::Extension(code, payload.to_vec()))
                }
            }
            ow => Err(Failure::from(reader::MsgPackReadError::InvalidMarker(ow))),
        }
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Any
    }
}
