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

//! The closed table of built-in converters, keyed by concrete type.

use crate::builder::BuildCx;
use crate::context::{ReadContext, WriteContext};
use crate::convert::dynamic::ValueConverter;
use crate::convert::shared::{try_read_reference, write_reference};
use crate::convert::{Converter, ConverterRef, RawMsgPack};
use crate::error::Failure;
use crate::schema::SchemaNode;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use either::Either;
use half::f16;
use rmp::Marker;
use rust_decimal::Decimal;
use shapepack_model::bigint::{BigInt, BigUint};
use shapepack_model::{Blob, Color, Point, Text, Timestamp, TimestampKind, Value, Version};
use shapepack_msgpack::{reader, MsgPackWriter};
use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

struct UnitConverter;

impl Converter<()> for UnitConverter {
    fn write(
        &self,
        _value: &(),
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_nil();
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<(), Failure> {
        reader::read_nil(input).map_err(Failure::from)
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Null
    }
}

struct BoolConverter;

impl Converter<bool> for BoolConverter {
    fn write(
        &self,
        value: &bool,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_bool(*value);
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<bool, Failure> {
        reader::read_bool(input).map_err(Failure::from)
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Boolean
    }
}

macro_rules! signed_converter {
    ($name:ident, $ty:ty) => {
        struct $name;

        impl Converter<$ty> for $name {
            fn write(
                &self,
                value: &$ty,
                writer: &mut MsgPackWriter<'_>,
                _ctx: &mut WriteContext,
            ) -> Result<(), Failure> {
                writer.write_int(*value as i64);
                Ok(())
            }

            fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<$ty, Failure> {
                let n = reader::read_int(input).map_err(Failure::from)?;
                <$ty>::try_from(n)
                    .map_err(|_| Failure::from(reader::MsgPackReadError::NumberOutOfRange))
            }

            fn schema(&self) -> SchemaNode {
                SchemaNode::Integer
            }
        }
    };
}

macro_rules! unsigned_converter {
    ($name:ident, $ty:ty) => {
        struct $name;

        impl Converter<$ty> for $name {
            fn write(
                &self,
                value: &$ty,
                writer: &mut MsgPackWriter<'_>,
                _ctx: &mut WriteContext,
            ) -> Result<(), Failure> {
                writer.write_uint(*value as u64);
                Ok(())
            }

            fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<$ty, Failure> {
                let n = reader::read_uint(input).map_err(Failure::from)?;
                <$ty>::try_from(n)
                    .map_err(|_| Failure::from(reader::MsgPackReadError::NumberOutOfRange))
            }

            fn schema(&self) -> SchemaNode {
                SchemaNode::Integer
            }
        }
    };
}

signed_converter!(I8Converter, i8);
signed_converter!(I16Converter, i16);
signed_converter!(I32Converter, i32);
signed_converter!(I64Converter, i64);
unsigned_converter!(U8Converter, u8);
unsigned_converter!(U16Converter, u16);
unsigned_converter!(U32Converter, u32);
unsigned_converter!(U64Converter, u64);

struct I128Converter;

impl Converter<i128> for I128Converter {
    fn write(
        &self,
        value: &i128,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_i128(*value).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<i128, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        if reader::is_ext(marker) {
            let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
            if code != ctx.options.extension_codes.int128 {
                return Err(Failure::from(reader::MsgPackReadError::UnexpectedExtType(
                    code,
                )));
            }
            let bytes: [u8; 16] = payload
                .as_ref()
                .try_into()
                .map_err(|_| Failure::structure("A 128 bit integer must have 16 bytes."))?;
            Ok(i128::from_be_bytes(bytes))
        } else {
            match reader::read_number(input).map_err(Failure::from)? {
                Either::Left(n) => Ok(n as i128),
                Either::Right(n) => Ok(n as i128),
            }
        }
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Integer
    }
}

struct U128Converter;

impl Converter<u128> for U128Converter {
    fn write(
        &self,
        value: &u128,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_u128(*value).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<u128, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        if reader::is_ext(marker) {
            let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
            if code != ctx.options.extension_codes.uint128 {
                return Err(Failure::from(reader::MsgPackReadError::UnexpectedExtType(
                    code,
                )));
            }
            let bytes: [u8; 16] = payload
                .as_ref()
                .try_into()
                .map_err(|_| Failure::structure("A 128 bit integer must have 16 bytes."))?;
            Ok(u128::from_be_bytes(bytes))
        } else {
            let n = reader::read_uint(input).map_err(Failure::from)?;
            Ok(n as u128)
        }
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Integer
    }
}

/// Half precision floats are a two byte big endian extension; the format has no
/// native 16 bit float representation.
struct F16Converter;

impl Converter<f16> for F16Converter {
    fn write(
        &self,
        value: &f16,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer
            .write_ext(ctx.options.extension_codes.float16, &value.to_be_bytes())
            .map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<f16, Failure> {
        let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
        if code != ctx.options.extension_codes.float16 {
            return Err(Failure::from(reader::MsgPackReadError::UnexpectedExtType(
                code,
            )));
        }
        let bytes: [u8; 2] = payload
            .as_ref()
            .try_into()
            .map_err(|_| Failure::structure("A half precision float must have 2 bytes."))?;
        Ok(f16::from_be_bytes(bytes))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Number
    }
}

/// 128 bit decimals are written in their normalized 16 byte layout so equal
/// values always produce equal bytes.
struct DecimalConverter;

impl Converter<Decimal> for DecimalConverter {
    fn write(
        &self,
        value: &Decimal,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer
            .write_ext(
                ctx.options.extension_codes.decimal,
                &value.normalize().serialize(),
            )
            .map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<Decimal, Failure> {
        let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
        if code != ctx.options.extension_codes.decimal {
            return Err(Failure::from(reader::MsgPackReadError::UnexpectedExtType(
                code,
            )));
        }
        let bytes: [u8; 16] = payload
            .as_ref()
            .try_into()
            .map_err(|_| Failure::structure("A decimal must have 16 bytes."))?;
        Ok(Decimal::deserialize(bytes))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Number
    }
}

struct VersionConverter;

impl Converter<Version> for VersionConverter {
    fn write(
        &self,
        value: &Version,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_str(&value.to_string()).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<Version, Failure> {
        let text = reader::read_str(input).map_err(Failure::from)?;
        text.as_str()
            .parse()
            .map_err(|_| Failure::structure("The value is not a version number."))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

/// Colors are an array of three channel values, or four when the alpha channel
/// carries information.
struct ColorConverter;

fn read_channel(input: &mut Bytes) -> Result<u8, Failure> {
    let n = reader::read_uint(input).map_err(Failure::from)?;
    u8::try_from(n).map_err(|_| Failure::from(reader::MsgPackReadError::NumberOutOfRange))
}

impl Converter<Color> for ColorConverter {
    fn write(
        &self,
        value: &Color,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        let channels = if value.is_opaque() { 3 } else { 4 };
        writer.write_array_header(channels).map_err(Failure::from)?;
        writer.write_uint(value.r as u64);
        writer.write_uint(value.g as u64);
        writer.write_uint(value.b as u64);
        if !value.is_opaque() {
            writer.write_uint(value.a as u64);
        }
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<Color, Failure> {
        let channels = reader::read_array_header(input).map_err(Failure::from)?;
        if channels != 3 && channels != 4 {
            return Err(Failure::structure(
                "A color must have three or four channels.",
            ));
        }
        let r = read_channel(input)?;
        let g = read_channel(input)?;
        let b = read_channel(input)?;
        if channels == 4 {
            Ok(Color::rgba(r, g, b, read_channel(input)?))
        } else {
            Ok(Color::rgb(r, g, b))
        }
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Array(Box::new(SchemaNode::Integer))
    }
}

struct PointConverter;

impl Converter<Point> for PointConverter {
    fn write(
        &self,
        value: &Point,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_array_header(2).map_err(Failure::from)?;
        writer.write_int(value.x);
        writer.write_int(value.y);
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<Point, Failure> {
        let len = reader::read_array_header(input).map_err(Failure::from)?;
        if len != 2 {
            return Err(Failure::structure("A point must be a two element array."));
        }
        let x = reader::read_int(input).map_err(Failure::from)?;
        let y = reader::read_int(input).map_err(Failure::from)?;
        Ok(Point::new(x, y))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Tuple(vec![SchemaNode::Integer, SchemaNode::Integer])
    }
}

struct F32Converter;

impl Converter<f32> for F32Converter {
    fn write(
        &self,
        value: &f32,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_f32(*value);
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<f32, Failure> {
        reader::read_f32(input).map_err(Failure::from)
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Number
    }
}

struct F64Converter;

impl Converter<f64> for F64Converter {
    fn write(
        &self,
        value: &f64,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_f64(*value);
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<f64, Failure> {
        reader::read_f64(input).map_err(Failure::from)
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Number
    }
}

struct CharConverter;

impl Converter<char> for CharConverter {
    fn write(
        &self,
        value: &char,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_uint(*value as u64);
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<char, Failure> {
        let n = reader::read_uint(input).map_err(Failure::from)?;
        u32::try_from(n)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| Failure::structure("The value is not a Unicode code point."))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Integer
    }
}

struct StringConverter;

impl Converter<String> for StringConverter {
    fn write(
        &self,
        value: &String,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_str(value).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<String, Failure> {
        let bytes = reader::read_str_bytes(input).map_err(Failure::from)?;
        let content = std::str::from_utf8(bytes.as_ref())
            .map_err(|e| Failure::from(reader::MsgPackReadError::StringDecode(e)))?;
        Ok(content.to_string())
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

/// [`Text`] additionally participates in interning and, together with reference
/// preservation, in string re-emission suppression.
struct TextConverter;

impl Converter<Text> for TextConverter {
    fn write(
        &self,
        value: &Text,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        if ctx.dedup_strings() {
            if let Some(refs) = ctx.refs_mut() {
                match refs.note_string(value.as_str().as_bytes()) {
                    crate::context::Seen::Again(id) => return write_reference(writer, id),
                    crate::context::Seen::First(_) => {}
                }
            }
        }
        writer.write_str(value.as_str()).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<Text, Failure> {
        if ctx.dedup_strings() {
            if let Some(id) = try_read_reference(input, ctx.options.extension_codes)? {
                let refs = ctx
                    .refs_mut()
                    .ok_or_else(|| Failure::structure("Reference state is unavailable."))?;
                return refs
                    .resolve(id)?
                    .downcast_ref::<Text>()
                    .cloned()
                    .ok_or_else(|| Failure::structure("The reference is not a string."));
            }
            let bytes = reader::read_str_bytes(input).map_err(Failure::from)?;
            let text = ctx.make_text(bytes.as_ref())?;
            if let Some(refs) = ctx.refs_mut() {
                let id = refs.reserve();
                refs.fulfill(id, Box::new(text.clone()));
            }
            return Ok(text);
        }
        let bytes = reader::read_str_bytes(input).map_err(Failure::from)?;
        ctx.make_text(bytes.as_ref())
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

struct BlobConverter;

impl Converter<Blob> for BlobConverter {
    fn write(
        &self,
        value: &Blob,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_bin(value.as_slice()).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<Blob, Failure> {
        let bytes = reader::read_bin_bytes(input).map_err(Failure::from)?;
        Ok(Blob::from(bytes.as_ref()))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Binary
    }
}

struct BigIntConverter;

impl Converter<BigInt> for BigIntConverter {
    fn write(
        &self,
        value: &BigInt,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_big_int(value).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<BigInt, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        if reader::is_ext(marker) {
            let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
            if code != ctx.options.extension_codes.big_int {
                return Err(Failure::from(reader::MsgPackReadError::UnexpectedExtType(
                    code,
                )));
            }
            reader::decode_big_int(payload.as_ref()).map_err(Failure::from)
        } else {
            match reader::read_number(input).map_err(Failure::from)? {
                Either::Left(n) => Ok(BigInt::from(n)),
                Either::Right(n) => Ok(BigInt::from(n)),
            }
        }
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Integer
    }
}

struct BigUintConverter;

impl Converter<BigUint> for BigUintConverter {
    fn write(
        &self,
        value: &BigUint,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_big_uint(value).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<BigUint, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        if reader::is_ext(marker) {
            let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
            if code != ctx.options.extension_codes.big_uint {
                return Err(Failure::from(reader::MsgPackReadError::UnexpectedExtType(
                    code,
                )));
            }
            reader::decode_big_uint(payload.as_ref()).map_err(Failure::from)
        } else {
            let n = reader::read_uint(input).map_err(Failure::from)?;
            Ok(BigUint::from(n))
        }
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Integer
    }
}

struct TimestampConverter;

impl Converter<Timestamp> for TimestampConverter {
    fn write(
        &self,
        value: &Timestamp,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_timestamp(*value).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<Timestamp, Failure> {
        reader::read_timestamp(input).map_err(Failure::from)
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

/// Date-times without an explicit offset are interpreted per the configured
/// assumed kind.
struct NaiveDateTimeConverter;

impl Converter<NaiveDateTime> for NaiveDateTimeConverter {
    fn write(
        &self,
        value: &NaiveDateTime,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        let instant = match ctx.options.assumed_timestamp_kind {
            TimestampKind::Local => chrono::Local
                .from_local_datetime(value)
                .single()
                .map(Timestamp::from)
                .unwrap_or_else(|| Timestamp::from(Utc.from_utc_datetime(value))),
            TimestampKind::Utc | TimestampKind::Unspecified => {
                Timestamp::from(Utc.from_utc_datetime(value))
            }
        };
        writer.write_timestamp(instant).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<NaiveDateTime, Failure> {
        let instant = reader::read_timestamp(input).map_err(Failure::from)?;
        let utc: chrono::DateTime<Utc> = instant.into();
        Ok(match ctx.options.assumed_timestamp_kind {
            TimestampKind::Local => utc.with_timezone(&chrono::Local).naive_local(),
            TimestampKind::Utc | TimestampKind::Unspecified => utc.naive_utc(),
        })
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

struct NaiveDateConverter;

impl Converter<NaiveDate> for NaiveDateConverter {
    fn write(
        &self,
        value: &NaiveDate,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer
            .write_str(&value.format("%Y-%m-%d").to_string())
            .map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<NaiveDate, Failure> {
        let text = reader::read_str(input).map_err(Failure::from)?;
        NaiveDate::parse_from_str(text.as_str(), "%Y-%m-%d")
            .map_err(|_| Failure::structure("The value is not a date."))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

struct NaiveTimeConverter;

impl Converter<NaiveTime> for NaiveTimeConverter {
    fn write(
        &self,
        value: &NaiveTime,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer
            .write_str(&value.format("%H:%M:%S%.f").to_string())
            .map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<NaiveTime, Failure> {
        let text = reader::read_str(input).map_err(Failure::from)?;
        NaiveTime::parse_from_str(text.as_str(), "%H:%M:%S%.f")
            .map_err(|_| Failure::structure("The value is not a time of day."))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

/// A span of time as `[whole seconds, subsecond nanoseconds]`.
struct DurationConverter;

impl Converter<Duration> for DurationConverter {
    fn write(
        &self,
        value: &Duration,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_array_header(2).map_err(Failure::from)?;
        writer.write_uint(value.as_secs());
        writer.write_uint(value.subsec_nanos() as u64);
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<Duration, Failure> {
        let len = reader::read_array_header(input).map_err(Failure::from)?;
        if len != 2 {
            return Err(Failure::structure(
                "A duration must be a two element array.",
            ));
        }
        let seconds = reader::read_uint(input).map_err(Failure::from)?;
        let nanos = reader::read_uint(input).map_err(Failure::from)?;
        if nanos > 999_999_999 {
            return Err(Failure::structure(
                "The subsecond component of a duration is out of range.",
            ));
        }
        Ok(Duration::new(seconds, nanos as u32))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Tuple(vec![SchemaNode::Integer, SchemaNode::Integer])
    }
}

struct UuidConverter;

impl Converter<Uuid> for UuidConverter {
    fn write(
        &self,
        value: &Uuid,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        use crate::config::GuidFormat;
        match ctx.options.guid_format {
            GuidFormat::BinaryExtension => writer
                .write_ext(ctx.options.extension_codes.guid, &value.to_bytes_le())
                .map_err(Failure::from),
            GuidFormat::Hyphenated => writer
                .write_str(&value.hyphenated().to_string())
                .map_err(Failure::from),
            GuidFormat::Simple => writer
                .write_str(&value.simple().to_string())
                .map_err(Failure::from),
            GuidFormat::Urn => writer
                .write_str(&value.urn().to_string())
                .map_err(Failure::from),
            GuidFormat::Braced => writer
                .write_str(&value.braced().to_string())
                .map_err(Failure::from),
        }
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<Uuid, Failure> {
        let marker = reader::peek_marker(input).map_err(Failure::from)?;
        if reader::is_ext(marker) {
            let (code, payload) = reader::read_ext(input).map_err(Failure::from)?;
            if code != ctx.options.extension_codes.guid {
                return Err(Failure::from(reader::MsgPackReadError::UnexpectedExtType(
                    code,
                )));
            }
            let bytes: [u8; 16] = payload
                .as_ref()
                .try_into()
                .map_err(|_| Failure::structure("A Guid must have 16 bytes."))?;
            Ok(Uuid::from_bytes_le(bytes))
        } else {
            let text = reader::read_str(input).map_err(Failure::from)?;
            Uuid::parse_str(text.as_str())
                .map_err(|_| Failure::structure("The value is not a Guid."))
        }
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

struct UrlConverter;

impl Converter<Url> for UrlConverter {
    fn write(
        &self,
        value: &Url,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_str(value.as_str()).map_err(Failure::from)
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<Url, Failure> {
        let text = reader::read_str(input).map_err(Failure::from)?;
        Url::parse(text.as_str()).map_err(|_| Failure::structure("The value is not a URI."))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::String
    }
}

/// Pre-encoded MessagePack passthrough.
struct RawConverter;

impl Converter<RawMsgPack> for RawConverter {
    fn write(
        &self,
        value: &RawMsgPack,
        writer: &mut MsgPackWriter<'_>,
        _ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        writer.write_raw(value.0.as_ref());
        Ok(())
    }

    fn read(&self, input: &mut Bytes, _ctx: &mut ReadContext) -> Result<RawMsgPack, Failure> {
        let raw = reader::capture_value(input).map_err(Failure::from)?;
        Ok(RawMsgPack(raw))
    }

    fn schema(&self) -> SchemaNode {
        SchemaNode::Any
    }
}

macro_rules! builtin_entry {
    ($target:ident, $ty:ty, $conv:expr) => {
        if TypeId::of::<$target>() == TypeId::of::<$ty>() {
            let converter: ConverterRef<$ty> = Arc::new($conv);
            let boxed: Box<dyn Any> = Box::new(converter);
            return boxed.downcast::<ConverterRef<$target>>().ok().map(|b| *b);
        }
    };
}

/// Looks the concrete type up in the closed built-in table. The configuration is
/// consulted at run time (extension codes, Guid format, assumed timestamp kind),
/// so the converters themselves are stateless.
pub(crate) fn builtin_converter<T: 'static>(cx: &BuildCx<'_>) -> Option<ConverterRef<T>> {
    let _ = cx;
    builtin_entry!(T, (), UnitConverter);
    builtin_entry!(T, bool, BoolConverter);
    builtin_entry!(T, i8, I8Converter);
    builtin_entry!(T, i16, I16Converter);
    builtin_entry!(T, i32, I32Converter);
    builtin_entry!(T, i64, I64Converter);
    builtin_entry!(T, i128, I128Converter);
    builtin_entry!(T, u8, U8Converter);
    builtin_entry!(T, u16, U16Converter);
    builtin_entry!(T, u32, U32Converter);
    builtin_entry!(T, u64, U64Converter);
    builtin_entry!(T, u128, U128Converter);
    builtin_entry!(T, f16, F16Converter);
    builtin_entry!(T, f32, F32Converter);
    builtin_entry!(T, f64, F64Converter);
    builtin_entry!(T, Decimal, DecimalConverter);
    builtin_entry!(T, char, CharConverter);
    builtin_entry!(T, String, StringConverter);
    builtin_entry!(T, Text, TextConverter);
    builtin_entry!(T, Blob, BlobConverter);
    builtin_entry!(T, BigInt, BigIntConverter);
    builtin_entry!(T, BigUint, BigUintConverter);
    builtin_entry!(T, Timestamp, TimestampConverter);
    builtin_entry!(T, NaiveDateTime, NaiveDateTimeConverter);
    builtin_entry!(T, NaiveDate, NaiveDateConverter);
    builtin_entry!(T, NaiveTime, NaiveTimeConverter);
    builtin_entry!(T, Duration, DurationConverter);
    builtin_entry!(T, Uuid, UuidConverter);
    builtin_entry!(T, Url, UrlConverter);
    builtin_entry!(T, Version, VersionConverter);
    builtin_entry!(T, Color, ColorConverter);
    builtin_entry!(T, Point, PointConverter);
    builtin_entry!(T, Value, ValueConverter);
    builtin_entry!(T, RawMsgPack, RawConverter);
    None
}
