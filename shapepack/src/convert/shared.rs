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

//! Reference preservation for `Arc` backed shapes: first occurrences are written
//! in full and recorded; later occurrences become a reference extension carrying
//! the identifier assigned at first occurrence (1-based, in stream order).

use crate::builder::BuildCx;
use crate::context::{ReadContext, Seen, WriteContext};
use crate::convert::object::{build_shared_populate, SharedPopulate};
use crate::convert::{Converter, ConverterRef};
use crate::error::{ConfigError, Failure};
use crate::schema::SchemaNode;
use crate::shape::{KindGlue, ShapeKind, SharedOf};
use bytes::Bytes;
use shapepack_msgpack::{reader, ExtensionCodes, MsgPackWriter};
use std::sync::Arc;

/// Writes a reference extension with a minimal big endian identifier payload.
pub(crate) fn write_reference(writer: &mut MsgPackWriter<'_>, id: u64) -> Result<(), Failure> {
    let bytes = id.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    let code = writer.codes().reference;
    writer.write_ext(code, &bytes[start..]).map_err(Failure::from)
}

/// Consumes and returns a reference identifier if the next value is a reference
/// extension; leaves the input untouched otherwise.
pub(crate) fn try_read_reference(
    input: &mut Bytes,
    codes: ExtensionCodes,
) -> Result<Option<u64>, Failure> {
    match reader::peek_marker(input) {
        Ok(marker) if reader::is_ext(marker) => {}
        _ => return Ok(None),
    }
    let mut probe = input.clone();
    let (code, payload) = reader::read_ext(&mut probe).map_err(Failure::from)?;
    if code != codes.reference {
        return Ok(None);
    }
    if payload.is_empty() || payload.len() > 8 {
        return Err(Failure::structure(
            "A reference identifier must have between 1 and 8 bytes.",
        ));
    }
    let mut bytes = [0u8; 8];
    bytes[8 - payload.len()..].copy_from_slice(payload.as_ref());
    *input = probe;
    Ok(Some(u64::from_be_bytes(bytes)))
}

struct CyclicSupport<T: 'static> {
    make: fn() -> Arc<T>,
    populate: Arc<SharedPopulate<T>>,
}

/// The converter for `Arc<T>`. Without reference tracking it is transparent; with
/// tracking it deduplicates by identity on write and restores shared identity on
/// read. With cyclic support the allocation is registered before its body is
/// decoded, so back references inside the body resolve to the object being built.
struct SharedConverter<T: 'static> {
    inner: ConverterRef<T>,
    cyclic: Option<CyclicSupport<T>>,
}

impl<T: Send + Sync + 'static> Converter<Arc<T>> for SharedConverter<T> {
    fn write(
        &self,
        value: &Arc<T>,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        if let Some(refs) = ctx.refs_mut() {
            match refs.note_object(Arc::as_ptr(value) as usize) {
                Seen::Again(id) => return write_reference(writer, id),
                Seen::First(_) => {}
            }
        }
        self.inner.write(value.as_ref(), writer, ctx)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<Arc<T>, Failure> {
        if ctx.refs_mut().is_none() {
            return Ok(Arc::new(self.inner.read(input, ctx)?));
        }
        if let Some(id) = try_read_reference(input, ctx.options.extension_codes)? {
            let refs = ctx
                .refs_mut()
                .ok_or_else(|| Failure::structure("Reference state is unavailable."))?;
            return refs
                .resolve(id)?
                .downcast_ref::<Arc<T>>()
                .cloned()
                .ok_or_else(|| {
                    Failure::structure("The reference does not identify a value of this type.")
                });
        }
        match &self.cyclic {
            Some(cyclic) => {
                let target = (cyclic.make)();
                if let Some(refs) = ctx.refs_mut() {
                    let id = refs.reserve();
                    refs.fulfill(id, Box::new(target.clone()));
                }
                cyclic.populate.read_into(target.as_ref(), input, ctx)?;
                Ok(target)
            }
            None => {
                let id = ctx.refs_mut().map(|refs| refs.reserve());
                let value = Arc::new(self.inner.read(input, ctx)?);
                if let (Some(id), Some(refs)) = (id, ctx.refs_mut()) {
                    refs.fulfill(id, Box::new(value.clone()));
                }
                Ok(value)
            }
        }
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    fn schema(&self) -> SchemaNode {
        self.inner.schema()
    }
}

impl<T: Send + Sync + 'static> KindGlue<Arc<T>> for SharedOf<T> {
    fn build(&self, cx: &BuildCx<'_>) -> Result<ConverterRef<Arc<T>>, ConfigError> {
        let shape = self.inner.resolve();
        let inner = cx.converter(&shape)?;
        let cyclic = match (&shape.kind, self.make) {
            (ShapeKind::Object(object), Some(make)) => build_shared_populate(object, cx)?
                .map(|populate| CyclicSupport {
                    make,
                    populate: Arc::new(populate),
                }),
            _ => None,
        };
        Ok(Arc::new(SharedConverter { inner, cyclic }))
    }
}
