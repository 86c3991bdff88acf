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

use crate::builder::BuildCx;
use crate::context::{ReadContext, WriteContext};
use crate::convert::{Converter, ConverterRef};
use crate::error::{ConfigError, Failure};
use crate::schema::SchemaNode;
use crate::shape::{KindGlue, SurrogateOf};
use crate::streaming::{AsyncSink, AsyncSource};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use shapepack_msgpack::MsgPackWriter;
use std::sync::Arc;

/// Routes every read and write of `T` through its declared surrogate type.
struct SurrogateConverter<T: 'static, S: 'static> {
    inner: ConverterRef<S>,
    marshal: fn(&T) -> S,
    unmarshal: fn(S) -> T,
}

impl<T, S> Converter<T> for SurrogateConverter<T, S>
where
    T: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn write(
        &self,
        value: &T,
        writer: &mut MsgPackWriter<'_>,
        ctx: &mut WriteContext,
    ) -> Result<(), Failure> {
        let surrogate = (self.marshal)(value);
        self.inner.write(&surrogate, writer, ctx)
    }

    fn read(&self, input: &mut Bytes, ctx: &mut ReadContext) -> Result<T, Failure> {
        let surrogate = self.inner.read(input, ctx)?;
        Ok((self.unmarshal)(surrogate))
    }

    fn write_async<'a, 'b: 'a>(
        &'a self,
        value: &'a T,
        sink: &'a mut AsyncSink<'b>,
        ctx: &'a mut WriteContext,
    ) -> BoxFuture<'a, Result<(), Failure>> {
        async move {
            let surrogate = (self.marshal)(value);
            self.inner.write_async(&surrogate, sink, ctx).await
        }
        .boxed()
    }

    fn read_async<'a, 'b: 'a>(
        &'a self,
        source: &'a mut AsyncSource<'b>,
        ctx: &'a mut ReadContext,
    ) -> BoxFuture<'a, Result<T, Failure>> {
        async move {
            let surrogate = self.inner.read_async(source, ctx).await?;
            Ok((self.unmarshal)(surrogate))
        }
        .boxed()
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    fn schema(&self) -> SchemaNode {
        self.inner.schema()
    }
}

impl<T, S> KindGlue<T> for SurrogateOf<T, S>
where
    T: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn build(&self, cx: &BuildCx<'_>) -> Result<ConverterRef<T>, ConfigError> {
        let shape = self.surrogate.resolve();
        let inner = cx.converter(&shape)?;
        Ok(Arc::new(SurrogateConverter {
            inner,
            marshal: self.marshal,
            unmarshal: self.unmarshal,
        }))
    }
}
