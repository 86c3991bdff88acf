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

use crate::config::{ReferenceMode, SerializerOptions};
use crate::context::CancelToken;
use crate::error::Failure;
use crate::shape::registry::{shape_of, Shaped};
use crate::shape::{deferred, object_shape, property, Constructor, ObjectShape, ShapeRef};
use crate::Serializer;
use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Feeds a byte payload to the reader `chunk` bytes at a time, so every
/// fragmentation of the stream is exercised.
struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl ChunkedReader {
    fn new(data: Vec<u8>, chunk: usize) -> Self {
        ChunkedReader {
            data,
            pos: 0,
            chunk: chunk.max(1),
        }
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos >= this.data.len() {
            return Poll::Ready(Ok(()));
        }
        let end = (this.pos + this.chunk).min(this.data.len());
        let take = (end - this.pos).min(buf.remaining());
        buf.put_slice(&this.data[this.pos..this.pos + take]);
        this.pos += take;
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
struct Reading {
    sensor: String,
    value: i64,
}

impl Shaped for Reading {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Reading",
            ObjectShape {
                properties: vec![
                    property::<Reading, String>("sensor", deferred::<String>())
                        .get(|r| &r.sensor)
                        .set(|r, v| r.sensor = v)
                        .build(),
                    property::<Reading, i64>("value", deferred::<i64>())
                        .get(|r| &r.value)
                        .set(|r, v| r.value = v)
                        .build(),
                ],
                constructor: Constructor::Default {
                    make: Reading::default,
                },
            },
        )
    }
}

fn sample() -> Reading {
    Reading {
        sensor: "temperature".to_string(),
        value: -40,
    }
}

fn sample_batch() -> Vec<Reading> {
    vec![
        Reading {
            sensor: "temperature".to_string(),
            value: -40,
        },
        Reading {
            sensor: "humidity".to_string(),
            value: 65,
        },
        Reading {
            sensor: "pressure".to_string(),
            value: 1013,
        },
    ]
}

/// Forces the element-wise asynchronous paths by making the sync buffering budget
/// too small for any document.
fn streaming_serializer() -> Serializer {
    Serializer::new(SerializerOptions::builder().max_async_buffer(1).build())
}

#[tokio::test]
async fn async_read_matches_sync_for_every_fragmentation() {
    let serializer = streaming_serializer();
    let doc = serializer.serialize(&sample()).unwrap().to_vec();
    for chunk in 1..=doc.len() {
        let mut reader = ChunkedReader::new(doc.clone(), chunk);
        let restored: Reading = serializer.deserialize_from(&mut reader).await.unwrap();
        assert_eq!(restored, sample(), "chunk size {}", chunk);
    }
}

#[tokio::test]
async fn async_read_of_containers_matches_sync() {
    let serializer = streaming_serializer();
    let mut map = HashMap::new();
    map.insert("first".to_string(), vec![1i64, 2, 3]);
    map.insert("second".to_string(), vec![4i64]);
    let doc = serializer.serialize(&map).unwrap().to_vec();
    for chunk in [1, 3, 7, doc.len()] {
        let mut reader = ChunkedReader::new(doc.clone(), chunk);
        let restored: HashMap<String, Vec<i64>> =
            serializer.deserialize_from(&mut reader).await.unwrap();
        assert_eq!(restored, map, "chunk size {}", chunk);
    }
}

#[tokio::test]
async fn buffered_fast_path_is_taken_when_the_document_fits() {
    let serializer = Serializer::default();
    let doc = serializer.serialize(&sample()).unwrap().to_vec();
    let mut reader = ChunkedReader::new(doc, 4);
    let restored: Reading = serializer.deserialize_from(&mut reader).await.unwrap();
    assert_eq!(restored, sample());
}

#[tokio::test]
async fn async_write_matches_sync_bytes() {
    let serializer = streaming_serializer();
    let expected = serializer.serialize(&sample_batch()).unwrap();
    let mut out: Vec<u8> = Vec::new();
    serializer.serialize_to(&sample_batch(), &mut out).await.unwrap();
    assert_eq!(out.as_slice(), expected.as_ref());
}

#[tokio::test]
async fn truncated_input_reports_incomplete() {
    let serializer = streaming_serializer();
    let mut doc = serializer.serialize(&sample()).unwrap().to_vec();
    doc.truncate(doc.len() - 1);
    let mut reader = ChunkedReader::new(doc, 2);
    let result: Result<Reading, Failure> = serializer.deserialize_from(&mut reader).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn element_streaming_yields_the_array_elements() {
    let serializer = streaming_serializer();
    let batch = sample_batch();
    let doc = serializer.serialize(&batch).unwrap().to_vec();
    let reader = ChunkedReader::new(doc, 3);
    let stream = serializer
        .deserialize_stream::<Reading, _>(reader, CancelToken::new())
        .unwrap();
    let collected: Vec<Reading> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(collected, batch);
}

#[tokio::test]
async fn element_streaming_rejects_reference_preservation() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .preserve_references(ReferenceMode::PerCall)
            .build(),
    );
    let reader = ChunkedReader::new(vec![0x90], 1);
    let result = serializer.deserialize_stream::<Reading, _>(reader, CancelToken::new());
    assert!(result.is_err());
}

#[tokio::test]
async fn cancellation_is_observed_before_reading() {
    let serializer = streaming_serializer();
    let doc = serializer.serialize(&sample()).unwrap().to_vec();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut reader = ChunkedReader::new(doc, 1);
    let result: Result<Reading, Failure> = serializer
        .deserialize_from_with(&mut reader, &shape_of::<Reading>(), &cancel)
        .await;
    assert!(matches!(result, Err(f) if f.is_cancelled()));
}

#[tokio::test]
async fn cancellation_is_observed_before_writing() {
    let serializer = streaming_serializer();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut out: Vec<u8> = Vec::new();
    let result = serializer
        .serialize_to_with(&sample(), &shape_of::<Reading>(), &mut out, &cancel)
        .await;
    assert!(matches!(result, Err(f) if f.is_cancelled()));
    assert!(out.is_empty());
}
