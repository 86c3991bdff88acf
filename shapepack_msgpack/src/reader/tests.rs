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

use super::*;
use crate::{ExtensionCodes, MsgPackWriter};
use bytes::BytesMut;
use either::Either;

fn encoded<F>(op: F) -> Bytes
where
    F: FnOnce(&mut MsgPackWriter<'_>),
{
    let mut buf = BytesMut::new();
    let mut writer = MsgPackWriter::new(&mut buf, ExtensionCodes::default());
    op(&mut writer);
    buf.freeze()
}

const I64VALUES: [i64; 6] = [0, 1, -100, 1234, -87657, 105678750199];

#[test]
fn integers_round_trip() {
    for n in &I64VALUES {
        let mut input = encoded(|w| w.write_int(*n));
        assert_eq!(read_int(&mut input), Ok(*n));
        assert!(input.is_empty());
    }
    let mut input = encoded(|w| w.write_uint(u64::MAX));
    assert_eq!(read_number(&mut input), Ok(Either::Right(u64::MAX)));
}

#[test]
fn primitive_scenario_forty_two() {
    let mut input = Bytes::from_static(&[0x2a]);
    assert_eq!(read_int(&mut input), Ok(42));
}

#[test]
fn uint_rejects_negatives() {
    let mut input = encoded(|w| w.write_int(-4));
    assert_eq!(read_uint(&mut input), Err(MsgPackReadError::NumberOutOfRange));
}

#[test]
fn strings_round_trip() {
    for s in ["", "some text", "a moderately long sentence with quite a few words in it"] {
        let mut input = encoded(|w| w.write_str(s).unwrap());
        assert_eq!(read_str(&mut input).unwrap(), s);
    }
}

#[test]
fn string_rejects_invalid_utf8() {
    let mut input = Bytes::from_static(&[0xa2, 0xff, 0xfe]);
    assert!(matches!(
        read_str(&mut input),
        Err(MsgPackReadError::StringDecode(_))
    ));
}

#[test]
fn bin_round_trips() {
    let blob = vec![1u8, 2, 3];
    let mut input = encoded(|w| w.write_bin(&blob).unwrap());
    assert_eq!(read_bin_bytes(&mut input).unwrap().as_ref(), blob.as_slice());
}

#[test]
fn headers_round_trip() {
    let mut input = encoded(|w| w.write_array_header(2).unwrap());
    assert_eq!(read_array_header(&mut input), Ok(2));
    let mut input = encoded(|w| w.write_map_header(70000).unwrap());
    assert_eq!(read_map_header(&mut input), Ok(70000));
}

#[test]
fn peek_does_not_advance() {
    let input = Bytes::from_static(&[0x92, 0x01, 0x02]);
    let mut reader = input.clone();
    assert!(matches!(peek_marker(&reader), Ok(Marker::FixArray(2))));
    assert_eq!(reader.len(), input.len());
    assert_eq!(read_array_header(&mut reader), Ok(2));
}

#[test]
fn reading_past_the_end_is_an_error() {
    let mut input = Bytes::from_static(&[0xcd, 0x01]);
    assert_eq!(read_int(&mut input), Err(MsgPackReadError::Incomplete));
    let mut empty = Bytes::new();
    assert_eq!(read_marker(&mut empty), Err(MsgPackReadError::Incomplete));
}

#[test]
fn big_integers_round_trip() {
    for n in [-87657i64, -1, 0, 1, 87657] {
        let big = BigInt::from(n);
        let mut input = encoded(|w| w.write_big_int(&big).unwrap());
        let (code, payload) = read_ext(&mut input).unwrap();
        assert_eq!(code, ExtensionCodes::default().big_int);
        assert_eq!(decode_big_int(payload.as_ref()).unwrap(), big);
    }
}

#[test]
fn empty_big_int_is_rejected() {
    assert_eq!(decode_big_int(&[]), Err(MsgPackReadError::EmptyBigInt));
}

#[test]
fn timestamps_round_trip_all_forms() {
    for (seconds, nanos) in [(1_000, 0), (1_000, 1), (-1, 0), (1 << 35, 500)] {
        let ts = Timestamp::from_parts(seconds, nanos).unwrap();
        let mut input = encoded(|w| w.write_timestamp(ts).unwrap());
        assert_eq!(read_timestamp(&mut input), Ok(ts));
    }
}

#[test]
fn skip_steps_over_whole_structures() {
    let mut input = encoded(|w| {
        w.write_map_header(2).unwrap();
        w.write_str("a").unwrap();
        w.write_array_header(3).unwrap();
        w.write_int(1);
        w.write_int(2);
        w.write_int(3);
        w.write_str("b").unwrap();
        w.write_nil();
        w.write_int(7);
    });
    skip_value(&mut input).unwrap();
    assert_eq!(read_int(&mut input), Ok(7));
    assert!(input.is_empty());
}

#[test]
fn skip_reports_truncation() {
    let mut input = Bytes::from_static(&[0x92, 0x01]);
    assert_eq!(skip_value(&mut input), Err(MsgPackReadError::Incomplete));
}

#[test]
fn capture_returns_the_raw_structure() {
    let mut input = encoded(|w| {
        w.write_array_header(2).unwrap();
        w.write_int(1);
        w.write_int(2);
        w.write_int(9);
    });
    let raw = capture_value(&mut input).unwrap();
    assert_eq!(raw.as_ref(), &[0x92, 0x01, 0x02]);
    assert_eq!(read_int(&mut input), Ok(9));
}
