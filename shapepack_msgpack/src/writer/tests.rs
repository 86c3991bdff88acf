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
use crate::ExtensionCodes;
use bytes::BytesMut;
use shapepack_model::bigint::BigInt;

fn written<F>(op: F) -> Vec<u8>
where
    F: FnOnce(&mut MsgPackWriter<'_>),
{
    let mut buf = BytesMut::new();
    let mut writer = MsgPackWriter::new(&mut buf, ExtensionCodes::default());
    op(&mut writer);
    buf.to_vec()
}

#[test]
fn nil_and_bools() {
    assert_eq!(written(|w| w.write_nil()), vec![0xc0]);
    assert_eq!(written(|w| w.write_bool(false)), vec![0xc2]);
    assert_eq!(written(|w| w.write_bool(true)), vec![0xc3]);
}

#[test]
fn integers_take_the_narrowest_encoding() {
    assert_eq!(written(|w| w.write_int(42)), vec![0x2a]);
    assert_eq!(written(|w| w.write_int(-1)), vec![0xff]);
    assert_eq!(written(|w| w.write_int(-32)), vec![0xe0]);
    assert_eq!(written(|w| w.write_int(-33)), vec![0xd0, 0xdf]);
    assert_eq!(written(|w| w.write_int(200)), vec![0xcc, 0xc8]);
    assert_eq!(written(|w| w.write_int(-200)), vec![0xd1, 0xff, 0x38]);
    assert_eq!(written(|w| w.write_int(70000)), vec![0xce, 0x00, 0x01, 0x11, 0x70]);
    assert_eq!(
        written(|w| w.write_uint(u64::MAX)),
        vec![0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    );
}

#[test]
fn floats() {
    assert_eq!(written(|w| w.write_f64(1.0)), vec![0xcb, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(written(|w| w.write_f32(1.0)), vec![0xca, 0x3f, 0x80, 0, 0]);
}

#[test]
fn strings() {
    assert_eq!(
        written(|w| w.write_str("Seeds").unwrap()),
        vec![0xa5, b'S', b'e', b'e', b'd', b's']
    );
    let long: String = std::iter::repeat('a').take(40).collect();
    let bytes = written(|w| w.write_str(&long).unwrap());
    assert_eq!(&bytes[..2], &[0xd9, 40]);
    assert_eq!(bytes.len(), 42);
}

#[test]
fn headers() {
    assert_eq!(written(|w| w.write_array_header(2).unwrap()), vec![0x92]);
    assert_eq!(written(|w| w.write_map_header(1).unwrap()), vec![0x81]);
    assert_eq!(
        written(|w| w.write_array_header(16).unwrap()),
        vec![0xdc, 0x00, 0x10]
    );
    assert_eq!(
        written(|w| w.write_map_header(70000).unwrap()),
        vec![0xdf, 0x00, 0x01, 0x11, 0x70]
    );
}

#[test]
fn extensions_use_fixed_forms_where_possible() {
    assert_eq!(
        written(|w| w.write_ext(7, &[0xab]).unwrap()),
        vec![0xd4, 7, 0xab]
    );
    assert_eq!(
        written(|w| w.write_ext(7, &[1, 2, 3, 4]).unwrap()),
        vec![0xd6, 7, 1, 2, 3, 4]
    );
    assert_eq!(
        written(|w| w.write_ext(7, &[9, 9, 9]).unwrap()),
        vec![0xc7, 3, 7, 9, 9, 9]
    );
}

#[test]
fn big_int_is_twos_complement_big_endian() {
    let bytes = written(|w| w.write_big_int(&BigInt::from(-5)).unwrap());
    assert_eq!(bytes, vec![0xd4, 0, 0xfb]);
    let bytes = written(|w| w.write_big_int(&BigInt::from(5)).unwrap());
    assert_eq!(bytes, vec![0xd4, 0, 0x05]);
    // 255 needs a leading zero byte so the sign bit reads as positive.
    let bytes = written(|w| w.write_big_int(&BigInt::from(255)).unwrap());
    assert_eq!(bytes, vec![0xd5, 0, 0x00, 0xff]);
}

#[test]
fn timestamps_pick_the_shortest_form() {
    let small = Timestamp::from_parts(1_000, 0).unwrap();
    let bytes = written(|w| w.write_timestamp(small).unwrap());
    assert_eq!(bytes, vec![0xd6, 0xff, 0, 0, 0x03, 0xe8]);

    let with_nanos = Timestamp::from_parts(1_000, 1).unwrap();
    let bytes = written(|w| w.write_timestamp(with_nanos).unwrap());
    assert_eq!(bytes[0], 0xd7);
    assert_eq!(bytes[1] as i8, -1);
    assert_eq!(bytes.len(), 10);

    let ancient = Timestamp::from_parts(-1, 0).unwrap();
    let bytes = written(|w| w.write_timestamp(ancient).unwrap());
    assert_eq!(bytes[0], 0xc7);
    assert_eq!(bytes[1], 12);
    assert_eq!(bytes[2] as i8, -1);
}

#[test]
fn slice_fast_path_matches_scalar_writes() {
    let values = [1i32, -100, 1234, -87657, i32::MAX];
    let fast = written(|w| w.write_i32_slice(&values).unwrap());
    let slow = written(|w| {
        w.write_array_header(values.len()).unwrap();
        for v in &values {
            w.write_int(*v as i64);
        }
    });
    assert_eq!(fast, slow);
}

#[test]
fn pre_encoded_key_token() {
    let token = encode_str_token("Seeds").unwrap();
    assert_eq!(token.as_ref(), &[0xa5, b'S', b'e', b'e', b'd', b's']);
}
