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
use crate::reader::read_int;
use crate::{ExtensionCodes, MsgPackWriter};

fn document() -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut writer = MsgPackWriter::new(&mut buf, ExtensionCodes::default());
    writer.write_map_header(2).unwrap();
    writer.write_str("name").unwrap();
    writer.write_str("Lightning").unwrap();
    writer.write_str("speed").unwrap();
    writer.write_int(45);
    buf.to_vec()
}

#[test]
fn whole_document_measures_exactly() {
    let doc = document();
    match try_skip_value(&doc).unwrap() {
        Step::Done { consumed, .. } => assert_eq!(consumed, doc.len()),
        Step::More(_) => panic!("Expected a complete document."),
    }
}

#[test]
fn every_prefix_requests_more() {
    let doc = document();
    for cut in 0..doc.len() {
        match try_skip_value(&doc[..cut]).unwrap() {
            Step::Done { .. } => panic!("Prefix of {} bytes read as complete.", cut),
            Step::More(needed) => {
                assert!(needed >= 1);
                assert!(cut + needed <= doc.len());
            }
        }
    }
}

#[test]
fn hints_cover_sized_payloads() {
    // A str8 of 40 bytes, cut immediately after the length byte.
    let mut buf = BytesMut::new();
    let mut writer = MsgPackWriter::new(&mut buf, ExtensionCodes::default());
    let long: String = std::iter::repeat('a').take(40).collect();
    writer.write_str(&long).unwrap();
    match try_skip_value(&buf[..2]).unwrap() {
        Step::More(needed) => assert_eq!(needed, 40),
        Step::Done { .. } => panic!("Truncated string read as complete."),
    }
}

#[test]
fn attempt_only_consumes_on_success() {
    let doc = {
        let mut buf = BytesMut::new();
        MsgPackWriter::new(&mut buf, ExtensionCodes::default()).write_int(70000);
        buf.to_vec()
    };
    match attempt(&doc[..2], |input| read_int(input)).unwrap() {
        Step::More(_) => {}
        Step::Done { .. } => panic!("Truncated integer read as complete."),
    }
    match attempt(&doc, |input| read_int(input)).unwrap() {
        Step::Done { value, consumed } => {
            assert_eq!(value, 70000);
            assert_eq!(consumed, doc.len());
        }
        Step::More(_) => panic!("Complete integer requested more input."),
    }
}

#[test]
fn frame_decoder_yields_documents_as_bytes_arrive() {
    let doc = document();
    let mut decoder = DocFrameDecoder;
    let mut buf = BytesMut::new();
    for (i, byte) in doc.iter().enumerate() {
        buf.extend_from_slice(&[*byte]);
        let frame = decoder.decode(&mut buf).unwrap();
        if i + 1 < doc.len() {
            assert!(frame.is_none());
        } else {
            assert_eq!(frame.unwrap().as_ref(), doc.as_slice());
        }
    }
    assert!(buf.is_empty());
}

#[test]
fn frame_decoder_reports_truncated_input_at_eof() {
    let doc = document();
    let mut decoder = DocFrameDecoder;
    let mut buf = BytesMut::from(&doc[..doc.len() - 1]);
    assert!(decoder.decode(&mut buf).unwrap().is_none());
    assert!(matches!(
        decoder.decode_eof(&mut buf),
        Err(FrameError::Truncated)
    ));
}

#[test]
fn invalid_marker_is_an_error_not_a_request_for_more() {
    assert!(matches!(
        try_skip_value(&[0xc1]),
        Err(MsgPackReadError::InvalidMarker(Marker::Reserved))
    ));
}
