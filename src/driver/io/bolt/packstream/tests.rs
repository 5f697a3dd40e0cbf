// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use rstest::*;

use super::super::bolt5x0::ModernCodec;
use super::super::ValueCodec;
use super::{PackstreamBuffer, PackstreamReader};
use crate::macros::hash_map;
use crate::value::spatial::Cartesian2D;
use crate::value::{ValueReceive, ValueSend};

fn encode(value: &ValueSend) -> Vec<u8> {
    let mut buf = PackstreamBuffer::new();
    ModernCodec::default().encode(&mut buf, value).unwrap();
    buf.into_bytes()
}

fn decode(bytes: &[u8]) -> ValueReceive {
    let mut reader = PackstreamReader::new(bytes);
    let value = reader.read_value(&ModernCodec::default()).unwrap();
    assert!(reader.exhausted(), "decoder left trailing bytes");
    value
}

fn round_trip(value: ValueSend) -> ValueReceive {
    decode(&encode(&value))
}

#[rstest]
#[case(0, vec![0x00])]
#[case(1, vec![0x01])]
#[case(-1, vec![0xFF])]
#[case(127, vec![0x7F])]
#[case(-16, vec![0xF0])]
#[case(-17, vec![0xC8, 0xEF])]
#[case(-128, vec![0xC8, 0x80])]
#[case(128, vec![0xC9, 0x00, 0x80])]
#[case(-129, vec![0xC9, 0xFF, 0x7F])]
#[case(32_767, vec![0xC9, 0x7F, 0xFF])]
#[case(32_768, vec![0xCA, 0x00, 0x00, 0x80, 0x00])]
#[case(-32_769, vec![0xCA, 0xFF, 0xFF, 0x7F, 0xFF])]
#[case(2_147_483_647, vec![0xCA, 0x7F, 0xFF, 0xFF, 0xFF])]
#[case(2_147_483_648, vec![0xCB, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00])]
#[case(i64::MAX, vec![0xCB, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])]
#[case(i64::MIN, vec![0xCB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])]
fn integers_use_narrowest_encoding(#[case] i: i64, #[case] expected: Vec<u8>) {
    let bytes = encode(&ValueSend::Integer(i));
    assert_eq!(bytes, expected);
    assert_eq!(decode(&bytes), ValueReceive::Integer(i));
}

#[test]
fn null_round_trip() {
    assert_eq!(encode(&ValueSend::Null), vec![0xC0]);
    assert_eq!(round_trip(ValueSend::Null), ValueReceive::Null);
}

#[rstest]
#[case(false, 0xC2)]
#[case(true, 0xC3)]
fn bool_round_trip(#[case] b: bool, #[case] marker: u8) {
    assert_eq!(encode(&ValueSend::Boolean(b)), vec![marker]);
    assert_eq!(round_trip(ValueSend::Boolean(b)), ValueReceive::Boolean(b));
}

#[rstest]
#[case(0.0)]
#[case(-1.5)]
#[case(f64::INFINITY)]
#[case(f64::MIN_POSITIVE)]
fn float_round_trip(#[case] f: f64) {
    let bytes = encode(&ValueSend::Float(f));
    assert_eq!(bytes[0], 0xC1);
    assert_eq!(bytes.len(), 9);
    assert_eq!(decode(&bytes), ValueReceive::Float(f));
}

#[rstest]
#[case("")]
#[case("foo")]
#[case("this string is sixteen..")]
#[case("ÄÖÜ 统一码")]
fn string_round_trip(#[case] s: &str) {
    assert_eq!(
        round_trip(ValueSend::String(String::from(s))),
        ValueReceive::String(String::from(s))
    );
}

#[test]
fn long_string_uses_size_prefix() {
    let s = "x".repeat(300);
    let bytes = encode(&ValueSend::String(s.clone()));
    assert_eq!(bytes[0], 0xD1);
    assert_eq!(decode(&bytes), ValueReceive::String(s));
}

#[test]
fn bytes_round_trip() {
    let b = vec![0u8, 1, 2, 255];
    let bytes = encode(&ValueSend::Bytes(b.clone()));
    assert_eq!(bytes[0], 0xCC);
    assert_eq!(decode(&bytes), ValueReceive::Bytes(b));
}

#[test]
fn nested_collections_round_trip() {
    let value = ValueSend::List(vec![
        ValueSend::Integer(1),
        ValueSend::Map(hash_map!(
            String::from("foo") => ValueSend::List(vec![ValueSend::Null]),
            String::from("bar") => ValueSend::Boolean(true),
        )),
    ]);
    let expected = ValueReceive::List(vec![
        ValueReceive::Integer(1),
        ValueReceive::Map(hash_map!(
            String::from("foo") => ValueReceive::List(vec![ValueReceive::Null]),
            String::from("bar") => ValueReceive::Boolean(true),
        )),
    ]);
    assert_eq!(round_trip(value), expected);
}

#[test]
fn large_list_uses_size_prefix() {
    let value = ValueSend::List(vec![ValueSend::Integer(0); 16]);
    let bytes = encode(&value);
    assert_eq!(bytes[0], 0xD4);
    assert_eq!(bytes[1], 16);
}

#[test]
fn spatial_round_trip() {
    let value = ValueSend::Cartesian2D(Cartesian2D::new(1.0, 2.0));
    let received = round_trip(value);
    let ValueReceive::Cartesian2D(point) = received else {
        panic!("expected Cartesian2D, got {received:?}");
    };
    assert_eq!(point.x(), 1.0);
    assert_eq!(point.y(), 2.0);
}

#[test]
fn tiny_map_writer_counts_entries() {
    let mut buf = PackstreamBuffer::new();
    let mut map = buf.tiny_map();
    map.entry_string("one", "eins").unwrap();
    map.entry_int("two", 2).unwrap();
    map.end();
    let decoded = decode(&buf.into_bytes());
    assert_eq!(
        decoded,
        ValueReceive::Map(hash_map!(
            String::from("one") => ValueReceive::String(String::from("eins")),
            String::from("two") => ValueReceive::Integer(2),
        ))
    );
}

#[test]
fn tiny_map_writer_may_stay_empty() {
    let mut buf = PackstreamBuffer::new();
    buf.tiny_map().end();
    assert_eq!(buf.into_bytes(), vec![0xA0]);
}

#[test]
fn unknown_struct_tag_is_broken_value() {
    // B1 (struct, 1 field), tag 0x7A, field 1
    let received = decode(&[0xB1, 0x7A, 0x01]);
    let ValueReceive::BrokenValue(broken) = received else {
        panic!("expected BrokenValue, got {received:?}");
    };
    assert!(broken.reason().contains("unknown structure tag"));
}

#[test]
fn truncated_input_fails() {
    let mut reader = PackstreamReader::new(&[0xC9, 0x00]);
    assert!(reader.read_value(&ModernCodec::default()).is_err());
}

#[test]
fn unknown_marker_fails() {
    let mut reader = PackstreamReader::new(&[0xC7]);
    assert!(reader.read_value(&ModernCodec::default()).is_err());
}

#[test]
fn oversized_struct_header_is_rejected() {
    let mut buf = PackstreamBuffer::new();
    assert!(buf.put_struct_header(0x66, 16).is_err());
}
