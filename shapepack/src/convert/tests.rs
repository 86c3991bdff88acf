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

use crate::config::{DeserializeDefaults, ReferenceMode, SerializeDefaults, SerializerOptions};
use crate::context::CancelToken;
use crate::convert::{Converter, RawMsgPack};
use crate::error::{ErrorKind, Failure};
use crate::shape::registry::{shape_of, Shaped};
use crate::shape::{
    bucket_property, deferred, enum_shape, multidim_shape, object_shape, optional_shape,
    parameterized, property, shared_shape, surrogate_shape, union_case, union_shape, Alias,
    Constructor, EnumMember, EnumShape, MultiDimOf, ObjectShape, Parameter, ShapeRef,
    ShapeSource, SurrogateOf, UnionShape, UnionStyle,
};
use crate::{GuidFormat, MultiDimFormat, Serializer};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use shapepack_model::bigint::{BigInt, BigUint};
use shapepack_model::{Blob, Text, Timestamp, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn validate<T: Shaped + PartialEq + Debug>(value: &T) {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(value).unwrap();
    let restored: T = serializer.deserialize(bytes).unwrap();
    assert_eq!(value, &restored);
}

fn validate_on<T: Shaped + PartialEq + Debug>(serializer: &Serializer, value: &T) {
    let bytes = serializer.serialize(value).unwrap();
    let restored: T = serializer.deserialize(bytes).unwrap();
    assert_eq!(value, &restored);
}

// ---------------------------------------------------------------------------
// Fixture types
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Clone, Default)]
struct Garden {
    seeds: i32,
}

impl Shaped for Garden {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Garden",
            ObjectShape {
                properties: vec![property::<Garden, i32>("Seeds", deferred::<i32>())
                    .get(|g| &g.seeds)
                    .set(|g, v| g.seeds = v)
                    .build()],
                constructor: Constructor::Default {
                    make: Garden::default,
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
struct Point {
    x: i32,
    y: i32,
}

impl Shaped for Point {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Point",
            ObjectShape {
                properties: vec![
                    property::<Point, i32>("x", deferred::<i32>())
                        .get(|p| &p.x)
                        .set(|p, v| p.x = v)
                        .key_index(0)
                        .build(),
                    property::<Point, i32>("y", deferred::<i32>())
                        .get(|p| &p.y)
                        .set(|p, v| p.y = v)
                        .key_index(1)
                        .build(),
                ],
                constructor: Constructor::Default {
                    make: Point::default,
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct Horse {
    name: String,
    speed: i32,
}

type HorseState = (Option<String>, Option<i32>);

impl Shaped for Horse {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Horse",
            ObjectShape {
                properties: vec![
                    property::<Horse, String>("Name", deferred::<String>())
                        .get(|h| &h.name)
                        .parameter::<HorseState>(|s, v| s.0 = Some(v))
                        .build(),
                    property::<Horse, i32>("Speed", deferred::<i32>())
                        .get(|h| &h.speed)
                        .parameter::<HorseState>(|s, v| s.1 = Some(v))
                        .build(),
                ],
                constructor: parameterized(
                    vec![Parameter::required("Name", 0), Parameter::required("Speed", 1)],
                    || (None, None),
                    |state: HorseState| {
                        Ok(Horse {
                            name: state.0.unwrap_or_default(),
                            speed: state.1.unwrap_or_default(),
                        })
                    },
                ),
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct Dog {
    nickname: String,
}

impl Shaped for Dog {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Dog",
            ObjectShape {
                properties: vec![property::<Dog, String>("Nickname", deferred::<String>())
                    .get(|d| &d.nickname)
                    .set(|d, v| d.nickname = v)
                    .build()],
                constructor: Constructor::Default {
                    make: || Dog {
                        nickname: String::new(),
                    },
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
enum Animal {
    Horse(Horse),
    Dog(Dog),
}

impl Shaped for Animal {
    fn build_shape() -> ShapeRef<Self> {
        union_shape(
            "Animal",
            UnionShape {
                style: UnionStyle::Discriminated,
                cases: vec![
                    union_case(
                        Alias::Int(1),
                        "Horse",
                        deferred::<Horse>(),
                        |a| match a {
                            Animal::Horse(h) => Some(h),
                            _ => None,
                        },
                        Animal::Horse,
                    ),
                    union_case(
                        Alias::name("dog"),
                        "Dog",
                        deferred::<Dog>(),
                        |a| match a {
                            Animal::Dog(d) => Some(d),
                            _ => None,
                        },
                        Animal::Dog,
                    ),
                ],
                base: None,
                case_index: |a| match a {
                    Animal::Horse(_) => Some(0),
                    Animal::Dog(_) => Some(1),
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
struct Telemetry {
    level: i32,
}

fn telemetry_object() -> ObjectShape<Telemetry> {
    ObjectShape {
        properties: vec![property::<Telemetry, i32>("level", deferred::<i32>())
            .get(|t| &t.level)
            .set(|t, v| t.level = v)
            .build()],
        constructor: Constructor::Default {
            make: Telemetry::default,
        },
    }
}

impl Shaped for Telemetry {
    fn build_shape() -> ShapeRef<Self> {
        union_shape(
            "Telemetry",
            UnionShape {
                style: UnionStyle::Discriminated,
                cases: vec![],
                base: Some(Arc::new(telemetry_object())),
                case_index: |_| None,
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct EmailContact {
    address: String,
}

type EmailState = (Option<String>,);

impl Shaped for EmailContact {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "EmailContact",
            ObjectShape {
                properties: vec![property::<EmailContact, String>(
                    "address",
                    deferred::<String>(),
                )
                .get(|c| &c.address)
                .parameter::<EmailState>(|s, v| s.0 = Some(v))
                .build()],
                constructor: parameterized(
                    vec![Parameter::required("address", 0)],
                    || (None,),
                    |state: EmailState| {
                        Ok(EmailContact {
                            address: state.0.unwrap_or_default(),
                        })
                    },
                ),
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct PhoneContact {
    number: String,
}

type PhoneState = (Option<String>,);

impl Shaped for PhoneContact {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "PhoneContact",
            ObjectShape {
                properties: vec![property::<PhoneContact, String>(
                    "number",
                    deferred::<String>(),
                )
                .get(|c| &c.number)
                .parameter::<PhoneState>(|s, v| s.0 = Some(v))
                .build()],
                constructor: parameterized(
                    vec![Parameter::required("number", 0)],
                    || (None,),
                    |state: PhoneState| {
                        Ok(PhoneContact {
                            number: state.0.unwrap_or_default(),
                        })
                    },
                ),
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
enum Contact {
    Email(EmailContact),
    Phone(PhoneContact),
}

impl Shaped for Contact {
    fn build_shape() -> ShapeRef<Self> {
        union_shape(
            "Contact",
            UnionShape {
                style: UnionStyle::DuckTyped,
                cases: vec![
                    union_case(
                        Alias::Int(0),
                        "Email",
                        deferred::<EmailContact>(),
                        |c| match c {
                            Contact::Email(e) => Some(e),
                            _ => None,
                        },
                        Contact::Email,
                    ),
                    union_case(
                        Alias::Int(1),
                        "Phone",
                        deferred::<PhoneContact>(),
                        |c| match c {
                            Contact::Phone(p) => Some(p),
                            _ => None,
                        },
                        Contact::Phone,
                    ),
                ],
                base: None,
                case_index: |c| match c {
                    Contact::Email(_) => Some(0),
                    Contact::Phone(_) => Some(1),
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
struct Flexible {
    id: i32,
    extra: Vec<(Text, Value)>,
}

impl Shaped for Flexible {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Flexible",
            ObjectShape {
                properties: vec![
                    property::<Flexible, i32>("id", deferred::<i32>())
                        .get(|f| &f.id)
                        .set(|f, v| f.id = v)
                        .build(),
                    bucket_property("extra", |f: &Flexible| &f.extra, |f, v| f.extra = v),
                ],
                constructor: Constructor::Default {
                    make: Flexible::default,
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct Retry {
    attempts: i32,
    label: Option<String>,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            attempts: 3,
            label: None,
        }
    }
}

impl Shaped for Retry {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Retry",
            ObjectShape {
                properties: vec![
                    property::<Retry, i32>("attempts", deferred::<i32>())
                        .get(|r| &r.attempts)
                        .set(|r, v| r.attempts = v)
                        .attr_default(3)
                        .build(),
                    property::<Retry, Option<String>>("label", deferred::<Option<String>>())
                        .get(|r| &r.label)
                        .set(|r, v| r.label = v)
                        .attr_default(None)
                        .build(),
                ],
                constructor: Constructor::Default {
                    make: Retry::default,
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct Port {
    number: i32,
}

type PortState = (Option<i32>,);

impl Shaped for Port {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Port",
            ObjectShape {
                properties: vec![property::<Port, i32>("number", deferred::<i32>())
                    .get(|p| &p.number)
                    .parameter::<PortState>(|s, v| s.0 = Some(v))
                    .ctor_default(8080)
                    .attr_default(1)
                    .build()],
                constructor: parameterized(
                    vec![Parameter::optional("number", 0)],
                    || (None,),
                    |state: PortState| {
                        Ok(Port {
                            number: state.0.unwrap_or(-1),
                        })
                    },
                ),
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum Color {
    Red,
    Green,
    Blue,
}

impl Shaped for Color {
    fn build_shape() -> ShapeRef<Self> {
        enum_shape(
            "Color",
            EnumShape {
                members: vec![
                    EnumMember {
                        name: "Red",
                        value: 0,
                    },
                    EnumMember {
                        name: "Green",
                        value: 1,
                    },
                    EnumMember {
                        name: "Blue",
                        value: 2,
                    },
                ],
                to_ordinal: |c| match c {
                    Color::Red => 0,
                    Color::Green => 1,
                    Color::Blue => 2,
                },
                from_ordinal: |n| match n {
                    0 => Some(Color::Red),
                    1 => Some(Color::Green),
                    2 => Some(Color::Blue),
                    _ => None,
                },
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct Celsius(f64);

impl Shaped for Celsius {
    fn build_shape() -> ShapeRef<Self> {
        surrogate_shape(
            "Celsius",
            SurrogateOf {
                surrogate: deferred::<f64>(),
                marshal: |c: &Celsius| c.0,
                unmarshal: Celsius,
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
struct Grid {
    rows: usize,
    cols: usize,
    data: Vec<i64>,
}

impl Shaped for Grid {
    fn build_shape() -> ShapeRef<Self> {
        multidim_shape(
            "Grid",
            MultiDimOf {
                element: deferred::<i64>(),
                rank: 2,
                dims: |g: &Grid| vec![g.rows, g.cols],
                iter: |g| Box::new(g.data.iter()),
                from_flat: |dims, data| {
                    if dims.len() == 2 && dims[0] * dims[1] == data.len() {
                        Ok(Grid {
                            rows: dims[0],
                            cols: dims[1],
                            data,
                        })
                    } else {
                        Err(Text::new("The element count does not match the lengths."))
                    }
                },
            },
        )
    }
}

#[derive(Default)]
struct Node {
    tag: Mutex<i64>,
    next: Mutex<Option<Arc<Node>>>,
}

fn node_shape() -> ShapeRef<Node> {
    static SHAPE: OnceLock<ShapeRef<Node>> = OnceLock::new();
    SHAPE
        .get_or_init(|| {
            object_shape(
                "Node",
                ObjectShape {
                    properties: vec![
                        property::<Node, i64>("tag", deferred::<i64>())
                            .get_with(|n| *n.tag.lock())
                            .set(|n, v| *n.tag.lock() = v)
                            .set_shared(|n, v| *n.tag.lock() = v)
                            .build(),
                        property::<Node, Option<Arc<Node>>>(
                            "next",
                            ShapeSource::Deferred(opt_node_shape),
                        )
                        .get_with(|n| n.next.lock().clone())
                        .set(|n, v| *n.next.lock() = v)
                        .set_shared(|n, v| *n.next.lock() = v)
                        .build(),
                    ],
                    constructor: Constructor::Default {
                        make: Node::default,
                    },
                },
            )
        })
        .clone()
}

fn shared_node_shape() -> ShapeRef<Arc<Node>> {
    static SHAPE: OnceLock<ShapeRef<Arc<Node>>> = OnceLock::new();
    SHAPE
        .get_or_init(|| {
            shared_shape(
                "SharedNode",
                ShapeSource::Deferred(node_shape),
                Some(|| Arc::new(Node::default())),
            )
        })
        .clone()
}

fn opt_node_shape() -> ShapeRef<Option<Arc<Node>>> {
    static SHAPE: OnceLock<ShapeRef<Option<Arc<Node>>>> = OnceLock::new();
    SHAPE
        .get_or_init(|| optional_shape("OptionalNode", ShapeSource::Deferred(shared_node_shape)))
        .clone()
}

// ---------------------------------------------------------------------------
// Literal payload scenarios
// ---------------------------------------------------------------------------

#[test]
fn primitive_forty_two() {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(&42i32).unwrap();
    assert_eq!(bytes.as_ref(), &[0x2a]);
    let back: i32 = serializer.deserialize(Bytes::from_static(&[0x2a])).unwrap();
    assert_eq!(back, 42);
}

#[test]
fn map_object_with_one_property() {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(&Garden { seeds: 18 }).unwrap();
    assert_eq!(
        bytes.as_ref(),
        &[0x81, 0xa5, b'S', b'e', b'e', b'd', b's', 0x12]
    );
    let back: Garden = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, Garden { seeds: 18 });
}

#[test]
fn array_form_object_with_key_indexes() {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(&Point { x: 1, y: 2 }).unwrap();
    assert_eq!(bytes.as_ref(), &[0x92, 0x01, 0x02]);
    let back: Point = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, Point { x: 1, y: 2 });
}

fn lightning() -> Animal {
    Animal::Horse(Horse {
        name: "Lightning".to_string(),
        speed: 45,
    })
}

#[test]
fn union_array_form() {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(&lightning()).unwrap();
    let expected: &[u8] = &[
        0x92, 0x01, 0x82, 0xa4, b'N', b'a', b'm', b'e', 0xa9, b'L', b'i', b'g', b'h', b't', b'n',
        b'i', b'n', b'g', 0xa5, b'S', b'p', b'e', b'e', b'd', 0x2d,
    ];
    assert_eq!(bytes.as_ref(), expected);
    let back: Animal = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, lightning());
}

#[test]
fn union_object_form_and_discriminator_symmetry() {
    let array_side = Serializer::default();
    let object_side = Serializer::new(
        SerializerOptions::builder()
            .use_discriminator_objects(true)
            .build(),
    );
    let as_array = array_side.serialize(&lightning()).unwrap();
    let as_object = object_side.serialize(&lightning()).unwrap();
    assert_eq!(as_object[0], 0x81);
    assert_eq!(as_object[1], 0x01);
    // Either side reads either wire shape to the same value.
    let a: Animal = array_side.deserialize(as_object.clone()).unwrap();
    let b: Animal = object_side.deserialize(as_array.clone()).unwrap();
    assert_eq!(a, lightning());
    assert_eq!(b, lightning());
}

#[test]
fn union_string_alias() {
    let serializer = Serializer::default();
    let dog = Animal::Dog(Dog {
        nickname: "Rex".to_string(),
    });
    let bytes = serializer.serialize(&dog).unwrap();
    assert_eq!(&bytes[..5], &[0x92, 0xa3, b'd', b'o', b'g']);
    let back: Animal = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, dog);
}

#[test]
fn union_unknown_discriminator_fails() {
    let serializer = Serializer::default();
    let mut buf = BytesMut::new();
    buf.put_slice(&[0x92, 0x07, 0x80]);
    let result: Result<Animal, Failure> = serializer.deserialize(buf.freeze());
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::UnknownUnionDiscriminator(Alias::Int(7))
        ),
        Ok(_) => panic!("An unknown discriminator was accepted."),
    }
}

#[test]
fn union_nil_alias_selects_the_base() {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(&Telemetry { level: 4 }).unwrap();
    assert_eq!(bytes[0], 0x92);
    assert_eq!(bytes[1], 0xc0);
    let back: Telemetry = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, Telemetry { level: 4 });
}

#[test]
fn disabled_union_drops_the_framing() {
    let serializer = Serializer::new(
        SerializerOptions::builder().disable_union::<Telemetry>().build(),
    );
    let bytes = serializer.serialize(&Telemetry { level: 4 }).unwrap();
    assert_eq!(bytes[0], 0x81);
    let back: Telemetry = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, Telemetry { level: 4 });
}

#[test]
fn reference_preservation_cycle() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .preserve_references(ReferenceMode::PerCall)
            .build(),
    );
    let cancel = CancelToken::new();

    let a = Arc::new(Node::default());
    *a.tag.lock() = 1;
    let b = Arc::new(Node::default());
    *b.tag.lock() = 2;
    *a.next.lock() = Some(b.clone());
    *b.next.lock() = Some(a.clone());

    let bytes = serializer
        .serialize_with(&a, &shared_node_shape(), &cancel)
        .unwrap();
    // The second occurrence of the first node is a reference extension with
    // identifier 1.
    assert_eq!(&bytes[bytes.len() - 3..], &[0xd4, 0x05, 0x01]);

    let restored: Arc<Node> = serializer
        .deserialize_with(bytes, &shared_node_shape(), &cancel)
        .unwrap();
    assert_eq!(*restored.tag.lock(), 1);
    let second = restored.next.lock().clone().unwrap();
    assert_eq!(*second.tag.lock(), 2);
    let back = second.next.lock().clone().unwrap();
    assert!(Arc::ptr_eq(&restored, &back));
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

const I32VALUES: [i32; 4] = [1, -100, 1234, -87657];
const I64VALUES: [i64; 5] = [1, -100, 1234, -87657, 105678750199];

#[test]
fn primitive_round_trips() {
    for n in &I32VALUES {
        validate(n);
    }
    for n in &I64VALUES {
        validate(n);
    }
    validate(&());
    validate(&true);
    validate(&false);
    validate(&u64::MAX);
    validate(&-0.5f64);
    validate(&1.5f32);
    validate(&'q');
    validate(&String::from("some text"));
    validate(&Text::new("some text"));
    validate(&Blob::from_vec(vec![1, 2, 3]));
    validate(&BigInt::from(-1234567890123456789i64));
    validate(&BigUint::from(98765432109876543210u128));
    validate(&(i128::from(i64::MAX) * 7));
    validate(&(u128::from(u64::MAX) * 9));
    validate(&Duration::new(5, 123));
    validate(&Timestamp::from_parts(1_700_000_000, 123_456_789).unwrap());
    validate(&uuid::Uuid::new_v4());
    validate(&url::Url::parse("https://example.com/a?b=c").unwrap());
    validate(&chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    validate(&chrono::NaiveTime::from_hms_nano_opt(13, 5, 59, 250).unwrap());
    validate(
        &chrono::NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 59)
            .unwrap(),
    );
}

#[test]
fn platform_values_round_trip() {
    validate(&shapepack_model::Version::new(1, 2));
    validate(&shapepack_model::Version::with_build(0, 9, 100));
    validate(&shapepack_model::Version::with_revision(10, 0, 3, 7));
    validate(&shapepack_model::Color::rgb(10, 20, 30));
    validate(&shapepack_model::Color::rgba(1, 2, 3, 4));
    validate(&shapepack_model::Point::new(-3, 9));
    validate(&half::f16::from_f32(1.5));
    validate(&half::f16::from_f32(-0.125));
    validate(&rust_decimal::Decimal::new(-12345, 2));
    validate(&rust_decimal::Decimal::MAX);
}

#[test]
fn platform_values_take_their_documented_wire_forms() {
    let serializer = Serializer::default();

    let bytes = serializer
        .serialize(&shapepack_model::Point::new(1, 2))
        .unwrap();
    assert_eq!(bytes.as_ref(), &[0x92, 0x01, 0x02]);

    let bytes = serializer
        .serialize(&shapepack_model::Color::rgb(1, 2, 3))
        .unwrap();
    assert_eq!(bytes.as_ref(), &[0x93, 0x01, 0x02, 0x03]);
    let bytes = serializer
        .serialize(&shapepack_model::Color::rgba(1, 2, 3, 4))
        .unwrap();
    assert_eq!(bytes.as_ref(), &[0x94, 0x01, 0x02, 0x03, 0x04]);

    let bytes = serializer
        .serialize(&shapepack_model::Version::new(1, 2))
        .unwrap();
    assert_eq!(bytes.as_ref(), &[0xa3, b'1', b'.', b'2']);

    // f16 1.5 is 0x3e00; a fixext2 carrying the float16 code.
    let bytes = serializer.serialize(&half::f16::from_f32(1.5)).unwrap();
    assert_eq!(bytes.as_ref(), &[0xd5, 0x07, 0x3e, 0x00]);

    // Decimals normalize before encoding, so trailing zeros do not change the
    // payload.
    let plain = serializer
        .serialize(&rust_decimal::Decimal::new(150, 2))
        .unwrap();
    let padded = serializer
        .serialize(&rust_decimal::Decimal::new(1500, 3))
        .unwrap();
    assert_eq!(plain, padded);
    assert_eq!(plain[0], 0xd8);
    assert_eq!(plain[1] as i8, 0x06);
}

#[test]
fn guid_string_formats_round_trip() {
    let id = uuid::Uuid::new_v4();
    for format in [
        GuidFormat::BinaryExtension,
        GuidFormat::Hyphenated,
        GuidFormat::Simple,
        GuidFormat::Urn,
        GuidFormat::Braced,
    ] {
        let serializer =
            Serializer::new(SerializerOptions::builder().guid_format(format).build());
        validate_on(&serializer, &id);
    }
}

#[test]
fn container_round_trips() {
    validate(&vec![1i64, -5, 1000]);
    validate(&Vec::<String>::new());
    validate(&vec![vec![1i32], vec![2, 3]]);
    validate(&Some(17i32));
    validate(&Option::<i32>::None);
    validate(&(4i32, "pair".to_string()));
    validate(&(1u8, 2i64, "triple".to_string()));

    let mut map = HashMap::new();
    map.insert("first".to_string(), 1i32);
    map.insert("second".to_string(), 2);
    validate(&map);

    let mut tree = BTreeMap::new();
    tree.insert(1i32, "one".to_string());
    tree.insert(2, "two".to_string());
    validate(&tree);
}

#[test]
fn prim_slice_fast_path_matches_the_scalar_loop() {
    let values: Vec<i64> = (-500..500).collect();
    let fast = Serializer::default().serialize(&values).unwrap();
    let slow = Serializer::new(
        SerializerOptions::builder()
            .disable_hardware_acceleration(true)
            .build(),
    )
    .serialize(&values)
    .unwrap();
    assert_eq!(fast, slow);
}

#[test]
fn raw_passthrough_round_trips() {
    let serializer = Serializer::default();
    let raw = RawMsgPack::from_static(&[0x92, 0x01, 0x02]);
    let bytes = serializer.serialize(&raw).unwrap();
    assert_eq!(bytes.as_ref(), &[0x92, 0x01, 0x02]);
    let back: RawMsgPack = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, raw);
}

#[test]
fn surrogate_round_trips_through_its_wire_type() {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(&Celsius(36.6)).unwrap();
    assert_eq!(bytes[0], 0xcb);
    let back: Celsius = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, Celsius(36.6));
}

#[test]
fn dynamic_value_round_trips() {
    validate(&Value::Nil);
    validate(&Value::Boolean(true));
    validate(&Value::Int(-19));
    validate(&Value::UInt(u64::MAX));
    validate(&Value::Float(2.5));
    validate(&Value::text("dynamic"));
    validate(&Value::Data(Blob::from_vec(vec![9, 9])));
    validate(&Value::Timestamp(Timestamp::from_parts(1000, 0).unwrap()));
    validate(&Value::Sequence(vec![Value::Int(1), Value::text("two")]));
    validate(&Value::Map(vec![
        (Value::text("k"), Value::Int(1)),
        (Value::Int(2), Value::Boolean(false)),
    ]));
    validate(&Value::Extension(42, vec![1, 2, 3]));
    validate(&Value::BigInt(BigInt::from(-5)));
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[test]
fn enums_encode_by_ordinal_by_default() {
    let serializer = Serializer::default();
    let bytes = serializer.serialize(&Color::Green).unwrap();
    assert_eq!(bytes.as_ref(), &[0x01]);
    validate_on(&serializer, &Color::Blue);
}

#[test]
fn enums_encode_by_name_when_configured() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .serialize_enum_values_by_name(true)
            .build(),
    );
    let bytes = serializer.serialize(&Color::Green).unwrap();
    assert_eq!(bytes.as_ref(), &[0xa5, b'G', b'r', b'e', b'e', b'n']);
    validate_on(&serializer, &Color::Red);
}

#[test]
fn enum_names_match_case_insensitively() {
    let serializer = Serializer::default();
    let back: Color = serializer
        .deserialize(Bytes::from_static(&[0xa5, b'g', b'r', b'e', b'e', b'n']))
        .unwrap();
    assert_eq!(back, Color::Green);
}

// ---------------------------------------------------------------------------
// Default value policies
// ---------------------------------------------------------------------------

#[test]
fn defaults_are_omitted_when_the_policy_allows() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .serialize_default_values(SerializeDefaults::empty())
            .build(),
    );
    let bytes = serializer.serialize(&Retry::default()).unwrap();
    assert_eq!(bytes.as_ref(), &[0x80]);
    let back: Retry = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, Retry::default());

    let changed = Retry {
        attempts: 5,
        label: Some("manual".to_string()),
    };
    validate_on(&serializer, &changed);
}

#[test]
fn omitted_default_equals_explicit_default() {
    let omitting = Serializer::new(
        SerializerOptions::builder()
            .serialize_default_values(SerializeDefaults::empty())
            .build(),
    );
    let always = Serializer::default();
    let value = Retry::default();
    let from_short: Retry = omitting.deserialize(omitting.serialize(&value).unwrap()).unwrap();
    let from_full: Retry = omitting.deserialize(always.serialize(&value).unwrap()).unwrap();
    assert_eq!(from_short, from_full);
}

#[test]
fn constructor_default_takes_priority_over_the_attribute() {
    let serializer = Serializer::default();
    let back: Port = serializer.deserialize(Bytes::from_static(&[0x80])).unwrap();
    assert_eq!(back, Port { number: 8080 });
}

#[test]
fn value_type_flag_keeps_value_members() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .serialize_default_values(SerializeDefaults::VALUE_TYPES)
            .build(),
    );
    // attempts (a value type) is kept even at its default; label (reference
    // shaped) is dropped.
    let bytes = serializer.serialize(&Retry::default()).unwrap();
    assert_eq!(bytes[0], 0x81);
}

// ---------------------------------------------------------------------------
// Required, nulls, duplicates, unknown keys
// ---------------------------------------------------------------------------

#[test]
fn missing_required_properties_are_all_reported() {
    let serializer = Serializer::default();
    let result: Result<Horse, Failure> = serializer.deserialize(Bytes::from_static(&[0x80]));
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::MissingRequiredProperties(vec![Text::new("Name"), Text::new("Speed")])
        ),
        Ok(_) => panic!("A payload without required properties was accepted."),
    }
}

#[test]
fn missing_required_allowed_by_policy() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .deserialize_default_values(DeserializeDefaults::ALLOW_MISSING_REQUIRED)
            .build(),
    );
    let back: Horse = serializer.deserialize(Bytes::from_static(&[0x80])).unwrap();
    assert_eq!(back.name, "");
    assert_eq!(back.speed, 0);
}

#[test]
fn double_assignment_is_rejected() {
    let serializer = Serializer::default();
    let payload: &[u8] = &[
        0x82, 0xa5, b'S', b'e', b'e', b'd', b's', 0x01, 0xa5, b'S', b'e', b'e', b'd', b's', 0x02,
    ];
    let result: Result<Garden, Failure> = serializer.deserialize(Bytes::from_static(payload));
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::DoublePropertyAssignment(Text::new("Seeds"))
        ),
        Ok(_) => panic!("A doubly assigned member was accepted."),
    }
}

#[test]
fn nil_for_non_nullable_is_rejected() {
    let serializer = Serializer::default();
    let payload: &[u8] = &[0x81, 0xa5, b'S', b'e', b'e', b'd', b's', 0xc0];
    let result: Result<Garden, Failure> = serializer.deserialize(Bytes::from_static(payload));
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::DisallowedNullValue(Text::new("Seeds"))
        ),
        Ok(_) => panic!("Nil was accepted for a non nullable member."),
    }
}

#[test]
fn nil_for_non_nullable_allowed_by_policy() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .deserialize_default_values(DeserializeDefaults::ALLOW_NULL_FOR_NON_NULLABLE)
            .build(),
    );
    let payload: &[u8] = &[0x81, 0xa5, b'S', b'e', b'e', b'd', b's', 0xc0];
    let back: Garden = serializer.deserialize(Bytes::from_static(payload)).unwrap();
    assert_eq!(back, Garden { seeds: 0 });
}

#[test]
fn unknown_keys_are_skipped() {
    let serializer = Serializer::default();
    let payload: &[u8] = &[
        0x82, 0xa7, b'u', b'n', b'k', b'n', b'o', b'w', b'n', 0x92, 0x01, 0x02, 0xa5, b'S', b'e',
        b'e', b'd', b's', 0x12,
    ];
    let back: Garden = serializer.deserialize(Bytes::from_static(payload)).unwrap();
    assert_eq!(back, Garden { seeds: 18 });
}

#[test]
fn unknown_keys_land_in_the_bucket_and_round_trip() {
    let serializer = Serializer::default();
    let payload: &[u8] = &[
        0x82, 0xa2, b'i', b'd', 0x07, 0xa5, b'e', b'x', b't', b'r', b'a', 0x92, 0x01, 0x02,
    ];
    let back: Flexible = serializer.deserialize(Bytes::from_static(payload)).unwrap();
    assert_eq!(back.id, 7);
    assert_eq!(
        back.extra,
        vec![(
            Text::new("extra"),
            Value::Sequence(vec![Value::Int(1), Value::Int(2)])
        )]
    );
    // Captured entries are written back.
    let reserialized = serializer.serialize(&back).unwrap();
    let again: Flexible = serializer.deserialize(reserialized).unwrap();
    assert_eq!(again, back);
}

// ---------------------------------------------------------------------------
// Duck typed unions
// ---------------------------------------------------------------------------

#[test]
fn duck_union_dispatches_by_required_properties() {
    let serializer = Serializer::default();
    let email = Contact::Email(EmailContact {
        address: "a@b.c".to_string(),
    });
    let phone = Contact::Phone(PhoneContact {
        number: "555".to_string(),
    });
    // No discriminator framing on the wire.
    let bytes = serializer.serialize(&email).unwrap();
    assert_eq!(bytes[0], 0x81);
    let back: Contact = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, email);
    validate_on(&serializer, &phone);
}

#[test]
fn duck_union_with_no_match_fails() {
    let serializer = Serializer::default();
    let payload: &[u8] = &[0x81, 0xa1, b'z', 0x01];
    let result: Result<Contact, Failure> = serializer.deserialize(Bytes::from_static(payload));
    match result {
        Err(failure) => assert_eq!(failure.kind(), &ErrorKind::NoUnionMatch),
        Ok(_) => panic!("A payload matching no case was accepted."),
    }
}

// ---------------------------------------------------------------------------
// Wire form configuration
// ---------------------------------------------------------------------------

#[test]
fn naming_policy_rewrites_wire_names() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .property_naming_policy(Arc::new(crate::config::naming::camel_case))
            .build(),
    );
    let bytes = serializer.serialize(&Garden { seeds: 2 }).unwrap();
    assert_eq!(
        bytes.as_ref(),
        &[0x81, 0xa5, b's', b'e', b'e', b'd', b's', 0x02]
    );
    validate_on(&serializer, &Garden { seeds: 2 });
}

#[test]
fn ignore_key_attributes_forces_the_map_form() {
    let serializer = Serializer::new(
        SerializerOptions::builder().ignore_key_attributes(true).build(),
    );
    let bytes = serializer.serialize(&Point { x: 1, y: 2 }).unwrap();
    assert_eq!(bytes[0], 0x82);
    validate_on(&serializer, &Point { x: 1, y: 2 });
}

#[test]
fn perf_over_schema_stability_selects_the_array_form() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .perf_over_schema_stability(true)
            .build(),
    );
    let bytes = serializer.serialize(&Garden { seeds: 18 }).unwrap();
    assert_eq!(bytes.as_ref(), &[0x91, 0x12]);
    validate_on(&serializer, &Garden { seeds: 18 });
}

#[test]
fn multidim_nested_and_flat_layouts() {
    let grid = Grid {
        rows: 2,
        cols: 3,
        data: vec![1, 2, 3, 4, 5, 6],
    };
    let nested = Serializer::default();
    let bytes = nested.serialize(&grid).unwrap();
    assert_eq!(
        bytes.as_ref(),
        &[0x92, 0x93, 0x01, 0x02, 0x03, 0x93, 0x04, 0x05, 0x06]
    );
    validate_on(&nested, &grid);

    let flat = Serializer::new(
        SerializerOptions::builder()
            .multi_dimensional_array_format(MultiDimFormat::Flat)
            .build(),
    );
    let bytes = flat.serialize(&grid).unwrap();
    assert_eq!(
        bytes.as_ref(),
        &[0x98, 0x02, 0x03, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
    );
    validate_on(&flat, &grid);
}

#[test]
fn extension_codes_are_reassignable() {
    let mut codes = shapepack_msgpack::ExtensionCodes::default();
    codes.big_int = 99;
    let serializer =
        Serializer::new(SerializerOptions::builder().extension_codes(codes).build());
    let bytes = serializer.serialize(&BigInt::from(-5)).unwrap();
    assert_eq!(bytes[1] as i8, 99);
    validate_on(&serializer, &BigInt::from(-5));
}

// ---------------------------------------------------------------------------
// Custom converters
// ---------------------------------------------------------------------------

struct BoolAsInt;

impl Converter<bool> for BoolAsInt {
    fn write(
        &self,
        value: &bool,
        writer: &mut shapepack_msgpack::MsgPackWriter<'_>,
        _ctx: &mut crate::context::WriteContext,
    ) -> Result<(), Failure> {
        writer.write_uint(*value as u64);
        Ok(())
    }

    fn read(
        &self,
        input: &mut Bytes,
        _ctx: &mut crate::context::ReadContext,
    ) -> Result<bool, Failure> {
        Ok(shapepack_msgpack::reader::read_uint(input).map_err(Failure::from)? != 0)
    }
}

#[test]
fn registered_converters_win_over_the_builtin_table() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .register_converter::<bool>(Arc::new(BoolAsInt))
            .build(),
    );
    let bytes = serializer.serialize(&true).unwrap();
    assert_eq!(bytes.as_ref(), &[0x01]);
    let back: bool = serializer.deserialize(bytes).unwrap();
    assert!(back);
}

// ---------------------------------------------------------------------------
// References and interning
// ---------------------------------------------------------------------------

#[test]
fn shared_values_deduplicate_within_one_call() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .preserve_references(ReferenceMode::PerCall)
            .build(),
    );
    let garden = Arc::new(Garden { seeds: 7 });
    let pair = vec![garden.clone(), garden];
    let bytes = serializer.serialize(&pair).unwrap();
    let back: Vec<Arc<Garden>> = serializer.deserialize(bytes).unwrap();
    assert_eq!(back.len(), 2);
    assert!(Arc::ptr_eq(&back[0], &back[1]));
    assert_eq!(*back[0], Garden { seeds: 7 });
}

#[test]
fn cross_call_references_span_calls() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .preserve_references(ReferenceMode::CrossCall)
            .build(),
    );
    let garden = Arc::new(Garden { seeds: 9 });
    let first = serializer.serialize(&garden).unwrap();
    let second = serializer.serialize(&garden).unwrap();
    assert_eq!(second.as_ref(), &[0xd4, 0x05, 0x01]);

    let a: Arc<Garden> = serializer.deserialize(first).unwrap();
    let b: Arc<Garden> = serializer.deserialize(second).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[derive(Debug, PartialEq, Clone, Default)]
struct Tagged {
    first: Text,
    second: Text,
}

impl Shaped for Tagged {
    fn build_shape() -> ShapeRef<Self> {
        object_shape(
            "Tagged",
            ObjectShape {
                properties: vec![
                    property::<Tagged, Text>("first", deferred::<Text>())
                        .get(|t| &t.first)
                        .set(|t, v| t.first = v)
                        .build(),
                    property::<Tagged, Text>("second", deferred::<Text>())
                        .get(|t| &t.second)
                        .set(|t, v| t.second = v)
                        .build(),
                ],
                constructor: Constructor::Default {
                    make: Tagged::default,
                },
            },
        )
    }
}

#[test]
fn interned_strings_share_their_allocation() {
    let serializer = Serializer::new(
        SerializerOptions::builder().intern_strings(true).build(),
    );
    let value = Tagged {
        first: Text::new("repeated"),
        second: Text::new("repeated"),
    };
    let bytes = serializer.serialize(&value).unwrap();
    let back: Tagged = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, value);
    assert!(Arc::ptr_eq(back.first.shared(), back.second.shared()));
}

#[test]
fn repeated_strings_become_references_with_both_features_on() {
    let serializer = Serializer::new(
        SerializerOptions::builder()
            .intern_strings(true)
            .preserve_references(ReferenceMode::PerCall)
            .build(),
    );
    let value = Tagged {
        first: Text::new("repeated"),
        second: Text::new("repeated"),
    };
    let bytes = serializer.serialize(&value).unwrap();
    assert_eq!(&bytes[bytes.len() - 3..], &[0xd4, 0x05, 0x01]);
    let back: Tagged = serializer.deserialize(bytes).unwrap();
    assert_eq!(back, value);
}

// ---------------------------------------------------------------------------
// Depth, cancellation, errors
// ---------------------------------------------------------------------------

fn nested_value(depth: usize) -> Value {
    let mut value = Value::Int(1);
    for _ in 0..depth {
        value = Value::Sequence(vec![value]);
    }
    value
}

#[test]
fn depth_cap_fails_the_call() {
    let permissive = Serializer::new(SerializerOptions::builder().max_depth(200).build());
    let deep = nested_value(100);
    let bytes = permissive.serialize(&deep).unwrap();

    let strict = Serializer::default();
    let result: Result<Value, Failure> = strict.deserialize(bytes);
    match result {
        Err(failure) => {
            assert_eq!(failure.kind(), &ErrorKind::DepthExceeded { limit: 64 })
        }
        Ok(_) => panic!("A payload beyond the depth cap was accepted."),
    }
}

#[test]
fn cancellation_before_the_first_byte() {
    let serializer = Serializer::default();
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = serializer.serialize_with(&Garden { seeds: 1 }, &shape_of::<Garden>(), &cancel);
    match result {
        Err(failure) => assert!(failure.is_cancelled()),
        Ok(_) => panic!("A cancelled call produced output."),
    }
    let result: Result<Garden, Failure> =
        serializer.deserialize_with(Bytes::from_static(&[0x80]), &shape_of::<Garden>(), &cancel);
    assert!(matches!(result, Err(f) if f.is_cancelled()));
}

#[test]
fn failures_carry_a_path_breadcrumb() {
    let serializer = Serializer::default();
    let payload: &[u8] = &[0x81, 0xa5, b'S', b'e', b'e', b'd', b's', 0xa1, b'x'];
    let result: Result<Garden, Failure> = serializer.deserialize(Bytes::from_static(payload));
    match result {
        Err(failure) => {
            let rendered = failure.to_string();
            assert!(rendered.contains("Seeds"), "missing path in: {}", rendered);
            assert!(rendered.starts_with("Deserialize"), "missing operation in: {}", rendered);
        }
        Ok(_) => panic!("A mistyped member was accepted."),
    }
}

#[test]
fn schema_fragments_describe_the_wire_form() {
    let serializer = Serializer::default();
    match serializer.schema::<Garden>().unwrap() {
        crate::schema::SchemaNode::Object { properties, .. } => {
            assert_eq!(properties.len(), 1);
            assert_eq!(properties[0].0, Text::new("Seeds"));
        }
        other => panic!("Unexpected schema: {:?}", other),
    }
}

#[test]
fn mixed_key_indexes_are_a_build_error() {
    #[derive(Debug, PartialEq, Clone, Default)]
    struct Mixed {
        a: i32,
        b: i32,
    }
    let shape = object_shape(
        "Mixed",
        ObjectShape {
            properties: vec![
                property::<Mixed, i32>("a", deferred::<i32>())
                    .get(|m| &m.a)
                    .set(|m, v| m.a = v)
                    .key_index(0)
                    .build(),
                property::<Mixed, i32>("b", deferred::<i32>())
                    .get(|m| &m.b)
                    .set(|m, v| m.b = v)
                    .build(),
            ],
            constructor: Constructor::Default {
                make: Mixed::default,
            },
        },
    );
    let serializer = Serializer::default();
    let result = serializer.serialize_with(&Mixed::default(), &shape, &CancelToken::new());
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::Configuration(crate::error::ConfigError::MixedKeyIndexes("Mixed"))
        ),
        Ok(_) => panic!("Mixed key indexing was accepted."),
    }
}

#[test]
fn multiple_unknown_buckets_are_a_build_error() {
    #[derive(Debug, PartialEq, Clone, Default)]
    struct TwoBuckets {
        first: Vec<(Text, Value)>,
        second: Vec<(Text, Value)>,
    }
    let shape = object_shape(
        "TwoBuckets",
        ObjectShape {
            properties: vec![
                bucket_property("first", |t: &TwoBuckets| &t.first, |t, v| t.first = v),
                bucket_property("second", |t: &TwoBuckets| &t.second, |t, v| t.second = v),
            ],
            constructor: Constructor::Default {
                make: TwoBuckets::default,
            },
        },
    );
    let serializer = Serializer::default();
    let result = serializer.serialize_with(&TwoBuckets::default(), &shape, &CancelToken::new());
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::Configuration(crate::error::ConfigError::MultipleUnknownBuckets(
                "TwoBuckets"
            ))
        ),
        Ok(_) => panic!("Two unknown-data buckets were accepted."),
    }
}

#[test]
fn function_shapes_are_rejected() {
    let shape = crate::shape::function_shape::<i32>("callback");
    let serializer = Serializer::default();
    let result = serializer.serialize_with(&1i32, &shape, &CancelToken::new());
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::Configuration(crate::error::ConfigError::UnsupportedShape(
                "callback", "function"
            ))
        ),
        Ok(_) => panic!("A function shape was accepted."),
    }
}

#[test]
fn ambiguous_duck_unions_are_a_build_error() {
    #[derive(Debug, PartialEq, Clone)]
    enum Twin {
        Left(EmailContact),
        Right(EmailContact),
    }
    let shape = union_shape(
        "Twin",
        UnionShape {
            style: UnionStyle::DuckTyped,
            cases: vec![
                union_case(
                    Alias::Int(0),
                    "Left",
                    deferred::<EmailContact>(),
                    |t| match t {
                        Twin::Left(e) => Some(e),
                        _ => None,
                    },
                    Twin::Left,
                ),
                union_case(
                    Alias::Int(1),
                    "Right",
                    deferred::<EmailContact>(),
                    |t| match t {
                        Twin::Right(e) => Some(e),
                        _ => None,
                    },
                    Twin::Right,
                ),
            ],
            base: None,
            case_index: |t| match t {
                Twin::Left(_) => Some(0),
                Twin::Right(_) => Some(1),
            },
        },
    );
    let serializer = Serializer::default();
    let value = Twin::Left(EmailContact {
        address: "a@b.c".to_string(),
    });
    let result = serializer.serialize_with(&value, &shape, &CancelToken::new());
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::Configuration(crate::error::ConfigError::AmbiguousDuckUnion(
                "Twin", "Left", "Right"
            ))
        ),
        Ok(_) => panic!("An ambiguous duck typed union was accepted."),
    }
}

#[test]
fn duplicate_union_aliases_are_a_build_error() {
    #[derive(Debug, PartialEq, Clone)]
    enum Doubled {
        A(Dog),
        B(Dog),
    }
    let shape = union_shape(
        "Doubled",
        UnionShape {
            style: UnionStyle::Discriminated,
            cases: vec![
                union_case(
                    Alias::Int(1),
                    "A",
                    deferred::<Dog>(),
                    |d| match d {
                        Doubled::A(a) => Some(a),
                        _ => None,
                    },
                    Doubled::A,
                ),
                union_case(
                    Alias::Int(1),
                    "B",
                    deferred::<Dog>(),
                    |d| match d {
                        Doubled::B(b) => Some(b),
                        _ => None,
                    },
                    Doubled::B,
                ),
            ],
            base: None,
            case_index: |d| match d {
                Doubled::A(_) => Some(0),
                Doubled::B(_) => Some(1),
            },
        },
    );
    let serializer = Serializer::default();
    let value = Doubled::A(Dog {
        nickname: "Rex".to_string(),
    });
    let result = serializer.serialize_with(&value, &shape, &CancelToken::new());
    match result {
        Err(failure) => assert_eq!(
            failure.kind(),
            &ErrorKind::Configuration(crate::error::ConfigError::DuplicateUnionAlias(
                "1".to_string(),
                "Doubled"
            ))
        ),
        Ok(_) => panic!("Duplicate union aliases were accepted."),
    }
}

#[test]
fn converters_are_cached_per_shape_identity() {
    let serializer = Serializer::default();
    // Two serializations of the same type reuse the cached converter; this mostly
    // guards the identity keyed path against regressions.
    let first = serializer.serialize(&Garden { seeds: 1 }).unwrap();
    let second = serializer.serialize(&Garden { seeds: 1 }).unwrap();
    assert_eq!(first, second);
}

#[test]
fn recursive_shapes_build_through_the_delayed_slot() {
    #[derive(Debug, PartialEq, Clone, Default)]
    struct Chain {
        link: Option<Box<Chain>>,
        weight: i32,
    }

    impl Shaped for Box<Chain> {
        fn build_shape() -> ShapeRef<Self> {
            surrogate_shape(
                "BoxChain",
                SurrogateOf {
                    surrogate: deferred::<Chain>(),
                    marshal: |b: &Box<Chain>| (**b).clone(),
                    unmarshal: Box::new,
                },
            )
        }
    }

    impl Shaped for Chain {
        fn build_shape() -> ShapeRef<Self> {
            object_shape(
                "Chain",
                ObjectShape {
                    properties: vec![
                        property::<Chain, Option<Box<Chain>>>(
                            "link",
                            deferred::<Option<Box<Chain>>>(),
                        )
                        .get(|c| &c.link)
                        .set(|c, v| c.link = v)
                        .build(),
                        property::<Chain, i32>("weight", deferred::<i32>())
                            .get(|c| &c.weight)
                            .set(|c, v| c.weight = v)
                            .build(),
                    ],
                    constructor: Constructor::Default {
                        make: Chain::default,
                    },
                },
            )
        }
    }

    let chain = Chain {
        link: Some(Box::new(Chain {
            link: None,
            weight: 2,
        })),
        weight: 1,
    };
    validate(&chain);
}
