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

//! The built-in shape provider: a process wide registry memoizing one canonical
//! shape per type, so shape identity (the converter cache key) is stable.

use crate::convert::RawMsgPack;
use crate::shape::{
    deferred, dictionary_shape, object_shape, optional_shape, parameterized, primitive_shape,
    property, sequence_shape, shared_shape, MapConstruct, MapOf, ObjectShape, Parameter,
    PrimSliceView, SeqConstruct, SeqOf, ShapeRef,
};
use parking_lot::Mutex;
use shapepack_model::bigint::{BigInt, BigUint};
use shapepack_model::{Blob, Color, Point, Text, Timestamp, Value, Version};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Types with a canonical shape. The engine consumes shapes, it does not discover
/// them; implementing this trait is how a program supplies the metadata for its
/// types.
pub trait Shaped: Sized + Send + Sync + 'static {
    fn build_shape() -> ShapeRef<Self>;
}

static REGISTRY: OnceLock<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> = OnceLock::new();

/// The canonical shape of `T`, built once per process. Always returns the same
/// allocation for the same type, preserving the cache key invariant.
pub fn shape_of<T: Shaped>() -> ShapeRef<T> {
    let registry = REGISTRY.get_or_init(Default::default);
    {
        let entries = registry.lock();
        if let Some(entry) = entries.get(&TypeId::of::<T>()) {
            if let Some(shape) = entry.downcast_ref::<ShapeRef<T>>() {
                return shape.clone();
            }
        }
    }
    // Built outside the lock: building a composite shape looks up its children.
    let built = T::build_shape();
    let mut entries = registry.lock();
    match entries.get(&TypeId::of::<T>()) {
        Some(existing) => match existing.downcast_ref::<ShapeRef<T>>() {
            Some(shape) => shape.clone(),
            None => built,
        },
        None => {
            entries.insert(TypeId::of::<T>(), Box::new(built.clone()));
            built
        }
    }
}

macro_rules! primitive_shaped {
    ($ty:ty, $name:expr, $value_type:expr) => {
        impl Shaped for $ty {
            fn build_shape() -> ShapeRef<Self> {
                primitive_shape($name, $value_type)
            }
        }
    };
}

primitive_shaped!((), "unit", true);
primitive_shaped!(bool, "bool", true);
primitive_shaped!(i8, "i8", true);
primitive_shaped!(i16, "i16", true);
primitive_shaped!(i32, "i32", true);
primitive_shaped!(i64, "i64", true);
primitive_shaped!(i128, "i128", true);
primitive_shaped!(u8, "u8", true);
primitive_shaped!(u16, "u16", true);
primitive_shaped!(u32, "u32", true);
primitive_shaped!(u64, "u64", true);
primitive_shaped!(u128, "u128", true);
primitive_shaped!(f32, "f32", true);
primitive_shaped!(f64, "f64", true);
primitive_shaped!(half::f16, "f16", true);
primitive_shaped!(rust_decimal::Decimal, "Decimal", true);
primitive_shaped!(char, "char", true);
primitive_shaped!(String, "String", false);
primitive_shaped!(Text, "Text", false);
primitive_shaped!(Blob, "Blob", false);
primitive_shaped!(BigInt, "BigInt", false);
primitive_shaped!(BigUint, "BigUint", false);
primitive_shaped!(Timestamp, "Timestamp", true);
primitive_shaped!(chrono::NaiveDateTime, "NaiveDateTime", true);
primitive_shaped!(chrono::NaiveDate, "NaiveDate", true);
primitive_shaped!(chrono::NaiveTime, "NaiveTime", true);
primitive_shaped!(Duration, "Duration", true);
primitive_shaped!(uuid::Uuid, "Uuid", true);
primitive_shaped!(url::Url, "Url", false);
primitive_shaped!(Version, "Version", true);
primitive_shaped!(Color, "Color", true);
primitive_shaped!(Point, "Point", true);
primitive_shaped!(Value, "Value", false);
primitive_shaped!(RawMsgPack, "RawMsgPack", false);

impl<T: Shaped> Shaped for Option<T> {
    fn build_shape() -> ShapeRef<Self> {
        optional_shape("Option", deferred::<T>())
    }
}

/// A view of a vector as a primitive slice, decided by a handful of type checks
/// at write time; the width specialized writer paths then take over.
fn vec_prim_view<E: 'static>(values: &Vec<E>) -> Option<PrimSliceView<'_>> {
    let any: &dyn Any = values;
    if let Some(s) = any.downcast_ref::<Vec<i8>>() {
        return Some(PrimSliceView::I8(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<i16>>() {
        return Some(PrimSliceView::I16(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<i32>>() {
        return Some(PrimSliceView::I32(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<i64>>() {
        return Some(PrimSliceView::I64(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<u8>>() {
        return Some(PrimSliceView::U8(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<u16>>() {
        return Some(PrimSliceView::U16(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<u32>>() {
        return Some(PrimSliceView::U32(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<u64>>() {
        return Some(PrimSliceView::U64(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<f32>>() {
        return Some(PrimSliceView::F32(s));
    }
    if let Some(s) = any.downcast_ref::<Vec<f64>>() {
        return Some(PrimSliceView::F64(s));
    }
    None
}

impl<T: Shaped> Shaped for Vec<T> {
    fn build_shape() -> ShapeRef<Self> {
        sequence_shape(
            "Vec",
            SeqOf {
                element: deferred::<T>(),
                len: Vec::len,
                iter: |values| Box::new(values.iter()),
                construct: SeqConstruct::FromVec(|values| values),
                prim: Some(vec_prim_view::<T>),
            },
        )
    }
}

impl<K, V> Shaped for HashMap<K, V>
where
    K: Shaped + Eq + Hash,
    V: Shaped,
{
    fn build_shape() -> ShapeRef<Self> {
        dictionary_shape(
            "HashMap",
            MapOf {
                key: deferred::<K>(),
                value: deferred::<V>(),
                len: HashMap::len,
                iter: |map| Box::new(map.iter()),
                construct: MapConstruct::Mutable {
                    new: |_settings| HashMap::new(),
                    insert: |map, key, value| {
                        map.insert(key, value);
                    },
                },
            },
        )
    }
}

impl<K, V> Shaped for BTreeMap<K, V>
where
    K: Shaped + Ord,
    V: Shaped,
{
    fn build_shape() -> ShapeRef<Self> {
        dictionary_shape(
            "BTreeMap",
            MapOf {
                key: deferred::<K>(),
                value: deferred::<V>(),
                len: BTreeMap::len,
                iter: |map| Box::new(map.iter()),
                construct: MapConstruct::FromPairs(|pairs| pairs.into_iter().collect()),
            },
        )
    }
}

impl<T: Shaped> Shaped for Arc<T> {
    fn build_shape() -> ShapeRef<Self> {
        shared_shape("Arc", deferred::<T>(), None)
    }
}

impl<A: Shaped, B: Shaped> Shaped for (A, B) {
    fn build_shape() -> ShapeRef<Self> {
        let constructor = parameterized(
            vec![Parameter::required("0", 0), Parameter::required("1", 1)],
            || (None::<A>, None::<B>),
            |state: (Option<A>, Option<B>)| match state {
                (Some(first), Some(second)) => Ok((first, second)),
                _ => Err(Text::new("A tuple element is missing.")),
            },
        );
        object_shape(
            "tuple2",
            ObjectShape {
                properties: vec![
                    property::<Self, A>("0", deferred::<A>())
                        .get(|t| &t.0)
                        .parameter::<(Option<A>, Option<B>)>(|s, v| s.0 = Some(v))
                        .key_index(0)
                        .build(),
                    property::<Self, B>("1", deferred::<B>())
                        .get(|t| &t.1)
                        .parameter::<(Option<A>, Option<B>)>(|s, v| s.1 = Some(v))
                        .key_index(1)
                        .build(),
                ],
                constructor,
            },
        )
    }
}

impl<A: Shaped, B: Shaped, C: Shaped> Shaped for (A, B, C) {
    fn build_shape() -> ShapeRef<Self> {
        let constructor = parameterized(
            vec![
                Parameter::required("0", 0),
                Parameter::required("1", 1),
                Parameter::required("2", 2),
            ],
            || (None::<A>, None::<B>, None::<C>),
            |state: (Option<A>, Option<B>, Option<C>)| match state {
                (Some(first), Some(second), Some(third)) => Ok((first, second, third)),
                _ => Err(Text::new("A tuple element is missing.")),
            },
        );
        object_shape(
            "tuple3",
            ObjectShape {
                properties: vec![
                    property::<Self, A>("0", deferred::<A>())
                        .get(|t| &t.0)
                        .parameter::<(Option<A>, Option<B>, Option<C>)>(|s, v| s.0 = Some(v))
                        .key_index(0)
                        .build(),
                    property::<Self, B>("1", deferred::<B>())
                        .get(|t| &t.1)
                        .parameter::<(Option<A>, Option<B>, Option<C>)>(|s, v| s.1 = Some(v))
                        .key_index(1)
                        .build(),
                    property::<Self, C>("2", deferred::<C>())
                        .get(|t| &t.2)
                        .parameter::<(Option<A>, Option<B>, Option<C>)>(|s, v| s.2 = Some(v))
                        .key_index(2)
                        .build(),
                ],
                constructor,
            },
        )
    }
}
