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

//! The shape model: a metadata description of a type sufficient to drive generic
//! serialization without per type hand written code. Shapes are data plus typed
//! glue functions, erased behind object safe traits so the converter builder can
//! traverse a heterogeneous shape tree. The identity of a [`ShapeRef`] (its
//! allocation) is the converter cache key, so shapes should be constructed once
//! per type and reused; [`registry::shape_of`] memoizes them per process.

pub mod attrs;
pub mod registry;

use crate::builder::BuildCx;
use crate::convert::object::{PropertyGlue, TypedBucket, TypedProperty};
use crate::convert::union::CaseOf;
use crate::convert::ConverterRef;
use crate::error::{ConfigError, Failure};
use attrs::{CustomConverterSource, MemberAttrs};
use shapepack_model::{Text, Value};
use std::any::{Any, TypeId};
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::sync::Arc;

pub use attrs::ComparerSelector;

/// A discriminator value identifying one union case: either a signed integer or a
/// UTF8 string, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Alias {
    Int(i64),
    Name(Text),
}

impl Alias {
    pub fn name(name: &str) -> Alias {
        Alias::Name(Text::new(name))
    }
}

impl Display for Alias {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Alias::Int(n) => write!(f, "Alias {}", n),
            Alias::Name(name) => write!(f, "Alias '{}'", name),
        }
    }
}

/// A shared, immutable handle to a type shape. Two handles to the same allocation
/// are the same shape; the converter cache is keyed on that identity.
pub struct ShapeRef<T: 'static>(Arc<TypeShape<T>>);

impl<T> Clone for ShapeRef<T> {
    fn clone(&self) -> Self {
        ShapeRef(self.0.clone())
    }
}

impl<T> Deref for ShapeRef<T> {
    type Target = TypeShape<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> ShapeRef<T> {
    pub fn new(shape: TypeShape<T>) -> Self {
        ShapeRef(Arc::new(shape))
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

/// A reference to a child shape, either resolved eagerly or deferred to converter
/// build time. Deferred references break shape level cycles for recursive types:
/// the function is only invoked once the referring shape is fully constructed and
/// memoized.
pub enum ShapeSource<T: 'static> {
    Ready(ShapeRef<T>),
    Deferred(fn() -> ShapeRef<T>),
}

impl<T> Clone for ShapeSource<T> {
    fn clone(&self) -> Self {
        match self {
            ShapeSource::Ready(shape) => ShapeSource::Ready(shape.clone()),
            ShapeSource::Deferred(f) => ShapeSource::Deferred(*f),
        }
    }
}

impl<T> ShapeSource<T> {
    pub fn resolve(&self) -> ShapeRef<T> {
        match self {
            ShapeSource::Ready(shape) => shape.clone(),
            ShapeSource::Deferred(f) => f(),
        }
    }
}

impl<T> From<ShapeRef<T>> for ShapeSource<T> {
    fn from(shape: ShapeRef<T>) -> Self {
        ShapeSource::Ready(shape)
    }
}

/// A deferred reference to the registered shape of `T`.
pub fn deferred<T: registry::Shaped>() -> ShapeSource<T> {
    ShapeSource::Deferred(registry::shape_of::<T>)
}

/// The metadata describing one type.
pub struct TypeShape<T: 'static> {
    pub name: &'static str,
    pub kind: ShapeKind<T>,
    /// Whether members of this type follow the value-type rule of the
    /// default-values policy.
    pub value_type: bool,
    /// The value used when a member of this type is absent from the payload (for
    /// example, [`None`] for optionals).
    pub absent: Option<fn() -> T>,
    /// A custom converter designated on the type itself.
    pub custom_converter: Option<CustomConverterSource>,
}

/// The kinds of shape the builder can traverse, one handler per kind.
pub enum ShapeKind<T: 'static> {
    /// A member of the closed built-in table, keyed by concrete type.
    Primitive,
    Object(ObjectShape<T>),
    Union(UnionShape<T>),
    Enum(EnumShape<T>),
    Optional(Arc<dyn KindGlue<T>>),
    Enumerable(Arc<dyn KindGlue<T>>),
    Dictionary(Arc<dyn KindGlue<T>>),
    Surrogate(Arc<dyn KindGlue<T>>),
    /// Reference semantics (`Arc`); participates in reference preservation.
    Shared(Arc<dyn KindGlue<T>>),
    /// Not representable on the wire; rejected at build time.
    Function,
}

impl<T> ShapeKind<T> {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            ShapeKind::Primitive => "primitive",
            ShapeKind::Object(_) => "object",
            ShapeKind::Union(_) => "union",
            ShapeKind::Enum(_) => "enum",
            ShapeKind::Optional(_) => "optional",
            ShapeKind::Enumerable(_) => "enumerable",
            ShapeKind::Dictionary(_) => "dictionary",
            ShapeKind::Surrogate(_) => "surrogate",
            ShapeKind::Shared(_) => "shared",
            ShapeKind::Function => "function",
        }
    }
}

/// Build hook for the shape kinds that carry typed glue. Implementations live with
/// their converters.
pub trait KindGlue<T: 'static>: Send + Sync {
    fn build(&self, cx: &BuildCx<'_>) -> Result<ConverterRef<T>, ConfigError>;

    /// For optionals: whether the wrapped type follows the value-type rule.
    fn inner_is_value(&self) -> bool {
        false
    }
}

/// Whether a shape's type follows the value-type rule of the default-values
/// policy.
pub(crate) fn is_value_type<T>(shape: &TypeShape<T>) -> bool {
    match &shape.kind {
        ShapeKind::Primitive | ShapeKind::Enum(_) => shape.value_type,
        ShapeKind::Optional(glue) => glue.inner_is_value(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// The shape of an object: named properties and a unique constructor.
pub struct ObjectShape<T: 'static> {
    pub properties: Vec<Property<T>>,
    pub constructor: Constructor<T>,
}

/// A named member of an object shape.
pub struct Property<T: 'static> {
    pub name: &'static str,
    pub attrs: MemberAttrs,
    pub(crate) glue: Arc<dyn PropertyGlue<T>>,
}

/// How instances are produced during deserialization.
pub enum Constructor<T: 'static> {
    /// The shape cannot construct instances; the type is serialize only.
    None,
    /// Default construct, then apply property setters.
    Default { make: fn() -> T },
    /// Accumulate parameters into an opaque argument state, then construct.
    Parameterized {
        params: Vec<Parameter>,
        glue: Arc<dyn CtorGlue<T>>,
    },
}

/// A constructor parameter. Properties are paired with parameters of the same name
/// (case sensitively first, then case insensitively when unambiguous).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: &'static str,
    pub position: u32,
    pub required: bool,
}

impl Parameter {
    pub fn required(name: &'static str, position: u32) -> Self {
        Parameter {
            name,
            position,
            required: true,
        }
    }

    pub fn optional(name: &'static str, position: u32) -> Self {
        Parameter {
            name,
            position,
            required: false,
        }
    }
}

/// Type erased access to a constructor's argument state.
pub trait CtorGlue<T>: Send + Sync {
    fn state_type(&self) -> TypeId;
    fn new_state(&self) -> Box<dyn Any + Send>;
    fn finish(&self, state: Box<dyn Any + Send>) -> Result<T, Failure>;
}

struct CtorOf<T, S> {
    new: fn() -> S,
    finish: fn(S) -> Result<T, Text>,
}

impl<T, S: Any + Send> CtorGlue<T> for CtorOf<T, S>
where
    T: 'static,
    S: 'static,
{
    fn state_type(&self) -> TypeId {
        TypeId::of::<S>()
    }

    fn new_state(&self) -> Box<dyn Any + Send> {
        Box::new((self.new)())
    }

    fn finish(&self, state: Box<dyn Any + Send>) -> Result<T, Failure> {
        match state.downcast::<S>() {
            Ok(state) => (self.finish)(*state)
                .map_err(|message| Failure::new(crate::error::ErrorKind::Structure(message))),
            Err(_) => Err(Failure::structure(
                "The constructor state had the wrong type.",
            )),
        }
    }
}

/// Builds a parameterized constructor from a typed argument state. `finish` may
/// fail when the state cannot produce an instance (for example a required slot
/// left empty under a permissive missing-values policy).
pub fn parameterized<T, S>(
    params: Vec<Parameter>,
    new: fn() -> S,
    finish: fn(S) -> Result<T, Text>,
) -> Constructor<T>
where
    T: 'static,
    S: Any + Send + Sync + 'static,
{
    Constructor::Parameterized {
        params,
        glue: Arc::new(CtorOf { new, finish }),
    }
}

/// How a member's value is obtained from its owner: by reference for plain
/// fields, by value for fields behind locks or computed members.
pub(crate) enum Getter<T, P> {
    Ref(fn(&T) -> &P),
    Owned(fn(&T) -> P),
}

impl<T, P> Clone for Getter<T, P> {
    fn clone(&self) -> Self {
        match self {
            Getter::Ref(f) => Getter::Ref(*f),
            Getter::Owned(f) => Getter::Owned(*f),
        }
    }
}

/// An erased assignment of a decoded value into a constructor argument state.
pub(crate) struct ErasedAssign<P> {
    pub(crate) state_type: TypeId,
    pub(crate) apply: Arc<dyn Fn(&mut (dyn Any + Send), P) -> bool + Send + Sync>,
}

impl<P> Clone for ErasedAssign<P> {
    fn clone(&self) -> Self {
        ErasedAssign {
            state_type: self.state_type,
            apply: self.apply.clone(),
        }
    }
}

/// The declared default of a member, with the equality used to compare against it.
pub(crate) trait DefaultValue<P>: Send + Sync {
    fn produce(&self) -> P;
    fn matches(&self, other: &P) -> bool;
}

struct DefaultSpec<P>(P);

impl<P: Clone + PartialEq + Send + Sync> DefaultValue<P> for DefaultSpec<P> {
    fn produce(&self) -> P {
        self.0.clone()
    }

    fn matches(&self, other: &P) -> bool {
        self.0 == *other
    }
}

/// Starts a property declaration for a member of type `P`.
pub fn property<T, P>(
    name: &'static str,
    shape: impl Into<ShapeSource<P>>,
) -> PropertyBuilder<T, P>
where
    T: 'static,
    P: 'static,
{
    PropertyBuilder {
        name,
        shape: shape.into(),
        get: None,
        set: None,
        set_shared: None,
        param: None,
        ctor_default: None,
        attr_default: None,
        should: None,
        attrs: MemberAttrs::default(),
    }
}

/// A typed, fluent property declaration. `build` erases the types.
pub struct PropertyBuilder<T: 'static, P: 'static> {
    name: &'static str,
    shape: ShapeSource<P>,
    get: Option<Getter<T, P>>,
    set: Option<fn(&mut T, P)>,
    set_shared: Option<fn(&T, P)>,
    param: Option<ErasedAssign<P>>,
    ctor_default: Option<Arc<dyn DefaultValue<P>>>,
    attr_default: Option<Arc<dyn DefaultValue<P>>>,
    should: Option<fn(&T) -> bool>,
    attrs: MemberAttrs,
}

impl<T: 'static, P: 'static> PropertyBuilder<T, P> {
    pub fn get(mut self, f: fn(&T) -> &P) -> Self {
        self.get = Some(Getter::Ref(f));
        self
    }

    /// A getter producing the value by clone or computation, for members that
    /// cannot hand out a reference (fields behind locks, derived values).
    pub fn get_with(mut self, f: fn(&T) -> P) -> Self {
        self.get = Some(Getter::Owned(f));
        self
    }

    pub fn set(mut self, f: fn(&mut T, P)) -> Self {
        self.set = Some(f);
        self
    }

    /// A setter working through interior mutability, enabling cycle capable reads
    /// for shared shapes.
    pub fn set_shared(mut self, f: fn(&T, P)) -> Self {
        self.set_shared = Some(f);
        self
    }

    /// Routes this property into the argument state of a parameterized
    /// constructor. The property must have the same name as a declared parameter.
    pub fn parameter<S>(mut self, f: fn(&mut S, P)) -> Self
    where
        S: Any + Send + 'static,
        P: Send + Sync,
    {
        self.param = Some(ErasedAssign {
            state_type: TypeId::of::<S>(),
            apply: Arc::new(move |state: &mut (dyn Any + Send), value: P| {
                match state.downcast_mut::<S>() {
                    Some(state) => {
                        f(state, value);
                        true
                    }
                    None => false,
                }
            }),
        });
        self
    }

    /// The default declared by the constructor. Takes priority over the attribute
    /// default.
    pub fn ctor_default(mut self, value: P) -> Self
    where
        P: Clone + PartialEq + Send + Sync,
    {
        self.ctor_default = Some(Arc::new(DefaultSpec(value)));
        self
    }

    /// The default declared by an attribute on the member.
    pub fn attr_default(mut self, value: P) -> Self
    where
        P: Clone + PartialEq + Send + Sync,
    {
        self.attr_default = Some(Arc::new(DefaultSpec(value)));
        self
    }

    pub fn should_serialize(mut self, f: fn(&T) -> bool) -> Self {
        self.should = Some(f);
        self
    }

    pub fn attrs(mut self, attrs: MemberAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn key_index(mut self, index: u32) -> Self {
        self.attrs.key_index = Some(index);
        self
    }

    pub fn wire_name(mut self, name: &str) -> Self {
        self.attrs.wire_name = Some(Text::new(name));
        self
    }

    pub fn build(self) -> Property<T>
    where
        T: Send + Sync,
        P: Send + Sync,
    {
        let PropertyBuilder {
            name,
            shape,
            get,
            set,
            set_shared,
            param,
            ctor_default,
            attr_default,
            should,
            attrs,
        } = self;
        Property {
            name,
            attrs,
            glue: Arc::new(TypedProperty {
                shape,
                get,
                set,
                set_shared,
                param,
                default: ctor_default.or(attr_default),
                should,
            }),
        }
    }
}

/// Declares the member that captures map entries with unknown keys. Its value type
/// is fixed as `Vec<(Text, Value)>`; captured entries are written back on
/// serialization.
pub fn bucket_property<T>(
    name: &'static str,
    get: fn(&T) -> &Vec<(Text, Value)>,
    set: fn(&mut T, Vec<(Text, Value)>),
) -> Property<T>
where
    T: Send + Sync + 'static,
{
    let mut attrs = MemberAttrs::default();
    attrs.unknown_bucket = true;
    Property {
        name,
        attrs,
        glue: Arc::new(TypedBucket {
            get: Some(get),
            set: Some(set),
            param: None,
        }),
    }
}

/// As [`bucket_property`] but routing into a parameterized constructor state.
pub fn bucket_parameter<T, S>(
    name: &'static str,
    get: fn(&T) -> &Vec<(Text, Value)>,
    assign: fn(&mut S, Vec<(Text, Value)>),
) -> Property<T>
where
    T: Send + Sync + 'static,
    S: Any + Send + 'static,
{
    let mut attrs = MemberAttrs::default();
    attrs.unknown_bucket = true;
    Property {
        name,
        attrs,
        glue: Arc::new(TypedBucket {
            get: Some(get),
            set: None,
            param: Some(ErasedAssign {
                state_type: TypeId::of::<S>(),
                apply: Arc::new(move |state: &mut (dyn Any + Send), value| {
                    match state.downcast_mut::<S>() {
                        Some(state) => {
                            assign(state, value);
                            true
                        }
                        None => false,
                    }
                }),
            }),
        }),
    }
}

// ---------------------------------------------------------------------------
// Unions
// ---------------------------------------------------------------------------

/// How union payloads identify their case on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnionStyle {
    /// An explicit discriminator precedes the payload.
    #[default]
    Discriminated,
    /// No discriminator; the case is inferred from required property names.
    /// Experimental.
    DuckTyped,
}

/// A polymorphic base type with a closed set of declared cases, ordered most
/// derived first.
pub struct UnionShape<T: 'static> {
    pub style: UnionStyle,
    pub cases: Vec<UnionCase<T>>,
    /// The base type's own object shape, reached through the implicit nil alias.
    pub base: Option<Arc<ObjectShape<T>>>,
    /// Maps a value to the index of its case in `cases`; [`None`] selects the
    /// base.
    pub case_index: fn(&T) -> Option<usize>,
}

/// One declared case of a union.
pub struct UnionCase<T: 'static> {
    pub alias: Alias,
    pub name: &'static str,
    pub(crate) glue: Arc<dyn CaseGlue<T>>,
}

/// Build hook for a union case; implementations live with the union converter.
pub(crate) trait CaseGlue<T>: Send + Sync {
    fn build(&self, cx: &BuildCx<'_>) -> Result<Box<dyn crate::convert::union::CaseSlot<T>>, ConfigError>;

    /// The names of the case's required constructor parameters, used by duck typed
    /// matching.
    fn required_names(&self) -> Vec<&'static str>;
}

/// Declares a union case of payload type `C`.
pub fn union_case<T, C>(
    alias: Alias,
    name: &'static str,
    shape: impl Into<ShapeSource<C>>,
    project: for<'a> fn(&'a T) -> Option<&'a C>,
    inject: fn(C) -> T,
) -> UnionCase<T>
where
    T: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    UnionCase {
        alias,
        name,
        glue: Arc::new(CaseOf {
            shape: shape.into(),
            project,
            inject,
        }),
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The shape of a unitary enumeration.
pub struct EnumShape<T: 'static> {
    pub members: Vec<EnumMember>,
    pub to_ordinal: fn(&T) -> i64,
    pub from_ordinal: fn(i64) -> Option<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: &'static str,
    pub value: i64,
}

// ---------------------------------------------------------------------------
// Typed glue for the remaining kinds
// ---------------------------------------------------------------------------

/// Glue for `Option<U>`.
pub struct OptionalOf<U: 'static> {
    pub(crate) inner: ShapeSource<U>,
}

/// A view of a sequence as a slice of fixed width primitives, enabling the width
/// specialized writer fast paths.
pub enum PrimSliceView<'a> {
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

/// The construction strategies a sequence shape can expose.
pub enum SeqConstruct<T: 'static, E: 'static> {
    /// Serialize only.
    None,
    /// Default construct and append.
    Mutable { new: fn() -> T, push: fn(&mut T, E) },
    /// Construct from the complete element list.
    FromVec(fn(Vec<E>) -> T),
}

/// Glue for single rank enumerables.
pub struct SeqOf<T: 'static, E: 'static> {
    pub element: ShapeSource<E>,
    pub len: fn(&T) -> usize,
    pub iter: for<'a> fn(&'a T) -> Box<dyn Iterator<Item = &'a E> + Send + 'a>,
    pub construct: SeqConstruct<T, E>,
    /// When the element type is a fixed width primitive, a view of the whole
    /// sequence as a slice.
    pub prim: Option<for<'a> fn(&'a T) -> Option<PrimSliceView<'a>>>,
}

/// Glue for rank >= 2 enumerables, exposed in row major order.
pub struct MultiDimOf<T: 'static, E: 'static> {
    pub element: ShapeSource<E>,
    pub rank: u32,
    pub dims: fn(&T) -> Vec<usize>,
    pub iter: for<'a> fn(&'a T) -> Box<dyn Iterator<Item = &'a E> + Send + 'a>,
    pub from_flat: fn(Vec<usize>, Vec<E>) -> Result<T, Text>,
}

/// Settings handed to dictionary constructors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictSettings {
    /// Seeded hashing selected through the comparer provider, if any.
    pub seed: Option<(u64, u64)>,
}

/// The construction strategies a dictionary shape can expose.
pub enum MapConstruct<T: 'static, K: 'static, V: 'static> {
    None,
    Mutable {
        new: fn(&DictSettings) -> T,
        insert: fn(&mut T, K, V),
    },
    FromPairs(fn(Vec<(K, V)>) -> T),
}

/// Glue for dictionaries.
pub struct MapOf<T: 'static, K: 'static, V: 'static> {
    pub key: ShapeSource<K>,
    pub value: ShapeSource<V>,
    pub len: fn(&T) -> usize,
    pub iter: for<'a> fn(&'a T) -> Box<dyn Iterator<Item = (&'a K, &'a V)> + Send + 'a>,
    pub construct: MapConstruct<T, K, V>,
}

/// Glue for surrogate routing: every read and write of `T` goes through the
/// surrogate type `S`. Null identity is carried by the optional kind wrapping, so
/// the pair itself is total.
pub struct SurrogateOf<T: 'static, S: 'static> {
    pub surrogate: ShapeSource<S>,
    pub marshal: fn(&T) -> S,
    pub unmarshal: fn(S) -> T,
}

/// Glue for `Arc<T>` reference semantics. With `make` provided and an inner object
/// whose mutable properties all have shared setters, reads are cycle capable: the
/// allocation is registered before its body is decoded.
pub struct SharedOf<T: 'static> {
    pub inner: ShapeSource<T>,
    pub make: Option<fn() -> Arc<T>>,
}

// ---------------------------------------------------------------------------
// Shape constructors
// ---------------------------------------------------------------------------

fn base_shape<T>(name: &'static str, kind: ShapeKind<T>) -> TypeShape<T> {
    TypeShape {
        name,
        kind,
        value_type: false,
        absent: None,
        custom_converter: None,
    }
}

pub fn primitive_shape<T>(name: &'static str, value_type: bool) -> ShapeRef<T> {
    let mut shape = base_shape(name, ShapeKind::Primitive);
    shape.value_type = value_type;
    ShapeRef::new(shape)
}

pub fn object_shape<T>(name: &'static str, object: ObjectShape<T>) -> ShapeRef<T> {
    ShapeRef::new(base_shape(name, ShapeKind::Object(object)))
}

pub fn union_shape<T>(name: &'static str, union: UnionShape<T>) -> ShapeRef<T> {
    ShapeRef::new(base_shape(name, ShapeKind::Union(union)))
}

pub fn enum_shape<T>(name: &'static str, shape: EnumShape<T>) -> ShapeRef<T> {
    let mut shape = base_shape(name, ShapeKind::Enum(shape));
    shape.value_type = true;
    ShapeRef::new(shape)
}

pub fn optional_shape<U>(
    name: &'static str,
    inner: impl Into<ShapeSource<U>>,
) -> ShapeRef<Option<U>>
where
    U: Send + Sync + 'static,
{
    let mut shape = base_shape(
        name,
        ShapeKind::Optional(Arc::new(OptionalOf {
            inner: inner.into(),
        })),
    );
    shape.absent = Some(|| None);
    ShapeRef::new(shape)
}

pub fn sequence_shape<T, E>(name: &'static str, seq: SeqOf<T, E>) -> ShapeRef<T>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    ShapeRef::new(base_shape(name, ShapeKind::Enumerable(Arc::new(seq))))
}

pub fn multidim_shape<T, E>(name: &'static str, multi: MultiDimOf<T, E>) -> ShapeRef<T>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    ShapeRef::new(base_shape(name, ShapeKind::Enumerable(Arc::new(multi))))
}

pub fn dictionary_shape<T, K, V>(name: &'static str, map: MapOf<T, K, V>) -> ShapeRef<T>
where
    T: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    ShapeRef::new(base_shape(name, ShapeKind::Dictionary(Arc::new(map))))
}

pub fn surrogate_shape<T, S>(name: &'static str, surrogate: SurrogateOf<T, S>) -> ShapeRef<T>
where
    T: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    ShapeRef::new(base_shape(name, ShapeKind::Surrogate(Arc::new(surrogate))))
}

pub fn shared_shape<T>(
    name: &'static str,
    inner: impl Into<ShapeSource<T>>,
    make: Option<fn() -> Arc<T>>,
) -> ShapeRef<Arc<T>>
where
    T: Send + Sync + 'static,
{
    ShapeRef::new(base_shape(
        name,
        ShapeKind::Shared(Arc::new(SharedOf {
            inner: inner.into(),
            make,
        })),
    ))
}

pub fn function_shape<T>(name: &'static str) -> ShapeRef<T> {
    ShapeRef::new(base_shape(name, ShapeKind::Function))
}
