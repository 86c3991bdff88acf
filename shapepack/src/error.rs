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

use crate::shape::Alias;
use shapepack_model::Text;
use shapepack_msgpack::{MsgPackReadError, MsgPackWriteError};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Problems detected while constructing converters from shapes. These indicate a
/// defect in the shape declarations or the configuration rather than in a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Union alias {0} is declared more than once for type '{1}'.")]
    DuplicateUnionAlias(String, &'static str),
    #[error("Type '{0}' mixes members with and without explicit key indexes.")]
    MixedKeyIndexes(&'static str),
    #[error("Type '{0}' declares key index {1} more than once.")]
    DuplicateKeyIndex(&'static str, u32),
    #[error("Type '{0}' declares more than one unknown-data bucket.")]
    MultipleUnknownBuckets(&'static str),
    #[error("Duck typed union cases '{1}' and '{2}' of type '{0}' declare the same required properties.")]
    AmbiguousDuckUnion(&'static str, &'static str, &'static str),
    #[error("Property '{1}' of type '{0}' matches a constructor parameter only by case-insensitive name and the match is ambiguous.")]
    AmbiguousParameterMatch(&'static str, String),
    #[error("Property '{1}' of type '{0}' names a constructor parameter but cannot assign into the constructor state.")]
    ParameterTypeMismatch(&'static str, String),
    #[error("Type '{0}' cannot be used as a dictionary key; only primitive and enum keys are supported.")]
    UnsupportedKeyShape(&'static str),
    #[error("Shapes of kind '{1}' cannot be serialized (type '{0}').")]
    UnsupportedShape(&'static str, &'static str),
    #[error("A custom converter registered for type '{0}' has an incompatible value type.")]
    BadCustomConverter(&'static str),
    #[error("No built-in converter is registered for primitive type '{0}'.")]
    UnknownPrimitive(&'static str),
    #[error("Reference preservation cannot be combined with streaming enumeration.")]
    ReferencesWithStreaming,
    #[error("A runtime union registration for type '{0}' has the wrong shape type.")]
    BadUnionRegistration(&'static str),
    #[error("The converter cache became inconsistent for type '{0}'.")]
    CacheInconsistency(&'static str),
}

/// The semantic classification of a serialization failure.
#[derive(Debug)]
pub enum ErrorKind {
    /// The payload is not valid MessagePack or ended prematurely.
    Codec(MsgPackReadError),
    /// A value exceeded the limits of the MessagePack format.
    Encode(MsgPackWriteError),
    /// The underlying byte stream failed.
    Io(std::io::Error),
    /// The payload is valid MessagePack but does not have the expected structure.
    Structure(Text),
    /// Nesting exceeded the configured maximum depth.
    DepthExceeded { limit: u32 },
    /// Required constructor parameters had no value after the object was consumed.
    MissingRequiredProperties(Vec<Text>),
    /// Nil was read where a non nullable value was expected.
    DisallowedNullValue(Text),
    /// The same member was assigned twice while reading one object.
    DoublePropertyAssignment(Text),
    /// A union discriminator did not match any declared case.
    UnknownUnionDiscriminator(Alias),
    /// A duck typed union payload matched more than one case.
    AmbiguousUnionMatch(Vec<Text>),
    /// A duck typed union payload matched no case.
    NoUnionMatch,
    /// The requested operation is not supported by the shape.
    UnsupportedOperation(Text),
    /// A reference identifier pointed at an object that has not finished decoding.
    ForwardReference(u64),
    /// A reference identifier was never assigned in this call.
    UnknownReference(u64),
    /// The call was cancelled through its cancellation token.
    Cancelled,
    /// Converter construction failed.
    Configuration(ConfigError),
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        use ErrorKind::*;
        match (self, other) {
            (Codec(a), Codec(b)) => a == b,
            (Encode(a), Encode(b)) => a == b,
            (Structure(a), Structure(b)) => a == b,
            (DepthExceeded { limit: a }, DepthExceeded { limit: b }) => a == b,
            (MissingRequiredProperties(a), MissingRequiredProperties(b)) => a == b,
            (DisallowedNullValue(a), DisallowedNullValue(b)) => a == b,
            (DoublePropertyAssignment(a), DoublePropertyAssignment(b)) => a == b,
            (UnknownUnionDiscriminator(a), UnknownUnionDiscriminator(b)) => a == b,
            (AmbiguousUnionMatch(a), AmbiguousUnionMatch(b)) => a == b,
            (NoUnionMatch, NoUnionMatch) => true,
            (UnsupportedOperation(a), UnsupportedOperation(b)) => a == b,
            (ForwardReference(a), ForwardReference(b)) => a == b,
            (UnknownReference(a), UnknownReference(b)) => a == b,
            (Cancelled, Cancelled) => true,
            (Configuration(a), Configuration(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Codec(err) => write!(f, "Invalid MessagePack: {}", err),
            ErrorKind::Encode(err) => write!(f, "{}", err),
            ErrorKind::Io(err) => write!(f, "An error occurred on the byte stream: {}", err),
            ErrorKind::Structure(message) => f.write_str(message.as_str()),
            ErrorKind::DepthExceeded { limit } => {
                write!(f, "Nesting exceeded the maximum depth of {}.", limit)
            }
            ErrorKind::MissingRequiredProperties(names) => {
                write!(f, "Properties [")?;
                let mut it = names.iter();
                if let Some(first) = it.next() {
                    write!(f, "{}", first)?;
                }
                for name in it {
                    write!(f, ", {}", name)?;
                }
                write!(f, "] are required.")
            }
            ErrorKind::DisallowedNullValue(name) => {
                write!(f, "Nil is not permitted for non nullable member '{}'.", name)
            }
            ErrorKind::DoublePropertyAssignment(name) => {
                write!(f, "Member '{}' was assigned more than once.", name)
            }
            ErrorKind::UnknownUnionDiscriminator(alias) => {
                write!(f, "{} does not identify a declared union case.", alias)
            }
            ErrorKind::AmbiguousUnionMatch(names) => {
                write!(f, "The payload matches more than one union case: [")?;
                let mut it = names.iter();
                if let Some(first) = it.next() {
                    write!(f, "{}", first)?;
                }
                for name in it {
                    write!(f, ", {}", name)?;
                }
                write!(f, "].")
            }
            ErrorKind::NoUnionMatch => {
                write!(f, "The payload matches no union case.")
            }
            ErrorKind::UnsupportedOperation(what) => {
                write!(f, "Unsupported operation: {}", what)
            }
            ErrorKind::ForwardReference(id) => {
                write!(f, "Reference {} points at an object that is still being decoded.", id)
            }
            ErrorKind::UnknownReference(id) => {
                write!(f, "Reference {} was never assigned.", id)
            }
            ErrorKind::Cancelled => f.write_str("The call was cancelled."),
            ErrorKind::Configuration(err) => write!(f, "{}", err),
        }
    }
}

/// A step on the path from the top level value to the location of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Property(Text),
    Parameter(Text),
    Case(Text),
    Index(usize),
    Key(Text),
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Property(name) => write!(f, ".{}", name),
            PathSegment::Parameter(name) => write!(f, ".{}", name),
            PathSegment::Case(name) => write!(f, "<{}>", name),
            PathSegment::Index(i) => write!(f, "[{}]", i),
            PathSegment::Key(key) => write!(f, "[\"{}\"]", key),
        }
    }
}

/// The top level operation a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Serialize,
    Deserialize,
    SerializeAsync,
    DeserializeAsync,
    DeserializeStream,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Serialize => f.write_str("Serialize"),
            Operation::Deserialize => f.write_str("Deserialize"),
            Operation::SerializeAsync => f.write_str("Serialize (async)"),
            Operation::DeserializeAsync => f.write_str("Deserialize (async)"),
            Operation::DeserializeStream => f.write_str("Deserialize (stream)"),
        }
    }
}

/// A serialization failure: the semantic error plus a breadcrumb identifying where
/// in the object graph it happened. Segments are recorded innermost first as the
/// error unwinds and printed outermost first.
#[derive(Debug, PartialEq)]
pub struct Failure {
    kind: ErrorKind,
    path: Vec<PathSegment>,
    operation: Option<Operation>,
}

impl Failure {
    pub fn new(kind: ErrorKind) -> Self {
        Failure {
            kind,
            path: Vec::new(),
            operation: None,
        }
    }

    pub fn structure(message: &str) -> Self {
        Failure::new(ErrorKind::Structure(Text::new(message)))
    }

    pub fn unsupported(what: &str) -> Self {
        Failure::new(ErrorKind::UnsupportedOperation(Text::new(what)))
    }

    pub fn cancelled() -> Self {
        Failure::new(ErrorKind::Cancelled)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn path(&self) -> impl Iterator<Item = &PathSegment> {
        self.path.iter().rev()
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Adds the location of the failing child within the reporting converter.
    /// Cancellation is never wrapped.
    pub fn at(mut self, segment: PathSegment) -> Self {
        if !self.is_cancelled() {
            self.path.push(segment);
        }
        self
    }

    /// Attaches the top level operation. Only the facade does this and only once.
    pub(crate) fn in_operation(mut self, operation: Operation) -> Self {
        if !self.is_cancelled() && self.operation.is_none() {
            self.operation = Some(operation);
        }
        self
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(operation) = self.operation {
            write!(f, "{} failed", operation)?;
        } else {
            write!(f, "Failed")?;
        }
        if self.path.is_empty() {
            write!(f, ": {}", self.kind)
        } else {
            write!(f, " at value")?;
            for segment in self.path.iter().rev() {
                write!(f, "{}", segment)?;
            }
            write!(f, ": {}", self.kind)
        }
    }
}

impl std::error::Error for Failure {}

impl From<MsgPackReadError> for Failure {
    fn from(err: MsgPackReadError) -> Self {
        Failure::new(ErrorKind::Codec(err))
    }
}

impl From<MsgPackWriteError> for Failure {
    fn from(err: MsgPackWriteError) -> Self {
        Failure::new(ErrorKind::Encode(err))
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Failure::new(ErrorKind::Io(err))
    }
}

impl From<shapepack_msgpack::stream::FrameError> for Failure {
    fn from(err: shapepack_msgpack::stream::FrameError) -> Self {
        use shapepack_msgpack::stream::FrameError;
        match err {
            FrameError::Syntax(err) => Failure::new(ErrorKind::Codec(err)),
            FrameError::Io(err) => Failure::new(ErrorKind::Io(err)),
            FrameError::Truncated => Failure::new(ErrorKind::Codec(MsgPackReadError::Incomplete)),
        }
    }
}

impl From<ConfigError> for Failure {
    fn from(err: ConfigError) -> Self {
        Failure::new(ErrorKind::Configuration(err))
    }
}
