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

//! The shape directed converter builder. Resolution order per shape: runtime
//! registered custom converters (exact list, then factories), the converter
//! designated on the type itself, the built-in primitive table, then the shape
//! kind; object converters are finally wrapped in a union converter when a
//! runtime union registration applies to the type.

use crate::cache::{ConverterCache, ShapeKey};
use crate::config::{ConverterRequest, SerializerOptions, UnionOverride};
use crate::convert::{object, primitive, union, ConverterRef};
use crate::convert::enums;
use crate::error::ConfigError;
use crate::shape::{ComparerSelector, ShapeKind, ShapeRef, UnionShape};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// The state threaded through one converter construction pass.
pub struct BuildCx<'a> {
    pub(crate) options: &'a SerializerOptions,
    cache: &'a ConverterCache,
    in_progress: RefCell<HashSet<ShapeKey>>,
    comparer: RefCell<Option<ComparerSelector>>,
}

impl<'a> BuildCx<'a> {
    pub(crate) fn new(options: &'a SerializerOptions, cache: &'a ConverterCache) -> Self {
        BuildCx {
            options,
            cache,
            in_progress: RefCell::new(HashSet::new()),
            comparer: RefCell::new(None),
        }
    }

    /// Gets or builds the converter for a shape, against the neutral cache key.
    pub(crate) fn converter<T: Send + Sync + 'static>(
        &self,
        shape: &ShapeRef<T>,
    ) -> Result<ConverterRef<T>, ConfigError> {
        self.converter_keyed(shape, None)
    }

    /// As [`BuildCx::converter`] but cached under a member comparer selector, so
    /// comparer-influenced converters are distinct from neutral ones.
    pub(crate) fn converter_keyed<T: Send + Sync + 'static>(
        &self,
        shape: &ShapeRef<T>,
        comparer: Option<ComparerSelector>,
    ) -> Result<ConverterRef<T>, ConfigError> {
        let previous = self.comparer.replace(comparer.clone());
        let result = self.cache.get_or_build(shape, comparer, self);
        *self.comparer.borrow_mut() = previous;
        result
    }

    /// The seeded hashing selected by the comparer provider for the member
    /// currently being built, if any.
    pub(crate) fn comparer_seed(&self) -> Option<(u64, u64)> {
        let selector = self.comparer.borrow();
        match (selector.as_ref(), &self.options.comparer_provider) {
            (Some(selector), Some(provider)) => provider.seed(selector),
            _ => None,
        }
    }

    pub(crate) fn is_in_progress(&self, key: &ShapeKey) -> bool {
        self.in_progress.borrow().contains(key)
    }

    pub(crate) fn mark_in_progress(&self, key: ShapeKey) {
        self.in_progress.borrow_mut().insert(key);
    }

    pub(crate) fn clear_in_progress(&self, key: &ShapeKey) {
        self.in_progress.borrow_mut().remove(key);
    }
}

fn registered_union<T: 'static>(
    type_name: &'static str,
    registration: &Arc<dyn std::any::Any + Send + Sync>,
) -> Result<Arc<UnionShape<T>>, ConfigError> {
    registration
        .downcast_ref::<Arc<UnionShape<T>>>()
        .cloned()
        .ok_or(ConfigError::BadUnionRegistration(type_name))
}

fn apply_union_override<T: Send + Sync + 'static>(
    type_name: &'static str,
    converter: ConverterRef<T>,
    overridden: Option<&UnionOverride>,
    cx: &BuildCx<'_>,
) -> Result<ConverterRef<T>, ConfigError> {
    match overridden {
        None | Some(UnionOverride::Disable) => Ok(converter),
        Some(UnionOverride::Replace(registration)) => {
            let registered = registered_union::<T>(type_name, registration)?;
            union::build_union(type_name, &registered, Some(converter), cx)
        }
    }
}

/// Constructs the converter for a shape following the documented resolution
/// order. Called through the cache, which provides cycle handling.
pub(crate) fn resolve<T: Send + Sync + 'static>(
    shape: &ShapeRef<T>,
    cx: &BuildCx<'_>,
) -> Result<ConverterRef<T>, ConfigError> {
    let type_id = TypeId::of::<T>();

    for (registered, converter) in &cx.options.converters.exact {
        if *registered == type_id {
            return converter
                .downcast_ref::<ConverterRef<T>>()
                .cloned()
                .ok_or(ConfigError::BadCustomConverter(shape.name));
        }
    }

    let request = ConverterRequest {
        type_id,
        type_name: shape.name,
    };
    for factory in &cx.options.converters.factories {
        if let Some(created) = factory.create(&request) {
            return created
                .downcast::<ConverterRef<T>>()
                .map(|boxed| *boxed)
                .map_err(|_| ConfigError::BadCustomConverter(shape.name));
        }
    }

    if let Some(custom) = &shape.custom_converter {
        return custom
            .resolve::<T>()
            .ok_or(ConfigError::BadCustomConverter(shape.name));
    }

    let overridden = cx.options.unions.lookup(type_id);

    match &shape.kind {
        ShapeKind::Primitive => primitive::builtin_converter::<T>(cx)
            .ok_or(ConfigError::UnknownPrimitive(shape.name)),
        ShapeKind::Object(object) => {
            let converter = object::build_object(shape.name, object, cx)?;
            apply_union_override(shape.name, converter, overridden, cx)
        }
        ShapeKind::Union(declared) => match overridden {
            Some(UnionOverride::Disable) => match &declared.base {
                Some(object) => object::build_object(shape.name, object, cx),
                None => Err(ConfigError::BadUnionRegistration(shape.name)),
            },
            Some(UnionOverride::Replace(registration)) => {
                let registered = registered_union::<T>(shape.name, registration)?;
                let base_override = match (&registered.base, &declared.base) {
                    (None, Some(object)) => {
                        Some(object::build_object(shape.name, object, cx)?)
                    }
                    _ => None,
                };
                union::build_union(shape.name, &registered, base_override, cx)
            }
            None => union::build_union(shape.name, declared, None, cx),
        },
        ShapeKind::Enum(declared) => {
            let converter = enums::build_enum(declared)?;
            apply_union_override(shape.name, converter, overridden, cx)
        }
        ShapeKind::Surrogate(glue) => {
            // Union declarations on a surrogated type cannot be routed
            // consistently; the surrogate's own declarations win.
            if overridden.is_some() {
                warn!(
                    type_name = shape.name,
                    "Union registrations on a surrogated type are ignored; declare the union on the surrogate instead."
                );
            }
            glue.build(cx)
        }
        ShapeKind::Optional(glue)
        | ShapeKind::Enumerable(glue)
        | ShapeKind::Dictionary(glue)
        | ShapeKind::Shared(glue) => {
            let converter = glue.build(cx)?;
            apply_union_override(shape.name, converter, overridden, cx)
        }
        ShapeKind::Function => Err(ConfigError::UnsupportedShape(
            shape.name,
            shape.kind.label(),
        )),
    }
}
