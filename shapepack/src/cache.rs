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

//! The shape keyed converter memo. Each slot is either a finished converter or a
//! delayed placeholder installed while a recursive shape is under construction;
//! re-entrant requests for the same shape receive the placeholder, which forwards
//! to the finished converter once the cycle closes.

use crate::builder::{resolve, BuildCx};
use crate::convert::{ConverterRef, DelayedConverter};
use crate::error::ConfigError;
use crate::shape::{ComparerSelector, ShapeRef};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A converter cache key: the shape's identity plus the member comparer selector
/// when one influences construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ShapeKey {
    shape: usize,
    comparer: Option<ComparerSelector>,
}

enum Slot {
    Building(Box<dyn Any + Send + Sync>),
    Ready(Box<dyn Any + Send + Sync>),
}

#[derive(Default)]
pub(crate) struct ConverterCache {
    slots: Mutex<HashMap<ShapeKey, Slot>>,
}

enum Hit<T: 'static> {
    Ready(ConverterRef<T>),
    Delayed(Arc<DelayedConverter<T>>),
    Fresh(Arc<DelayedConverter<T>>),
    /// Another thread is mid-construction for this key; build privately without
    /// touching the cache.
    Foreign,
}

impl ConverterCache {
    pub(crate) fn new() -> Self {
        ConverterCache::default()
    }

    pub(crate) fn get_or_build<T: Send + Sync + 'static>(
        &self,
        shape: &ShapeRef<T>,
        comparer: Option<ComparerSelector>,
        cx: &BuildCx<'_>,
    ) -> Result<ConverterRef<T>, ConfigError> {
        let key = ShapeKey {
            shape: shape.identity(),
            comparer,
        };
        let hit = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Ready(entry)) => Hit::Ready(
                    entry
                        .downcast_ref::<ConverterRef<T>>()
                        .cloned()
                        .ok_or(ConfigError::CacheInconsistency(shape.name))?,
                ),
                Some(Slot::Building(entry)) => {
                    if cx.is_in_progress(&key) {
                        Hit::Delayed(
                            entry
                                .downcast_ref::<Arc<DelayedConverter<T>>>()
                                .cloned()
                                .ok_or(ConfigError::CacheInconsistency(shape.name))?,
                        )
                    } else {
                        Hit::Foreign
                    }
                }
                None => {
                    let delayed = Arc::new(DelayedConverter::<T>::new());
                    slots.insert(key.clone(), Slot::Building(Box::new(delayed.clone())));
                    Hit::Fresh(delayed)
                }
            }
        };
        match hit {
            Hit::Ready(converter) => Ok(converter),
            Hit::Delayed(delayed) => Ok(delayed),
            Hit::Foreign => resolve(shape, cx),
            Hit::Fresh(delayed) => {
                cx.mark_in_progress(key.clone());
                let built = resolve(shape, cx);
                cx.clear_in_progress(&key);
                match built {
                    Ok(converter) => {
                        delayed.complete(converter.clone());
                        self.slots
                            .lock()
                            .insert(key, Slot::Ready(Box::new(converter.clone())));
                        Ok(converter)
                    }
                    Err(error) => {
                        self.slots.lock().remove(&key);
                        Err(error)
                    }
                }
            }
        }
    }
}
