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

use crate::config::SerializerOptions;
use crate::error::{ErrorKind, Failure};
use parking_lot::Mutex;
use shapepack_model::Text;
use std::any::Any;
use std::collections::HashMap;
use std::str::Utf8Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A cancellation signal shared between a caller and an in-flight call. Converters
/// check the flag at every state boundary; async drivers additionally check before
/// each suspension.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A weak intern table for decoded strings, keyed by UTF8 contents. Lives as long
/// as its serializer; entries die with the last strong reference to the text.
#[derive(Default)]
pub struct Interner {
    table: Mutex<HashMap<Box<[u8]>, Weak<str>>>,
}

const PURGE_THRESHOLD: usize = 1024;

impl Interner {
    /// Looks the bytes up in the table before allocating; on a miss the new text is
    /// recorded under a weak reference.
    pub fn intern(&self, bytes: &[u8]) -> Result<Text, Utf8Error> {
        let mut table = self.table.lock();
        if let Some(existing) = table.get(bytes).and_then(Weak::upgrade) {
            return Ok(Text::from(existing));
        }
        let content = std::str::from_utf8(bytes)?;
        let shared: Arc<str> = Arc::from(content);
        if table.len() >= PURGE_THRESHOLD {
            table.retain(|_, w| w.strong_count() > 0);
        }
        table.insert(bytes.into(), Arc::downgrade(&shared));
        Ok(Text::from(shared))
    }
}

/// Whether an identity has been seen before in the current call.
pub(crate) enum Seen {
    First(u64),
    Again(u64),
}

/// Write side reference tracking: object identities (by pointer) and emitted string
/// contents, sharing one identifier sequence. Identifiers are assigned from 1 in
/// first occurrence order.
#[derive(Default)]
pub(crate) struct RefWriteState {
    objects: HashMap<usize, u64>,
    strings: HashMap<Box<[u8]>, u64>,
    next: u64,
}

impl RefWriteState {
    fn assign(next: &mut u64) -> u64 {
        *next += 1;
        *next
    }

    pub(crate) fn note_object(&mut self, ptr: usize) -> Seen {
        if let Some(id) = self.objects.get(&ptr) {
            Seen::Again(*id)
        } else {
            let id = Self::assign(&mut self.next);
            self.objects.insert(ptr, id);
            Seen::First(id)
        }
    }

    pub(crate) fn note_string(&mut self, bytes: &[u8]) -> Seen {
        if let Some(id) = self.strings.get(bytes) {
            Seen::Again(*id)
        } else {
            let id = Self::assign(&mut self.next);
            self.strings.insert(bytes.into(), id);
            Seen::First(id)
        }
    }
}

/// Read side reference tracking. A slot is reserved when the first byte of an
/// object is seen and fulfilled when the object completes, so identifier order
/// matches the writer even for nested first occurrences.
#[derive(Default)]
pub(crate) struct RefReadState {
    entries: Vec<Option<Box<dyn Any + Send + Sync>>>,
}

impl RefReadState {
    pub(crate) fn reserve(&mut self) -> u64 {
        self.entries.push(None);
        self.entries.len() as u64
    }

    pub(crate) fn fulfill(&mut self, id: u64, value: Box<dyn Any + Send + Sync>) {
        if let Some(slot) = self.entries.get_mut((id - 1) as usize) {
            *slot = Some(value);
        }
    }

    pub(crate) fn resolve(&self, id: u64) -> Result<&(dyn Any + Send + Sync), Failure> {
        let index = match id.checked_sub(1) {
            Some(i) => i as usize,
            None => return Err(Failure::new(ErrorKind::UnknownReference(id))),
        };
        match self.entries.get(index) {
            Some(Some(value)) => Ok(value.as_ref()),
            Some(None) => Err(Failure::new(ErrorKind::ForwardReference(id))),
            None => Err(Failure::new(ErrorKind::UnknownReference(id))),
        }
    }
}

/// Per call state threaded through every write. Created at each top level call and
/// destroyed at return (reference state may outlive the call in cross call mode,
/// managed by the facade).
pub struct WriteContext {
    pub(crate) options: Arc<SerializerOptions>,
    cancel: CancelToken,
    depth: u32,
    pub(crate) refs: Option<RefWriteState>,
}

impl WriteContext {
    pub(crate) fn new(
        options: Arc<SerializerOptions>,
        cancel: CancelToken,
        refs: Option<RefWriteState>,
    ) -> Self {
        WriteContext {
            options,
            cancel,
            depth: 0,
            refs,
        }
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Enters a nested converter, accounting for depth and checking cancellation.
    pub fn enter(&mut self) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        let limit = self.options.starting_context.max_depth;
        if self.depth >= limit {
            return Err(Failure::new(ErrorKind::DepthExceeded { limit }));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn refs_mut(&mut self) -> Option<&mut RefWriteState> {
        self.refs.as_mut()
    }

    /// String re-emission suppression requires both reference preservation and
    /// interning to be on.
    pub(crate) fn dedup_strings(&self) -> bool {
        self.refs.is_some() && self.options.intern_strings
    }

    pub(crate) fn take_refs(&mut self) -> Option<RefWriteState> {
        self.refs.take()
    }
}

/// Per call state threaded through every read.
pub struct ReadContext {
    pub(crate) options: Arc<SerializerOptions>,
    cancel: CancelToken,
    depth: u32,
    pub(crate) refs: Option<RefReadState>,
    pub(crate) interner: Option<Arc<Interner>>,
}

impl ReadContext {
    pub(crate) fn new(
        options: Arc<SerializerOptions>,
        cancel: CancelToken,
        refs: Option<RefReadState>,
        interner: Option<Arc<Interner>>,
    ) -> Self {
        ReadContext {
            options,
            cancel,
            depth: 0,
            refs,
            interner,
        }
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    pub fn enter(&mut self) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::cancelled());
        }
        let limit = self.options.starting_context.max_depth;
        if self.depth >= limit {
            return Err(Failure::new(ErrorKind::DepthExceeded { limit }));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn refs_mut(&mut self) -> Option<&mut RefReadState> {
        self.refs.as_mut()
    }

    pub(crate) fn dedup_strings(&self) -> bool {
        self.refs.is_some() && self.options.intern_strings
    }

    pub(crate) fn take_refs(&mut self) -> Option<RefReadState> {
        self.refs.take()
    }

    /// Builds a [`Text`] from decoded UTF8 bytes, consulting the intern table when
    /// interning is enabled.
    pub fn make_text(&self, bytes: &[u8]) -> Result<Text, Failure> {
        match &self.interner {
            Some(interner) if self.options.intern_strings => interner
                .intern(bytes)
                .map_err(|e| Failure::from(shapepack_msgpack::MsgPackReadError::StringDecode(e))),
            _ => {
                let content = std::str::from_utf8(bytes).map_err(|e| {
                    Failure::from(shapepack_msgpack::MsgPackReadError::StringDecode(e))
                })?;
                Ok(Text::new(content))
            }
        }
    }
}
