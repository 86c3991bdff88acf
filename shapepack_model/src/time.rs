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

use chrono::{DateTime, TimeZone, Utc};
use std::fmt::{Display, Formatter};

/// An instant in time, held in UTC. On the wire this is the standard MessagePack
/// timestamp extension (type code `-1`).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Ord, PartialOrd, Hash)]
pub struct Timestamp(DateTime<Utc>);

/// How a date-time without an explicit offset should be interpreted. Values carrying
/// this distinction record it out of band; the engine's configuration supplies the
/// assumed kind for ambiguous inputs.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum TimestampKind {
    #[default]
    Utc,
    Local,
    Unspecified,
}

impl AsRef<DateTime<Utc>> for Timestamp {
    fn as_ref(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<TZ> From<DateTime<TZ>> for Timestamp
where
    TZ: TimeZone,
{
    fn from(dt: DateTime<TZ>) -> Self {
        Timestamp(dt.with_timezone(&Utc))
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl Timestamp {
    /// Returns a new timestamp representing the current instant.
    pub fn now() -> Timestamp {
        Timestamp(Utc::now())
    }

    /// Builds a timestamp from whole seconds and a sub-second nanosecond component.
    /// Returns [`None`] if the pair is outside the representable range.
    pub fn from_parts(seconds: i64, subsec_nanos: u32) -> Option<Timestamp> {
        Utc.timestamp_opt(seconds, subsec_nanos)
            .single()
            .map(Timestamp)
    }

    /// Whole seconds since January 1, 1970 UTC.
    pub fn seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// The sub-second component in nanoseconds.
    pub fn subsec_nanos(&self) -> u32 {
        self.0.timestamp_subsec_nanos()
    }
}
