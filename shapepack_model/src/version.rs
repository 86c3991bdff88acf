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

use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A two to four component version number, written as its dotted decimal text.
/// A revision can only be present together with a build number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Version {
            major,
            minor,
            build: None,
            revision: None,
        }
    }

    pub const fn with_build(major: u32, minor: u32, build: u32) -> Self {
        Version {
            major,
            minor,
            build: Some(build),
            revision: None,
        }
    }

    pub const fn with_revision(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Version {
            major,
            minor,
            build: Some(build),
            revision: Some(revision),
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{}", build)?;
            if let Some(revision) = self.revision {
                write!(f, ".{}", revision)?;
            }
        }
        Ok(())
    }
}

/// The error produced when text is not a dotted version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidVersion;

impl Display for InvalidVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("The text is not a version number.")
    }
}

impl std::error::Error for InvalidVersion {}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut components = text.split('.');
        let mut next = || -> Result<Option<u32>, InvalidVersion> {
            match components.next() {
                Some(part) => part.parse().map(Some).map_err(|_| InvalidVersion),
                None => Ok(None),
            }
        };
        let major = next()?.ok_or(InvalidVersion)?;
        let minor = next()?.ok_or(InvalidVersion)?;
        let build = next()?;
        let revision = next()?;
        if components.next().is_some() {
            return Err(InvalidVersion);
        }
        Ok(Version {
            major,
            minor,
            build,
            revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_print_only_their_declared_components() {
        assert_eq!(Version::new(1, 2).to_string(), "1.2");
        assert_eq!(Version::with_build(1, 2, 3).to_string(), "1.2.3");
        assert_eq!(Version::with_revision(1, 2, 3, 4).to_string(), "1.2.3.4");
    }

    #[test]
    fn versions_parse_their_own_output() {
        for version in [
            Version::new(1, 2),
            Version::with_build(0, 9, 100),
            Version::with_revision(10, 0, 3, 7),
        ] {
            assert_eq!(version.to_string().parse(), Ok(version));
        }
        assert_eq!("1".parse::<Version>(), Err(InvalidVersion));
        assert_eq!("1.2.3.4.5".parse::<Version>(), Err(InvalidVersion));
        assert_eq!("1.x".parse::<Version>(), Err(InvalidVersion));
    }
}
