// Copyright 2021 Datafuse Labs.
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

use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;

use common_exception::ErrorCode;
use serde::Deserialize;
use serde::Serialize;

/// A semver triple identifying one version of a named config.
/// Field order gives the lexicographic comparison the version store relies on.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct ConfigVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ConfigVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0
    }
}

impl Display for ConfigVersion {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ConfigVersion {
    type Err = ErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut it = s.split('.');
        let mut next = || -> Result<u32, ErrorCode> {
            let part = it
                .next()
                .ok_or_else(|| ErrorCode::InvalidConfigVersion(format!("expect M.m.p, got: {}", s)))?;
            part.parse::<u32>()
                .map_err(|e| ErrorCode::InvalidConfigVersion(format!("bad version {}: {}", s, e)))
        };

        let v = ConfigVersion {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };

        if it.next().is_some() {
            return Err(ErrorCode::InvalidConfigVersion(format!(
                "expect M.m.p, got: {}",
                s
            )));
        }
        Ok(v)
    }
}
