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

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigVersion;

/// Content type tag of a config blob. Doubles as the cache file extension.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigType {
    Json,
    Toml,
    Yaml,
    Xml,
    Text,
    Ini,
    Gflags,
}

impl Default for ConfigType {
    fn default() -> Self {
        ConfigType::Json
    }
}

impl ConfigType {
    pub fn as_ext(&self) -> &'static str {
        match self {
            ConfigType::Json => "json",
            ConfigType::Toml => "toml",
            ConfigType::Yaml => "yaml",
            ConfigType::Xml => "xml",
            ConfigType::Text => "text",
            ConfigType::Ini => "ini",
            ConfigType::Gflags => "gflags",
        }
    }

    pub fn from_ext(ext: &str) -> Option<Self> {
        let t = match ext {
            "json" => ConfigType::Json,
            "toml" => ConfigType::Toml,
            "yaml" => ConfigType::Yaml,
            "xml" => ConfigType::Xml,
            "text" => ConfigType::Text,
            "ini" => ConfigType::Ini,
            "gflags" => ConfigType::Gflags,
            _ => return None,
        };
        Some(t)
    }
}

/// A named, semver-versioned config blob.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigInfo {
    pub name: String,
    pub version: ConfigVersion,
    pub content: String,
    #[serde(default)]
    pub config_type: ConfigType,
    /// Creation time, unix seconds, stamped at apply.
    #[serde(default)]
    pub ctime: i64,
    /// Surrogate id allocated from the per-catalog max-id counter.
    #[serde(default)]
    pub id: u64,
}
