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

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServletStatus {
    Normal,
    Fault,
    Delay,
    Planned,
}

impl Default for ServletStatus {
    fn default() -> Self {
        ServletStatus::Normal
    }
}

/// Top-level tenant.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub app_name: String,
    #[serde(default)]
    pub app_id: i64,
    pub quota: Option<i64>,
    #[serde(default)]
    pub version: u64,
}

/// Scope within an app; key is `(app_name, zone_name)`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ZoneInfo {
    pub zone_name: String,
    pub app_name: String,
    #[serde(default)]
    pub zone_id: i64,
    #[serde(default)]
    pub app_id: i64,
    pub quota: Option<i64>,
    #[serde(default)]
    pub version: u64,
}

/// A named service under a zone; key is `(app_name, zone_name, servlet_name)`.
///
/// Mutable fields are optional so a modify request can carry only the fields
/// it wants to merge.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ServletInfo {
    pub servlet_name: String,
    pub zone_name: String,
    pub app_name: String,
    #[serde(default)]
    pub servlet_id: i64,
    #[serde(default)]
    pub zone_id: i64,
    #[serde(default)]
    pub app_id: i64,
    pub address: Option<String>,
    pub env: Option<String>,
    pub color: Option<String>,
    pub status: Option<ServletStatus>,
    pub deleted: Option<bool>,
    #[serde(default)]
    pub ctime: i64,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub version: u64,
}

/// A live endpoint registered under a servlet, identified by its address.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceInfo {
    /// `host:port`
    pub address: String,
    pub app_name: String,
    pub zone_name: String,
    pub servlet_name: String,
    pub env: Option<String>,
    pub color: Option<String>,
    pub status: Option<ServletStatus>,
    pub weight: Option<i64>,
    #[serde(default)]
    pub version: u64,
}
