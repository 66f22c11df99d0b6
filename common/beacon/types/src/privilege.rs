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

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivilegeRw {
    Read,
    Write,
}

/// Per-zone capability grant.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PrivilegeZone {
    pub zone_id: i64,
    pub zone_rw: Option<PrivilegeRw>,
    /// Overwrite the existing grant even when that lowers it.
    #[serde(default)]
    pub force: bool,
}

/// Per-servlet capability grant.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PrivilegeServlet {
    pub zone_id: i64,
    pub servlet_id: i64,
    pub servlet_rw: Option<PrivilegeRw>,
    #[serde(default)]
    pub force: bool,
}

/// One user's privilege record, keyed by username.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserPrivilege {
    pub username: String,
    /// sha2-256 hex digest; never plaintext.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub ip: Vec<String>,
    #[serde(default)]
    pub privilege_zone: Vec<PrivilegeZone>,
    #[serde(default)]
    pub privilege_servlet: Vec<PrivilegeServlet>,
    pub resource_tag: Option<String>,
    #[serde(default)]
    pub version: u64,
}

/// One row of the flattened privilege view: a resource path and the RW the
/// user holds on it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FlattenPrivilege {
    pub username: String,
    pub resource: String,
    pub rw: PrivilegeRw,
}
