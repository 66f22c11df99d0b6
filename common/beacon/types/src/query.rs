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

use crate::AppInfo;
use crate::ConfigInfo;
use crate::ConfigVersion;
use crate::ErrCode;
use crate::FlattenPrivilege;
use crate::Reply;
use crate::ServletInfo;
use crate::UserPrivilege;
use crate::ZoneInfo;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryOpType {
    QueryApp,
    QueryZone,
    QueryServlet,
    QueryUserPrivilege,
    QueryPrivilegeFlatten,
    QueryGetConfig,
    QueryListConfig,
    QueryListConfigVersion,
}

/// Read-only queries; answered from the leader's (or any replica's) memory
/// without going through raft.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    pub op_type: QueryOpType,
    pub app_name: Option<String>,
    pub zone_name: Option<String>,
    pub servlet_name: Option<String>,
    pub user_name: Option<String>,
    pub config_name: Option<String>,
    /// `QueryGetConfig` without a version returns the latest one.
    pub config_version: Option<ConfigVersion>,
}

impl QueryRequest {
    pub fn new(op_type: QueryOpType) -> Self {
        Self {
            op_type,
            app_name: None,
            zone_name: None,
            servlet_name: None,
            user_name: None,
            config_name: None,
            config_version: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResponse {
    pub errcode: ErrCode,
    pub errmsg: String,
    #[serde(default)]
    pub leader: String,
    #[serde(default)]
    pub apps: Vec<AppInfo>,
    #[serde(default)]
    pub zones: Vec<ZoneInfo>,
    #[serde(default)]
    pub servlets: Vec<ServletInfo>,
    #[serde(default)]
    pub privileges: Vec<UserPrivilege>,
    #[serde(default)]
    pub flatten_privileges: Vec<FlattenPrivilege>,
    #[serde(default)]
    pub config_infos: Vec<ConfigInfo>,
    #[serde(default)]
    pub config_versions: Vec<ConfigVersion>,
}

impl QueryResponse {
    pub fn success() -> Self {
        Self {
            errcode: ErrCode::Success,
            errmsg: "success".to_string(),
            ..Default::default()
        }
    }

    pub fn error(errcode: ErrCode, errmsg: impl Into<String>) -> Self {
        Self {
            errcode,
            errmsg: errmsg.into(),
            ..Default::default()
        }
    }
}

impl Reply for QueryResponse {
    fn errcode(&self) -> ErrCode {
        self.errcode
    }
    fn leader(&self) -> &str {
        &self.leader
    }
}
