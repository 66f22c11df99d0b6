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

use async_raft::AppData;
use async_raft::AppDataResponse;
use serde::Deserialize;
use serde::Serialize;

use crate::AppInfo;
use crate::ConfigInfo;
use crate::ErrCode;
use crate::InstanceInfo;
use crate::Reply;
use crate::ServletInfo;
use crate::UserPrivilege;
use crate::ZoneInfo;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpType {
    CreateApp,
    DropApp,
    ModifyApp,
    CreateZone,
    DropZone,
    ModifyZone,
    CreateServlet,
    DropServlet,
    ModifyServlet,
    CreateConfig,
    RemoveConfig,
    AddInstance,
    DropInstance,
    UpdateInstance,
    CreateUser,
    DropUser,
    AddPrivilege,
    DropPrivilege,
    AddIdForAutoIncrement,
    DropIdForAutoIncrement,
    GenIdForAutoIncrement,
    UpdateForAutoIncrement,
}

impl OpType {
    pub fn is_auto_increment(&self) -> bool {
        matches!(
            self,
            OpType::AddIdForAutoIncrement
                | OpType::DropIdForAutoIncrement
                | OpType::GenIdForAutoIncrement
                | OpType::UpdateForAutoIncrement
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AutoIncrementInfo {
    pub servlet_id: i64,
    pub start_id: Option<u64>,
    #[serde(default)]
    pub count: u64,
    pub increment_id: Option<u64>,
    #[serde(default)]
    pub force: bool,
}

/// Every mutation of the catalog and id-allocator groups. The request is
/// serialized verbatim into the raft log; `apply` re-validates it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManagerRequest {
    pub op_type: OpType,
    pub app: Option<AppInfo>,
    pub zone: Option<ZoneInfo>,
    pub servlet: Option<ServletInfo>,
    pub instance: Option<InstanceInfo>,
    pub config: Option<ConfigInfo>,
    pub privilege: Option<UserPrivilege>,
    pub auto_increment: Option<AutoIncrementInfo>,
}

impl ManagerRequest {
    pub fn new(op_type: OpType) -> Self {
        Self {
            op_type,
            app: None,
            zone: None,
            servlet: None,
            instance: None,
            config: None,
            privilege: None,
            auto_increment: None,
        }
    }
}

impl AppData for ManagerRequest {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagerResponse {
    pub errcode: ErrCode,
    pub errmsg: String,
    pub op_type: Option<OpType>,
    /// Hint to the current leader, set with a `NotLeader` errcode.
    #[serde(default)]
    pub leader: String,
    pub app_id: Option<i64>,
    pub zone_id: Option<i64>,
    pub servlet_id: Option<i64>,
    pub version: Option<u64>,
    pub start_id: Option<u64>,
    pub end_id: Option<u64>,
}

impl ManagerResponse {
    pub fn success(op_type: OpType) -> Self {
        Self {
            errcode: ErrCode::Success,
            errmsg: "success".to_string(),
            op_type: Some(op_type),
            ..Default::default()
        }
    }

    pub fn error(op_type: OpType, errcode: ErrCode, errmsg: impl Into<String>) -> Self {
        Self {
            errcode,
            errmsg: errmsg.into(),
            op_type: Some(op_type),
            ..Default::default()
        }
    }

    pub fn not_leader(op_type: OpType, leader: impl Into<String>) -> Self {
        Self {
            errcode: ErrCode::NotLeader,
            errmsg: "not leader".to_string(),
            op_type: Some(op_type),
            leader: leader.into(),
            ..Default::default()
        }
    }
}

impl AppDataResponse for ManagerResponse {}

impl Reply for ManagerResponse {
    fn errcode(&self) -> ErrCode {
        self.errcode
    }
    fn leader(&self) -> &str {
        &self.leader
    }
}
