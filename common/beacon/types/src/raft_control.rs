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

use crate::ErrCode;
use crate::Reply;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaftControlOp {
    SetPeer,
    Snapshot,
    TransferLeader,
    ResetVoteTime,
    ListPeer,
    GetLeader,
    Shutdown,
}

/// Administrative control of one raft group; `region_id` selects the group.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RaftControlRequest {
    pub op_type: RaftControlOp,
    #[serde(default)]
    pub region_id: u64,
    #[serde(default)]
    pub old_peers: Vec<String>,
    #[serde(default)]
    pub new_peers: Vec<String>,
    #[serde(default)]
    pub force: bool,
    pub new_leader: Option<String>,
    pub election_time_ms: Option<u64>,
}

impl RaftControlRequest {
    pub fn new(op_type: RaftControlOp, region_id: u64) -> Self {
        Self {
            op_type,
            region_id,
            old_peers: vec![],
            new_peers: vec![],
            force: false,
            new_leader: None,
            election_time_ms: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RaftControlResponse {
    pub errcode: ErrCode,
    pub errmsg: String,
    #[serde(default)]
    pub region_id: u64,
    #[serde(default)]
    pub leader: String,
    #[serde(default)]
    pub peers: Vec<String>,
}

impl RaftControlResponse {
    pub fn success(region_id: u64) -> Self {
        Self {
            errcode: ErrCode::Success,
            errmsg: "success".to_string(),
            region_id,
            ..Default::default()
        }
    }

    pub fn error(region_id: u64, errcode: ErrCode, errmsg: impl Into<String>) -> Self {
        Self {
            errcode,
            errmsg: errmsg.into(),
            region_id,
            ..Default::default()
        }
    }
}

impl Reply for RaftControlResponse {
    fn errcode(&self) -> ErrCode {
        self.errcode
    }
    fn leader(&self) -> &str {
        &self.leader
    }
}
