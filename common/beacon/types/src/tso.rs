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

use crate::ErrCode;
use crate::Reply;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsoOpType {
    GenTso,
    ResetTso,
    UpdateTso,
    QueryTsoInfo,
}

/// A hybrid timestamp: wall-clock milliseconds plus a logical counter.
/// Field order gives the lexicographic comparison of spec'd monotonicity.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct TsoTimestamp {
    pub physical: i64,
    pub logical: i64,
}

/// Only `ResetTso`/`UpdateTso` go through raft; `GenTso` is answered on the
/// leader outside the log.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TsoRequest {
    pub op_type: TsoOpType,
    #[serde(default)]
    pub count: u64,
    pub current_timestamp: Option<TsoTimestamp>,
    pub save_physical: Option<i64>,
    #[serde(default)]
    pub force: bool,
}

impl TsoRequest {
    pub fn new(op_type: TsoOpType) -> Self {
        Self {
            op_type,
            count: 0,
            current_timestamp: None,
            save_physical: None,
            force: false,
        }
    }
}

impl AppData for TsoRequest {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TsoResponse {
    pub errcode: ErrCode,
    pub errmsg: String,
    pub op_type: Option<TsoOpType>,
    #[serde(default)]
    pub leader: String,
    pub start_timestamp: Option<TsoTimestamp>,
    #[serde(default)]
    pub count: u64,
    pub save_physical: Option<i64>,
    pub system_time: Option<i64>,
}

impl TsoResponse {
    pub fn success(op_type: TsoOpType) -> Self {
        Self {
            errcode: ErrCode::Success,
            errmsg: "success".to_string(),
            op_type: Some(op_type),
            ..Default::default()
        }
    }

    pub fn error(op_type: TsoOpType, errcode: ErrCode, errmsg: impl Into<String>) -> Self {
        Self {
            errcode,
            errmsg: errmsg.into(),
            op_type: Some(op_type),
            ..Default::default()
        }
    }
}

impl AppDataResponse for TsoResponse {}

impl Reply for TsoResponse {
    fn errcode(&self) -> ErrCode {
        self.errcode
    }
    fn leader(&self) -> &str {
        &self.leader
    }
}
