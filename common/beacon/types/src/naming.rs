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
use crate::InstanceInfo;
use crate::Reply;
use crate::ServletStatus;

/// Resolve a logical service name to live instances. Empty filter vectors
/// mean no constraint on that axis; status defaults to NORMAL.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct NamingRequest {
    pub app_name: String,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub envs: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    pub status: Option<ServletStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct NamingResponse {
    pub errcode: ErrCode,
    pub errmsg: String,
    #[serde(default)]
    pub leader: String,
    #[serde(default)]
    pub servlets: Vec<InstanceInfo>,
}

impl Reply for NamingResponse {
    fn errcode(&self) -> ErrCode {
        self.errcode
    }
    fn leader(&self) -> &str {
        &self.leader
    }
}
