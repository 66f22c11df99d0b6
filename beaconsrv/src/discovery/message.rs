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

/// Raft-internal RPC envelope: `group_id` selects the raft group, `data`
/// carries the JSON of the group-typed request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GroupRpc {
    pub group_id: u64,
    pub data: String,
}

/// `data` carries the JSON reply on success, `error` the failure text.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GroupRpcReply {
    pub data: String,
    pub error: String,
}

impl GroupRpcReply {
    pub fn ok<T: Serialize>(v: &T) -> Self {
        match serde_json::to_string(v) {
            Ok(data) => GroupRpcReply {
                data,
                error: String::new(),
            },
            Err(e) => GroupRpcReply {
                data: String::new(),
                error: format!("serialize reply: {}", e),
            },
        }
    }

    pub fn err(e: impl ToString) -> Self {
        GroupRpcReply {
            data: String::new(),
            error: e.to_string(),
        }
    }
}
