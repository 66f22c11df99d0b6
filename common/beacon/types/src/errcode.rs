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

/// Error codes carried on every response. This is the ABI between the state
/// machines, the router and the clients; `ErrorCode` never crosses the wire.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrCode {
    Success,
    InternalError,
    InputParamError,
    ParseFromPbFail,
    HaveNotInit,
    NotLeader,
    RetryLater,
    UnknownReqType,
    PeerNotEqual,
}

impl Default for ErrCode {
    fn default() -> Self {
        ErrCode::Success
    }
}

impl ErrCode {
    pub fn is_success(&self) -> bool {
        *self == ErrCode::Success
    }
}

/// Accessors the leader router needs on every response kind.
pub trait Reply {
    fn errcode(&self) -> ErrCode;
    fn leader(&self) -> &str;
}
