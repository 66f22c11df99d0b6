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

#[cfg(test)]
mod version_test;

mod catalog;
mod config;
mod errcode;
mod manager;
mod naming;
mod privilege;
mod query;
mod raft_control;
mod tso;
mod version;

pub use catalog::AppInfo;
pub use catalog::InstanceInfo;
pub use catalog::ServletInfo;
pub use catalog::ServletStatus;
pub use catalog::ZoneInfo;
pub use config::ConfigInfo;
pub use config::ConfigType;
pub use errcode::ErrCode;
pub use errcode::Reply;
pub use manager::AutoIncrementInfo;
pub use manager::ManagerRequest;
pub use manager::ManagerResponse;
pub use manager::OpType;
pub use naming::NamingRequest;
pub use naming::NamingResponse;
pub use privilege::FlattenPrivilege;
pub use privilege::PrivilegeRw;
pub use privilege::PrivilegeServlet;
pub use privilege::PrivilegeZone;
pub use privilege::UserPrivilege;
pub use query::QueryOpType;
pub use query::QueryRequest;
pub use query::QueryResponse;
pub use raft_control::RaftControlOp;
pub use raft_control::RaftControlRequest;
pub use raft_control::RaftControlResponse;
pub use tso::TsoOpType;
pub use tso::TsoRequest;
pub use tso::TsoResponse;
pub use tso::TsoTimestamp;
pub use version::ConfigVersion;

/// Raft group ids: one process hosts three independent groups.
pub const GROUP_CATALOG: u64 = 0;
pub const GROUP_AUTO_INCR: u64 = 1;
pub const GROUP_TSO: u64 = 2;
