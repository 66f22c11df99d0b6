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
mod raft_node_test;
#[cfg(test)]
mod store_test;

mod message;
mod network;
mod raft_control;
mod raft_node;
mod router;
mod service;
mod store;
mod tso_runtime;

pub use message::GroupRpc;
pub use message::GroupRpcReply;
pub use network::BeaconNetwork;
pub use raft_node::BeaconNode;
pub use raft_node::GroupHandle;
pub use raft_node::GroupRaft;
pub use router::RouterServiceImpl;
pub use service::BeaconServiceImpl;
pub use store::BeaconRaftStore;
pub use store::ShutdownError;
pub use tso_runtime::TsoRuntime;
