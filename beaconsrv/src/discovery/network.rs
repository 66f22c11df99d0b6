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

use anyhow::anyhow;
use anyhow::Result;
use async_raft::async_trait::async_trait;
use async_raft::raft::AppendEntriesRequest;
use async_raft::raft::AppendEntriesResponse;
use async_raft::raft::InstallSnapshotRequest;
use async_raft::raft::InstallSnapshotResponse;
use async_raft::raft::VoteRequest;
use async_raft::raft::VoteResponse;
use async_raft::AppData;
use async_raft::NodeId;
use async_raft::RaftNetwork;
use common_beacon_raft_store::RaftConfig;
use common_beacon_rpc::BeaconMes;
use common_beacon_rpc::BeaconServiceClient;
use common_tracing::tracing;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::discovery::message::GroupRpc;
use crate::discovery::message::GroupRpcReply;

#[derive(Clone, Copy, Debug)]
enum RaftRpc {
    AppendEntries,
    Vote,
    InstallSnapshot,
}

/// Carries raft RPCs of one group to its peers, over the shared service
/// endpoint; the receiving side routes by the envelope's group id.
pub struct BeaconNetwork {
    group_id: u64,
    config: RaftConfig,
}

impl BeaconNetwork {
    pub fn new(group_id: u64, config: RaftConfig) -> Self {
        Self { group_id, config }
    }

    async fn send<Req, Resp>(&self, target: NodeId, rpc: RaftRpc, req: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let addr = self.config.peer_addr(target);
        if addr.is_empty() {
            return Err(anyhow!("unknown peer id: {}", target));
        }

        let envelope = GroupRpc {
            group_id: self.group_id,
            data: serde_json::to_string(req)?,
        };
        let mes = BeaconMes::from_data(serde_json::to_string(&envelope)?);

        let mut client = BeaconServiceClient::connect(format!("http://{}", addr)).await?;
        let sent = match rpc {
            RaftRpc::AppendEntries => client.append_entries(mes).await,
            RaftRpc::Vote => client.vote(mes).await,
            RaftRpc::InstallSnapshot => client.install_snapshot(mes).await,
        };

        let reply = sent.map_err(|status| {
            tracing::debug!(
                "group {} raft rpc {:?} to {} fail: {}",
                self.group_id,
                rpc,
                addr,
                status
            );
            anyhow!("raft rpc to {}: {}", addr, status)
        })?;

        let reply: GroupRpcReply = serde_json::from_str(&reply.into_inner().data)?;
        if !reply.error.is_empty() {
            return Err(anyhow!(reply.error));
        }
        let resp: Resp = serde_json::from_str(&reply.data)?;
        Ok(resp)
    }
}

#[async_trait]
impl<D: AppData> RaftNetwork<D> for BeaconNetwork {
    async fn send_append_entries(
        &self,
        target: NodeId,
        rpc: AppendEntriesRequest<D>,
    ) -> Result<AppendEntriesResponse> {
        self.send(target, RaftRpc::AppendEntries, &rpc).await
    }

    async fn send_install_snapshot(
        &self,
        target: NodeId,
        rpc: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        self.send(target, RaftRpc::InstallSnapshot, &rpc).await
    }

    async fn send_vote(&self, target: NodeId, rpc: VoteRequest) -> Result<VoteResponse> {
        self.send(target, RaftRpc::Vote, &rpc).await
    }
}
