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

use std::collections::BTreeSet;
use std::sync::Arc;

use async_raft::error::ClientWriteError;
use async_raft::error::InitializeError;
use async_raft::raft::ClientWriteRequest;
use async_raft::NodeId;
use async_raft::Raft;
use async_raft::RaftMetrics;
use async_raft::State;
use common_base::tokio;
use common_beacon_raft_store::state_machine::AutoIncrStateMachine;
use common_beacon_raft_store::state_machine::CatalogStateMachine;
use common_beacon_raft_store::state_machine::GroupStateMachine;
use common_beacon_raft_store::state_machine::TsoStateMachine;
use common_beacon_raft_store::RaftConfig;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::TsoOpType;
use common_beacon_types::TsoRequest;
use common_beacon_types::TsoResponse;
use common_beacon_types::GROUP_AUTO_INCR;
use common_beacon_types::GROUP_CATALOG;
use common_beacon_types::GROUP_TSO;
use common_exception::ErrorCode;
use common_exception::Result;
use common_sled_store::get_sled_db;
use common_sled_store::init_sled_db;
use common_tracing::tracing;

use crate::discovery::tso_runtime::TsoRuntime;
use crate::discovery::BeaconNetwork;
use crate::discovery::BeaconRaftStore;

pub type GroupRaft<SM> = Raft<
    <SM as GroupStateMachine>::Req,
    <SM as GroupStateMachine>::Resp,
    BeaconNetwork,
    BeaconRaftStore<SM>,
>;

/// One raft group: its durable store and its running raft instance.
pub struct GroupHandle<SM: GroupStateMachine> {
    pub store: Arc<BeaconRaftStore<SM>>,
    pub raft: GroupRaft<SM>,
}

impl<SM: GroupStateMachine> GroupHandle<SM> {
    async fn boot(config: &RaftConfig) -> Result<GroupHandle<SM>> {
        let store = Arc::new(BeaconRaftStore::<SM>::open_create(config, Some(()), Some(())).await?);

        let election_override = store.raft_state.read_election_timeout_ms()?;
        let raft_config = Arc::new(config.raft_config(SM::GROUP_NAME, election_override)?);

        let network = Arc::new(BeaconNetwork::new(SM::GROUP_ID, config.clone()));
        let raft = Raft::new(config.id, raft_config, network, store.clone());

        if !store.is_open() {
            let members: BTreeSet<NodeId> = (1..=config.peers.len() as u64).collect();
            match raft.initialize(members).await {
                Ok(()) => {
                    tracing::info!("group {} initialized", SM::GROUP_NAME);
                }
                Err(InitializeError::NotAllowed) => {
                    // The cluster is already formed; nothing to do.
                }
                Err(e) => {
                    return Err(ErrorCode::RaftError(format!(
                        "initialize group {}: {}",
                        SM::GROUP_NAME,
                        e
                    )));
                }
            }
        }

        Ok(GroupHandle { store, raft })
    }

    pub fn metrics(&self) -> RaftMetrics {
        self.raft.metrics().borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        let m = self.metrics();
        m.state == State::Leader
    }

    /// The current leader's address, or empty when unknown.
    pub fn leader_hint(&self, config: &RaftConfig) -> String {
        match self.metrics().current_leader {
            Some(id) => config.peer_addr(id),
            None => "".to_string(),
        }
    }
}

/// The raft group host: three independent groups in one process, plus the
/// TSO leader runtime bound to the timestamp group's leadership.
pub struct BeaconNode {
    pub config: RaftConfig,

    pub catalog: GroupHandle<CatalogStateMachine>,
    pub auto_incr: GroupHandle<AutoIncrStateMachine>,
    pub tso: GroupHandle<TsoStateMachine>,

    pub tso_runtime: Arc<TsoRuntime>,
}

impl BeaconNode {
    /// Open the storage and start all three groups. On a pristine store the
    /// cluster is initialized from the configured peer set.
    #[tracing::instrument(level = "info", skip(config))]
    pub async fn boot(config: &RaftConfig) -> Result<Arc<BeaconNode>> {
        config.check()?;
        init_sled_db(config.raft_dir.clone());

        let catalog = GroupHandle::<CatalogStateMachine>::boot(config).await?;
        let auto_incr = GroupHandle::<AutoIncrStateMachine>::boot(config).await?;
        let tso = GroupHandle::<TsoStateMachine>::boot(config).await?;

        let tso_runtime = TsoRuntime::new(config.clone(), tso.store.clone(), tso.raft.clone());

        let node = Arc::new(BeaconNode {
            config: config.clone(),
            catalog,
            auto_incr,
            tso,
            tso_runtime: tso_runtime.clone(),
        });

        // Bind the TSO runtime to the timestamp group's leadership changes.
        let mut rx = node.tso.raft.metrics();
        tokio::spawn(async move {
            let mut was_leader = false;
            loop {
                let is_leader = rx.borrow().state == State::Leader;
                if is_leader && !was_leader {
                    tso_runtime.clone().on_leader_start().await;
                } else if !is_leader && was_leader {
                    tso_runtime.on_leader_stop();
                }
                was_leader = is_leader;

                if rx.changed().await.is_err() {
                    tso_runtime.on_leader_stop();
                    return;
                }
            }
        });

        Ok(node)
    }

    /// Route a write into its group and wait for the applied response.
    /// A non-leader answers `NotLeader` with the current leader hint.
    pub async fn submit_manager(&self, req: ManagerRequest) -> ManagerResponse {
        if req.op_type.is_auto_increment() {
            self.submit_mgr(&self.auto_incr, req).await
        } else {
            self.submit_mgr(&self.catalog, req).await
        }
    }

    async fn submit_mgr<SM>(&self, group: &GroupHandle<SM>, req: ManagerRequest) -> ManagerResponse
    where SM: GroupStateMachine<Req = ManagerRequest, Resp = ManagerResponse> {
        let op_type = req.op_type;
        metrics::increment_counter!("beacon_manager_requests");

        match group.raft.client_write(ClientWriteRequest::new(req)).await {
            Ok(resp) => resp.data,
            Err(ClientWriteError::ForwardToLeader(_, leader)) => {
                let hint = leader
                    .map(|id| self.config.peer_addr(id))
                    .unwrap_or_default();
                ManagerResponse::not_leader(op_type, hint)
            }
            Err(ClientWriteError::RaftError(e)) => ManagerResponse::error(
                op_type,
                common_beacon_types::ErrCode::InternalError,
                format!("raft: {}", e),
            ),
        }
    }

    /// The timestamp service entry: `GenTso` is served outside the log,
    /// admin updates are replicated.
    pub async fn submit_tso(&self, req: TsoRequest) -> TsoResponse {
        let op_type = req.op_type;

        if op_type == TsoOpType::QueryTsoInfo {
            let mut resp = self.tso_runtime.query_info().await;
            resp.leader = self.tso.leader_hint(&self.config);
            return resp;
        }

        if !self.tso.is_leader() {
            let mut resp = TsoResponse::error(
                op_type,
                common_beacon_types::ErrCode::NotLeader,
                "not leader",
            );
            resp.leader = self.tso.leader_hint(&self.config);
            return resp;
        }

        if op_type == TsoOpType::GenTso {
            return self.tso_runtime.gen_tso(req.count).await;
        }

        match self.tso.raft.client_write(ClientWriteRequest::new(req)).await {
            Ok(resp) => resp.data,
            Err(ClientWriteError::ForwardToLeader(_, leader)) => {
                let mut resp = TsoResponse::error(
                    op_type,
                    common_beacon_types::ErrCode::NotLeader,
                    "not leader",
                );
                resp.leader = leader
                    .map(|id| self.config.peer_addr(id))
                    .unwrap_or_default();
                resp
            }
            Err(ClientWriteError::RaftError(e)) => TsoResponse::error(
                op_type,
                common_beacon_types::ErrCode::InternalError,
                format!("raft: {}", e),
            ),
        }
    }

    /// Graceful stop: shut every group down and flush the storage, so recent
    /// mutations survive the exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.tso_runtime.on_leader_stop();

        self.catalog
            .raft
            .shutdown()
            .await
            .map_err(|e| ErrorCode::RaftError(format!("shutdown catalog: {}", e)))?;
        self.auto_incr
            .raft
            .shutdown()
            .await
            .map_err(|e| ErrorCode::RaftError(format!("shutdown auto_incr: {}", e)))?;
        self.tso
            .raft
            .shutdown()
            .await
            .map_err(|e| ErrorCode::RaftError(format!("shutdown tso: {}", e)))?;

        self.flush().await
    }

    /// One atomic storage flush; also run periodically in the background.
    pub async fn flush(&self) -> Result<()> {
        let db = get_sled_db();
        db.flush_async()
            .await
            .map_err(|e| ErrorCode::MetaStoreDamaged(format!("flush: {}", e)))?;
        Ok(())
    }
}
