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

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_raft::raft::AppendEntriesRequest;
use async_raft::raft::InstallSnapshotRequest;
use async_raft::raft::VoteRequest;
use common_beacon_raft_store::state_machine::GroupStateMachine;
use common_beacon_rpc::BeaconMes;
use common_beacon_rpc::BeaconService;
use common_beacon_types::ErrCode;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::NamingRequest;
use common_beacon_types::NamingResponse;
use common_beacon_types::QueryOpType;
use common_beacon_types::QueryRequest;
use common_beacon_types::QueryResponse;
use common_beacon_types::RaftControlRequest;
use common_beacon_types::RaftControlResponse;
use common_beacon_types::TsoRequest;
use common_beacon_types::TsoResponse;
use common_beacon_types::GROUP_AUTO_INCR;
use common_beacon_types::GROUP_CATALOG;
use common_beacon_types::GROUP_TSO;
use common_tracing::tracing;
use serde::Serialize;
use tonic::Request;
use tonic::Response;
use tonic::Status;

use crate::discovery::message::GroupRpc;
use crate::discovery::message::GroupRpcReply;
use crate::discovery::raft_control::raft_control;
use crate::discovery::BeaconNode;
use crate::discovery::GroupHandle;

/// The public RPC surface of one replica.
pub struct BeaconServiceImpl {
    node: Arc<BeaconNode>,
    initialized: AtomicBool,
}

impl BeaconServiceImpl {
    pub fn new(node: Arc<BeaconNode>) -> Self {
        Self {
            node,
            initialized: AtomicBool::new(false),
        }
    }

    /// Flip once the node finished booting; queries before that answer
    /// `HaveNotInit` and clients retry.
    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn reply<T: Serialize>(v: &T) -> Result<Response<BeaconMes>, Status> {
        let data = serde_json::to_string(v)
            .map_err(|e| Status::internal(format!("serialize reply: {}", e)))?;
        Ok(Response::new(BeaconMes::from_data(data)))
    }

    async fn do_query(&self, req: QueryRequest) -> QueryResponse {
        let sm = self.node.catalog.store.state_machine.read().await;

        match req.op_type {
            QueryOpType::QueryApp => {
                let mut resp = QueryResponse::success();
                match &req.app_name {
                    Some(name) => match sm.get_app(name) {
                        Some(app) => resp.apps.push(app),
                        None => {
                            return QueryResponse::error(ErrCode::InputParamError, "app not exist");
                        }
                    },
                    None => resp.apps = sm.list_apps(),
                }
                resp
            }
            QueryOpType::QueryZone => {
                let app_name = match &req.app_name {
                    Some(a) => a,
                    None => return QueryResponse::error(ErrCode::InputParamError, "no app_name"),
                };
                let mut resp = QueryResponse::success();
                match &req.zone_name {
                    Some(zone) => match sm.get_zone(app_name, zone) {
                        Some(z) => resp.zones.push(z),
                        None => {
                            return QueryResponse::error(ErrCode::InputParamError, "zone not exist");
                        }
                    },
                    None => resp.zones = sm.list_zones(app_name),
                }
                resp
            }
            QueryOpType::QueryServlet => {
                let app_name = match &req.app_name {
                    Some(a) => a,
                    None => return QueryResponse::error(ErrCode::InputParamError, "no app_name"),
                };
                let mut resp = QueryResponse::success();
                match (&req.zone_name, &req.servlet_name) {
                    (Some(zone), Some(servlet)) => {
                        match sm.get_servlet(app_name, zone, servlet) {
                            Some(s) => resp.servlets.push(s),
                            None => {
                                return QueryResponse::error(
                                    ErrCode::InputParamError,
                                    "servlet not exist",
                                );
                            }
                        }
                    }
                    (zone, _) => {
                        resp.servlets = sm.list_servlets(app_name, zone.as_deref());
                    }
                }
                resp
            }
            QueryOpType::QueryUserPrivilege => {
                let user = match &req.user_name {
                    Some(u) => u,
                    None => return QueryResponse::error(ErrCode::InputParamError, "no user_name"),
                };
                match sm.get_privilege(user) {
                    Some(p) => {
                        let mut resp = QueryResponse::success();
                        resp.privileges.push(p);
                        resp
                    }
                    None => QueryResponse::error(ErrCode::InputParamError, "username not exist"),
                }
            }
            QueryOpType::QueryPrivilegeFlatten => {
                let mut resp = QueryResponse::success();
                resp.flatten_privileges = sm.flatten_privileges(req.user_name.as_deref());
                resp
            }
            QueryOpType::QueryGetConfig => {
                let name = match &req.config_name {
                    Some(n) => n,
                    None => {
                        return QueryResponse::error(ErrCode::InputParamError, "no config_name");
                    }
                };
                match sm.get_config(name, req.config_version) {
                    Some(c) => {
                        let mut resp = QueryResponse::success();
                        resp.config_infos.push(c);
                        resp
                    }
                    None => QueryResponse::error(ErrCode::InputParamError, "config not exist"),
                }
            }
            QueryOpType::QueryListConfig => {
                let mut resp = QueryResponse::success();
                resp.config_infos = sm.list_configs();
                resp
            }
            QueryOpType::QueryListConfigVersion => {
                let name = match &req.config_name {
                    Some(n) => n,
                    None => {
                        return QueryResponse::error(ErrCode::InputParamError, "no config_name");
                    }
                };
                let versions = sm.list_config_versions(name);
                if versions.is_empty() {
                    return QueryResponse::error(ErrCode::InputParamError, "config not exist");
                }
                let mut resp = QueryResponse::success();
                resp.config_versions = versions;
                resp
            }
        }
    }

    async fn group_append<SM: GroupStateMachine>(
        group: &GroupHandle<SM>,
        data: &str,
    ) -> GroupRpcReply {
        match serde_json::from_str::<AppendEntriesRequest<SM::Req>>(data) {
            Ok(rpc) => match group.raft.append_entries(rpc).await {
                Ok(r) => GroupRpcReply::ok(&r),
                Err(e) => GroupRpcReply::err(e),
            },
            Err(e) => GroupRpcReply::err(e),
        }
    }

    async fn group_vote<SM: GroupStateMachine>(
        group: &GroupHandle<SM>,
        data: &str,
    ) -> GroupRpcReply {
        match serde_json::from_str::<VoteRequest>(data) {
            Ok(rpc) => match group.raft.vote(rpc).await {
                Ok(r) => GroupRpcReply::ok(&r),
                Err(e) => GroupRpcReply::err(e),
            },
            Err(e) => GroupRpcReply::err(e),
        }
    }

    async fn group_install<SM: GroupStateMachine>(
        group: &GroupHandle<SM>,
        data: &str,
    ) -> GroupRpcReply {
        match serde_json::from_str::<InstallSnapshotRequest>(data) {
            Ok(rpc) => match group.raft.install_snapshot(rpc).await {
                Ok(r) => GroupRpcReply::ok(&r),
                Err(e) => GroupRpcReply::err(e),
            },
            Err(e) => GroupRpcReply::err(e),
        }
    }

    fn parse_group_rpc(mes: &BeaconMes) -> Result<GroupRpc, Status> {
        serde_json::from_str(&mes.data)
            .map_err(|e| Status::invalid_argument(format!("bad group rpc: {}", e)))
    }
}

#[tonic::async_trait]
impl BeaconService for BeaconServiceImpl {
    async fn manager(
        &self,
        request: Request<BeaconMes>,
    ) -> Result<Response<BeaconMes>, Status> {
        let mes = request.into_inner();
        let req: ManagerRequest = match serde_json::from_str(&mes.data) {
            Ok(r) => r,
            Err(e) => {
                let mut resp = ManagerResponse::default();
                resp.errcode = ErrCode::ParseFromPbFail;
                resp.errmsg = format!("parse request fail: {}", e);
                return Self::reply(&resp);
            }
        };

        if !self.is_initialized() {
            return Self::reply(&ManagerResponse::error(
                req.op_type,
                ErrCode::HaveNotInit,
                "have not init",
            ));
        }

        // Writes only land on the leader of the owning group; followers
        // answer the hint and the router retries.
        let group_leader = if req.op_type.is_auto_increment() {
            self.node.auto_incr.is_leader()
        } else {
            self.node.catalog.is_leader()
        };
        if !group_leader {
            let hint = if req.op_type.is_auto_increment() {
                self.node.auto_incr.leader_hint(&self.node.config)
            } else {
                self.node.catalog.leader_hint(&self.node.config)
            };
            tracing::debug!("manager {:?} on non-leader, hint {}", req.op_type, hint);
            return Self::reply(&ManagerResponse::not_leader(req.op_type, hint));
        }

        let resp = self.node.submit_manager(req).await;
        Self::reply(&resp)
    }

    async fn query(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let mes = request.into_inner();
        let req: QueryRequest = match serde_json::from_str(&mes.data) {
            Ok(r) => r,
            Err(e) => {
                return Self::reply(&QueryResponse::error(
                    ErrCode::ParseFromPbFail,
                    format!("parse request fail: {}", e),
                ));
            }
        };

        if !self.is_initialized() {
            return Self::reply(&QueryResponse::error(ErrCode::HaveNotInit, "have not init"));
        }

        let resp = self.do_query(req).await;
        Self::reply(&resp)
    }

    async fn naming(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let mes = request.into_inner();
        let req: NamingRequest = match serde_json::from_str(&mes.data) {
            Ok(r) => r,
            Err(e) => {
                let mut resp = NamingResponse::default();
                resp.errcode = ErrCode::ParseFromPbFail;
                resp.errmsg = format!("parse request fail: {}", e);
                return Self::reply(&resp);
            }
        };

        if !self.is_initialized() {
            let mut resp = NamingResponse::default();
            resp.errcode = ErrCode::HaveNotInit;
            resp.errmsg = "have not init".to_string();
            return Self::reply(&resp);
        }

        let sm = self.node.catalog.store.state_machine.read().await;
        let mut resp = NamingResponse::default();
        resp.errcode = ErrCode::Success;
        resp.errmsg = "success".to_string();
        resp.servlets = sm.naming(&req);
        Self::reply(&resp)
    }

    async fn tso(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let mes = request.into_inner();
        let req: TsoRequest = match serde_json::from_str(&mes.data) {
            Ok(r) => r,
            Err(e) => {
                let mut resp = TsoResponse::default();
                resp.errcode = ErrCode::ParseFromPbFail;
                resp.errmsg = format!("parse request fail: {}", e);
                return Self::reply(&resp);
            }
        };

        if !self.is_initialized() {
            let mut resp = TsoResponse::default();
            resp.errcode = ErrCode::HaveNotInit;
            resp.errmsg = "have not init".to_string();
            return Self::reply(&resp);
        }

        let resp = self.node.submit_tso(req).await;
        Self::reply(&resp)
    }

    async fn raft_control(
        &self,
        request: Request<BeaconMes>,
    ) -> Result<Response<BeaconMes>, Status> {
        let mes = request.into_inner();
        let req: RaftControlRequest = match serde_json::from_str(&mes.data) {
            Ok(r) => r,
            Err(e) => {
                let resp = RaftControlResponse::error(
                    0,
                    ErrCode::ParseFromPbFail,
                    format!("parse request fail: {}", e),
                );
                return Self::reply(&resp);
            }
        };

        if !self.is_initialized() {
            return Self::reply(&RaftControlResponse::error(
                req.region_id,
                ErrCode::HaveNotInit,
                "have not init",
            ));
        }

        let resp = raft_control(&self.node, req).await;
        Self::reply(&resp)
    }

    async fn append_entries(
        &self,
        request: Request<BeaconMes>,
    ) -> Result<Response<BeaconMes>, Status> {
        let envelope = Self::parse_group_rpc(&request.into_inner())?;
        let reply = match envelope.group_id {
            GROUP_CATALOG => Self::group_append(&self.node.catalog, &envelope.data).await,
            GROUP_AUTO_INCR => Self::group_append(&self.node.auto_incr, &envelope.data).await,
            GROUP_TSO => Self::group_append(&self.node.tso, &envelope.data).await,
            other => GroupRpcReply::err(format!("unknown group id: {}", other)),
        };
        Self::reply(&reply)
    }

    async fn vote(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let envelope = Self::parse_group_rpc(&request.into_inner())?;
        let reply = match envelope.group_id {
            GROUP_CATALOG => Self::group_vote(&self.node.catalog, &envelope.data).await,
            GROUP_AUTO_INCR => Self::group_vote(&self.node.auto_incr, &envelope.data).await,
            GROUP_TSO => Self::group_vote(&self.node.tso, &envelope.data).await,
            other => GroupRpcReply::err(format!("unknown group id: {}", other)),
        };
        Self::reply(&reply)
    }

    async fn install_snapshot(
        &self,
        request: Request<BeaconMes>,
    ) -> Result<Response<BeaconMes>, Status> {
        let envelope = Self::parse_group_rpc(&request.into_inner())?;
        let reply = match envelope.group_id {
            GROUP_CATALOG => Self::group_install(&self.node.catalog, &envelope.data).await,
            GROUP_AUTO_INCR => Self::group_install(&self.node.auto_incr, &envelope.data).await,
            GROUP_TSO => Self::group_install(&self.node.tso, &envelope.data).await,
            other => GroupRpcReply::err(format!("unknown group id: {}", other)),
        };
        Self::reply(&reply)
    }
}
