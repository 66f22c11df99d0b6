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

use std::sync::Arc;

use common_beacon_client::DiscoverySender;
use common_beacon_rpc::BeaconMes;
use common_beacon_rpc::BeaconRouter;
use common_beacon_types::ManagerRequest;
use common_beacon_types::NamingRequest;
use common_beacon_types::QueryRequest;
use common_beacon_types::TsoRequest;
use common_tracing::tracing;
use serde::Serialize;
use tonic::Request;
use tonic::Response;
use tonic::Status;

/// The stateless gateway: accepts the client surface and forwards to the
/// current leader through its own leader router, so clients can point at a
/// stable fleet instead of tracking the raft peer set.
pub struct RouterServiceImpl {
    sender: Arc<DiscoverySender>,
}

impl RouterServiceImpl {
    pub fn new(sender: Arc<DiscoverySender>) -> Self {
        Self { sender }
    }

    fn reply<T: Serialize>(v: &T) -> Result<Response<BeaconMes>, Status> {
        let data = serde_json::to_string(v)
            .map_err(|e| Status::internal(format!("serialize reply: {}", e)))?;
        Ok(Response::new(BeaconMes::from_data(data)))
    }

    fn parse<T: serde::de::DeserializeOwned>(mes: BeaconMes) -> Result<T, Status> {
        serde_json::from_str(&mes.data)
            .map_err(|e| Status::invalid_argument(format!("parse request fail: {}", e)))
    }

    fn forward_err(e: impl std::fmt::Display) -> Status {
        tracing::warn!("router forward fail: {}", e);
        Status::unavailable(format!("forward to discovery fail: {}", e))
    }
}

#[tonic::async_trait]
impl BeaconRouter for RouterServiceImpl {
    async fn manager(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let req: ManagerRequest = Self::parse(request.into_inner())?;
        let resp = self
            .sender
            .discovery_manager(&req)
            .await
            .map_err(Self::forward_err)?;
        Self::reply(&resp)
    }

    async fn query(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let req: QueryRequest = Self::parse(request.into_inner())?;
        let resp = self
            .sender
            .discovery_query(&req)
            .await
            .map_err(Self::forward_err)?;
        Self::reply(&resp)
    }

    async fn naming(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let req: NamingRequest = Self::parse(request.into_inner())?;
        let resp = self
            .sender
            .discovery_naming(&req)
            .await
            .map_err(Self::forward_err)?;
        Self::reply(&resp)
    }

    async fn tso(&self, request: Request<BeaconMes>) -> Result<Response<BeaconMes>, Status> {
        let req: TsoRequest = Self::parse(request.into_inner())?;
        let resp = self.sender.tso(&req).await.map_err(Self::forward_err)?;
        Self::reply(&resp)
    }
}
