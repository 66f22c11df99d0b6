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

use std::sync::Mutex;
use std::time::Duration;

use common_base::tokio;
use common_beacon_rpc::BeaconMes;
use common_beacon_rpc::BeaconServiceClient;
use common_beacon_types::ErrCode;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::NamingRequest;
use common_beacon_types::NamingResponse;
use common_beacon_types::QueryRequest;
use common_beacon_types::QueryResponse;
use common_beacon_types::RaftControlRequest;
use common_beacon_types::RaftControlResponse;
use common_beacon_types::Reply;
use common_beacon_types::TsoRequest;
use common_beacon_types::TsoResponse;
use common_exception::ErrorCode;
use common_exception::Result;
use common_tracing::tracing;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::transport::Channel;
use tonic::transport::Endpoint;

#[derive(Clone, Copy, Debug)]
enum Rpc {
    Manager,
    Query,
    Naming,
    Tso,
    RaftControl,
}

pub const DEFAULT_RETRY_TIMES: usize = 5;

/// The leader-aware sender: remembers the catalog-group leader, follows
/// `NotLeader` hints, and retries transport failures against a random peer.
pub struct DiscoverySender {
    peers: Vec<String>,
    leader: Mutex<Option<String>>,

    retry_times: usize,
    request_timeout: Duration,
    connect_timeout: Duration,
    between_error: Duration,
}

impl DiscoverySender {
    pub fn new(peers: Vec<String>) -> Self {
        Self {
            peers,
            leader: Mutex::new(None),
            retry_times: DEFAULT_RETRY_TIMES,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            between_error: Duration::from_millis(1000),
        }
    }

    pub fn with_retry_times(mut self, retry_times: usize) -> Self {
        self.retry_times = retry_times;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_between_error(mut self, between: Duration) -> Self {
        self.between_error = between;
        self
    }

    pub fn leader(&self) -> Option<String> {
        self.leader.lock().unwrap().clone()
    }

    fn set_leader(&self, leader: Option<String>) {
        *self.leader.lock().unwrap() = leader;
    }

    fn pick_target(&self) -> String {
        if let Some(l) = self.leader() {
            return l;
        }
        let n = rand::thread_rng().gen_range(0..self.peers.len());
        self.peers[n].clone()
    }

    async fn connect(&self, target: &str) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(format!("http://{}", target))
            .map_err(|e| ErrorCode::BadAddressFormat(format!("endpoint {}: {}", target, e)))?
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout);
        let channel = endpoint.connect().await?;
        Ok(channel)
    }

    async fn send<Req, Resp>(&self, rpc: Rpc, req: &Req, retry_times: usize) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Reply,
    {
        let log_id: u64 = rand::thread_rng().gen();
        let data = serde_json::to_string(req)?;

        let mut errors = 0;
        // Redirects do not count against the retry budget; this caps a
        // pathological hint loop instead.
        let mut rounds = 0;
        let max_rounds = retry_times * 3;

        while errors < retry_times && rounds < max_rounds {
            rounds += 1;
            if errors > 0 {
                tokio::time::sleep(self.between_error).await;
            }

            let target = self.pick_target();
            let channel = match self.connect(&target).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        "connect {} fail: {}, log_id:{}, {:?}",
                        target,
                        e,
                        log_id,
                        rpc
                    );
                    self.set_leader(None);
                    errors += 1;
                    continue;
                }
            };

            let mut client = BeaconServiceClient::new(channel);
            let mes = BeaconMes::from_data(data.clone());
            let sent = match rpc {
                Rpc::Manager => client.manager(mes).await,
                Rpc::Query => client.query(mes).await,
                Rpc::Naming => client.naming(mes).await,
                Rpc::Tso => client.tso(mes).await,
                Rpc::RaftControl => client.raft_control(mes).await,
            };

            let reply = match sent {
                Ok(r) => r.into_inner(),
                Err(status) => {
                    tracing::warn!(
                        "send to {} fail: {}, log_id:{}, {:?}",
                        target,
                        status,
                        log_id,
                        rpc
                    );
                    self.set_leader(None);
                    errors += 1;
                    continue;
                }
            };

            let resp: Resp = serde_json::from_str(&reply.data)?;
            match resp.errcode() {
                ErrCode::HaveNotInit => {
                    tracing::warn!("{} not initialized yet, log_id:{}", target, log_id);
                    self.set_leader(None);
                    errors += 1;
                }
                ErrCode::NotLeader => {
                    let hint = resp.leader().to_string();
                    tracing::debug!(
                        "{} is not leader, redirect to {:?}, log_id:{}",
                        target,
                        hint,
                        log_id
                    );
                    if hint.is_empty() {
                        self.set_leader(None);
                        errors += 1;
                    } else {
                        self.set_leader(Some(hint));
                    }
                }
                _ => {
                    // The node answered; it is the leader we want to remember.
                    if self.leader().is_none() {
                        self.set_leader(Some(target));
                    }
                    return Ok(resp);
                }
            }
        }

        Err(ErrorCode::RetryLimitExceeded(format!(
            "{:?}: no response after {} attempts, log_id:{}",
            rpc, retry_times, log_id
        )))
    }

    pub async fn discovery_manager(&self, req: &ManagerRequest) -> Result<ManagerResponse> {
        self.send(Rpc::Manager, req, self.retry_times).await
    }

    pub async fn discovery_query(&self, req: &QueryRequest) -> Result<QueryResponse> {
        self.send(Rpc::Query, req, self.retry_times).await
    }

    pub async fn discovery_naming(&self, req: &NamingRequest) -> Result<NamingResponse> {
        self.send(Rpc::Naming, req, self.retry_times).await
    }

    pub async fn tso(&self, req: &TsoRequest) -> Result<TsoResponse> {
        self.send(Rpc::Tso, req, self.retry_times).await
    }

    pub async fn raft_control(&self, req: &RaftControlRequest) -> Result<RaftControlResponse> {
        self.send(Rpc::RaftControl, req, self.retry_times).await
    }
}
