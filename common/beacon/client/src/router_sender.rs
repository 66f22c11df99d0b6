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

use std::time::Duration;

use common_base::tokio;
use common_beacon_rpc::BeaconMes;
use common_beacon_rpc::BeaconRouterClient;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::NamingRequest;
use common_beacon_types::NamingResponse;
use common_beacon_types::QueryRequest;
use common_beacon_types::QueryResponse;
use common_beacon_types::TsoRequest;
use common_beacon_types::TsoResponse;
use common_exception::ErrorCode;
use common_exception::Result;
use common_tracing::tracing;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::transport::Endpoint;

#[derive(Clone, Copy, Debug)]
enum Rpc {
    Manager,
    Query,
    Naming,
    Tso,
}

pub const ROUTER_RETRY_TIMES: usize = 3;

/// Sender pointed at the stateless gateway fleet. The gateway tracks the
/// leader, so this sender only retries transport failures.
pub struct RouterSender {
    server: String,

    retry_times: usize,
    request_timeout: Duration,
    connect_timeout: Duration,
    between_error: Duration,
}

impl RouterSender {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            retry_times: ROUTER_RETRY_TIMES,
            request_timeout: Duration::from_millis(300),
            connect_timeout: Duration::from_millis(500),
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

    async fn send<Req, Resp>(&self, rpc: Rpc, req: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let log_id: u64 = rand::thread_rng().gen();
        let data = serde_json::to_string(req)?;

        let mut tried = 0;
        while tried < self.retry_times {
            if tried > 0 {
                tokio::time::sleep(self.between_error).await;
            }
            tried += 1;

            let endpoint = Endpoint::from_shared(format!("http://{}", self.server))
                .map_err(|e| {
                    ErrorCode::BadAddressFormat(format!("endpoint {}: {}", self.server, e))
                })?
                .timeout(self.request_timeout)
                .connect_timeout(self.connect_timeout);

            let channel = match endpoint.connect().await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("connect router {} fail: {}, log_id:{}", self.server, e, log_id);
                    continue;
                }
            };

            let mut client = BeaconRouterClient::new(channel);
            let mes = BeaconMes::from_data(data.clone());
            let sent = match rpc {
                Rpc::Manager => client.manager(mes).await,
                Rpc::Query => client.query(mes).await,
                Rpc::Naming => client.naming(mes).await,
                Rpc::Tso => client.tso(mes).await,
            };

            match sent {
                Ok(r) => {
                    let resp: Resp = serde_json::from_str(&r.into_inner().data)?;
                    return Ok(resp);
                }
                Err(status) => {
                    tracing::warn!(
                        "send to router {} fail: {}, log_id:{}",
                        self.server,
                        status,
                        log_id
                    );
                }
            }
        }

        Err(ErrorCode::RetryLimitExceeded(format!(
            "router {:?}: no response after {} attempts, log_id:{}",
            rpc, self.retry_times, log_id
        )))
    }

    pub async fn discovery_manager(&self, req: &ManagerRequest) -> Result<ManagerResponse> {
        self.send(Rpc::Manager, req).await
    }

    pub async fn discovery_query(&self, req: &QueryRequest) -> Result<QueryResponse> {
        self.send(Rpc::Query, req).await
    }

    pub async fn discovery_naming(&self, req: &NamingRequest) -> Result<NamingResponse> {
        self.send(Rpc::Naming, req).await
    }

    pub async fn tso(&self, req: &TsoRequest) -> Result<TsoResponse> {
        self.send(Rpc::Tso, req).await
    }
}
