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

use async_trait::async_trait;
use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigVersion;
use common_beacon_types::ErrCode;
use common_beacon_types::InstanceInfo;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::NamingRequest;
use common_beacon_types::OpType;
use common_beacon_types::QueryOpType;
use common_beacon_types::QueryRequest;
use common_exception::ErrorCode;
use common_exception::Result;

use crate::ConfigFetcher;
use crate::DiscoverySender;

/// Typed operations over the leader router: what the CLI, the gateway and
/// embedded users call.
#[derive(Clone)]
pub struct DiscoveryClient {
    sender: Arc<DiscoverySender>,
}

impl DiscoveryClient {
    pub fn new(sender: Arc<DiscoverySender>) -> Self {
        Self { sender }
    }

    pub fn sender(&self) -> &Arc<DiscoverySender> {
        &self.sender
    }

    fn check(resp: ManagerResponse) -> Result<ManagerResponse> {
        if resp.errcode.is_success() {
            Ok(resp)
        } else {
            Err(ErrorCode::MetaServiceError(format!(
                "{:?}: {}",
                resp.errcode, resp.errmsg
            )))
        }
    }

    pub async fn create_config(&self, info: ConfigInfo) -> Result<ManagerResponse> {
        let mut req = ManagerRequest::new(OpType::CreateConfig);
        req.config = Some(info);
        Self::check(self.sender.discovery_manager(&req).await?)
    }

    pub async fn remove_config(
        &self,
        name: &str,
        version: Option<ConfigVersion>,
    ) -> Result<ManagerResponse> {
        let mut req = ManagerRequest::new(OpType::RemoveConfig);
        req.config = Some(ConfigInfo {
            name: name.to_string(),
            version: version.unwrap_or_default(),
            content: String::new(),
            ..Default::default()
        });
        Self::check(self.sender.discovery_manager(&req).await?)
    }

    pub async fn get_config(&self, name: &str, version: ConfigVersion) -> Result<ConfigInfo> {
        self.query_config(name, Some(version)).await
    }

    pub async fn get_config_latest(&self, name: &str) -> Result<ConfigInfo> {
        self.query_config(name, None).await
    }

    async fn query_config(
        &self,
        name: &str,
        version: Option<ConfigVersion>,
    ) -> Result<ConfigInfo> {
        let mut req = QueryRequest::new(QueryOpType::QueryGetConfig);
        req.config_name = Some(name.to_string());
        req.config_version = version;

        let resp = self.sender.discovery_query(&req).await?;
        if resp.errcode != ErrCode::Success {
            return Err(ErrorCode::MetaServiceError(format!(
                "{:?}: {}",
                resp.errcode, resp.errmsg
            )));
        }
        resp.config_infos
            .into_iter()
            .next()
            .ok_or_else(|| ErrorCode::MetaStoreNotFound(format!("config {}", name)))
    }

    pub async fn list_config_versions(&self, name: &str) -> Result<Vec<ConfigVersion>> {
        let mut req = QueryRequest::new(QueryOpType::QueryListConfigVersion);
        req.config_name = Some(name.to_string());

        let resp = self.sender.discovery_query(&req).await?;
        if resp.errcode != ErrCode::Success {
            return Err(ErrorCode::MetaServiceError(format!(
                "{:?}: {}",
                resp.errcode, resp.errmsg
            )));
        }
        Ok(resp.config_versions)
    }

    pub async fn register_instance(&self, instance: InstanceInfo) -> Result<ManagerResponse> {
        let mut req = ManagerRequest::new(OpType::AddInstance);
        req.instance = Some(instance);
        Self::check(self.sender.discovery_manager(&req).await?)
    }

    pub async fn cancel_instance(&self, address: &str) -> Result<ManagerResponse> {
        let mut req = ManagerRequest::new(OpType::DropInstance);
        req.instance = Some(InstanceInfo {
            address: address.to_string(),
            ..Default::default()
        });
        Self::check(self.sender.discovery_manager(&req).await?)
    }

    /// Resolve `(app, zones, envs, colors)` to live instances.
    pub async fn naming(&self, req: &NamingRequest) -> Result<Vec<InstanceInfo>> {
        let resp = self.sender.discovery_naming(req).await?;
        if resp.errcode != ErrCode::Success {
            return Err(ErrorCode::MetaServiceError(format!(
                "{:?}: {}",
                resp.errcode, resp.errmsg
            )));
        }
        Ok(resp.servlets)
    }
}

#[async_trait]
impl ConfigFetcher for DiscoveryClient {
    async fn fetch_latest(&self, name: &str) -> Result<ConfigInfo> {
        self.get_config_latest(name).await
    }
}
