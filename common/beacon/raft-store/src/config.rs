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

use async_raft::NodeId;
use async_raft::SnapshotPolicy;
use common_exception::ErrorCode;
use common_exception::Result;
use serde::Deserialize;
use structopt::StructOpt;
use structopt_toml::StructOptToml;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, StructOpt, StructOptToml)]
#[structopt(about = "raft group options of one discovery replica")]
pub struct RaftConfig {
    /// Identify a config. Only used in tests to isolate sled trees of
    /// concurrently running cases.
    #[structopt(long, default_value = "")]
    pub config_id: String,

    /// The node id. Zero is invalid; ids map to `peers` one-based.
    #[structopt(long, default_value = "0")]
    pub id: NodeId,

    /// The addresses `host:port` of every replica, in node-id order.
    #[structopt(long)]
    pub peers: Vec<String>,

    #[structopt(long, default_value = "127.0.0.1")]
    pub raft_api_host: String,

    #[structopt(long, default_value = "9191")]
    pub raft_api_port: u32,

    /// Directory the sled db lives in.
    #[structopt(long, default_value = "./_beacon_dir")]
    pub raft_dir: String,

    /// Skip fsync after writes. Only for tests, data is lost on crash.
    #[structopt(long)]
    pub no_sync: bool,

    /// Prefix of every sled tree name this node opens.
    #[structopt(long, default_value = "beacon")]
    pub sled_tree_prefix: String,

    #[structopt(long, default_value = "500")]
    pub heartbeat_interval_ms: u64,

    #[structopt(long, default_value = "1500")]
    pub election_timeout_min_ms: u64,

    #[structopt(long, default_value = "3000")]
    pub election_timeout_max_ms: u64,

    /// Build a snapshot after this many new log entries.
    #[structopt(long, default_value = "1024")]
    pub snapshot_logs_since_last: u64,

    /// How long a dropped instance address refuses re-registration, seconds.
    #[structopt(long, default_value = "3600")]
    pub instance_quarantine_secs: u64,

    #[structopt(long, default_value = "50")]
    pub tso_update_interval_ms: u64,

    #[structopt(long, default_value = "3000")]
    pub tso_save_interval_ms: u64,

    #[structopt(long, default_value = "262144")]
    pub tso_max_logical: i64,

    #[structopt(long, default_value = "100")]
    pub tso_update_guard_ms: i64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig::empty()
    }
}

impl RaftConfig {
    pub fn empty() -> Self {
        <Self as StructOpt>::from_iter(&Vec::<&'static str>::new())
    }

    pub fn raft_api_addr(&self) -> String {
        format!("{}:{}", self.raft_api_host, self.raft_api_port)
    }

    pub fn is_sync(&self) -> bool {
        !self.no_sync
    }

    /// Address of a peer by node id, or an empty hint when unknown.
    pub fn peer_addr(&self, id: NodeId) -> String {
        if id == 0 || id as usize > self.peers.len() {
            return "".to_string();
        }
        self.peers[(id - 1) as usize].clone()
    }

    pub fn node_id_of(&self, addr: &str) -> Option<NodeId> {
        self.peers
            .iter()
            .position(|p| p == addr)
            .map(|i| (i + 1) as NodeId)
    }

    pub fn tree_name(&self, name: impl std::fmt::Display) -> String {
        format!("{}{}/{}", self.sled_tree_prefix, self.config_id, name)
    }

    /// Build the raft runtime config for one group. `election_override_ms`
    /// comes from a persisted ResetVoteTime.
    pub fn raft_config(
        &self,
        group_name: &str,
        election_override_ms: Option<u64>,
    ) -> Result<async_raft::Config> {
        let election_min = election_override_ms.unwrap_or(self.election_timeout_min_ms);
        let election_max = std::cmp::max(self.election_timeout_max_ms, election_min * 2);

        async_raft::Config::build(format!("beacon-{}", group_name))
            .heartbeat_interval(self.heartbeat_interval_ms)
            .election_timeout_min(election_min)
            .election_timeout_max(election_max)
            .snapshot_policy(SnapshotPolicy::LogsSinceLast(self.snapshot_logs_since_last))
            .validate()
            .map_err(|e| ErrorCode::InvalidConfig(format!("raft config: {}", e)))
    }

    pub fn check(&self) -> Result<()> {
        if self.id == 0 {
            return Err(ErrorCode::InvalidConfig("node id must not be 0"));
        }
        if self.peers.is_empty() {
            return Err(ErrorCode::InvalidConfig("peers must not be empty"));
        }
        if self.id as usize > self.peers.len() {
            return Err(ErrorCode::InvalidConfig(format!(
                "node id {} out of peers range 1..={}",
                self.id,
                self.peers.len()
            )));
        }
        Ok(())
    }
}
