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

use common_beacon_raft_store::RaftConfig;
use common_exception::Result;
use serde::Deserialize;
use structopt::StructOpt;
use structopt_toml::StructOptToml;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, StructOpt, StructOptToml)]
#[structopt(about = "beacon discovery server")]
pub struct Config {
    /// Load options from a toml file; flags override it.
    #[structopt(long, short = "c", default_value = "")]
    pub config_file: String,

    #[structopt(long, default_value = "INFO")]
    pub log_level: String,

    #[structopt(long, default_value = "./_logs")]
    pub log_dir: String,

    /// Run the stateless router gateway next to the discovery service.
    #[structopt(long)]
    pub enable_router: bool,

    /// Address the router gateway listens on, when enabled.
    #[structopt(long, default_value = "127.0.0.1:9291")]
    pub router_api_address: String,

    /// Seconds between background storage flushes.
    #[structopt(long, default_value = "10")]
    pub flush_interval_secs: u64,

    #[structopt(flatten)]
    #[serde(flatten)]
    pub raft_config: RaftConfig,
}

impl Config {
    pub fn empty() -> Self {
        <Self as StructOpt>::from_iter(&Vec::<&'static str>::new())
    }

    /// Flags, with an optional toml underneath.
    pub fn load() -> Result<Self> {
        let stub = Self::from_args();
        if stub.config_file.is_empty() {
            return Ok(stub);
        }
        let body = std::fs::read_to_string(&stub.config_file)?;
        let mut conf = Self::from_args_with_toml(&body)
            .map_err(|e| common_exception::ErrorCode::InvalidConfig(format!("{}", e)))?;
        conf.config_file = stub.config_file;
        Ok(conf)
    }
}
