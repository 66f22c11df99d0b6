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
use std::time::Duration;

use beaconsrv::configs::Config;
use beaconsrv::discovery::BeaconNode;
use beaconsrv::discovery::BeaconServiceImpl;
use beaconsrv::discovery::RouterServiceImpl;
use common_base::tokio;
use common_base::wait_for_shutdown_signal;
use common_beacon_client::DiscoverySender;
use common_beacon_rpc::BeaconRouterServer;
use common_beacon_rpc::BeaconServiceServer;
use common_exception::Result;
use common_tracing::init_tracing_with_file;
use common_tracing::tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let conf = Config::load()?;

    let _guards = init_tracing_with_file("beacon-discovery", &conf.log_dir, &conf.log_level);
    tracing::info!("config: {:?}", conf);

    // KV -> raft groups -> state machines come up inside boot; a failure
    // here exits nonzero.
    let node = BeaconNode::boot(&conf.raft_config).await?;

    let service = BeaconServiceImpl::new(node.clone());
    service.set_initialized();

    let addr = conf.raft_config.raft_api_addr().parse()?;
    tracing::info!("discovery service listening on {}", addr);

    let serve = tonic::transport::Server::builder()
        .add_service(BeaconServiceServer::new(service))
        .serve(addr);
    tokio::spawn(async move {
        if let Err(e) = serve.await {
            tracing::error!("discovery service stopped: {}", e);
        }
    });

    if conf.enable_router {
        let sender = Arc::new(DiscoverySender::new(conf.raft_config.peers.clone()));
        let router = RouterServiceImpl::new(sender);
        let router_addr = conf.router_api_address.parse()?;
        tracing::info!("router gateway listening on {}", router_addr);

        let serve = tonic::transport::Server::builder()
            .add_service(BeaconRouterServer::new(router))
            .serve(router_addr);
        tokio::spawn(async move {
            if let Err(e) = serve.await {
                tracing::error!("router gateway stopped: {}", e);
            }
        });
    }

    // Periodic storage flush; the final flush happens in shutdown().
    let flusher = node.clone();
    let flush_interval = Duration::from_secs(conf.flush_interval_secs.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(flush_interval).await;
            if let Err(e) = flusher.flush().await {
                tracing::warn!("periodic flush fail: {}", e);
            }
        }
    });

    wait_for_shutdown_signal().await?;
    tracing::info!("signal received, shutting down");

    node.shutdown().await?;
    Ok(())
}
