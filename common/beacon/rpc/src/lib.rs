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

pub mod protobuf {
    tonic::include_proto!("beaconrpc");
}

pub use protobuf::beacon_router_client::BeaconRouterClient;
pub use protobuf::beacon_router_server::BeaconRouter;
pub use protobuf::beacon_router_server::BeaconRouterServer;
pub use protobuf::beacon_service_client::BeaconServiceClient;
pub use protobuf::beacon_service_server::BeaconService;
pub use protobuf::beacon_service_server::BeaconServiceServer;
pub use protobuf::BeaconMes;

impl BeaconMes {
    pub fn from_data(data: String) -> Self {
        Self { data }
    }
}
