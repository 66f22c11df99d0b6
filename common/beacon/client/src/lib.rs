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

#[cfg(test)]
mod config_cache_test;
#[cfg(test)]
mod config_client_test;

mod config_cache;
mod config_client;
mod discovery_client;
mod router_sender;
mod sender;

pub use config_cache::ConfigCache;
pub use config_client::ConfigClient;
pub use config_client::ConfigEventData;
pub use config_client::ConfigEventListener;
pub use config_client::ConfigFetcher;
pub use discovery_client::DiscoveryClient;
pub use router_sender::RouterSender;
pub use sender::DiscoverySender;
