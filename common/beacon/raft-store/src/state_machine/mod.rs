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
mod auto_incr_test;
#[cfg(test)]
mod catalog_test;
#[cfg(test)]
mod tso_test;

mod auto_incr;
mod catalog;
mod tso;

use async_raft::raft::Entry;
use async_raft::raft::MembershipConfig;
use async_raft::AppData;
use async_raft::AppDataResponse;
use async_raft::LogId;
use async_trait::async_trait;
pub use auto_incr::AutoIncrStateMachine;
pub use catalog::CatalogStateMachine;
use common_exception::ErrorCode;
use common_exception::Result;
use common_sled_store::sled::IVec;
use common_sled_store::SledOrderedSerde;
use serde::Deserialize;
use serde::Serialize;
pub use tso::clock_realtime_ms;
pub use tso::TsoStateMachine;

use crate::config::RaftConfig;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateMachineMetaKey {
    /// The last applied log id.
    LastApplied,
    /// Whether the state machine has gone through an initialization.
    Initialized,
    /// The last applied membership config.
    LastMembership,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum StateMachineMetaValue {
    LogId(LogId),
    Bool(bool),
    Membership(MembershipConfig),
}

impl SledOrderedSerde for StateMachineMetaKey {
    fn ser(&self) -> Result<IVec> {
        let i = match self {
            StateMachineMetaKey::LastApplied => 1u8,
            StateMachineMetaKey::Initialized => 2,
            StateMachineMetaKey::LastMembership => 3,
        };
        Ok(IVec::from(&[i][..]))
    }

    fn de<T: AsRef<[u8]>>(v: T) -> Result<Self> {
        let key = match v.as_ref().first() {
            Some(1) => StateMachineMetaKey::LastApplied,
            Some(2) => StateMachineMetaKey::Initialized,
            Some(3) => StateMachineMetaKey::LastMembership,
            _ => {
                return Err(ErrorCode::MetaStoreDamaged("invalid state machine meta key"));
            }
        };
        Ok(key)
    }
}

/// A key-value pair in a snapshot is a vec of two `Vec<u8>`.
pub type SnapshotKeyValue = Vec<Vec<u8>>;

/// Snapshot data for serialization and for transport.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct SerializableSnapshot {
    pub kvs: Vec<SnapshotKeyValue>,
}

/// What a group-specific state machine provides to the shared raft storage
/// skeleton: apply, meta bookkeeping and snapshot hooks. One impl per group.
#[async_trait]
pub trait GroupStateMachine: Send + Sync + Sized + 'static {
    type Req: AppData;
    type Resp: AppDataResponse + Default;

    const GROUP_ID: u64;
    const GROUP_NAME: &'static str;

    async fn open(config: &RaftConfig) -> Result<Self>;

    /// Apply one committed entry: mutate memory and storage in one batch and
    /// produce the response. A failed validation fills an error code on the
    /// response but the entry still counts as applied.
    async fn apply(&mut self, entry: &Entry<Self::Req>) -> Result<Self::Resp>;

    fn get_last_applied(&self) -> Result<LogId>;
    async fn set_last_applied(&mut self, log_id: LogId) -> Result<()>;

    fn get_membership(&self) -> Result<Option<MembershipConfig>>;
    async fn set_membership(&mut self, membership: MembershipConfig) -> Result<()>;

    /// Serialize the full state for snapshot transfer.
    fn snapshot_data(&self) -> Result<Vec<u8>>;

    /// Wipe the state and replace it from snapshot bytes.
    async fn install_snapshot_data(&mut self, data: &[u8]) -> Result<()>;
}
