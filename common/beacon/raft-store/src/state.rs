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

use async_raft::storage::HardState;
use async_raft::NodeId;
use common_exception::ErrorCode;
use common_exception::Result;
use common_sled_store::AsKeySpace;
use common_sled_store::SledTree;
use common_tracing::tracing;

use crate::config::RaftConfig;
use crate::key_spaces::RaftStateKV;
use crate::key_spaces::RaftStateValue;
use crate::key_spaces::Snapshots;
use crate::key_spaces::StoredSnapshot;

const K_ID: &str = "id";
const K_HARD_STATE: &str = "hard_state";
const K_STATE_MACHINE_ID: &str = "state_machine_id";
const K_ELECTION_TIMEOUT: &str = "election_timeout_ms";

/// Durable raft state of one group that is not log or state machine:
/// node id, hard state, the snapshot-install fence, and the persisted
/// election-timeout override.
pub struct RaftState {
    pub id: NodeId,

    /// True the tree already carried an id, i.e. this is a restart.
    is_open: bool,

    inner: SledTree,
}

impl RaftState {
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Open/create the state of one group.
    ///
    /// `open == Some(())` reads an existing state; `create == Some(())`
    /// initializes a new one. With both set, open is tried first.
    #[tracing::instrument(level = "debug", skip(db, config))]
    pub async fn open_create(
        db: &common_sled_store::sled::Db,
        config: &RaftConfig,
        group_id: u64,
        open: Option<()>,
        create: Option<()>,
    ) -> Result<RaftState> {
        let tree_name = config.tree_name(format!("raft_state/{}", group_id));
        let inner = SledTree::open(db, tree_name, config.is_sync())?;

        let state = inner.key_space::<RaftStateKV>();
        let prev_id = state.get(&K_ID.to_string())?;

        let (id, is_open) = match (prev_id, open, create) {
            (Some(RaftStateValue::NodeId(id)), Some(()), _) => (id, true),
            (Some(RaftStateValue::NodeId(id)), None, Some(())) => {
                return Err(ErrorCode::MetaStoreAlreadyExists(format!(
                    "raft state of id={} already exists, refuse to create",
                    id
                )));
            }
            (None, _, Some(())) => (config.id, false),
            (None, Some(()), None) => {
                return Err(ErrorCode::MetaStoreNotFound("raft state absent, can not open"));
            }
            (Some(v), _, _) => {
                return Err(ErrorCode::MetaStoreDamaged(format!(
                    "expect NodeId, got: {:?}",
                    v
                )));
            }
            (None, None, None) => {
                return Err(ErrorCode::IllegalRequest("neither open nor create"));
            }
        };

        let rs = RaftState { id, is_open, inner };

        if !is_open {
            rs.state()
                .insert(&K_ID.to_string(), &RaftStateValue::NodeId(rs.id))
                .await?;
        }

        Ok(rs)
    }

    pub async fn save_hard_state(&self, hs: &HardState) -> Result<()> {
        self.state()
            .insert(
                &K_HARD_STATE.to_string(),
                &RaftStateValue::HardState(hs.clone()),
            )
            .await?;
        Ok(())
    }

    pub fn read_hard_state(&self) -> Result<Option<HardState>> {
        let hs = self.state().get(&K_HARD_STATE.to_string())?;
        match hs {
            None => Ok(None),
            Some(RaftStateValue::HardState(hs)) => Ok(Some(hs)),
            Some(v) => Err(ErrorCode::MetaStoreDamaged(format!(
                "expect HardState, got: {:?}",
                v
            ))),
        }
    }

    /// The `(installing, installed)` pair fencing concurrent snapshot installs.
    pub async fn write_state_machine_id(&self, id: &(u64, u64)) -> Result<()> {
        self.state()
            .insert(
                &K_STATE_MACHINE_ID.to_string(),
                &RaftStateValue::StateMachineId(*id),
            )
            .await?;
        Ok(())
    }

    pub fn read_state_machine_id(&self) -> Result<(u64, u64)> {
        let smid = self.state().get(&K_STATE_MACHINE_ID.to_string())?;
        match smid {
            None => Ok((0, 0)),
            Some(RaftStateValue::StateMachineId(v)) => Ok(v),
            Some(v) => Err(ErrorCode::MetaStoreDamaged(format!(
                "expect StateMachineId, got: {:?}",
                v
            ))),
        }
    }

    pub async fn write_election_timeout_ms(&self, ms: u64) -> Result<()> {
        self.state()
            .insert(
                &K_ELECTION_TIMEOUT.to_string(),
                &RaftStateValue::ElectionTimeoutMs(ms),
            )
            .await?;
        Ok(())
    }

    pub fn read_election_timeout_ms(&self) -> Result<Option<u64>> {
        let v = self.state().get(&K_ELECTION_TIMEOUT.to_string())?;
        match v {
            None => Ok(None),
            Some(RaftStateValue::ElectionTimeoutMs(ms)) => Ok(Some(ms)),
            Some(v) => Err(ErrorCode::MetaStoreDamaged(format!(
                "expect ElectionTimeoutMs, got: {:?}",
                v
            ))),
        }
    }

    /// Persist the latest built snapshot, so a restart keeps its compaction
    /// point.
    pub async fn write_snapshot(&self, snap: &StoredSnapshot) -> Result<()> {
        self.inner
            .key_space::<Snapshots>()
            .insert(&"current".to_string(), snap)
            .await?;
        Ok(())
    }

    pub fn read_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        self.inner.key_space::<Snapshots>().get(&"current".to_string())
    }

    fn state(&self) -> AsKeySpace<RaftStateKV> {
        self.inner.key_space::<RaftStateKV>()
    }
}
