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

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_raft::raft::Entry;
use async_raft::raft::EntryPayload;
use async_raft::raft::MembershipConfig;
use async_raft::LogId;
use async_trait::async_trait;
use common_beacon_types::ErrCode;
use common_beacon_types::TsoOpType;
use common_beacon_types::TsoRequest;
use common_beacon_types::TsoResponse;
use common_beacon_types::TsoTimestamp;
use common_beacon_types::GROUP_TSO;
use common_exception::ErrorCode;
use common_exception::Result;
use common_sled_store::get_sled_db;
use common_sled_store::SledBatch;
use common_sled_store::SledTree;
use common_tracing::tracing;

use crate::config::RaftConfig;
use crate::key_spaces::StateMachineMeta;
use crate::key_spaces::TsoMeta;
use crate::state_machine::GroupStateMachine;
use crate::state_machine::StateMachineMetaKey;
use crate::state_machine::StateMachineMetaValue;

const K_LAST_SAVE: &str = "last_save_physical";

pub fn clock_realtime_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The state machine of the timestamp group (group 2).
///
/// `current` lives in memory and is advanced by `acquire` on the leader;
/// only the periodic `UpdateTso`/`ResetTso` go through the raft log.
/// `last_save_physical` is the durable high watermark: replayed updates may
/// never move it or the physical clock backwards.
pub struct TsoStateMachine {
    pub sm_tree: SledTree,

    current: TsoTimestamp,
    last_save_physical: i64,
}

impl TsoStateMachine {
    #[tracing::instrument(level = "debug", skip(config))]
    pub async fn open(config: &RaftConfig) -> Result<TsoStateMachine> {
        let db = get_sled_db();
        let tree_name = config.tree_name(format!("state_machine/{}", GROUP_TSO));
        let sm_tree = SledTree::open(&db, tree_name, config.is_sync())?;

        let last_save_physical = sm_tree
            .key_space::<TsoMeta>()
            .get(&K_LAST_SAVE.to_string())?
            .unwrap_or(0);

        Ok(TsoStateMachine {
            sm_tree,
            current: TsoTimestamp::default(),
            last_save_physical,
        })
    }

    pub fn current(&self) -> TsoTimestamp {
        self.current
    }

    pub fn last_save_physical(&self) -> i64 {
        self.last_save_physical
    }

    /// Take `count` timestamps out of the current window, or report that the
    /// logical space is exhausted (`None`) so the caller retries after the
    /// next window advance. Not replicated; leader-only.
    pub fn acquire(&mut self, count: u64, max_logical: i64) -> Option<TsoTimestamp> {
        if self.current.physical == 0 {
            return None;
        }
        let new_logical = self.current.logical + count as i64;
        if new_logical >= max_logical {
            return None;
        }
        let ts = self.current;
        self.current.logical = new_logical;
        Some(ts)
    }

    fn sm_meta(&self) -> common_sled_store::AsKeySpace<StateMachineMeta> {
        self.sm_tree.key_space::<StateMachineMeta>()
    }

    fn meta_batch(&self, log_id: LogId) -> Result<SledBatch> {
        let mut batch = SledBatch::default();
        batch.insert::<StateMachineMeta>(
            &StateMachineMetaKey::LastApplied,
            &StateMachineMetaValue::LogId(log_id),
        )?;
        Ok(batch)
    }

    async fn apply_cmd(&mut self, req: &TsoRequest, log_id: LogId) -> Result<TsoResponse> {
        let batch = self.meta_batch(log_id)?;
        match req.op_type {
            TsoOpType::UpdateTso => self.update_tso(req, batch, false).await,
            TsoOpType::ResetTso => self.update_tso(req, batch, req.force).await,
            _ => {
                self.sm_tree.apply_batch(batch).await?;
                Ok(TsoResponse::error(
                    req.op_type,
                    ErrCode::UnknownReqType,
                    "unsupported request type",
                ))
            }
        }
    }

    /// Install `(current, save)` from a replicated update. Both the physical
    /// clock and the saved watermark must move forward unless forced.
    async fn update_tso(
        &mut self,
        req: &TsoRequest,
        mut batch: SledBatch,
        force: bool,
    ) -> Result<TsoResponse> {
        let (current, save_physical) = match (req.current_timestamp, req.save_physical) {
            (Some(c), Some(s)) => (c, s),
            _ => {
                self.sm_tree.apply_batch(batch).await?;
                return Ok(TsoResponse::error(
                    req.op_type,
                    ErrCode::InputParamError,
                    "no current_timestamp or save_physical",
                ));
            }
        };

        if (save_physical < self.last_save_physical || current.physical < self.current.physical)
            && !force
        {
            tracing::warn!(
                "time fallback refused, save:({}, {}) current:({}, {})",
                save_physical,
                self.last_save_physical,
                current.physical,
                self.current.physical
            );
            self.sm_tree.apply_batch(batch).await?;
            let mut resp =
                TsoResponse::error(req.op_type, ErrCode::InternalError, "time can't fallback");
            resp.start_timestamp = Some(self.current);
            resp.save_physical = Some(self.last_save_physical);
            return Ok(resp);
        }

        batch.insert::<TsoMeta>(&K_LAST_SAVE.to_string(), &save_physical)?;
        self.sm_tree.apply_batch(batch).await?;

        self.last_save_physical = save_physical;
        self.current = current;

        let mut resp = TsoResponse::success(req.op_type);
        resp.start_timestamp = Some(current);
        resp.save_physical = Some(save_physical);
        Ok(resp)
    }
}

#[async_trait]
impl GroupStateMachine for TsoStateMachine {
    type Req = TsoRequest;
    type Resp = TsoResponse;

    const GROUP_ID: u64 = GROUP_TSO;
    const GROUP_NAME: &'static str = "tso";

    async fn open(config: &RaftConfig) -> Result<Self> {
        TsoStateMachine::open(config).await
    }

    async fn apply(&mut self, entry: &Entry<Self::Req>) -> Result<Self::Resp> {
        let log_id = entry.log_id;
        match entry.payload {
            EntryPayload::Normal(ref norm) => self.apply_cmd(&norm.data, log_id).await,
            EntryPayload::ConfigChange(ref mem) => {
                let mut batch = self.meta_batch(log_id)?;
                batch.insert::<StateMachineMeta>(
                    &StateMachineMetaKey::LastMembership,
                    &StateMachineMetaValue::Membership(mem.membership.clone()),
                )?;
                self.sm_tree.apply_batch(batch).await?;
                Ok(TsoResponse::default())
            }
            _ => {
                let batch = self.meta_batch(log_id)?;
                self.sm_tree.apply_batch(batch).await?;
                Ok(TsoResponse::default())
            }
        }
    }

    fn get_last_applied(&self) -> Result<LogId> {
        let last = self.sm_meta().get(&StateMachineMetaKey::LastApplied)?;
        Ok(match last {
            Some(StateMachineMetaValue::LogId(log_id)) => log_id,
            _ => LogId::default(),
        })
    }

    async fn set_last_applied(&mut self, log_id: LogId) -> Result<()> {
        self.sm_meta()
            .insert(
                &StateMachineMetaKey::LastApplied,
                &StateMachineMetaValue::LogId(log_id),
            )
            .await?;
        Ok(())
    }

    fn get_membership(&self) -> Result<Option<MembershipConfig>> {
        let mem = self.sm_meta().get(&StateMachineMetaKey::LastMembership)?;
        Ok(match mem {
            Some(StateMachineMetaValue::Membership(m)) => Some(m),
            _ => None,
        })
    }

    async fn set_membership(&mut self, membership: MembershipConfig) -> Result<()> {
        self.sm_meta()
            .insert(
                &StateMachineMetaKey::LastMembership,
                &StateMachineMetaValue::Membership(membership),
            )
            .await?;
        Ok(())
    }

    /// A single text blob with the saved physical watermark.
    fn snapshot_data(&self) -> Result<Vec<u8>> {
        Ok(self.last_save_physical.to_string().into_bytes())
    }

    async fn install_snapshot_data(&mut self, data: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ErrorCode::SnapshotDamaged(format!("tso snapshot: {}", e)))?;
        let last_save = text
            .trim()
            .parse::<i64>()
            .map_err(|e| ErrorCode::SnapshotDamaged(format!("tso snapshot: {}", e)))?;

        self.sm_tree
            .key_space::<TsoMeta>()
            .insert(&K_LAST_SAVE.to_string(), &last_save)
            .await?;
        self.last_save_physical = last_save;
        self.current = TsoTimestamp::default();
        Ok(())
    }
}
