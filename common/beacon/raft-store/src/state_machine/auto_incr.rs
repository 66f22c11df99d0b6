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

use std::collections::BTreeMap;

use async_raft::raft::Entry;
use async_raft::raft::EntryPayload;
use async_raft::raft::MembershipConfig;
use async_raft::LogId;
use async_trait::async_trait;
use common_beacon_types::ErrCode;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::OpType;
use common_beacon_types::GROUP_AUTO_INCR;
use common_exception::Result;
use common_sled_store::get_sled_db;
use common_sled_store::SledBatch;
use common_sled_store::SledTree;
use common_tracing::tracing;

use crate::config::RaftConfig;
use crate::key_spaces::IdRanges;
use crate::key_spaces::StateMachineMeta;
use crate::state_machine::GroupStateMachine;
use crate::state_machine::StateMachineMetaKey;
use crate::state_machine::StateMachineMetaValue;

/// The state machine of the id-allocator group (group 1): one monotonically
/// increasing uint64 watermark per servlet.
///
/// The watermark rows are written in the same batch as the applied log id,
/// so a crash can never hand out a range twice.
pub struct AutoIncrStateMachine {
    pub sm_tree: SledTree,

    ranges: BTreeMap<i64, u64>,
}

impl AutoIncrStateMachine {
    #[tracing::instrument(level = "debug", skip(config))]
    pub async fn open(config: &RaftConfig) -> Result<AutoIncrStateMachine> {
        let db = get_sled_db();
        let tree_name = config.tree_name(format!("state_machine/{}", GROUP_AUTO_INCR));
        let sm_tree = SledTree::open(&db, tree_name, config.is_sync())?;

        let mut sm = AutoIncrStateMachine {
            sm_tree,
            ranges: BTreeMap::new(),
        };
        sm.rebuild_indexes()?;
        Ok(sm)
    }

    fn rebuild_indexes(&mut self) -> Result<()> {
        self.ranges = self
            .sm_tree
            .key_space::<IdRanges>()
            .range_kvs(..)?
            .into_iter()
            .collect();
        Ok(())
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

    async fn reject(
        &self,
        batch: SledBatch,
        op_type: OpType,
        errmsg: impl Into<String>,
    ) -> Result<ManagerResponse> {
        let errmsg = errmsg.into();
        tracing::warn!("auto-increment op {:?} refused: {}", op_type, errmsg);
        self.sm_tree.apply_batch(batch).await?;
        Ok(ManagerResponse::error(
            op_type,
            ErrCode::InputParamError,
            errmsg,
        ))
    }

    async fn apply_cmd(
        &mut self,
        req: &ManagerRequest,
        log_id: LogId,
    ) -> Result<ManagerResponse> {
        let batch = self.meta_batch(log_id)?;
        match req.op_type {
            OpType::AddIdForAutoIncrement => self.add_servlet_id(req, batch).await,
            OpType::DropIdForAutoIncrement => self.drop_servlet_id(req, batch).await,
            OpType::GenIdForAutoIncrement => self.gen_id(req, batch).await,
            OpType::UpdateForAutoIncrement => self.update(req, batch).await,
            _ => {
                self.sm_tree.apply_batch(batch).await?;
                Ok(ManagerResponse::error(
                    req.op_type,
                    ErrCode::UnknownReqType,
                    "unsupported request type",
                ))
            }
        }
    }

    async fn add_servlet_id(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let info = match &req.auto_increment {
            Some(i) => i,
            None => return self.reject(batch, req.op_type, "no auto_increment").await,
        };
        if self.ranges.contains_key(&info.servlet_id) {
            return self.reject(batch, req.op_type, "servlet id has exist").await;
        }

        let start = info.start_id.unwrap_or(0);
        batch.insert::<IdRanges>(&info.servlet_id, &start)?;
        self.sm_tree.apply_batch(batch).await?;
        self.ranges.insert(info.servlet_id, start);

        tracing::info!(
            "add servlet id for auto_increment success, servlet_id:{} start:{}",
            info.servlet_id,
            start
        );
        let mut resp = ManagerResponse::success(req.op_type);
        resp.start_id = Some(start);
        Ok(resp)
    }

    async fn drop_servlet_id(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let info = match &req.auto_increment {
            Some(i) => i,
            None => return self.reject(batch, req.op_type, "no auto_increment").await,
        };
        if !self.ranges.contains_key(&info.servlet_id) {
            return self.reject(batch, req.op_type, "servlet id not exist").await;
        }

        batch.remove::<IdRanges>(&info.servlet_id)?;
        self.sm_tree.apply_batch(batch).await?;
        self.ranges.remove(&info.servlet_id);

        tracing::info!(
            "drop servlet id for auto_increment success, servlet_id:{}",
            info.servlet_id
        );
        Ok(ManagerResponse::success(req.op_type))
    }

    /// Hand out `[start, end)` where `start = max(current, req.start + 1)`
    /// and `end = start + count`; the new watermark is `end`.
    async fn gen_id(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let info = match &req.auto_increment {
            Some(i) => i,
            None => return self.reject(batch, req.op_type, "no auto_increment").await,
        };
        let current = match self.ranges.get(&info.servlet_id) {
            Some(v) => *v,
            None => {
                return self
                    .reject(batch, req.op_type, "servlet has no auto increment")
                    .await;
            }
        };

        let mut start = current;
        if let Some(req_start) = info.start_id {
            if start < req_start + 1 {
                start = req_start + 1;
            }
        }
        let end = start + info.count;

        batch.insert::<IdRanges>(&info.servlet_id, &end)?;
        self.sm_tree.apply_batch(batch).await?;
        self.ranges.insert(info.servlet_id, end);

        tracing::debug!(
            "gen_id for auto_increment success, servlet_id:{} [{}, {})",
            info.servlet_id,
            start,
            end
        );
        let mut resp = ManagerResponse::success(req.op_type);
        resp.start_id = Some(start);
        resp.end_id = Some(end);
        Ok(resp)
    }

    async fn update(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let info = match &req.auto_increment {
            Some(i) => i,
            None => return self.reject(batch, req.op_type, "no auto_increment").await,
        };
        let current = match self.ranges.get(&info.servlet_id) {
            Some(v) => *v,
            None => {
                return self
                    .reject(batch, req.op_type, "servlet has no auto increment")
                    .await;
            }
        };

        if info.start_id.is_none() && info.increment_id.is_none() {
            return self
                .reject(batch, req.op_type, "start_id or increment_id all not exist")
                .await;
        }
        if info.start_id.is_some() && info.increment_id.is_some() {
            return self
                .reject(batch, req.op_type, "start_id and increment_id all exist")
                .await;
        }
        // Rollback requires force.
        if let Some(start) = info.start_id {
            if current > start + 1 && !info.force {
                return self.reject(batch, req.op_type, "not support rollback").await;
            }
        }

        let new = match (info.start_id, info.increment_id) {
            (Some(start), None) => start + 1,
            (None, Some(incr)) => current + incr,
            _ => unreachable!("checked above"),
        };

        batch.insert::<IdRanges>(&info.servlet_id, &new)?;
        self.sm_tree.apply_batch(batch).await?;
        self.ranges.insert(info.servlet_id, new);

        tracing::info!(
            "update start_id for auto_increment success, servlet_id:{} new:{}",
            info.servlet_id,
            new
        );
        let mut resp = ManagerResponse::success(req.op_type);
        resp.start_id = Some(new);
        Ok(resp)
    }
}

#[async_trait]
impl GroupStateMachine for AutoIncrStateMachine {
    type Req = ManagerRequest;
    type Resp = ManagerResponse;

    const GROUP_ID: u64 = GROUP_AUTO_INCR;
    const GROUP_NAME: &'static str = "auto_incr";

    async fn open(config: &RaftConfig) -> Result<Self> {
        AutoIncrStateMachine::open(config).await
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
                Ok(ManagerResponse::default())
            }
            _ => {
                let batch = self.meta_batch(log_id)?;
                self.sm_tree.apply_batch(batch).await?;
                Ok(ManagerResponse::default())
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

    /// A json object mapping servlet id to watermark.
    fn snapshot_data(&self) -> Result<Vec<u8>> {
        let data = serde_json::to_vec(&self.ranges)?;
        Ok(data)
    }

    async fn install_snapshot_data(&mut self, data: &[u8]) -> Result<()> {
        let ranges: BTreeMap<i64, u64> = serde_json::from_slice(data)?;

        let ks = self.sm_tree.key_space::<IdRanges>();
        ks.clear().await?;

        let mut batch = SledBatch::default();
        for (servlet_id, watermark) in &ranges {
            batch.insert::<IdRanges>(servlet_id, watermark)?;
        }
        self.sm_tree.apply_batch(batch).await?;

        self.ranges = ranges;
        Ok(())
    }
}
