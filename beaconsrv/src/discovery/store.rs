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

use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use async_raft::async_trait::async_trait;
use async_raft::raft::Entry;
use async_raft::raft::EntryPayload;
use async_raft::raft::MembershipConfig;
use async_raft::storage::HardState;
use async_raft::storage::InitialState;
use async_raft::storage::Snapshot;
use async_raft::storage::SnapshotMeta;
use async_raft::LogId;
use async_raft::NodeId;
use async_raft::RaftStorage;
use common_beacon_raft_store::key_spaces::StoredSnapshot;
use common_beacon_raft_store::state_machine::GroupStateMachine;
use common_beacon_raft_store::RaftConfig;
use common_beacon_raft_store::RaftLog;
use common_beacon_raft_store::RaftState;
use common_sled_store::get_sled_db;
use common_tracing::tracing;
use common_base::tokio::sync::RwLock;

/// Returned from `apply_to_state_machine` to signal that raft must shut down
/// to protect the data. Only unrecoverable storage damage raises it.
#[derive(thiserror::Error, Debug)]
#[error("fatal storage error: {msg}")]
pub struct ShutdownError {
    msg: String,
}

/// The storage skeleton shared by the three groups: sled-backed log and hard
/// state, one state machine behind an RwLock (the per-group apply task), and
/// durable snapshot plumbing. The group-specific behavior enters through
/// `SM: GroupStateMachine`.
pub struct BeaconRaftStore<SM: GroupStateMachine> {
    pub id: NodeId,

    config: RaftConfig,

    /// True if the raft state existed before this boot.
    is_opened: bool,

    pub log: RaftLog<SM::Req>,

    pub raft_state: RaftState,

    pub state_machine: RwLock<SM>,

    current_snapshot: RwLock<Option<StoredSnapshot>>,
}

impl<SM: GroupStateMachine> BeaconRaftStore<SM> {
    /// Open an existing store (`open == Some(())`) or create one
    /// (`create == Some(())`); with both, opening wins.
    #[tracing::instrument(level = "debug", skip(config, open, create))]
    pub async fn open_create(
        config: &RaftConfig,
        open: Option<()>,
        create: Option<()>,
    ) -> common_exception::Result<BeaconRaftStore<SM>> {
        let db = get_sled_db();

        let raft_state = RaftState::open_create(&db, config, SM::GROUP_ID, open, create).await?;
        let is_opened = raft_state.is_open();

        let log = RaftLog::open(&db, config, SM::GROUP_ID)?;
        let sm = SM::open(config).await?;
        let current_snapshot = raft_state.read_snapshot()?;

        tracing::info!(
            "group {} store opened, id={}, restarted={}",
            SM::GROUP_NAME,
            raft_state.id,
            is_opened
        );

        Ok(BeaconRaftStore {
            id: raft_state.id,
            config: config.clone(),
            is_opened,
            log,
            raft_state,
            state_machine: RwLock::new(sm),
            current_snapshot: RwLock::new(current_snapshot),
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_opened
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    /// Reverse-search the log for the most recent membership config; fall
    /// back to the state machine, then to a single-node config.
    pub async fn get_membership_from_log(
        &self,
        upto_index: Option<u64>,
    ) -> common_exception::Result<MembershipConfig> {
        let range: (std::ops::Bound<u64>, std::ops::Bound<u64>) = match upto_index {
            Some(x) => (std::ops::Bound::Unbounded, std::ops::Bound::Included(x)),
            None => (std::ops::Bound::Unbounded, std::ops::Bound::Unbounded),
        };

        let entries = self.log.range_values(range)?;
        for entry in entries.iter().rev() {
            if let EntryPayload::ConfigChange(ref change) = entry.payload {
                return Ok(change.membership.clone());
            }
        }

        let sm = self.state_machine.read().await;
        if let Some(m) = sm.get_membership()? {
            return Ok(m);
        }
        Ok(MembershipConfig::new_initial(self.id))
    }

    fn snapshot_id(last: &LogId) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("{}-{}-{}", last.term, last.index, ts)
    }
}

#[async_trait]
impl<SM: GroupStateMachine> RaftStorage<SM::Req, SM::Resp> for BeaconRaftStore<SM> {
    type SnapshotData = Cursor<Vec<u8>>;
    type ShutdownError = ShutdownError;

    async fn get_membership_config(&self) -> Result<MembershipConfig> {
        let m = self.get_membership_from_log(None).await?;
        Ok(m)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_initial_state(&self) -> Result<InitialState> {
        let hard_state = self.raft_state.read_hard_state()?;

        let hs = match hard_state {
            None => {
                let initial = InitialState::new_initial(self.id);
                self.raft_state.save_hard_state(&initial.hard_state).await?;
                return Ok(initial);
            }
            Some(hs) => hs,
        };

        let last_log_id = self.log.last_log_id()?;
        let sm = self.state_machine.read().await;
        let last_applied_log = sm.get_last_applied()?;
        drop(sm);

        let membership = self.get_membership_from_log(None).await?;

        let last = if last_log_id.index >= last_applied_log.index {
            last_log_id
        } else {
            last_applied_log
        };

        Ok(InitialState {
            last_log_id: last,
            last_applied_log,
            hard_state: hs,
            membership,
        })
    }

    async fn save_hard_state(&self, hs: &HardState) -> Result<()> {
        self.raft_state.save_hard_state(hs).await?;
        Ok(())
    }

    async fn get_log_entries<RNG: RangeBounds<u64> + Clone + Debug + Send + Sync>(
        &self,
        range: RNG,
    ) -> Result<Vec<Entry<SM::Req>>> {
        let entries = self.log.range_values(range)?;
        Ok(entries)
    }

    async fn try_get_log_entry(&self, log_index: u64) -> Result<Option<Entry<SM::Req>>> {
        let entry = self.log.get(&log_index)?;
        Ok(entry)
    }

    async fn get_last_log_id(&self) -> Result<LogId> {
        let last_in_log = self.log.last_log_id()?;
        let last_applied = {
            let sm = self.state_machine.read().await;
            sm.get_last_applied()?
        };
        if last_in_log.index >= last_applied.index {
            Ok(last_in_log)
        } else {
            Ok(last_applied)
        }
    }

    async fn delete_logs_from<RNG: RangeBounds<u64> + Clone + Debug + Send + Sync>(
        &self,
        range: RNG,
    ) -> Result<()> {
        self.log.range_remove(range).await?;
        Ok(())
    }

    async fn append_to_log(&self, entries: &[&Entry<SM::Req>]) -> Result<()> {
        self.log.append(entries).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, entries))]
    async fn apply_to_state_machine(&self, entries: &[&Entry<SM::Req>]) -> Result<Vec<SM::Resp>> {
        let mut responses = Vec::with_capacity(entries.len());
        let mut sm = self.state_machine.write().await;
        for entry in entries {
            let resp = sm.apply(entry).await?;
            responses.push(resp);
        }
        Ok(responses)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn do_log_compaction(&self) -> Result<Snapshot<Self::SnapshotData>> {
        let (data, last_applied, membership) = {
            let sm = self.state_machine.read().await;
            let data = sm.snapshot_data()?;
            let last_applied = sm.get_last_applied()?;
            let membership = sm.get_membership()?.unwrap_or_default();
            (data, last_applied, membership)
        };

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            membership,
            snapshot_id: Self::snapshot_id(&last_applied),
        };

        // Logs covered by the snapshot are dropped; the purged marker keeps
        // the log anchored at the compaction point.
        if last_applied.index > 0 {
            self.log.range_remove(..=last_applied.index).await?;
            self.log
                .insert(&Entry::new_purged_marker(last_applied))
                .await?;
        }

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };
        self.raft_state.write_snapshot(&stored).await?;
        *self.current_snapshot.write().await = Some(stored);

        tracing::info!(
            "group {} snapshot built: {} ({} bytes)",
            SM::GROUP_NAME,
            meta.snapshot_id,
            data.len()
        );

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }

    async fn begin_receiving_snapshot(&self) -> Result<Box<Self::SnapshotData>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    #[tracing::instrument(level = "debug", skip(self, snapshot))]
    async fn finalize_snapshot_installation(
        &self,
        meta: &SnapshotMeta,
        snapshot: Box<Self::SnapshotData>,
    ) -> Result<()> {
        let data = snapshot.into_inner();

        // Fence: a crash mid-install leaves (installing != installed) and the
        // next install must not proceed over a half-written state machine.
        let (installing, installed) = self.raft_state.read_state_machine_id()?;
        if installing != installed {
            return Err(anyhow::anyhow!(
                "another snapshot install is not finished yet: {} {}",
                installing,
                installed
            ));
        }
        self.raft_state
            .write_state_machine_id(&(installed + 1, installed))
            .await?;

        {
            let mut sm = self.state_machine.write().await;
            sm.install_snapshot_data(&data).await?;
            sm.set_last_applied(meta.last_log_id).await?;
            sm.set_membership(meta.membership.clone()).await?;
        }

        self.raft_state
            .write_state_machine_id(&(installed + 1, installed + 1))
            .await?;

        self.log.range_remove(..=meta.last_log_id.index).await?;
        self.log
            .insert(&Entry::new_purged_marker(meta.last_log_id))
            .await?;

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data,
        };
        self.raft_state.write_snapshot(&stored).await?;
        *self.current_snapshot.write().await = Some(stored);

        tracing::info!(
            "group {} snapshot installed: {}",
            SM::GROUP_NAME,
            meta.snapshot_id
        );
        Ok(())
    }

    async fn get_current_snapshot(&self) -> Result<Option<Snapshot<Self::SnapshotData>>> {
        let stored = self.current_snapshot.read().await;
        Ok(stored.as_ref().map(|s| Snapshot {
            meta: s.meta.clone(),
            snapshot: Box::new(Cursor::new(s.data.clone())),
        }))
    }
}
