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

use std::marker::PhantomData;
use std::ops::RangeBounds;

use async_raft::raft::Entry;
use async_raft::AppData;
use async_raft::LogId;
use common_exception::Result;
use common_sled_store::AsKeySpace;
use common_sled_store::SledTree;

use crate::config::RaftConfig;
use crate::key_spaces::Logs;

/// The persisted raft log of one group.
pub struct RaftLog<D: AppData> {
    pub inner: SledTree,
    _p: PhantomData<D>,
}

impl<D: AppData> RaftLog<D> {
    /// Open the log tree of group `group_id`, creating it if absent.
    pub fn open(db: &common_sled_store::sled::Db, config: &RaftConfig, group_id: u64) -> Result<RaftLog<D>> {
        let tree_name = config.tree_name(format!("raft_log/{}", group_id));
        let inner = SledTree::open(db, tree_name, config.is_sync())?;
        Ok(RaftLog {
            inner,
            _p: PhantomData,
        })
    }

    pub fn logs(&self) -> AsKeySpace<Logs<D>> {
        self.inner.key_space::<Logs<D>>()
    }

    pub async fn insert(&self, entry: &Entry<D>) -> Result<Option<Entry<D>>> {
        self.logs().insert(&entry.log_id.index, entry).await
    }

    pub async fn append(&self, entries: &[&Entry<D>]) -> Result<()> {
        for entry in entries {
            self.insert(entry).await?;
        }
        Ok(())
    }

    pub fn get(&self, index: &u64) -> Result<Option<Entry<D>>> {
        self.logs().get(index)
    }

    pub fn last(&self) -> Result<Option<(u64, Entry<D>)>> {
        self.logs().last()
    }

    pub fn last_log_id(&self) -> Result<LogId> {
        let last = self.last()?;
        Ok(match last {
            None => LogId { term: 0, index: 0 },
            Some((_, entry)) => entry.log_id,
        })
    }

    pub fn range_values<R>(&self, range: R) -> Result<Vec<Entry<D>>>
    where R: RangeBounds<u64> {
        Ok(self
            .logs()
            .range_kvs(range)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    pub fn range_keys<R>(&self, range: R) -> Result<Vec<u64>>
    where R: RangeBounds<u64> {
        self.logs().range_keys(range)
    }

    pub async fn range_remove<R>(&self, range: R) -> Result<()>
    where R: RangeBounds<u64> {
        self.logs().range_remove(range, true).await
    }
}
