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

use std::fmt::Display;
use std::marker::PhantomData;
use std::ops::Bound;
use std::ops::RangeBounds;

use common_exception::ErrorCode;
use common_exception::Result;
use common_exception::ToErrorCode;
use common_tracing::tracing;
use sled::IVec;

use crate::SledKeySpace;

/// One sled::Tree with typed key-space views.
///
/// Writes optionally fsync before returning (`sync`), so that a write
/// acknowledged to raft is actually on disk.
#[derive(Debug, Clone)]
pub struct SledTree {
    pub name: String,

    /// Whether to fsync after every write.
    sync: bool,

    pub tree: sled::Tree,
}

/// A batch of writes that spans key spaces of one tree and commits atomically.
#[derive(Default)]
pub struct SledBatch {
    inner: sled::Batch,
}

impl SledBatch {
    pub fn insert<KS: SledKeySpace>(&mut self, key: &KS::K, value: &KS::V) -> Result<()> {
        let k = KS::serialize_key(key)?;
        let v = KS::serialize_value(value)?;
        self.inner.insert(k.as_ref(), v.as_ref());
        Ok(())
    }

    pub fn remove<KS: SledKeySpace>(&mut self, key: &KS::K) -> Result<()> {
        let k = KS::serialize_key(key)?;
        self.inner.remove(k.as_ref());
        Ok(())
    }
}

impl SledTree {
    #[tracing::instrument(level = "debug", skip(db, tree_name), fields(name = %tree_name))]
    pub fn open<N: AsRef<str> + Display>(db: &sled::Db, tree_name: N, sync: bool) -> Result<SledTree> {
        let t = db
            .open_tree(tree_name.as_ref())
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("open tree: {}", tree_name)
            })?;

        let rl = SledTree {
            name: tree_name.as_ref().to_string(),
            sync,
            tree: t,
        };
        Ok(rl)
    }

    /// Borrows the SledTree as a typed key space.
    pub fn key_space<KS: SledKeySpace>(&self) -> AsKeySpace<KS> {
        AsKeySpace::<KS> {
            inner: self,
            phantom: PhantomData,
        }
    }

    /// Commit a multi-key-space batch atomically.
    pub async fn apply_batch(&self, batch: SledBatch) -> Result<()> {
        self.tree
            .apply_batch(batch.inner)
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || "apply_batch")?;
        self.flush_async(true).await?;
        Ok(())
    }

    /// Dump every kv in this tree, for building a snapshot.
    /// sled tree iteration is a consistent view, concurrent writes do not tear it.
    pub fn export(&self) -> Result<Vec<Vec<Vec<u8>>>> {
        let mut kvs = Vec::new();
        for rkv in self.tree.iter() {
            let (k, v) = rkv.map_err_to_code(ErrorCode::MetaStoreDamaged, || "export tree")?;
            kvs.push(vec![k.to_vec(), v.to_vec()]);
        }
        Ok(kvs)
    }

    /// Replace the whole tree content with exported kvs.
    pub async fn import(&self, kvs: &[Vec<Vec<u8>>]) -> Result<()> {
        self.tree
            .clear()
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || "clear before import")?;

        let mut batch = sled::Batch::default();
        for kv in kvs.iter() {
            if kv.len() != 2 {
                return Err(ErrorCode::SnapshotDamaged(format!(
                    "import kv expects 2 elements, got {}",
                    kv.len()
                )));
            }
            batch.insert(kv[0].as_slice(), kv[1].as_slice());
        }
        self.tree
            .apply_batch(batch)
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || "import tree")?;
        self.flush_async(true).await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        self.flush_async(true).await
    }

    async fn flush_async(&self, flush: bool) -> Result<()> {
        if flush && self.sync {
            self.tree
                .flush_async()
                .await
                .map_err_to_code(ErrorCode::MetaStoreDamaged, || "flush sled tree")?;
        }
        Ok(())
    }
}

/// A view of a SledTree that treats every key and value as typed records of
/// one key space.
pub struct AsKeySpace<'a, KS: SledKeySpace> {
    inner: &'a SledTree,
    phantom: PhantomData<KS>,
}

impl<'a, KS: SledKeySpace> AsKeySpace<'a, KS> {
    pub fn get(&self, key: &KS::K) -> Result<Option<KS::V>> {
        let k = KS::serialize_key(key)?;
        let got = self
            .inner
            .tree
            .get(k)
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: get: {:?}", KS::NAME, key)
            })?;

        let v = match got {
            None => None,
            Some(v) => Some(KS::deserialize_value(v)?),
        };
        Ok(v)
    }

    pub fn contains_key(&self, key: &KS::K) -> Result<bool> {
        let k = KS::serialize_key(key)?;
        let got = self
            .inner
            .tree
            .contains_key(k)
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: contains_key: {:?}", KS::NAME, key)
            })?;
        Ok(got)
    }

    pub async fn insert(&self, key: &KS::K, value: &KS::V) -> Result<Option<KS::V>> {
        let k = KS::serialize_key(key)?;
        let v = KS::serialize_value(value)?;

        let prev = self
            .inner
            .tree
            .insert(k, v)
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: insert: {:?}", KS::NAME, key)
            })?;

        let prev = match prev {
            None => None,
            Some(x) => Some(KS::deserialize_value(x)?),
        };

        self.inner.flush_async(true).await?;
        Ok(prev)
    }

    pub async fn remove(&self, key: &KS::K, flush: bool) -> Result<Option<KS::V>> {
        let k = KS::serialize_key(key)?;
        let prev = self
            .inner
            .tree
            .remove(k)
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: remove: {:?}", KS::NAME, key)
            })?;

        let prev = match prev {
            None => None,
            Some(x) => Some(KS::deserialize_value(x)?),
        };

        self.inner.flush_async(flush).await?;
        Ok(prev)
    }

    /// Atomically read-modify-write one record.
    pub async fn update_and_fetch<F>(&self, key: &KS::K, mut f: F) -> Result<Option<KS::V>>
    where F: FnMut(Option<KS::V>) -> Option<KS::V> {
        let k = KS::serialize_key(key)?;

        loop {
            let cur = self
                .inner
                .tree
                .get(&k)
                .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                    format!("{}: update_and_fetch: {:?}", KS::NAME, key)
                })?;

            let cur_v = match cur.as_ref() {
                None => None,
                Some(x) => Some(KS::deserialize_value(x)?),
            };

            let new_v = f(cur_v);
            let new_iv = match new_v.as_ref() {
                None => None,
                Some(x) => Some(KS::serialize_value(x)?),
            };

            let cas = self
                .inner
                .tree
                .compare_and_swap(&k, cur, new_iv)
                .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                    format!("{}: cas: {:?}", KS::NAME, key)
                })?;

            if cas.is_ok() {
                self.inner.flush_async(true).await?;
                return Ok(new_v);
            }
        }
    }

    pub fn range_keys<R>(&self, range: R) -> Result<Vec<KS::K>>
    where R: RangeBounds<KS::K> {
        let mut res = vec![];
        for item in self.inner.tree.range(self.bytes_range(range)?) {
            let (k, _) = item.map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: range_keys", KS::NAME)
            })?;
            res.push(KS::deserialize_key(k)?);
        }
        Ok(res)
    }

    pub fn range_kvs<R>(&self, range: R) -> Result<Vec<(KS::K, KS::V)>>
    where R: RangeBounds<KS::K> {
        let mut res = vec![];
        for item in self.inner.tree.range(self.bytes_range(range)?) {
            let (k, v) = item.map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: range_kvs", KS::NAME)
            })?;
            res.push((KS::deserialize_key(k)?, KS::deserialize_value(v)?));
        }
        Ok(res)
    }

    /// Ordered scan of the keys starting with the serialized `prefix`.
    /// Only meaningful for string-like keys.
    pub fn scan_prefix(&self, prefix: &KS::K) -> Result<Vec<(KS::K, KS::V)>> {
        let mut res = vec![];
        let pre = KS::serialize_key(prefix)?;
        for item in self.inner.tree.scan_prefix(pre) {
            let (k, v) = item.map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: scan_prefix", KS::NAME)
            })?;
            res.push((KS::deserialize_key(k)?, KS::deserialize_value(v)?));
        }
        Ok(res)
    }

    pub fn last(&self) -> Result<Option<(KS::K, KS::V)>> {
        let (b, e) = KS::span();
        let mut it = self.inner.tree.range(b..e).rev();
        let last = match it.next() {
            None => return Ok(None),
            Some(res) => {
                let (k, v) =
                    res.map_err_to_code(ErrorCode::MetaStoreDamaged, || format!("{}: last", KS::NAME))?;
                (KS::deserialize_key(k)?, KS::deserialize_value(v)?)
            }
        };
        Ok(Some(last))
    }

    /// Delete every record in `range`. This is the snapshot-load wipe.
    pub async fn range_remove<R>(&self, range: R, flush: bool) -> Result<()>
    where R: RangeBounds<KS::K> {
        let mut batch = sled::Batch::default();
        for item in self.inner.tree.range(self.bytes_range(range)?) {
            let (k, _) = item.map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: range_remove", KS::NAME)
            })?;
            batch.remove(k);
        }

        self.inner
            .tree
            .apply_batch(batch)
            .map_err_to_code(ErrorCode::MetaStoreDamaged, || {
                format!("{}: range_remove batch", KS::NAME)
            })?;

        self.inner.flush_async(flush).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.range_remove(.., true).await
    }

    fn bytes_range<R>(&self, range: R) -> Result<(Bound<IVec>, Bound<IVec>)>
    where R: RangeBounds<KS::K> {
        let (span_begin, span_end) = KS::span();

        let begin = match range.start_bound() {
            Bound::Unbounded => Bound::Included(IVec::from(span_begin)),
            Bound::Included(k) => Bound::Included(KS::serialize_key(k)?),
            Bound::Excluded(k) => Bound::Excluded(KS::serialize_key(k)?),
        };
        let end = match range.end_bound() {
            Bound::Unbounded => Bound::Excluded(IVec::from(span_end)),
            Bound::Included(k) => Bound::Included(KS::serialize_key(k)?),
            Bound::Excluded(k) => Bound::Excluded(KS::serialize_key(k)?),
        };
        Ok((begin, end))
    }
}
