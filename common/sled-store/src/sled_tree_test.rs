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

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use common_base::tokio;
use common_exception::Result;
use pretty_assertions::assert_eq;

use crate::init_temp_sled_db;
use crate::SledBatch;
use crate::SledKeySpace;
use crate::SledTree;

struct Words;
impl SledKeySpace for Words {
    const PREFIX: u8 = 1;
    const NAME: &'static str = "words";
    type K = String;
    type V = String;
}

struct Counters;
impl SledKeySpace for Counters {
    const PREFIX: u8 = 2;
    const NAME: &'static str = "counters";
    type K = String;
    type V = u64;
}

fn new_tree() -> Result<SledTree> {
    let t = tempfile::tempdir().expect("create temp dir");
    init_temp_sled_db(t);

    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let n = SEQ.fetch_add(1, Ordering::SeqCst);

    SledTree::open(&crate::get_sled_db(), format!("test-{}", n), false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_key_space_insert_get_remove() -> Result<()> {
    let tree = new_tree()?;
    let ws = tree.key_space::<Words>();

    assert_eq!(None, ws.get(&"a".to_string())?);

    let prev = ws.insert(&"a".to_string(), &"x".to_string()).await?;
    assert_eq!(None, prev);

    let prev = ws.insert(&"a".to_string(), &"y".to_string()).await?;
    assert_eq!(Some("x".to_string()), prev);
    assert_eq!(Some("y".to_string()), ws.get(&"a".to_string())?);

    let prev = ws.remove(&"a".to_string(), true).await?;
    assert_eq!(Some("y".to_string()), prev);
    assert_eq!(None, ws.get(&"a".to_string())?);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_key_spaces_do_not_overlap() -> Result<()> {
    let tree = new_tree()?;

    tree.key_space::<Words>()
        .insert(&"k".to_string(), &"w".to_string())
        .await?;
    tree.key_space::<Counters>().insert(&"k".to_string(), &5u64).await?;

    assert_eq!(
        Some("w".to_string()),
        tree.key_space::<Words>().get(&"k".to_string())?
    );
    assert_eq!(Some(5), tree.key_space::<Counters>().get(&"k".to_string())?);

    tree.key_space::<Words>().clear().await?;
    assert_eq!(None, tree.key_space::<Words>().get(&"k".to_string())?);
    assert_eq!(Some(5), tree.key_space::<Counters>().get(&"k".to_string())?);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_batch_is_atomic_across_key_spaces() -> Result<()> {
    let tree = new_tree()?;

    let mut batch = SledBatch::default();
    batch.insert::<Words>(&"app".to_string(), &"sug".to_string())?;
    batch.insert::<Counters>(&"max_app_id".to_string(), &1u64)?;
    tree.apply_batch(batch).await?;

    assert_eq!(
        Some("sug".to_string()),
        tree.key_space::<Words>().get(&"app".to_string())?
    );
    assert_eq!(
        Some(1),
        tree.key_space::<Counters>().get(&"max_app_id".to_string())?
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_scan_prefix_and_range() -> Result<()> {
    let tree = new_tree()?;
    let ws = tree.key_space::<Words>();

    for k in ["ab1", "ab2", "ac1", "b"] {
        ws.insert(&k.to_string(), &k.to_uppercase()).await?;
    }

    let got = ws.scan_prefix(&"ab".to_string())?;
    let keys = got.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>();
    assert_eq!(vec!["ab1".to_string(), "ab2".to_string()], keys);

    let keys = ws.range_keys(..)?;
    assert_eq!(
        vec![
            "ab1".to_string(),
            "ab2".to_string(),
            "ac1".to_string(),
            "b".to_string()
        ],
        keys
    );

    ws.range_remove(&"ab1".to_string()..&"b".to_string(), true)
        .await?;
    let keys = ws.range_keys(..)?;
    assert_eq!(vec!["b".to_string()], keys);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_export_import() -> Result<()> {
    let tree = new_tree()?;
    let other = new_tree()?;

    tree.key_space::<Words>()
        .insert(&"x".to_string(), &"1".to_string())
        .await?;
    tree.key_space::<Counters>().insert(&"c".to_string(), &9u64).await?;

    let kvs = tree.export()?;
    other.import(&kvs).await?;

    assert_eq!(
        Some("1".to_string()),
        other.key_space::<Words>().get(&"x".to_string())?
    );
    assert_eq!(Some(9), other.key_space::<Counters>().get(&"c".to_string())?);

    Ok(())
}
