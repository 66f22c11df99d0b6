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

use async_raft::raft::Entry;
use async_raft::raft::EntryConfigChange;
use async_raft::raft::EntryNormal;
use async_raft::raft::EntryPayload;
use async_raft::raft::MembershipConfig;
use async_raft::storage::HardState;
use async_raft::LogId;
use async_raft::RaftStorage;
use common_base::tokio;
use common_beacon_raft_store::state_machine::CatalogStateMachine;
use common_beacon_raft_store::RaftConfig;
use common_beacon_types::AppInfo;
use common_beacon_types::ManagerRequest;
use common_beacon_types::OpType;
use maplit::btreeset;
use pretty_assertions::assert_eq;

use crate::discovery::BeaconRaftStore;

pub fn new_test_config() -> RaftConfig {
    let t = tempfile::tempdir().expect("create temp dir");
    common_sled_store::init_temp_sled_db(t);

    static SEQ: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
    let n = SEQ.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let mut config = RaftConfig::empty();
    config.config_id = format!("srv-ut-{}", n);
    config.id = 1;
    config.peers = vec!["127.0.0.1:29000".to_string()];
    config.no_sync = true;
    config
}

fn entry(index: u64, name: &str) -> Entry<ManagerRequest> {
    let mut req = ManagerRequest::new(OpType::CreateApp);
    req.app = Some(AppInfo {
        app_name: name.to_string(),
        quota: Some(1),
        ..Default::default()
    });
    Entry {
        log_id: LogId { term: 1, index },
        payload: EntryPayload::Normal(EntryNormal { data: req }),
    }
}

fn membership_entry(index: u64) -> Entry<ManagerRequest> {
    Entry {
        log_id: LogId { term: 1, index },
        payload: EntryPayload::ConfigChange(EntryConfigChange {
            membership: MembershipConfig {
                members: btreeset![1],
                members_after_consensus: None,
            },
        }),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_store_restart() -> anyhow::Result<()> {
    // - Create a store
    // - Update it
    // - Close and reopen it
    // - Test state is restored

    let config = new_test_config();

    {
        let store =
            BeaconRaftStore::<CatalogStateMachine>::open_create(&config, None, Some(())).await?;
        assert_eq!(1, store.id);
        assert!(!store.is_open());
        assert_eq!(None, store.raft_state.read_hard_state()?);

        store
            .raft_state
            .save_hard_state(&HardState {
                current_term: 10,
                voted_for: Some(5),
            })
            .await?;
    }

    {
        let store =
            BeaconRaftStore::<CatalogStateMachine>::open_create(&config, Some(()), None).await?;
        assert_eq!(1, store.id);
        assert!(store.is_open());
        assert_eq!(
            Some(HardState {
                current_term: 10,
                voted_for: Some(5),
            }),
            store.raft_state.read_hard_state()?
        );
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_store_log_compaction() -> anyhow::Result<()> {
    // - Feed logs and the state machine
    // - Compact
    // - Logs up to the applied point are gone, a purged marker remains
    // - The snapshot is durable across a reopen

    let config = new_test_config();
    let store =
        BeaconRaftStore::<CatalogStateMachine>::open_create(&config, None, Some(())).await?;

    let entries = vec![membership_entry(1), entry(2, "a"), entry(3, "b")];
    for e in entries.iter() {
        store.log.insert(e).await?;
    }
    let refs: Vec<&Entry<ManagerRequest>> = entries.iter().collect();
    store.apply_to_state_machine(&refs).await?;

    let snap = store.do_log_compaction().await?;
    assert_eq!(LogId { term: 1, index: 3 }, snap.meta.last_log_id);
    assert_eq!(
        MembershipConfig {
            members: btreeset![1],
            members_after_consensus: None,
        },
        snap.meta.membership
    );

    // only the purged marker remains at the compaction point
    let log_indexes = store.log.range_keys(..)?;
    assert_eq!(vec![3u64], log_indexes);

    drop(store);

    let store =
        BeaconRaftStore::<CatalogStateMachine>::open_create(&config, Some(()), None).await?;
    let current = store.get_current_snapshot().await?.unwrap();
    assert_eq!(LogId { term: 1, index: 3 }, current.meta.last_log_id);

    let sm = store.state_machine.read().await;
    assert_eq!(Some(1), sm.get_app("a").map(|a| a.quota.unwrap()));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_store_install_snapshot() -> anyhow::Result<()> {
    // - Build a snapshot on one store
    // - Install it into a fresh store
    // - A half-finished previous install blocks the next one

    let config = new_test_config();
    let store =
        BeaconRaftStore::<CatalogStateMachine>::open_create(&config, None, Some(())).await?;

    let entries = vec![membership_entry(1), entry(2, "a"), entry(3, "b")];
    let refs: Vec<&Entry<ManagerRequest>> = entries.iter().collect();
    store.apply_to_state_machine(&refs).await?;

    let snap = store.do_log_compaction().await?;
    let meta = snap.meta.clone();
    let data = snap.snapshot.into_inner();

    let config2 = new_test_config();
    let store2 =
        BeaconRaftStore::<CatalogStateMachine>::open_create(&config2, None, Some(())).await?;

    // rejected while another install is marked in progress
    {
        store2.raft_state.write_state_machine_id(&(1, 2)).await?;
        let res = store2
            .finalize_snapshot_installation(&meta, Box::new(std::io::Cursor::new(data.clone())))
            .await;
        assert!(res.is_err(), "unfinished install must block");
    }

    {
        store2.raft_state.write_state_machine_id(&(0, 0)).await?;
        store2
            .finalize_snapshot_installation(&meta, Box::new(std::io::Cursor::new(data)))
            .await?;
    }

    {
        assert_eq!((1, 1), store2.raft_state.read_state_machine_id()?);

        let sm = store2.state_machine.read().await;
        assert_eq!(LogId { term: 1, index: 3 }, sm.get_last_applied()?);
        assert_eq!(
            Some(MembershipConfig {
                members: btreeset![1],
                members_after_consensus: None,
            }),
            sm.get_membership()?
        );
        assert!(sm.get_app("a").is_some());
        assert!(sm.get_app("b").is_some());
    }

    Ok(())
}
