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

use std::time::Duration;

use async_raft::State;
use common_base::tokio;
use common_beacon_types::AppInfo;
use common_beacon_types::AutoIncrementInfo;
use common_beacon_types::ErrCode;
use common_beacon_types::ManagerRequest;
use common_beacon_types::OpType;
use common_beacon_types::TsoOpType;
use common_beacon_types::TsoRequest;
use pretty_assertions::assert_eq;

use crate::discovery::store_test::new_test_config;
use crate::discovery::BeaconNode;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_node_boot_and_write() -> anyhow::Result<()> {
    // - Boot a single-node cluster
    // - The catalog group elects itself
    // - A write through the node applies and answers

    let config = new_test_config();
    let node = BeaconNode::boot(&config).await?;

    node.catalog
        .raft
        .wait(Some(Duration::from_secs(10)))
        .state(State::Leader, "catalog leader")
        .await?;

    let mut req = ManagerRequest::new(OpType::CreateApp);
    req.app = Some(AppInfo {
        app_name: "sug".to_string(),
        quota: Some(10),
        ..Default::default()
    });
    let resp = node.submit_manager(req).await;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(Some(1), resp.app_id);
    assert_eq!(Some(1), resp.version);

    // the id-allocator group is independent
    node.auto_incr
        .raft
        .wait(Some(Duration::from_secs(10)))
        .state(State::Leader, "auto_incr leader")
        .await?;

    let mut req = ManagerRequest::new(OpType::AddIdForAutoIncrement);
    req.auto_increment = Some(AutoIncrementInfo {
        servlet_id: 1,
        start_id: Some(100),
        ..Default::default()
    });
    let resp = node.submit_manager(req).await;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(Some(100), resp.start_id);

    let mut req = ManagerRequest::new(OpType::GenIdForAutoIncrement);
    req.auto_increment = Some(AutoIncrementInfo {
        servlet_id: 1,
        count: 5,
        ..Default::default()
    });
    let resp = node.submit_manager(req).await;
    assert_eq!(Some(100), resp.start_id);
    assert_eq!(Some(105), resp.end_id);

    node.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_node_gen_tso() -> anyhow::Result<()> {
    // - Boot; wait for the tso group to lead and the runtime to start serving
    // - Two GenTso answers are strictly increasing

    let config = new_test_config();
    let node = BeaconNode::boot(&config).await?;

    node.tso
        .raft
        .wait(Some(Duration::from_secs(10)))
        .state(State::Leader, "tso leader")
        .await?;

    // serving starts only after the initial replicated update commits
    let mut r1 = None;
    for _ in 0..100 {
        let mut req = TsoRequest::new(TsoOpType::GenTso);
        req.count = 10;
        let resp = node.submit_tso(req).await;
        if resp.errcode == ErrCode::Success {
            r1 = Some(resp);
            break;
        }
        assert_eq!(ErrCode::RetryLater, resp.errcode);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let r1 = r1.expect("tso must start serving");
    let t1 = r1.start_timestamp.unwrap();
    assert_eq!(10, r1.count);

    let mut req = TsoRequest::new(TsoOpType::GenTso);
    req.count = 1;
    let r2 = node.submit_tso(req).await;
    assert_eq!(ErrCode::Success, r2.errcode);
    let t2 = r2.start_timestamp.unwrap();

    assert!(t2 > t1, "timestamps must be strictly increasing: {:?} {:?}", t1, t2);

    // info query does not consume logical space
    let info = node.submit_tso(TsoRequest::new(TsoOpType::QueryTsoInfo)).await;
    assert_eq!(ErrCode::Success, info.errcode);
    assert!(info.save_physical.unwrap() > 0);

    node.shutdown().await?;
    Ok(())
}
