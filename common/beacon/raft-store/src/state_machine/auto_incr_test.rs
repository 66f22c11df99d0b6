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
use async_raft::raft::EntryNormal;
use async_raft::raft::EntryPayload;
use async_raft::LogId;
use common_base::tokio;
use common_beacon_types::AutoIncrementInfo;
use common_beacon_types::ErrCode;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::OpType;
use common_exception::Result;
use pretty_assertions::assert_eq;

use crate::state_machine::catalog_test::new_test_config;
use crate::state_machine::AutoIncrStateMachine;
use crate::state_machine::GroupStateMachine;

async fn apply(
    sm: &mut AutoIncrStateMachine,
    index: u64,
    op: OpType,
    info: AutoIncrementInfo,
) -> Result<ManagerResponse> {
    let mut req = ManagerRequest::new(op);
    req.auto_increment = Some(info);
    let entry = Entry {
        log_id: LogId { term: 1, index },
        payload: EntryPayload::Normal(EntryNormal { data: req }),
    };
    sm.apply(&entry).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_auto_incr_gen_ranges() -> Result<()> {
    // S4: add, gen, gen with a start hint, then snapshot-reload and gen again.

    let config = new_test_config();
    let mut sm = AutoIncrStateMachine::open(&config).await?;

    let resp = apply(
        &mut sm,
        1,
        OpType::AddIdForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 7,
            start_id: Some(100),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(Some(100), resp.start_id);

    // adding again is refused
    let resp = apply(
        &mut sm,
        2,
        OpType::AddIdForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 7,
            start_id: Some(1),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);

    let resp = apply(
        &mut sm,
        3,
        OpType::GenIdForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 7,
            count: 5,
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(Some(100), resp.start_id);
    assert_eq!(Some(105), resp.end_id);

    // a start hint below the current watermark does not rewind it
    let resp = apply(
        &mut sm,
        4,
        OpType::GenIdForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 7,
            count: 3,
            start_id: Some(104),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(Some(105), resp.start_id);
    assert_eq!(Some(108), resp.end_id);

    // crash: rebuild a fresh state machine from the snapshot
    let data = sm.snapshot_data()?;
    let config2 = new_test_config();
    let mut sm2 = AutoIncrStateMachine::open(&config2).await?;
    sm2.install_snapshot_data(&data).await?;

    let resp = apply(
        &mut sm2,
        1,
        OpType::GenIdForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 7,
            count: 1,
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(Some(108), resp.start_id);
    assert_eq!(Some(109), resp.end_id);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_auto_incr_watermark_survives_reopen() -> Result<()> {
    // The watermark row is durable: reopening the same tree reads it back
    // without a snapshot.

    let config = new_test_config();
    {
        let mut sm = AutoIncrStateMachine::open(&config).await?;
        apply(
            &mut sm,
            1,
            OpType::AddIdForAutoIncrement,
            AutoIncrementInfo {
                servlet_id: 3,
                start_id: Some(10),
                ..Default::default()
            },
        )
        .await?;
        apply(
            &mut sm,
            2,
            OpType::GenIdForAutoIncrement,
            AutoIncrementInfo {
                servlet_id: 3,
                count: 4,
                ..Default::default()
            },
        )
        .await?;
    }

    let mut sm = AutoIncrStateMachine::open(&config).await?;
    let resp = apply(
        &mut sm,
        3,
        OpType::GenIdForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 3,
            count: 1,
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(Some(14), resp.start_id);
    assert_eq!(Some(15), resp.end_id);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_auto_incr_update_rollback() -> Result<()> {
    let config = new_test_config();
    let mut sm = AutoIncrStateMachine::open(&config).await?;

    apply(
        &mut sm,
        1,
        OpType::AddIdForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 1,
            start_id: Some(100),
            ..Default::default()
        },
    )
    .await?;

    // rollback without force is refused
    let resp = apply(
        &mut sm,
        2,
        OpType::UpdateForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 1,
            start_id: Some(5),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);
    assert_eq!("not support rollback", resp.errmsg);

    // forced rollback moves the watermark
    let resp = apply(
        &mut sm,
        3,
        OpType::UpdateForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 1,
            start_id: Some(5),
            force: true,
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(Some(6), resp.start_id);

    // exactly one of start_id / increment_id
    let resp = apply(
        &mut sm,
        4,
        OpType::UpdateForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 1,
            start_id: Some(10),
            increment_id: Some(10),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);

    let resp = apply(
        &mut sm,
        5,
        OpType::UpdateForAutoIncrement,
        AutoIncrementInfo {
            servlet_id: 1,
            increment_id: Some(10),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(Some(16), resp.start_id);

    Ok(())
}
