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
use common_beacon_types::ErrCode;
use common_beacon_types::TsoOpType;
use common_beacon_types::TsoRequest;
use common_beacon_types::TsoResponse;
use common_beacon_types::TsoTimestamp;
use common_exception::Result;
use pretty_assertions::assert_eq;

use crate::state_machine::catalog_test::new_test_config;
use crate::state_machine::GroupStateMachine;
use crate::state_machine::TsoStateMachine;

async fn apply(
    sm: &mut TsoStateMachine,
    index: u64,
    op: TsoOpType,
    current: TsoTimestamp,
    save: i64,
    force: bool,
) -> Result<TsoResponse> {
    let mut req = TsoRequest::new(op);
    req.current_timestamp = Some(current);
    req.save_physical = Some(save);
    req.force = force;
    let entry = Entry {
        log_id: LogId { term: 1, index },
        payload: EntryPayload::Normal(EntryNormal { data: req }),
    };
    sm.apply(&entry).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_tso_update_and_acquire() -> Result<()> {
    let config = new_test_config();
    let mut sm = TsoStateMachine::open(&config).await?;

    // nothing to hand out before the first window lands
    assert_eq!(None, sm.acquire(1, 1 << 18));

    let resp = apply(
        &mut sm,
        1,
        TsoOpType::UpdateTso,
        TsoTimestamp {
            physical: 1000,
            logical: 0,
        },
        4000,
        false,
    )
    .await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    let t1 = sm.acquire(10, 1 << 18).unwrap();
    let t2 = sm.acquire(1, 1 << 18).unwrap();
    assert_eq!(TsoTimestamp { physical: 1000, logical: 0 }, t1);
    assert_eq!(TsoTimestamp { physical: 1000, logical: 10 }, t2);
    assert!(t2 > t1);

    // logical space exhaustion
    assert_eq!(None, sm.acquire(5, 12));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_tso_refuses_fallback() -> Result<()> {
    let config = new_test_config();
    let mut sm = TsoStateMachine::open(&config).await?;

    apply(
        &mut sm,
        1,
        TsoOpType::UpdateTso,
        TsoTimestamp {
            physical: 5000,
            logical: 0,
        },
        9000,
        false,
    )
    .await?;

    // a replicated update must not move time backwards
    let resp = apply(
        &mut sm,
        2,
        TsoOpType::UpdateTso,
        TsoTimestamp {
            physical: 100,
            logical: 0,
        },
        9000,
        false,
    )
    .await?;
    assert_eq!(ErrCode::InternalError, resp.errcode);
    assert_eq!("time can't fallback", resp.errmsg);
    assert_eq!(5000, sm.current().physical);

    // reset without force refuses too
    let resp = apply(
        &mut sm,
        3,
        TsoOpType::ResetTso,
        TsoTimestamp {
            physical: 100,
            logical: 0,
        },
        50,
        false,
    )
    .await?;
    assert_eq!(ErrCode::InternalError, resp.errcode);

    // forced reset is operational recovery
    let resp = apply(
        &mut sm,
        4,
        TsoOpType::ResetTso,
        TsoTimestamp {
            physical: 100,
            logical: 0,
        },
        50,
        true,
    )
    .await?;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(100, sm.current().physical);
    assert_eq!(50, sm.last_save_physical());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_tso_save_survives_reopen_and_snapshot() -> Result<()> {
    let config = new_test_config();
    {
        let mut sm = TsoStateMachine::open(&config).await?;
        apply(
            &mut sm,
            1,
            TsoOpType::UpdateTso,
            TsoTimestamp {
                physical: 7000,
                logical: 0,
            },
            10000,
            false,
        )
        .await?;
    }

    // reopen reads the durable watermark
    let sm = TsoStateMachine::open(&config).await?;
    assert_eq!(10000, sm.last_save_physical());

    // snapshot is a plain text watermark
    let data = sm.snapshot_data()?;
    assert_eq!(b"10000".to_vec(), data);

    let config2 = new_test_config();
    let mut sm2 = TsoStateMachine::open(&config2).await?;
    sm2.install_snapshot_data(&data).await?;
    assert_eq!(10000, sm2.last_save_physical());

    Ok(())
}
