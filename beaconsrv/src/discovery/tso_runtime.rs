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

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_raft::raft::ClientWriteRequest;
use async_raft::Raft;
use common_base::tokio;
use common_base::tokio::sync::watch;
use common_beacon_raft_store::state_machine::clock_realtime_ms;
use common_beacon_raft_store::state_machine::TsoStateMachine;
use common_beacon_raft_store::RaftConfig;
use common_beacon_types::ErrCode;
use common_beacon_types::TsoOpType;
use common_beacon_types::TsoRequest;
use common_beacon_types::TsoResponse;
use common_beacon_types::TsoTimestamp;
use common_exception::ErrorCode;
use common_exception::Result;
use common_tracing::tracing;

use crate::discovery::BeaconNetwork;
use crate::discovery::BeaconRaftStore;

pub type TsoRaft =
    Raft<TsoRequest, TsoResponse, BeaconNetwork, BeaconRaftStore<TsoStateMachine>>;

const GEN_RETRY_TIMES: usize = 50;

/// Leader-side timestamp oracle: answers `GenTso` out of the in-memory
/// window and advances the window through raft on a timer.
///
/// Serving starts only after the initial replicated update commits on
/// leader start, which keeps timestamps monotonic across failovers.
pub struct TsoRuntime {
    config: RaftConfig,
    store: Arc<BeaconRaftStore<TsoStateMachine>>,
    raft: TsoRaft,

    is_serving: AtomicBool,
    tick_stop: Mutex<Option<watch::Sender<bool>>>,
}

impl TsoRuntime {
    pub fn new(
        config: RaftConfig,
        store: Arc<BeaconRaftStore<TsoStateMachine>>,
        raft: TsoRaft,
    ) -> Arc<TsoRuntime> {
        Arc::new(TsoRuntime {
            config,
            store,
            raft,
            is_serving: AtomicBool::new(false),
            tick_stop: Mutex::new(None),
        })
    }

    /// Take `count` timestamps. Retries while the logical space is drained
    /// by a pending window advance, then gives up with `RetryLater`.
    pub async fn gen_tso(&self, count: u64) -> TsoResponse {
        if count == 0 {
            return TsoResponse::error(
                TsoOpType::GenTso,
                ErrCode::InputParamError,
                "tso count should be positive",
            );
        }
        if !self.is_serving.load(Ordering::Acquire) {
            return TsoResponse::error(
                TsoOpType::GenTso,
                ErrCode::RetryLater,
                "timestamp not ok, retry later",
            );
        }

        for _ in 0..GEN_RETRY_TIMES {
            let got = {
                let mut sm = self.store.state_machine.write().await;
                sm.acquire(count, self.config.tso_max_logical)
            };
            if let Some(ts) = got {
                let mut resp = TsoResponse::success(TsoOpType::GenTso);
                resp.start_timestamp = Some(ts);
                resp.count = count;
                return resp;
            }
            tracing::warn!("tso logical space exhausted, waiting for window advance");
            tokio::time::sleep(Duration::from_millis(self.config.tso_update_interval_ms)).await;
        }

        tracing::error!("gen tso failed after {} retries", GEN_RETRY_TIMES);
        TsoResponse::error(TsoOpType::GenTso, ErrCode::RetryLater, "gen tso failed")
    }

    pub async fn query_info(&self) -> TsoResponse {
        let sm = self.store.state_machine.read().await;
        let mut resp = TsoResponse::success(TsoOpType::QueryTsoInfo);
        resp.start_timestamp = Some(sm.current());
        resp.save_physical = Some(sm.last_save_physical());
        resp.system_time = Some(clock_realtime_ms());
        resp
    }

    /// Replicate one `(current, save)` update through the group.
    async fn sync_timestamp(&self, current: TsoTimestamp, save_physical: i64) -> Result<()> {
        let mut req = TsoRequest::new(TsoOpType::UpdateTso);
        req.current_timestamp = Some(current);
        req.save_physical = Some(save_physical);

        let written = self
            .raft
            .client_write(ClientWriteRequest::new(req))
            .await
            .map_err(|e| ErrorCode::RaftError(format!("sync timestamp: {}", e)))?;

        if written.data.errcode != ErrCode::Success {
            return Err(ErrorCode::RaftError(format!(
                "sync timestamp refused: {}",
                written.data.errmsg
            )));
        }
        Ok(())
    }

    /// Leader-start sequence: take the saved watermark from the loaded
    /// state, jump past it, replicate once, then serve.
    pub async fn on_leader_start(self: Arc<Self>) {
        let now = clock_realtime_ms();
        let last_save = {
            let sm = self.store.state_machine.read().await;
            sm.last_save_physical()
        };

        let mut physical = now;
        if last_save + self.config.tso_update_guard_ms > physical {
            physical = last_save + self.config.tso_update_guard_ms;
        }
        let current = TsoTimestamp {
            physical,
            logical: 0,
        };
        let save = physical + self.config.tso_save_interval_ms as i64;

        tracing::info!(
            "tso leader start, current:({}, 0) save:{}",
            physical,
            save
        );

        match self.sync_timestamp(current, save).await {
            Ok(()) => {
                self.is_serving.store(true, Ordering::Release);
            }
            Err(e) => {
                tracing::error!("tso leader start sync fail: {}", e);
                self.is_serving.store(false, Ordering::Release);
                return;
            }
        }

        // Periodic window advance while leading.
        let (tx, mut rx) = watch::channel(false);
        *self.tick_stop.lock().unwrap() = Some(tx);

        let rt = self.clone();
        let interval = Duration::from_millis(rt.config.tso_update_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.changed() => {
                        tracing::info!("tso update tick stopped");
                        return;
                    }
                }
                rt.update_timestamp().await;
            }
        });
    }

    pub fn on_leader_stop(&self) {
        self.is_serving.store(false, Ordering::Release);
        if let Some(tx) = self.tick_stop.lock().unwrap().take() {
            let _ = tx.send(true);
        }
        tracing::info!("tso leader stop");
    }

    /// One tick: decide whether the window must advance, and how far the
    /// durable watermark extends.
    async fn update_timestamp(&self) {
        let now = clock_realtime_ms();
        let (prev, last_save) = {
            let sm = self.store.state_machine.read().await;
            (sm.current(), sm.last_save_physical())
        };

        let delta = now - prev.physical;
        if delta < 0 {
            tracing::warn!("physical time slow, now:{} prev:{}", now, prev.physical);
        }

        let guard = self.config.tso_update_guard_ms;
        let next = if delta > guard {
            now
        } else if prev.logical > self.config.tso_max_logical / 2 {
            now + guard
        } else {
            return;
        };

        let mut save = last_save;
        if save - next <= guard {
            save = next + self.config.tso_save_interval_ms as i64;
        }

        let current = TsoTimestamp {
            physical: next,
            logical: 0,
        };
        if let Err(e) = self.sync_timestamp(current, save).await {
            tracing::warn!("tso window advance fail: {}", e);
        }
    }
}
