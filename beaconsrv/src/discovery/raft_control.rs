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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_raft::NodeId;
use async_raft::RaftStorage;
use common_base::tokio;
use common_beacon_client::DiscoverySender;
use common_beacon_raft_store::state_machine::GroupStateMachine;
use common_beacon_types::ErrCode;
use common_beacon_types::RaftControlOp;
use common_beacon_types::RaftControlRequest;
use common_beacon_types::RaftControlResponse;
use common_beacon_types::GROUP_AUTO_INCR;
use common_beacon_types::GROUP_CATALOG;
use common_beacon_types::GROUP_TSO;
use common_tracing::tracing;

use crate::discovery::BeaconNode;
use crate::discovery::GroupHandle;

/// Route a control request to its group; `region_id` selects the group.
pub async fn raft_control(node: &Arc<BeaconNode>, req: RaftControlRequest) -> RaftControlResponse {
    match req.region_id {
        GROUP_CATALOG => control_group(node, &node.catalog, req).await,
        GROUP_AUTO_INCR => control_group(node, &node.auto_incr, req).await,
        GROUP_TSO => control_group(node, &node.tso, req).await,
        other => {
            tracing::error!("unmatch region_id {} in raft control", other);
            RaftControlResponse::error(other, ErrCode::InputParamError, "unmatch region id")
        }
    }
}

async fn control_group<SM: GroupStateMachine>(
    node: &Arc<BeaconNode>,
    group: &GroupHandle<SM>,
    req: RaftControlRequest,
) -> RaftControlResponse {
    let region_id = req.region_id;
    let config = &node.config;

    if !group.is_leader() && !req.force {
        let mut resp =
            RaftControlResponse::error(region_id, ErrCode::NotLeader, "not leader");
        resp.leader = group.leader_hint(config);
        return resp;
    }

    match req.op_type {
        RaftControlOp::GetLeader => {
            let hint = group.leader_hint(config);
            if hint.is_empty() {
                RaftControlResponse::error(region_id, ErrCode::InternalError, "get leader fail")
            } else {
                let mut resp = RaftControlResponse::success(region_id);
                resp.leader = hint;
                resp
            }
        }

        RaftControlOp::ListPeer => {
            let metrics = group.metrics();
            let mut resp = RaftControlResponse::success(region_id);
            resp.leader = group.leader_hint(config);
            resp.peers = metrics
                .membership_config
                .members
                .iter()
                .map(|id| config.peer_addr(*id))
                .collect();
            resp
        }

        RaftControlOp::Snapshot => match group.store.do_log_compaction().await {
            Ok(snap) => {
                tracing::info!(
                    "group {} manual snapshot: {}",
                    SM::GROUP_NAME,
                    snap.meta.snapshot_id
                );
                RaftControlResponse::success(region_id)
            }
            Err(e) => RaftControlResponse::error(
                region_id,
                ErrCode::InternalError,
                format!("snapshot fail: {}", e),
            ),
        },

        RaftControlOp::ResetVoteTime => {
            let ms = match req.election_time_ms {
                Some(ms) if ms > 0 => ms,
                _ => {
                    return RaftControlResponse::error(
                        region_id,
                        ErrCode::InputParamError,
                        "no election_time",
                    );
                }
            };
            // The engine's runtime config is fixed; the new timeout is
            // persisted and picked up when the group is rebuilt.
            match group.store.raft_state.write_election_timeout_ms(ms).await {
                Ok(()) => RaftControlResponse::success(region_id),
                Err(e) => RaftControlResponse::error(
                    region_id,
                    ErrCode::InternalError,
                    format!("persist election time: {}", e),
                ),
            }
        }

        RaftControlOp::Shutdown => match group.raft.shutdown().await {
            Ok(()) => RaftControlResponse::success(region_id),
            Err(e) => RaftControlResponse::error(
                region_id,
                ErrCode::InternalError,
                format!("shutdown fail: {}", e),
            ),
        },

        RaftControlOp::SetPeer => set_peer(node, group, req).await,

        RaftControlOp::TransferLeader => transfer_leader(node, group, req).await,
    }
}

fn parse_peers(config: &common_beacon_raft_store::RaftConfig, addrs: &[String]) -> Option<BTreeSet<NodeId>> {
    let mut out = BTreeSet::new();
    for addr in addrs {
        out.insert(config.node_id_of(addr)?);
    }
    Some(out)
}

/// Membership change: with `force` the new set is installed as-is; otherwise
/// the old set must match the committed configuration exactly and the diff
/// must be one add or one remove.
async fn set_peer<SM: GroupStateMachine>(
    node: &Arc<BeaconNode>,
    group: &GroupHandle<SM>,
    req: RaftControlRequest,
) -> RaftControlResponse {
    let region_id = req.region_id;
    let config = &node.config;

    let new_peers = match parse_peers(config, &req.new_peers) {
        Some(p) => p,
        None => {
            return RaftControlResponse::error(
                region_id,
                ErrCode::InputParamError,
                "new peer parse fail",
            );
        }
    };

    if req.force {
        return finish_membership_change(group, config, region_id, new_peers).await;
    }

    let old_peers = match parse_peers(config, &req.old_peers) {
        Some(p) => p,
        None => {
            return RaftControlResponse::error(
                region_id,
                ErrCode::InputParamError,
                "old peer parse fail",
            );
        }
    };

    let metrics = group.metrics();
    let current = metrics.membership_config.members.clone();
    if current != old_peers {
        tracing::warn!(
            "group {} set_peer: old peers {:?} do not match committed {:?}",
            SM::GROUP_NAME,
            old_peers,
            current
        );
        return RaftControlResponse::error(region_id, ErrCode::PeerNotEqual, "peer not equal");
    }

    let added: Vec<NodeId> = new_peers.difference(&old_peers).copied().collect();
    let removed: Vec<NodeId> = old_peers.difference(&new_peers).copied().collect();

    match (added.len(), removed.len()) {
        (1, 0) => {
            if let Err(e) = group.raft.add_non_voter(added[0]).await {
                return RaftControlResponse::error(
                    region_id,
                    ErrCode::InternalError,
                    format!("add non-voter: {}", e),
                );
            }
            finish_membership_change(group, config, region_id, new_peers).await
        }
        (0, 1) => {
            // Refuse the removal when another follower lags so far behind
            // that losing this one risks quorum.
            let lag_threshold = config.election_timeout_min_ms / config.heartbeat_interval_ms;
            if let Some(lm) = metrics.leader_metrics.as_ref() {
                for (id, repl) in lm.replication.iter() {
                    if *id == removed[0] || *id == metrics.id {
                        continue;
                    }
                    if metrics.last_log_index.saturating_sub(repl.matched.index) > lag_threshold {
                        tracing::warn!(
                            "group {} set_peer: peer {} is faulty, refuse removing {}",
                            SM::GROUP_NAME,
                            id,
                            removed[0]
                        );
                        return RaftControlResponse::error(
                            region_id,
                            ErrCode::InputParamError,
                            "other peer is faulty",
                        );
                    }
                }
            }
            finish_membership_change(group, config, region_id, new_peers).await
        }
        _ => RaftControlResponse::error(region_id, ErrCode::InputParamError, "set peer fail"),
    }
}

async fn finish_membership_change<SM: GroupStateMachine>(
    group: &GroupHandle<SM>,
    config: &common_beacon_raft_store::RaftConfig,
    region_id: u64,
    members: BTreeSet<NodeId>,
) -> RaftControlResponse {
    match group.raft.change_membership(members.clone()).await {
        Ok(()) => {
            let mut resp = RaftControlResponse::success(region_id);
            resp.peers = members.iter().map(|id| config.peer_addr(*id)).collect();
            resp.leader = group.leader_hint(config);
            resp
        }
        Err(e) => RaftControlResponse::error(
            region_id,
            ErrCode::InternalError,
            format!("change membership: {}", e),
        ),
    }
}

/// The consensus engine has no native transfer: the leader commits a
/// configuration without itself, the rest elect a new leader, and this node
/// rejoins through it in the background.
async fn transfer_leader<SM: GroupStateMachine>(
    node: &Arc<BeaconNode>,
    group: &GroupHandle<SM>,
    req: RaftControlRequest,
) -> RaftControlResponse {
    let region_id = req.region_id;
    let config = &node.config;

    let target_addr = match &req.new_leader {
        Some(a) if !a.is_empty() => a.clone(),
        _ => {
            return RaftControlResponse::error(
                region_id,
                ErrCode::InputParamError,
                "new leader parse fail",
            );
        }
    };
    let target = match config.node_id_of(&target_addr) {
        Some(id) => id,
        None => {
            return RaftControlResponse::error(
                region_id,
                ErrCode::InputParamError,
                "new leader parse fail",
            );
        }
    };

    let metrics = group.metrics();
    let members = metrics.membership_config.members.clone();
    let self_id = metrics.id;

    if !members.contains(&target) {
        return RaftControlResponse::error(
            region_id,
            ErrCode::InputParamError,
            "new leader not in peers",
        );
    }
    if target == self_id {
        let mut resp = RaftControlResponse::success(region_id);
        resp.leader = target_addr;
        resp.peers = members.iter().map(|id| config.peer_addr(*id)).collect();
        return resp;
    }

    let mut without_self = members.clone();
    without_self.remove(&self_id);

    if let Err(e) = group.raft.change_membership(without_self.clone()).await {
        return RaftControlResponse::error(
            region_id,
            ErrCode::InternalError,
            format!("step down: {}", e),
        );
    }

    // Rejoin through whichever node took over.
    let peers = config.peers.clone();
    let old_addrs: Vec<String> = without_self.iter().map(|id| config.peer_addr(*id)).collect();
    let new_addrs: Vec<String> = members.iter().map(|id| config.peer_addr(*id)).collect();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let sender = DiscoverySender::new(peers).with_retry_times(10);
        let mut rejoin = RaftControlRequest::new(RaftControlOp::SetPeer, region_id);
        rejoin.old_peers = old_addrs;
        rejoin.new_peers = new_addrs;
        match sender.raft_control(&rejoin).await {
            Ok(resp) if resp.errcode.is_success() => {
                tracing::info!("rejoined group {} after leader transfer", region_id);
            }
            Ok(resp) => {
                tracing::error!("rejoin after transfer refused: {}", resp.errmsg);
            }
            Err(e) => {
                tracing::error!("rejoin after transfer fail: {}", e);
            }
        }
    });

    let mut resp = RaftControlResponse::success(region_id);
    resp.leader = target_addr;
    resp.peers = members.iter().map(|id| config.peer_addr(*id)).collect();
    resp
}
