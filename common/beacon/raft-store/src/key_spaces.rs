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

use async_raft::raft::Entry;
use async_raft::storage::HardState;
use async_raft::storage::SnapshotMeta;
use async_raft::AppData;
use byteorder::BigEndian;
use byteorder::ByteOrder;
use common_beacon_types::AppInfo;
use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigVersion;
use common_beacon_types::InstanceInfo;
use common_beacon_types::ServletInfo;
use common_beacon_types::UserPrivilege;
use common_beacon_types::ZoneInfo;
use common_exception::ErrorCode;
use common_exception::Result;
use common_sled_store::sled::IVec;
use common_sled_store::SledKeySpace;
use common_sled_store::SledOrderedSerde;
use serde::Deserialize;
use serde::Serialize;

use crate::state_machine::StateMachineMetaKey;
use crate::state_machine::StateMachineMetaValue;

/// Raft log entries of one group; the tree is the group's `raft_log` column family.
pub struct Logs<D: AppData> {
    _p: PhantomData<D>,
}

impl<D: AppData> SledKeySpace for Logs<D> {
    const PREFIX: u8 = b'L';
    const NAME: &'static str = "log";
    type K = u64;
    type V = Entry<D>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum RaftStateValue {
    NodeId(u64),
    HardState(HardState),
    /// `(installing, installed)` snapshot-install fence.
    StateMachineId((u64, u64)),
    ElectionTimeoutMs(u64),
}

/// Raft hard state and node identity of one group.
pub struct RaftStateKV;

impl SledKeySpace for RaftStateKV {
    const PREFIX: u8 = b'R';
    const NAME: &'static str = "raft_state";
    type K = String;
    type V = RaftStateValue;
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

/// The last built snapshot, kept durable so a restart does not lose the
/// compaction point.
pub struct Snapshots;

impl SledKeySpace for Snapshots {
    const PREFIX: u8 = b's';
    const NAME: &'static str = "snapshot";
    type K = String;
    type V = StoredSnapshot;
}

pub struct StateMachineMeta;

impl SledKeySpace for StateMachineMeta {
    const PREFIX: u8 = b'm';
    const NAME: &'static str = "sm_meta";
    type K = StateMachineMetaKey;
    type V = StateMachineMetaValue;
}

pub struct Apps;

impl SledKeySpace for Apps {
    const PREFIX: u8 = b'A';
    const NAME: &'static str = "app";
    type K = i64;
    type V = AppInfo;
}

pub struct Zones;

impl SledKeySpace for Zones {
    const PREFIX: u8 = b'Z';
    const NAME: &'static str = "zone";
    type K = i64;
    type V = ZoneInfo;
}

pub struct Servlets;

impl SledKeySpace for Servlets {
    const PREFIX: u8 = b'V';
    const NAME: &'static str = "servlet";
    type K = i64;
    type V = ServletInfo;
}

pub struct Instances;

impl SledKeySpace for Instances {
    const PREFIX: u8 = b'D';
    const NAME: &'static str = "instance";
    type K = String;
    type V = InstanceInfo;
}

pub struct Privileges;

impl SledKeySpace for Privileges {
    const PREFIX: u8 = b'P';
    const NAME: &'static str = "privilege";
    type K = String;
    type V = UserPrivilege;
}

/// Max-id counters: one record per entity kind, committed in the same batch
/// as the entity row it covers.
pub struct Sequences;

impl SledKeySpace for Sequences {
    const PREFIX: u8 = b'M';
    const NAME: &'static str = "sequence";
    type K = String;
    type V = u64;
}

/// `(name, version)` of a stored config, ordered by name then semver.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConfigKey {
    pub name: String,
    pub version: ConfigVersion,
}

const CONFIG_KEY_SEP: u8 = 0x01;

impl SledOrderedSerde for ConfigKey {
    fn ser(&self) -> Result<IVec> {
        let name = self.name.as_bytes();
        let mut buf = Vec::with_capacity(name.len() + 1 + 12);
        buf.extend_from_slice(name);
        buf.push(CONFIG_KEY_SEP);

        let mut ver = [0u8; 12];
        BigEndian::write_u32(&mut ver[0..4], self.version.major);
        BigEndian::write_u32(&mut ver[4..8], self.version.minor);
        BigEndian::write_u32(&mut ver[8..12], self.version.patch);
        buf.extend_from_slice(&ver);
        Ok(buf.into())
    }

    fn de<T: AsRef<[u8]>>(v: T) -> Result<Self> {
        let b = v.as_ref();
        if b.len() < 13 {
            return Err(ErrorCode::MetaStoreDamaged("config key too short"));
        }
        let sep = b.len() - 13;
        if b[sep] != CONFIG_KEY_SEP {
            return Err(ErrorCode::MetaStoreDamaged("config key separator missing"));
        }
        let name = String::from_utf8(b[..sep].to_vec())
            .map_err(|e| ErrorCode::MetaStoreDamaged(format!("config key name: {}", e)))?;
        let ver = &b[sep + 1..];
        Ok(ConfigKey {
            name,
            version: ConfigVersion::new(
                BigEndian::read_u32(&ver[0..4]),
                BigEndian::read_u32(&ver[4..8]),
                BigEndian::read_u32(&ver[8..12]),
            ),
        })
    }
}

pub struct Configs;

impl SledKeySpace for Configs {
    const PREFIX: u8 = b'C';
    const NAME: &'static str = "config";
    type K = ConfigKey;
    type V = ConfigInfo;
}

/// Per-servlet id-range high watermarks of the id-allocator group.
pub struct IdRanges;

impl SledKeySpace for IdRanges {
    const PREFIX: u8 = b'I';
    const NAME: &'static str = "id_range";
    type K = i64;
    type V = u64;
}

/// The timestamp group's persisted high watermark.
pub struct TsoMeta;

impl SledKeySpace for TsoMeta {
    const PREFIX: u8 = b'T';
    const NAME: &'static str = "tso_meta";
    type K = String;
    type V = i64;
}
