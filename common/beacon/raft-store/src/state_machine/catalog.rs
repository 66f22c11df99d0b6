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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_raft::raft::Entry;
use async_raft::raft::EntryPayload;
use async_raft::raft::MembershipConfig;
use async_raft::LogId;
use async_trait::async_trait;
use common_beacon_types::AppInfo;
use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigVersion;
use common_beacon_types::ErrCode;
use common_beacon_types::FlattenPrivilege;
use common_beacon_types::InstanceInfo;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::NamingRequest;
use common_beacon_types::OpType;
use common_beacon_types::ServletInfo;
use common_beacon_types::ServletStatus;
use common_beacon_types::UserPrivilege;
use common_beacon_types::ZoneInfo;
use common_beacon_types::GROUP_CATALOG;
use common_exception::Result;
use common_sled_store::get_sled_db;
use common_sled_store::SledBatch;
use common_sled_store::SledTree;
use common_tracing::tracing;
use sha2::Digest;
use sha2::Sha256;

use crate::config::RaftConfig;
use crate::key_spaces::Apps;
use crate::key_spaces::ConfigKey;
use crate::key_spaces::Configs;
use crate::key_spaces::Instances;
use crate::key_spaces::Privileges;
use crate::key_spaces::Sequences;
use crate::key_spaces::Servlets;
use crate::key_spaces::StateMachineMeta;
use crate::key_spaces::Zones;
use crate::state_machine::GroupStateMachine;
use crate::state_machine::SerializableSnapshot;
use crate::state_machine::StateMachineMetaKey;
use crate::state_machine::StateMachineMetaValue;

const SEQ_APP_ID: &str = "max_app_id";
const SEQ_ZONE_ID: &str = "max_zone_id";
const SEQ_SERVLET_ID: &str = "max_servlet_id";
const SEQ_CONFIG_ID: &str = "max_config_id";

/// Separator of composite keys `app \x01 zone \x01 servlet`. The parts are
/// separate fields on the wire, concatenation is internal only.
const KEY_SEP: char = '\u{1}';

pub fn zone_key(app_name: &str, zone_name: &str) -> String {
    format!("{}{}{}", app_name, KEY_SEP, zone_name)
}

pub fn servlet_key(app_name: &str, zone_name: &str, servlet_name: &str) -> String {
    format!(
        "{}{}{}{}{}",
        app_name, KEY_SEP, zone_name, KEY_SEP, servlet_name
    )
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The state machine of the catalog group (group 0).
///
/// Memory holds every index; the sled tree holds the durable rows. Both are
/// mutated in the same apply step: the row batch commits first, memory
/// follows, so a crash replays the log onto a consistent store.
pub struct CatalogStateMachine {
    config: RaftConfig,

    pub sm_tree: SledTree,

    apps: BTreeMap<i64, AppInfo>,
    app_ids: HashMap<String, i64>,
    zones: BTreeMap<i64, ZoneInfo>,
    zone_ids: HashMap<String, i64>,
    servlets: BTreeMap<i64, ServletInfo>,
    servlet_ids: HashMap<String, i64>,
    instances: BTreeMap<String, InstanceInfo>,
    configs: BTreeMap<String, BTreeMap<ConfigVersion, ConfigInfo>>,
    privileges: BTreeMap<String, UserPrivilege>,

    /// app id -> child zone ids; a parent with children refuses to drop.
    app_zones: HashMap<i64, BTreeSet<i64>>,
    /// zone id -> child servlet ids.
    zone_servlets: HashMap<i64, BTreeSet<i64>>,
    /// servlet composite key -> addresses of its live instances.
    servlet_instances: HashMap<String, BTreeSet<String>>,

    /// address -> removal time, unix seconds. Re-registration inside the
    /// quarantine window is refused.
    removed_instances: HashMap<String, i64>,
    /// servlet composite key -> drop time; re-create honors the same window.
    removed_servlets: HashMap<String, i64>,

    max_app_id: i64,
    max_zone_id: i64,
    max_servlet_id: i64,
    max_config_id: u64,
}

impl CatalogStateMachine {
    #[tracing::instrument(level = "debug", skip(config))]
    pub async fn open(config: &RaftConfig) -> Result<CatalogStateMachine> {
        let db = get_sled_db();
        let tree_name = config.tree_name(format!("state_machine/{}", GROUP_CATALOG));
        let sm_tree = SledTree::open(&db, tree_name, config.is_sync())?;

        let mut sm = CatalogStateMachine {
            config: config.clone(),
            sm_tree,
            apps: BTreeMap::new(),
            app_ids: HashMap::new(),
            zones: BTreeMap::new(),
            zone_ids: HashMap::new(),
            servlets: BTreeMap::new(),
            servlet_ids: HashMap::new(),
            instances: BTreeMap::new(),
            configs: BTreeMap::new(),
            privileges: BTreeMap::new(),
            app_zones: HashMap::new(),
            zone_servlets: HashMap::new(),
            servlet_instances: HashMap::new(),
            removed_instances: HashMap::new(),
            removed_servlets: HashMap::new(),
            max_app_id: 0,
            max_zone_id: 0,
            max_servlet_id: 0,
            max_config_id: 0,
        };

        sm.rebuild_indexes()?;

        let inited = sm
            .sm_meta()
            .get(&StateMachineMetaKey::Initialized)?
            .is_some();
        if !inited {
            sm.sm_meta()
                .insert(
                    &StateMachineMetaKey::Initialized,
                    &StateMachineMetaValue::Bool(true),
                )
                .await?;
        }

        Ok(sm)
    }

    /// Replay the prefix scans to rebuild every in-memory index from the tree.
    fn rebuild_indexes(&mut self) -> Result<()> {
        self.apps.clear();
        self.app_ids.clear();
        self.zones.clear();
        self.zone_ids.clear();
        self.servlets.clear();
        self.servlet_ids.clear();
        self.instances.clear();
        self.configs.clear();
        self.privileges.clear();
        self.app_zones.clear();
        self.zone_servlets.clear();
        self.servlet_instances.clear();

        for (id, app) in self.sm_tree.key_space::<Apps>().range_kvs(..)? {
            self.app_ids.insert(app.app_name.clone(), id);
            self.app_zones.entry(id).or_default();
            self.apps.insert(id, app);
        }

        for (id, zone) in self.sm_tree.key_space::<Zones>().range_kvs(..)? {
            self.zone_ids
                .insert(zone_key(&zone.app_name, &zone.zone_name), id);
            self.app_zones.entry(zone.app_id).or_default().insert(id);
            self.zone_servlets.entry(id).or_default();
            self.zones.insert(id, zone);
        }

        for (id, servlet) in self.sm_tree.key_space::<Servlets>().range_kvs(..)? {
            let key = servlet_key(&servlet.app_name, &servlet.zone_name, &servlet.servlet_name);
            self.servlet_ids.insert(key.clone(), id);
            self.zone_servlets
                .entry(servlet.zone_id)
                .or_default()
                .insert(id);
            self.servlet_instances.entry(key).or_default();
            self.servlets.insert(id, servlet);
        }

        for (addr, instance) in self.sm_tree.key_space::<Instances>().range_kvs(..)? {
            let key = servlet_key(
                &instance.app_name,
                &instance.zone_name,
                &instance.servlet_name,
            );
            self.servlet_instances
                .entry(key)
                .or_default()
                .insert(addr.clone());
            self.instances.insert(addr, instance);
        }

        for (key, info) in self.sm_tree.key_space::<Configs>().range_kvs(..)? {
            self.configs
                .entry(key.name)
                .or_default()
                .insert(key.version, info);
        }

        for (name, privilege) in self.sm_tree.key_space::<Privileges>().range_kvs(..)? {
            self.privileges.insert(name, privilege);
        }

        let seqs = self.sm_tree.key_space::<Sequences>();
        let seq = |k: &str| -> Result<u64> { Ok(seqs.get(&k.to_string())?.unwrap_or(0)) };
        // Persisted counters are authoritative; loaded rows only raise them.
        self.max_app_id = (seq(SEQ_APP_ID)? as i64)
            .max(self.apps.keys().next_back().copied().unwrap_or(0));
        self.max_zone_id = (seq(SEQ_ZONE_ID)? as i64)
            .max(self.zones.keys().next_back().copied().unwrap_or(0));
        self.max_servlet_id = (seq(SEQ_SERVLET_ID)? as i64)
            .max(self.servlets.keys().next_back().copied().unwrap_or(0));
        self.max_config_id = seq(SEQ_CONFIG_ID)?.max(
            self.configs
                .values()
                .flat_map(|m| m.values())
                .map(|c| c.id)
                .max()
                .unwrap_or(0),
        );

        tracing::debug!(
            "catalog indexes rebuilt: {} apps, {} zones, {} servlets, {} instances, {} configs, {} users",
            self.apps.len(),
            self.zones.len(),
            self.servlets.len(),
            self.instances.len(),
            self.configs.len(),
            self.privileges.len()
        );
        Ok(())
    }

    fn sm_meta(&self) -> common_sled_store::AsKeySpace<StateMachineMeta> {
        self.sm_tree.key_space::<StateMachineMeta>()
    }

    fn meta_batch(&self, log_id: LogId) -> Result<SledBatch> {
        let mut batch = SledBatch::default();
        batch.insert::<StateMachineMeta>(
            &StateMachineMetaKey::LastApplied,
            &StateMachineMetaValue::LogId(log_id),
        )?;
        Ok(batch)
    }

    /// Commit the batch without touching the catalog: the entry is applied,
    /// the operation is refused.
    async fn reject(
        &self,
        batch: SledBatch,
        op_type: OpType,
        errmsg: impl Into<String>,
    ) -> Result<ManagerResponse> {
        let errmsg = errmsg.into();
        tracing::warn!("catalog op {:?} refused: {}", op_type, errmsg);
        self.sm_tree.apply_batch(batch).await?;
        Ok(ManagerResponse::error(
            op_type,
            ErrCode::InputParamError,
            errmsg,
        ))
    }

    async fn apply_cmd(
        &mut self,
        req: &ManagerRequest,
        log_id: LogId,
    ) -> Result<ManagerResponse> {
        let batch = self.meta_batch(log_id)?;
        match req.op_type {
            OpType::CreateApp => self.create_app(req, batch).await,
            OpType::DropApp => self.drop_app(req, batch).await,
            OpType::ModifyApp => self.modify_app(req, batch).await,
            OpType::CreateZone => self.create_zone(req, batch).await,
            OpType::DropZone => self.drop_zone(req, batch).await,
            OpType::ModifyZone => self.modify_zone(req, batch).await,
            OpType::CreateServlet => self.create_servlet(req, batch).await,
            OpType::DropServlet => self.drop_servlet(req, batch).await,
            OpType::ModifyServlet => self.modify_servlet(req, batch).await,
            OpType::CreateConfig => self.create_config(req, batch).await,
            OpType::RemoveConfig => self.remove_config(req, batch).await,
            OpType::AddInstance => self.add_instance(req, batch).await,
            OpType::DropInstance => self.drop_instance(req, batch).await,
            OpType::UpdateInstance => self.update_instance(req, batch).await,
            OpType::CreateUser => self.create_user(req, batch).await,
            OpType::DropUser => self.drop_user(req, batch).await,
            OpType::AddPrivilege => self.add_privilege(req, batch).await,
            OpType::DropPrivilege => self.drop_privilege(req, batch).await,
            _ => {
                self.sm_tree.apply_batch(batch).await?;
                Ok(ManagerResponse::error(
                    req.op_type,
                    ErrCode::UnknownReqType,
                    "unsupported request type",
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // App
    // ------------------------------------------------------------------

    async fn create_app(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let app = match &req.app {
            Some(a) => a.clone(),
            None => return self.reject(batch, req.op_type, "no app_info").await,
        };
        if app.app_name.is_empty() {
            return self.reject(batch, req.op_type, "app name is empty").await;
        }
        if self.app_ids.contains_key(&app.app_name) {
            return self.reject(batch, req.op_type, "app already existed").await;
        }

        let id = self.max_app_id + 1;
        let info = AppInfo {
            app_id: id,
            version: 1,
            ..app
        };
        batch.insert::<Apps>(&id, &info)?;
        batch.insert::<Sequences>(&SEQ_APP_ID.to_string(), &(id as u64))?;
        self.sm_tree.apply_batch(batch).await?;

        self.max_app_id = id;
        self.app_ids.insert(info.app_name.clone(), id);
        self.app_zones.entry(id).or_default();
        self.apps.insert(id, info);

        tracing::info!("create app success, app_id:{}", id);
        let mut resp = ManagerResponse::success(req.op_type);
        resp.app_id = Some(id);
        resp.version = Some(1);
        Ok(resp)
    }

    async fn drop_app(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let app = match &req.app {
            Some(a) => a,
            None => return self.reject(batch, req.op_type, "no app_info").await,
        };
        let id = match self.app_ids.get(&app.app_name) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "app not exist").await,
        };
        if self.app_zones.get(&id).map_or(false, |s| !s.is_empty()) {
            return self.reject(batch, req.op_type, "app has zone").await;
        }

        batch.remove::<Apps>(&id)?;
        self.sm_tree.apply_batch(batch).await?;

        self.app_ids.remove(&app.app_name);
        self.app_zones.remove(&id);
        self.apps.remove(&id);

        tracing::info!("drop app success, app_id:{}", id);
        Ok(ManagerResponse::success(req.op_type))
    }

    async fn modify_app(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let app = match &req.app {
            Some(a) => a,
            None => return self.reject(batch, req.op_type, "no app_info").await,
        };
        let id = match self.app_ids.get(&app.app_name) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "app not exist").await,
        };

        let mut info = self.apps[&id].clone();
        if let Some(quota) = app.quota {
            info.quota = Some(quota);
        }
        info.version += 1;

        batch.insert::<Apps>(&id, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        let version = info.version;
        self.apps.insert(id, info);

        let mut resp = ManagerResponse::success(req.op_type);
        resp.app_id = Some(id);
        resp.version = Some(version);
        Ok(resp)
    }

    // ------------------------------------------------------------------
    // Zone
    // ------------------------------------------------------------------

    async fn create_zone(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let zone = match &req.zone {
            Some(z) => z.clone(),
            None => return self.reject(batch, req.op_type, "no zone_info").await,
        };
        if zone.zone_name.is_empty() {
            return self.reject(batch, req.op_type, "zone name is empty").await;
        }
        let app_id = match self.app_ids.get(&zone.app_name) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "app not exist").await,
        };
        let key = zone_key(&zone.app_name, &zone.zone_name);
        if self.zone_ids.contains_key(&key) {
            return self.reject(batch, req.op_type, "zone already existed").await;
        }

        let id = self.max_zone_id + 1;
        let info = ZoneInfo {
            zone_id: id,
            app_id,
            version: 1,
            ..zone
        };
        batch.insert::<Zones>(&id, &info)?;
        batch.insert::<Sequences>(&SEQ_ZONE_ID.to_string(), &(id as u64))?;
        self.sm_tree.apply_batch(batch).await?;

        self.max_zone_id = id;
        self.zone_ids.insert(key, id);
        self.app_zones.entry(app_id).or_default().insert(id);
        self.zone_servlets.entry(id).or_default();
        self.zones.insert(id, info);

        tracing::info!("create zone success, zone_id:{}", id);
        let mut resp = ManagerResponse::success(req.op_type);
        resp.zone_id = Some(id);
        resp.version = Some(1);
        Ok(resp)
    }

    async fn drop_zone(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let zone = match &req.zone {
            Some(z) => z,
            None => return self.reject(batch, req.op_type, "no zone_info").await,
        };
        let key = zone_key(&zone.app_name, &zone.zone_name);
        let id = match self.zone_ids.get(&key) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "zone not exist").await,
        };
        if self.zone_servlets.get(&id).map_or(false, |s| !s.is_empty()) {
            return self.reject(batch, req.op_type, "zone has servlet").await;
        }

        batch.remove::<Zones>(&id)?;
        self.sm_tree.apply_batch(batch).await?;

        let app_id = self.zones[&id].app_id;
        self.zone_ids.remove(&key);
        self.zone_servlets.remove(&id);
        if let Some(zs) = self.app_zones.get_mut(&app_id) {
            zs.remove(&id);
        }
        self.zones.remove(&id);

        tracing::info!("drop zone success, zone_id:{}", id);
        Ok(ManagerResponse::success(req.op_type))
    }

    async fn modify_zone(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let zone = match &req.zone {
            Some(z) => z,
            None => return self.reject(batch, req.op_type, "no zone_info").await,
        };
        let key = zone_key(&zone.app_name, &zone.zone_name);
        let id = match self.zone_ids.get(&key) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "zone not exist").await,
        };

        let mut info = self.zones[&id].clone();
        if let Some(quota) = zone.quota {
            info.quota = Some(quota);
        }
        info.version += 1;

        batch.insert::<Zones>(&id, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        let version = info.version;
        self.zones.insert(id, info);

        let mut resp = ManagerResponse::success(req.op_type);
        resp.zone_id = Some(id);
        resp.version = Some(version);
        Ok(resp)
    }

    // ------------------------------------------------------------------
    // Servlet
    // ------------------------------------------------------------------

    async fn create_servlet(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let servlet = match &req.servlet {
            Some(s) => s.clone(),
            None => return self.reject(batch, req.op_type, "no servlet_info").await,
        };
        if servlet.servlet_name.is_empty() {
            return self
                .reject(batch, req.op_type, "servlet name is empty")
                .await;
        }
        let app_id = match self.app_ids.get(&servlet.app_name) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "app not exist").await,
        };
        let zkey = zone_key(&servlet.app_name, &servlet.zone_name);
        let zone_id = match self.zone_ids.get(&zkey) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "zone not exist").await,
        };
        let skey = servlet_key(&servlet.app_name, &servlet.zone_name, &servlet.servlet_name);
        if self.servlet_ids.contains_key(&skey) {
            return self
                .reject(batch, req.op_type, "servlet already existed")
                .await;
        }
        if let Some(dropped_at) = self.removed_servlets.get(&skey) {
            if now_secs() - dropped_at < self.config.instance_quarantine_secs as i64 {
                return self
                    .reject(batch, req.op_type, "servlet removed recently, in cooldown")
                    .await;
            }
        }

        let id = self.max_servlet_id + 1;
        let now = now_secs();
        let info = ServletInfo {
            servlet_id: id,
            zone_id,
            app_id,
            ctime: now,
            mtime: now,
            version: 1,
            ..servlet
        };
        batch.insert::<Servlets>(&id, &info)?;
        batch.insert::<Sequences>(&SEQ_SERVLET_ID.to_string(), &(id as u64))?;
        self.sm_tree.apply_batch(batch).await?;

        self.max_servlet_id = id;
        self.servlet_ids.insert(skey.clone(), id);
        self.zone_servlets.entry(zone_id).or_default().insert(id);
        self.servlet_instances.entry(skey.clone()).or_default();
        self.removed_servlets.remove(&skey);
        self.servlets.insert(id, info);

        tracing::info!("create servlet success, servlet_id:{}", id);
        let mut resp = ManagerResponse::success(req.op_type);
        resp.servlet_id = Some(id);
        resp.version = Some(1);
        Ok(resp)
    }

    async fn drop_servlet(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let servlet = match &req.servlet {
            Some(s) => s,
            None => return self.reject(batch, req.op_type, "no servlet_info").await,
        };
        let skey = servlet_key(&servlet.app_name, &servlet.zone_name, &servlet.servlet_name);
        let id = match self.servlet_ids.get(&skey) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "servlet not exist").await,
        };
        if self
            .servlet_instances
            .get(&skey)
            .map_or(false, |s| !s.is_empty())
        {
            return self.reject(batch, req.op_type, "servlet has instance").await;
        }

        batch.remove::<Servlets>(&id)?;
        self.sm_tree.apply_batch(batch).await?;

        let zone_id = self.servlets[&id].zone_id;
        self.servlet_ids.remove(&skey);
        if let Some(ss) = self.zone_servlets.get_mut(&zone_id) {
            ss.remove(&id);
        }
        self.servlet_instances.remove(&skey);
        self.removed_servlets.insert(skey, now_secs());
        self.servlets.remove(&id);

        tracing::info!("drop servlet success, servlet_id:{}", id);
        Ok(ManagerResponse::success(req.op_type))
    }

    async fn modify_servlet(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let servlet = match &req.servlet {
            Some(s) => s,
            None => return self.reject(batch, req.op_type, "no servlet_info").await,
        };
        let skey = servlet_key(&servlet.app_name, &servlet.zone_name, &servlet.servlet_name);
        let id = match self.servlet_ids.get(&skey) {
            Some(id) => *id,
            None => return self.reject(batch, req.op_type, "servlet not exist").await,
        };

        let mut info = self.servlets[&id].clone();
        if let Some(status) = servlet.status {
            info.status = Some(status);
        }
        if let Some(color) = &servlet.color {
            info.color = Some(color.clone());
        }
        if let Some(deleted) = servlet.deleted {
            info.deleted = Some(deleted);
        }
        if let Some(env) = &servlet.env {
            info.env = Some(env.clone());
        }
        if let Some(address) = &servlet.address {
            info.address = Some(address.clone());
        }
        info.mtime = now_secs();
        info.version += 1;

        batch.insert::<Servlets>(&id, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        let version = info.version;
        self.servlets.insert(id, info);

        let mut resp = ManagerResponse::success(req.op_type);
        resp.servlet_id = Some(id);
        resp.version = Some(version);
        Ok(resp)
    }

    // ------------------------------------------------------------------
    // Config
    // ------------------------------------------------------------------

    async fn create_config(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let config = match &req.config {
            Some(c) => c.clone(),
            None => return self.reject(batch, req.op_type, "no config_info").await,
        };
        if config.name.is_empty() {
            return self.reject(batch, req.op_type, "config name is empty").await;
        }
        if config.version.is_zero() {
            return self.reject(batch, req.op_type, "no config version").await;
        }
        if config.content.is_empty() {
            return self.reject(batch, req.op_type, "no config content").await;
        }

        if let Some(versions) = self.configs.get(&config.name) {
            if versions.contains_key(&config.version) {
                return self.reject(batch, req.op_type, "config already exist").await;
            }
            if let Some((max_ver, _)) = versions.iter().next_back() {
                if *max_ver >= config.version {
                    return self
                        .reject(
                            batch,
                            req.op_type,
                            "Version numbers must increase monotonically",
                        )
                        .await;
                }
            }
        }

        let id = self.max_config_id + 1;
        let info = ConfigInfo {
            ctime: now_secs(),
            id,
            ..config
        };
        let key = ConfigKey {
            name: info.name.clone(),
            version: info.version,
        };
        batch.insert::<Configs>(&key, &info)?;
        batch.insert::<Sequences>(&SEQ_CONFIG_ID.to_string(), &id)?;
        self.sm_tree.apply_batch(batch).await?;

        self.max_config_id = id;
        tracing::info!("config {} version {} created", info.name, info.version);
        self.configs
            .entry(info.name.clone())
            .or_default()
            .insert(info.version, info);

        Ok(ManagerResponse::success(req.op_type))
    }

    async fn remove_config(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let config = match &req.config {
            Some(c) => c.clone(),
            None => return self.reject(batch, req.op_type, "no config_info").await,
        };
        let versions = match self.configs.get(&config.name) {
            Some(v) => v,
            None => return self.reject(batch, req.op_type, "config not exist").await,
        };

        // A zero version removes every version of the name.
        if config.version.is_zero() {
            for version in versions.keys() {
                batch.remove::<Configs>(&ConfigKey {
                    name: config.name.clone(),
                    version: *version,
                })?;
            }
            self.sm_tree.apply_batch(batch).await?;
            self.configs.remove(&config.name);
            return Ok(ManagerResponse::success(req.op_type));
        }

        if !versions.contains_key(&config.version) {
            return self.reject(batch, req.op_type, "config not exist").await;
        }
        batch.remove::<Configs>(&ConfigKey {
            name: config.name.clone(),
            version: config.version,
        })?;
        self.sm_tree.apply_batch(batch).await?;

        let versions = self.configs.get_mut(&config.name).unwrap();
        versions.remove(&config.version);
        if versions.is_empty() {
            self.configs.remove(&config.name);
        }
        Ok(ManagerResponse::success(req.op_type))
    }

    // ------------------------------------------------------------------
    // Instance
    // ------------------------------------------------------------------

    async fn add_instance(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let instance = match &req.instance {
            Some(i) => i.clone(),
            None => return self.reject(batch, req.op_type, "no instance_info").await,
        };
        if instance.address.is_empty() {
            return self.reject(batch, req.op_type, "address is empty").await;
        }
        if !self.app_ids.contains_key(&instance.app_name) {
            return self.reject(batch, req.op_type, "app not exist").await;
        }
        if !self
            .zone_ids
            .contains_key(&zone_key(&instance.app_name, &instance.zone_name))
        {
            return self.reject(batch, req.op_type, "zone not exist").await;
        }
        let skey = servlet_key(
            &instance.app_name,
            &instance.zone_name,
            &instance.servlet_name,
        );
        if !self.servlet_ids.contains_key(&skey) {
            return self.reject(batch, req.op_type, "servlet not exist").await;
        }
        if self.instances.contains_key(&instance.address) {
            return self
                .reject(batch, req.op_type, "instance already existed")
                .await;
        }
        if let Some(removed_at) = self.removed_instances.get(&instance.address) {
            if now_secs() - removed_at < self.config.instance_quarantine_secs as i64 {
                return self
                    .reject(batch, req.op_type, "instance removed recently, in quarantine")
                    .await;
            }
        }

        let info = InstanceInfo {
            version: 1,
            ..instance
        };
        batch.insert::<Instances>(&info.address, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        self.removed_instances.remove(&info.address);
        self.servlet_instances
            .entry(skey)
            .or_default()
            .insert(info.address.clone());
        tracing::info!("add instance success, address:{}", info.address);
        self.instances.insert(info.address.clone(), info);

        let mut resp = ManagerResponse::success(req.op_type);
        resp.version = Some(1);
        Ok(resp)
    }

    async fn drop_instance(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let instance = match &req.instance {
            Some(i) => i,
            None => return self.reject(batch, req.op_type, "no instance_info").await,
        };
        let info = match self.instances.get(&instance.address) {
            Some(i) => i.clone(),
            None => return self.reject(batch, req.op_type, "address not exist").await,
        };

        batch.remove::<Instances>(&info.address)?;
        self.sm_tree.apply_batch(batch).await?;

        let skey = servlet_key(&info.app_name, &info.zone_name, &info.servlet_name);
        if let Some(addrs) = self.servlet_instances.get_mut(&skey) {
            addrs.remove(&info.address);
        }
        self.removed_instances.insert(info.address.clone(), now_secs());
        self.instances.remove(&info.address);

        tracing::info!("drop instance success, address:{}", info.address);
        Ok(ManagerResponse::success(req.op_type))
    }

    async fn update_instance(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let instance = match &req.instance {
            Some(i) => i,
            None => return self.reject(batch, req.op_type, "no instance_info").await,
        };
        let mut info = match self.instances.get(&instance.address) {
            Some(i) => i.clone(),
            None => return self.reject(batch, req.op_type, "address not exist").await,
        };

        if let Some(status) = instance.status {
            info.status = Some(status);
        }
        if let Some(color) = &instance.color {
            info.color = Some(color.clone());
        }
        if let Some(env) = &instance.env {
            info.env = Some(env.clone());
        }
        if let Some(weight) = instance.weight {
            info.weight = Some(weight);
        }
        info.version += 1;

        batch.insert::<Instances>(&info.address, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        let version = info.version;
        self.instances.insert(info.address.clone(), info);

        let mut resp = ManagerResponse::success(req.op_type);
        resp.version = Some(version);
        Ok(resp)
    }

    // ------------------------------------------------------------------
    // User / privilege
    // ------------------------------------------------------------------

    async fn create_user(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let user = match &req.privilege {
            Some(u) => u.clone(),
            None => return self.reject(batch, req.op_type, "no user_privilege").await,
        };
        if user.username.is_empty() {
            return self.reject(batch, req.op_type, "username is empty").await;
        }
        if user.password.is_empty() {
            return self.reject(batch, req.op_type, "no password").await;
        }
        if self.privileges.contains_key(&user.username) {
            return self
                .reject(batch, req.op_type, "username has been repeated")
                .await;
        }

        let digest = Sha256::digest(user.password.as_bytes());
        let password = digest
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>();
        let info = UserPrivilege {
            password,
            version: 1,
            ..user
        };
        batch.insert::<Privileges>(&info.username, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        tracing::info!("create user success, username:{}", info.username);
        self.privileges.insert(info.username.clone(), info);
        Ok(ManagerResponse::success(req.op_type))
    }

    async fn drop_user(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let user = match &req.privilege {
            Some(u) => u,
            None => return self.reject(batch, req.op_type, "no user_privilege").await,
        };
        if !self.privileges.contains_key(&user.username) {
            return self.reject(batch, req.op_type, "username not exist").await;
        }

        batch.remove::<Privileges>(&user.username)?;
        self.sm_tree.apply_batch(batch).await?;

        self.privileges.remove(&user.username);
        tracing::info!("drop user success, username:{}", user.username);
        Ok(ManagerResponse::success(req.op_type))
    }

    async fn add_privilege(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let user = match &req.privilege {
            Some(u) => u,
            None => return self.reject(batch, req.op_type, "no user_privilege").await,
        };
        let mut info = match self.privileges.get(&user.username) {
            Some(p) => p.clone(),
            None => return self.reject(batch, req.op_type, "username not exist").await,
        };

        for grant in &user.privilege_zone {
            let mut found = false;
            for mem in info.privilege_zone.iter_mut() {
                if mem.zone_id == grant.zone_id {
                    found = true;
                    // Grants only widen unless forced.
                    if grant.force || grant.zone_rw > mem.zone_rw {
                        mem.zone_rw = grant.zone_rw;
                    }
                    break;
                }
            }
            if !found {
                info.privilege_zone.push(grant.clone());
            }
        }

        for grant in &user.privilege_servlet {
            let mut found = false;
            for mem in info.privilege_servlet.iter_mut() {
                if mem.zone_id == grant.zone_id && mem.servlet_id == grant.servlet_id {
                    found = true;
                    if grant.force || grant.servlet_rw > mem.servlet_rw {
                        mem.servlet_rw = grant.servlet_rw;
                    }
                    break;
                }
            }
            if !found {
                info.privilege_servlet.push(grant.clone());
            }
        }

        for ip in &user.ip {
            if !info.ip.contains(ip) {
                info.ip.push(ip.clone());
            }
        }
        if let Some(tag) = &user.resource_tag {
            info.resource_tag = Some(tag.clone());
        }
        info.version += 1;

        batch.insert::<Privileges>(&info.username, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        tracing::info!("add privilege success, username:{}", info.username);
        self.privileges.insert(info.username.clone(), info);
        Ok(ManagerResponse::success(req.op_type))
    }

    async fn drop_privilege(
        &mut self,
        req: &ManagerRequest,
        mut batch: SledBatch,
    ) -> Result<ManagerResponse> {
        let user = match &req.privilege {
            Some(u) => u,
            None => return self.reject(batch, req.op_type, "no user_privilege").await,
        };
        let mut info = match self.privileges.get(&user.username) {
            Some(p) => p.clone(),
            None => return self.reject(batch, req.op_type, "username not exist").await,
        };

        for revoke in &user.privilege_zone {
            info.privilege_zone.retain_mut(|mem| {
                if mem.zone_id != revoke.zone_id {
                    return true;
                }
                // A strictly lower RW downgrades instead of removing.
                match revoke.zone_rw {
                    Some(rw) if revoke.zone_rw < mem.zone_rw => {
                        mem.zone_rw = Some(rw);
                        true
                    }
                    _ => false,
                }
            });
        }

        for revoke in &user.privilege_servlet {
            info.privilege_servlet.retain_mut(|mem| {
                if mem.zone_id != revoke.zone_id || mem.servlet_id != revoke.servlet_id {
                    return true;
                }
                match revoke.servlet_rw {
                    Some(rw) if revoke.servlet_rw < mem.servlet_rw => {
                        mem.servlet_rw = Some(rw);
                        true
                    }
                    _ => false,
                }
            });
        }

        for ip in &user.ip {
            info.ip.retain(|i| i != ip);
        }
        if user.resource_tag.is_some() && user.resource_tag == info.resource_tag {
            info.resource_tag = None;
        }
        info.version += 1;

        batch.insert::<Privileges>(&info.username, &info)?;
        self.sm_tree.apply_batch(batch).await?;

        tracing::info!("drop privilege success, username:{}", info.username);
        self.privileges.insert(info.username.clone(), info);
        Ok(ManagerResponse::success(req.op_type))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_app(&self, app_name: &str) -> Option<AppInfo> {
        let id = self.app_ids.get(app_name)?;
        self.apps.get(id).cloned()
    }

    pub fn list_apps(&self) -> Vec<AppInfo> {
        self.apps.values().cloned().collect()
    }

    pub fn get_zone(&self, app_name: &str, zone_name: &str) -> Option<ZoneInfo> {
        let id = self.zone_ids.get(&zone_key(app_name, zone_name))?;
        self.zones.get(id).cloned()
    }

    pub fn list_zones(&self, app_name: &str) -> Vec<ZoneInfo> {
        self.zones
            .values()
            .filter(|z| z.app_name == app_name)
            .cloned()
            .collect()
    }

    pub fn get_servlet(
        &self,
        app_name: &str,
        zone_name: &str,
        servlet_name: &str,
    ) -> Option<ServletInfo> {
        let id = self
            .servlet_ids
            .get(&servlet_key(app_name, zone_name, servlet_name))?;
        self.servlets.get(id).cloned()
    }

    pub fn list_servlets(&self, app_name: &str, zone_name: Option<&str>) -> Vec<ServletInfo> {
        self.servlets
            .values()
            .filter(|s| s.app_name == app_name)
            .filter(|s| zone_name.map_or(true, |z| s.zone_name == z))
            .cloned()
            .collect()
    }

    pub fn get_config(&self, name: &str, version: Option<ConfigVersion>) -> Option<ConfigInfo> {
        let versions = self.configs.get(name)?;
        match version {
            Some(v) => versions.get(&v).cloned(),
            None => versions.iter().next_back().map(|(_, c)| c.clone()),
        }
    }

    /// The latest version of every known config name.
    pub fn list_configs(&self) -> Vec<ConfigInfo> {
        self.configs
            .values()
            .filter_map(|m| m.iter().next_back().map(|(_, c)| c.clone()))
            .collect()
    }

    pub fn list_config_versions(&self, name: &str) -> Vec<ConfigVersion> {
        self.configs
            .get(name)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn get_privilege(&self, username: &str) -> Option<UserPrivilege> {
        self.privileges.get(username).cloned()
    }

    /// Expand zone/servlet grants into `(user, resource path, rw)` rows.
    pub fn flatten_privileges(&self, username: Option<&str>) -> Vec<FlattenPrivilege> {
        let mut rows = vec![];
        for user in self.privileges.values() {
            if username.map_or(false, |n| n != user.username) {
                continue;
            }
            for grant in &user.privilege_zone {
                let resource = match self.zones.get(&grant.zone_id) {
                    Some(z) => format!("{}.{}", z.app_name, z.zone_name),
                    None => format!("zone:{}", grant.zone_id),
                };
                if let Some(rw) = grant.zone_rw {
                    rows.push(FlattenPrivilege {
                        username: user.username.clone(),
                        resource,
                        rw,
                    });
                }
            }
            for grant in &user.privilege_servlet {
                let resource = match self.servlets.get(&grant.servlet_id) {
                    Some(s) => format!("{}.{}.{}", s.app_name, s.zone_name, s.servlet_name),
                    None => format!("servlet:{}", grant.servlet_id),
                };
                if let Some(rw) = grant.servlet_rw {
                    rows.push(FlattenPrivilege {
                        username: user.username.clone(),
                        resource,
                        rw,
                    });
                }
            }
        }
        rows
    }

    /// Single-pass filter over the live instances; empty filter vectors put
    /// no constraint on their axis, status defaults to NORMAL.
    pub fn naming(&self, req: &NamingRequest) -> Vec<InstanceInfo> {
        let want_status = req.status.unwrap_or(ServletStatus::Normal);

        self.instances
            .values()
            .filter(|i| i.app_name == req.app_name)
            .filter(|i| req.zones.is_empty() || req.zones.contains(&i.zone_name))
            .filter(|i| {
                req.envs.is_empty()
                    || i.env.as_ref().map_or(false, |e| req.envs.contains(e))
            })
            .filter(|i| {
                req.colors.is_empty()
                    || i.color.as_ref().map_or(false, |c| req.colors.contains(c))
            })
            .filter(|i| i.status.unwrap_or_default() == want_status)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GroupStateMachine for CatalogStateMachine {
    type Req = ManagerRequest;
    type Resp = ManagerResponse;

    const GROUP_ID: u64 = GROUP_CATALOG;
    const GROUP_NAME: &'static str = "catalog";

    async fn open(config: &RaftConfig) -> Result<Self> {
        CatalogStateMachine::open(config).await
    }

    #[tracing::instrument(level = "debug", skip(self, entry), fields(log_id=%entry.log_id.index))]
    async fn apply(&mut self, entry: &Entry<Self::Req>) -> Result<Self::Resp> {
        let log_id = entry.log_id;
        match entry.payload {
            EntryPayload::Normal(ref norm) => self.apply_cmd(&norm.data, log_id).await,
            EntryPayload::ConfigChange(ref mem) => {
                let mut batch = self.meta_batch(log_id)?;
                batch.insert::<StateMachineMeta>(
                    &StateMachineMetaKey::LastMembership,
                    &StateMachineMetaValue::Membership(mem.membership.clone()),
                )?;
                self.sm_tree.apply_batch(batch).await?;
                Ok(ManagerResponse::default())
            }
            _ => {
                let batch = self.meta_batch(log_id)?;
                self.sm_tree.apply_batch(batch).await?;
                Ok(ManagerResponse::default())
            }
        }
    }

    fn get_last_applied(&self) -> Result<LogId> {
        let last = self.sm_meta().get(&StateMachineMetaKey::LastApplied)?;
        Ok(match last {
            Some(StateMachineMetaValue::LogId(log_id)) => log_id,
            _ => LogId::default(),
        })
    }

    async fn set_last_applied(&mut self, log_id: LogId) -> Result<()> {
        self.sm_meta()
            .insert(
                &StateMachineMetaKey::LastApplied,
                &StateMachineMetaValue::LogId(log_id),
            )
            .await?;
        Ok(())
    }

    fn get_membership(&self) -> Result<Option<MembershipConfig>> {
        let mem = self.sm_meta().get(&StateMachineMetaKey::LastMembership)?;
        Ok(match mem {
            Some(StateMachineMetaValue::Membership(m)) => Some(m),
            _ => None,
        })
    }

    async fn set_membership(&mut self, membership: MembershipConfig) -> Result<()> {
        self.sm_meta()
            .insert(
                &StateMachineMetaKey::LastMembership,
                &StateMachineMetaValue::Membership(membership),
            )
            .await?;
        Ok(())
    }

    fn snapshot_data(&self) -> Result<Vec<u8>> {
        let snap = SerializableSnapshot {
            kvs: self.sm_tree.export()?,
        };
        let data = serde_json::to_vec(&snap)?;
        Ok(data)
    }

    /// Wipe the catalog key spaces and ingest the snapshot rows, then replay
    /// the prefix scans to rebuild memory.
    async fn install_snapshot_data(&mut self, data: &[u8]) -> Result<()> {
        let snap: SerializableSnapshot = serde_json::from_slice(data)?;
        self.sm_tree.import(&snap.kvs).await?;
        self.removed_instances.clear();
        self.removed_servlets.clear();
        self.rebuild_indexes()?;
        Ok(())
    }
}
