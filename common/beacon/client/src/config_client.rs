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

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common_base::tokio;
use common_base::tokio::sync::watch;
use common_base::tokio::task::JoinHandle;
use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigVersion;
use common_exception::ErrorCode;
use common_exception::Result;
use common_tracing::tracing;

use crate::ConfigCache;

/// Where the watcher pulls the latest config version from. The discovery
/// client implements this over RPC; tests plug in a local fake.
#[async_trait]
pub trait ConfigFetcher: Send + Sync + 'static {
    async fn fetch_latest(&self, name: &str) -> Result<ConfigInfo>;
}

#[derive(Clone, Debug)]
pub struct ConfigEventData {
    pub name: String,
    pub old_version: ConfigVersion,
    pub new_version: ConfigVersion,
    pub content: String,
    pub type_ext: String,
}

type Callback = Arc<dyn Fn(ConfigEventData) + Send + Sync>;

/// The two callbacks a subscriber may install: first sight of a config, and
/// a version advance past the last notified one.
#[derive(Clone, Default)]
pub struct ConfigEventListener {
    pub on_new_config: Option<Callback>,
    pub on_new_version: Option<Callback>,
}

#[derive(Clone)]
struct WatchEntity {
    notified: ConfigVersion,
    listener: ConfigEventListener,
}

/// The config watcher: one background loop polls `fetch_latest` for every
/// subscribed name, keeps the cache fed, and fires callbacks on version
/// advances. There is no server push.
pub struct ConfigClient {
    cache: Arc<ConfigCache>,
    fetcher: Arc<dyn ConfigFetcher>,

    watches: Arc<Mutex<HashMap<String, WatchEntity>>>,
    /// Versions the caller acknowledged; they pre-seed a later watch.
    applied: Mutex<HashMap<String, ConfigVersion>>,

    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigClient {
    /// Start the background watch loop. `step_ms` sleeps between entries,
    /// `round_ms` between rounds.
    pub fn start(
        fetcher: Arc<dyn ConfigFetcher>,
        cache: Arc<ConfigCache>,
        step_ms: u64,
        round_ms: u64,
    ) -> Arc<ConfigClient> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = Arc::new(ConfigClient {
            cache: cache.clone(),
            fetcher: fetcher.clone(),
            watches: Arc::new(Mutex::new(HashMap::new())),
            applied: Mutex::new(HashMap::new()),
            shutdown_tx,
            worker: Mutex::new(None),
        });

        let watches = client.watches.clone();
        let handle = tokio::spawn(Self::watch_loop(
            fetcher,
            cache,
            watches,
            shutdown_rx,
            Duration::from_millis(step_ms),
            Duration::from_millis(round_ms),
        ));
        *client.worker.lock().unwrap() = Some(handle);

        client
    }

    async fn watch_loop(
        fetcher: Arc<dyn ConfigFetcher>,
        cache: Arc<ConfigCache>,
        watches: Arc<Mutex<HashMap<String, WatchEntity>>>,
        mut shutdown_rx: watch::Receiver<bool>,
        step: Duration,
        round: Duration,
    ) {
        tracing::info!("config watch loop started");

        loop {
            let snapshot: Vec<(String, WatchEntity)> = {
                let w = watches.lock().unwrap();
                w.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            };

            let mut updates: Vec<(String, ConfigVersion)> = vec![];

            for (name, entity) in snapshot {
                let info = match fetcher.fetch_latest(&name).await {
                    Ok(info) => info,
                    Err(e) => {
                        // Silent before the first successful contact, to
                        // avoid a warn storm while the server comes up.
                        if !entity.notified.is_zero() {
                            tracing::warn!("fetch latest config {} fail: {}", name, e);
                        }
                        continue;
                    }
                };

                if let Err(e) = cache.add_config(&info) {
                    if e.code() != ErrorCode::MetaStoreAlreadyExists("").code() {
                        tracing::warn!("add config {} to cache fail: {}", name, e);
                    }
                }

                let fetched = info.version;
                let data = ConfigEventData {
                    name: info.name.clone(),
                    old_version: entity.notified,
                    new_version: fetched,
                    content: info.content.clone(),
                    type_ext: info.config_type.as_ext().to_string(),
                };

                if entity.notified.is_zero() {
                    if let Some(cb) = &entity.listener.on_new_config {
                        tracing::info!("fire on_new_config: {} {}", name, fetched);
                        cb(data);
                    }
                } else if fetched > entity.notified {
                    if let Some(cb) = &entity.listener.on_new_version {
                        tracing::info!(
                            "fire on_new_version: {} {} -> {}",
                            name,
                            entity.notified,
                            fetched
                        );
                        cb(data);
                    }
                }
                updates.push((name, fetched));

                tokio::select! {
                    _ = tokio::time::sleep(step) => {}
                    _ = shutdown_rx.changed() => {
                        tracing::info!("config watch loop stopped");
                        return;
                    }
                }
            }

            // Only the notified version is written back; the watch set may
            // have changed in the meantime.
            {
                let mut w = watches.lock().unwrap();
                for (name, version) in updates {
                    if let Some(entity) = w.get_mut(&name) {
                        entity.notified = version;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(round) => {}
                _ = shutdown_rx.changed() => {
                    tracing::info!("config watch loop stopped");
                    return;
                }
            }
        }
    }

    /// Subscribe to `name`. A version previously `apply`d seeds the notified
    /// version, so only newer versions fire.
    pub fn watch_config(&self, name: &str, listener: ConfigEventListener) -> Result<()> {
        let mut w = self.watches.lock().unwrap();
        if w.contains_key(name) {
            return Err(ErrorCode::MetaStoreAlreadyExists(format!(
                "already watching {}",
                name
            )));
        }
        let notified = self
            .applied
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or_default();
        w.insert(
            name.to_string(),
            WatchEntity { notified, listener },
        );
        Ok(())
    }

    pub fn unwatch_config(&self, name: &str) -> Result<()> {
        let mut w = self.watches.lock().unwrap();
        if w.remove(name).is_none() {
            return Err(ErrorCode::MetaStoreNotFound(format!("not watching {}", name)));
        }
        Ok(())
    }

    /// Record the caller's acknowledgement of a version. Purely local.
    pub fn apply(&self, name: &str, version: ConfigVersion) {
        self.applied
            .lock()
            .unwrap()
            .insert(name.to_string(), version);
    }

    pub fn unapply(&self, name: &str) -> Result<()> {
        let _ = self.unwatch_config(name);
        if self.applied.lock().unwrap().remove(name).is_none() {
            return Err(ErrorCode::MetaStoreNotFound(format!("not applied {}", name)));
        }
        Ok(())
    }

    /// Cache first; on a miss fetch the latest from the server and feed the
    /// cache.
    pub async fn get_config(&self, name: &str) -> Result<ConfigInfo> {
        if let Ok(info) = self.cache.get_latest(name) {
            return Ok(info);
        }

        let info = self.fetcher.fetch_latest(name).await?;
        let _ = self.cache.add_config(&info);
        Ok(info)
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// Stop the watch loop and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().unwrap().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }
}
