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
use std::path::PathBuf;
use std::sync::Mutex;

use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigVersion;
use common_exception::ErrorCode;
use common_exception::Result;
use common_tracing::tracing;

type VersionMap = BTreeMap<ConfigVersion, ConfigInfo>;

/// Process-local versioned config store, persisted as one file per
/// `(name, version)` under `cache_dir` and reloaded on start. An empty dir
/// path keeps the cache memory-only.
pub struct ConfigCache {
    cache_dir: Option<PathBuf>,
    cache: Mutex<BTreeMap<String, VersionMap>>,
}

impl ConfigCache {
    /// Open the cache: create the dir if missing, otherwise parse every file
    /// in it back into memory.
    pub fn init(cache_dir: &str) -> Result<ConfigCache> {
        let cache = ConfigCache {
            cache_dir: if cache_dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(cache_dir))
            },
            cache: Mutex::new(BTreeMap::new()),
        };

        let dir = match &cache.cache_dir {
            None => return Ok(cache),
            Some(d) => d.clone(),
        };

        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            return Ok(cache);
        }

        let mut map = cache.cache.lock().unwrap();
        for dent in std::fs::read_dir(&dir)? {
            let path = dent?.path();
            if !path.is_file() {
                continue;
            }
            let body = std::fs::read_to_string(&path)?;
            let info: ConfigInfo = serde_json::from_str(&body).map_err(|e| {
                ErrorCode::SerdeError(format!("cache file {}: {}", path.display(), e))
            })?;
            tracing::info!("loading config cache file: {}", path.display());
            map.entry(info.name.clone())
                .or_insert_with(BTreeMap::new)
                .insert(info.version, info);
        }
        drop(map);

        Ok(cache)
    }

    fn file_path(&self, info: &ConfigInfo) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| {
            dir.join(format!(
                "{}-{}.{}",
                info.name,
                info.version,
                info.config_type.as_ext()
            ))
        })
    }

    /// Insert one config and persist its file. An already-present
    /// `(name, version)` is refused with `MetaStoreAlreadyExists`.
    pub fn add_config(&self, info: &ConfigInfo) -> Result<()> {
        {
            let mut map = self.cache.lock().unwrap();
            let versions = map.entry(info.name.clone()).or_insert_with(BTreeMap::new);
            if versions.contains_key(&info.version) {
                return Err(ErrorCode::MetaStoreAlreadyExists(format!(
                    "config {} version {} already in cache",
                    info.name, info.version
                )));
            }
            versions.insert(info.version, info.clone());
        }

        if let Some(path) = self.file_path(info) {
            std::fs::write(path, serde_json::to_string_pretty(info)?)?;
        }
        Ok(())
    }

    pub fn get_config(&self, name: &str, version: ConfigVersion) -> Result<ConfigInfo> {
        let map = self.cache.lock().unwrap();
        map.get(name)
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| {
                ErrorCode::MetaStoreNotFound(format!("config {} version {}", name, version))
            })
    }

    pub fn get_latest(&self, name: &str) -> Result<ConfigInfo> {
        let map = self.cache.lock().unwrap();
        map.get(name)
            .and_then(|versions| versions.iter().next_back().map(|(_, c)| c.clone()))
            .ok_or_else(|| ErrorCode::MetaStoreNotFound(format!("config {}", name)))
    }

    pub fn list_names(&self) -> Vec<String> {
        let map = self.cache.lock().unwrap();
        map.keys().cloned().collect()
    }

    pub fn list_versions(&self, name: &str) -> Result<Vec<ConfigVersion>> {
        let map = self.cache.lock().unwrap();
        map.get(name)
            .map(|versions| versions.keys().copied().collect())
            .ok_or_else(|| ErrorCode::MetaStoreNotFound(format!("config {}", name)))
    }

    /// Remove one version; the file goes with it.
    pub fn remove_version(&self, name: &str, version: ConfigVersion) -> Result<()> {
        let mut map = self.cache.lock().unwrap();
        let versions = map
            .get_mut(name)
            .ok_or_else(|| ErrorCode::MetaStoreNotFound(format!("config {}", name)))?;
        let info = versions
            .remove(&version)
            .ok_or_else(|| {
                ErrorCode::MetaStoreNotFound(format!("config {} version {}", name, version))
            })?;
        if versions.is_empty() {
            map.remove(name);
        }
        drop(map);

        self.remove_file(&info);
        Ok(())
    }

    pub fn remove_versions(&self, name: &str, versions: &[ConfigVersion]) -> Result<()> {
        for v in versions {
            // Missing versions are fine, the rest are still removed.
            let _ = self.remove_version(name, *v);
        }
        Ok(())
    }

    /// Remove every version strictly less than `version`.
    pub fn remove_less_than(&self, name: &str, version: ConfigVersion) -> Result<()> {
        let removed = {
            let mut map = self.cache.lock().unwrap();
            let versions = map
                .get_mut(name)
                .ok_or_else(|| ErrorCode::MetaStoreNotFound(format!("config {}", name)))?;
            let keep = versions.split_off(&version);
            let removed = std::mem::replace(versions, keep);
            if versions.is_empty() {
                map.remove(name);
            }
            removed
        };

        for info in removed.values() {
            self.remove_file(info);
        }
        Ok(())
    }

    /// Remove every version of `name`.
    pub fn remove(&self, name: &str) -> Result<()> {
        let removed = {
            let mut map = self.cache.lock().unwrap();
            map.remove(name)
                .ok_or_else(|| ErrorCode::MetaStoreNotFound(format!("config {}", name)))?
        };

        for info in removed.values() {
            self.remove_file(info);
        }
        Ok(())
    }

    fn remove_file(&self, info: &ConfigInfo) {
        if let Some(path) = self.file_path(info) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("remove cache file {} fail: {}", path.display(), e);
            }
        }
    }
}
