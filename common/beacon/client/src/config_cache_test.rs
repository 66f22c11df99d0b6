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

use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigType;
use common_beacon_types::ConfigVersion;
use pretty_assertions::assert_eq;

use crate::ConfigCache;

fn info(name: &str, version: ConfigVersion, content: &str) -> ConfigInfo {
    ConfigInfo {
        name: name.to_string(),
        version,
        content: content.to_string(),
        config_type: ConfigType::Json,
        ctime: 0,
        id: 0,
    }
}

#[test]
fn test_cache_add_get() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ConfigCache::init(dir.path().to_str().unwrap())?;

    let v100 = ConfigVersion::new(1, 0, 0);
    let v110 = ConfigVersion::new(1, 1, 0);

    cache.add_config(&info("n", v100, "a"))?;
    cache.add_config(&info("n", v110, "b"))?;

    // duplicates are refused
    let err = cache.add_config(&info("n", v100, "x")).unwrap_err();
    assert_eq!(1003, err.code());

    assert_eq!("a", cache.get_config("n", v100)?.content);
    assert_eq!("b", cache.get_latest("n")?.content);
    assert_eq!(vec![v100, v110], cache.list_versions("n")?);
    assert_eq!(vec!["n".to_string()], cache.list_names());

    // one file per (name, version)
    let files = std::fs::read_dir(dir.path())?.count();
    assert_eq!(2, files);

    Ok(())
}

#[test]
fn test_cache_reload_from_disk() -> anyhow::Result<()> {
    // Property 8: a fresh cache over the same dir serves the latest version
    // with zero network involved.

    let dir = tempfile::tempdir()?;
    let v100 = ConfigVersion::new(1, 0, 0);
    let v110 = ConfigVersion::new(1, 1, 0);

    {
        let cache = ConfigCache::init(dir.path().to_str().unwrap())?;
        cache.add_config(&info("n", v100, "a"))?;
        cache.add_config(&info("n", v110, "b"))?;
    }

    let cache = ConfigCache::init(dir.path().to_str().unwrap())?;
    assert_eq!(v110, cache.get_latest("n")?.version);
    assert_eq!("b", cache.get_latest("n")?.content);
    assert_eq!(vec![v100, v110], cache.list_versions("n")?);

    Ok(())
}

#[test]
fn test_cache_removes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = ConfigCache::init(dir.path().to_str().unwrap())?;

    let versions: Vec<ConfigVersion> = (0..4).map(|p| ConfigVersion::new(1, p, 0)).collect();
    for v in &versions {
        cache.add_config(&info("n", *v, "c"))?;
    }

    cache.remove_version("n", versions[0])?;
    assert_eq!(versions[1..].to_vec(), cache.list_versions("n")?);
    assert_eq!(3, std::fs::read_dir(dir.path())?.count());

    cache.remove_less_than("n", versions[3])?;
    assert_eq!(vec![versions[3]], cache.list_versions("n")?);
    assert_eq!(1, std::fs::read_dir(dir.path())?.count());

    cache.remove("n")?;
    assert!(cache.list_versions("n").is_err());
    assert_eq!(0, std::fs::read_dir(dir.path())?.count());

    Ok(())
}

#[test]
fn test_cache_memory_only() -> anyhow::Result<()> {
    let cache = ConfigCache::init("")?;
    cache.add_config(&info("n", ConfigVersion::new(1, 0, 0), "a"))?;
    assert_eq!("a", cache.get_latest("n")?.content);
    Ok(())
}
