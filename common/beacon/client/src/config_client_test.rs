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

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common_base::tokio;
use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigType;
use common_beacon_types::ConfigVersion;
use common_exception::ErrorCode;
use common_exception::Result;
use pretty_assertions::assert_eq;

use crate::ConfigCache;
use crate::ConfigClient;
use crate::ConfigEventData;
use crate::ConfigEventListener;
use crate::ConfigFetcher;

/// A fetcher over a mutable local table, standing in for the server.
struct FakeFetcher {
    latest: Mutex<Option<ConfigInfo>>,
}

impl FakeFetcher {
    fn new() -> Arc<Self> {
        Arc::new(FakeFetcher {
            latest: Mutex::new(None),
        })
    }

    fn publish(&self, version: ConfigVersion, content: &str) {
        *self.latest.lock().unwrap() = Some(ConfigInfo {
            name: "c".to_string(),
            version,
            content: content.to_string(),
            config_type: ConfigType::Json,
            ctime: 0,
            id: 0,
        });
    }
}

#[async_trait]
impl ConfigFetcher for FakeFetcher {
    async fn fetch_latest(&self, name: &str) -> Result<ConfigInfo> {
        self.latest
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ErrorCode::MetaStoreNotFound(format!("config {}", name)))
    }
}

async fn wait_for<F: Fn() -> bool>(cond: F, timeout_ms: u64) -> bool {
    let mut waited = 0;
    while waited < timeout_ms {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 20;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_watcher_fires_once_per_version() -> anyhow::Result<()> {
    // Property 9: subscribe, see the first version once, see the advance once.

    let dir = tempfile::tempdir()?;
    let cache = Arc::new(ConfigCache::init(dir.path().to_str().unwrap())?);
    let fetcher = FakeFetcher::new();

    let client = ConfigClient::start(fetcher.clone(), cache.clone(), 5, 20);

    let events: Arc<Mutex<Vec<(String, ConfigVersion, ConfigVersion)>>> =
        Arc::new(Mutex::new(vec![]));

    let new_events = events.clone();
    let ver_events = events.clone();
    let listener = ConfigEventListener {
        on_new_config: Some(Arc::new(move |d: ConfigEventData| {
            new_events
                .lock()
                .unwrap()
                .push(("new".to_string(), d.old_version, d.new_version));
        })),
        on_new_version: Some(Arc::new(move |d: ConfigEventData| {
            ver_events
                .lock()
                .unwrap()
                .push(("ver".to_string(), d.old_version, d.new_version));
        })),
    };
    client.watch_config("c", listener)?;

    let v110 = ConfigVersion::new(1, 1, 0);
    fetcher.publish(v110, "a");

    assert!(wait_for(|| events.lock().unwrap().len() == 1, 2000).await);
    {
        let got = events.lock().unwrap();
        assert_eq!(
            ("new".to_string(), ConfigVersion::default(), v110),
            got[0]
        );
    }

    // no version advance, no further events
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(1, events.lock().unwrap().len());

    // publish a newer version: exactly one on_new_version
    let v120 = ConfigVersion::new(1, 2, 0);
    fetcher.publish(v120, "b");

    assert!(wait_for(|| events.lock().unwrap().len() == 2, 2000).await);
    {
        let got = events.lock().unwrap();
        assert_eq!(("ver".to_string(), v110, v120), got[1]);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(2, events.lock().unwrap().len());

    // both versions landed in the cache dir
    assert_eq!(vec![v110, v120], cache.list_versions("c")?);
    assert_eq!(2, std::fs::read_dir(dir.path())?.count());

    client.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_watcher_apply_preseeds_version() -> anyhow::Result<()> {
    // An applied version means the first fetch of the same version fires
    // nothing; only a later one does.

    let cache = Arc::new(ConfigCache::init("")?);
    let fetcher = FakeFetcher::new();
    let client = ConfigClient::start(fetcher.clone(), cache, 5, 20);

    let fired: Arc<Mutex<Vec<ConfigVersion>>> = Arc::new(Mutex::new(vec![]));

    let v110 = ConfigVersion::new(1, 1, 0);
    client.apply("c", v110);

    let sink = fired.clone();
    client.watch_config(
        "c",
        ConfigEventListener {
            on_new_config: Some(Arc::new(|_| panic!("must not fire on_new_config"))),
            on_new_version: Some(Arc::new(move |d: ConfigEventData| {
                sink.lock().unwrap().push(d.new_version);
            })),
        },
    )?;

    fetcher.publish(v110, "same");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fired.lock().unwrap().is_empty());

    let v120 = ConfigVersion::new(1, 2, 0);
    fetcher.publish(v120, "newer");
    assert!(wait_for(|| fired.lock().unwrap().len() == 1, 2000).await);
    assert_eq!(v120, fired.lock().unwrap()[0]);

    client.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_unwatch_stops_events() -> anyhow::Result<()> {
    let cache = Arc::new(ConfigCache::init("")?);
    let fetcher = FakeFetcher::new();
    let client = ConfigClient::start(fetcher.clone(), cache, 5, 20);

    let count = Arc::new(Mutex::new(0usize));
    let sink = count.clone();
    client.watch_config(
        "c",
        ConfigEventListener {
            on_new_config: Some(Arc::new(move |_| {
                *sink.lock().unwrap() += 1;
            })),
            on_new_version: None,
        },
    )?;

    fetcher.publish(ConfigVersion::new(1, 0, 0), "a");
    assert!(wait_for(|| *count.lock().unwrap() >= 1, 2000).await);

    client.unwatch_config("c")?;
    let seen = *count.lock().unwrap();

    fetcher.publish(ConfigVersion::new(2, 0, 0), "b");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(seen, *count.lock().unwrap());

    client.stop().await;
    Ok(())
}
