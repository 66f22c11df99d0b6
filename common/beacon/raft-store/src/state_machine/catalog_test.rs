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

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_raft::raft::Entry;
use async_raft::raft::EntryNormal;
use async_raft::raft::EntryPayload;
use async_raft::LogId;
use common_base::tokio;
use common_beacon_types::AppInfo;
use common_beacon_types::ConfigInfo;
use common_beacon_types::ConfigVersion;
use common_beacon_types::ErrCode;
use common_beacon_types::InstanceInfo;
use common_beacon_types::ManagerRequest;
use common_beacon_types::ManagerResponse;
use common_beacon_types::NamingRequest;
use common_beacon_types::OpType;
use common_beacon_types::PrivilegeRw;
use common_beacon_types::PrivilegeZone;
use common_beacon_types::ServletInfo;
use common_beacon_types::UserPrivilege;
use common_beacon_types::ZoneInfo;
use common_exception::Result;
use pretty_assertions::assert_eq;

use crate::config::RaftConfig;
use crate::state_machine::CatalogStateMachine;
use crate::state_machine::GroupStateMachine;

pub fn new_test_config() -> RaftConfig {
    let t = tempfile::tempdir().expect("create temp dir");
    common_sled_store::init_temp_sled_db(t);

    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let n = SEQ.fetch_add(1, Ordering::SeqCst);

    let mut config = RaftConfig::empty();
    config.config_id = format!("ut-{}", n);
    config.no_sync = true;
    config.instance_quarantine_secs = 2;
    config
}

struct Applier {
    index: u64,
}

impl Applier {
    fn new() -> Self {
        Applier { index: 0 }
    }

    async fn apply(
        &mut self,
        sm: &mut CatalogStateMachine,
        req: ManagerRequest,
    ) -> Result<ManagerResponse> {
        self.index += 1;
        let entry = Entry {
            log_id: LogId {
                term: 1,
                index: self.index,
            },
            payload: EntryPayload::Normal(EntryNormal { data: req }),
        };
        sm.apply(&entry).await
    }
}

fn create_app_req(name: &str, quota: i64) -> ManagerRequest {
    let mut req = ManagerRequest::new(OpType::CreateApp);
    req.app = Some(AppInfo {
        app_name: name.to_string(),
        quota: Some(quota),
        ..Default::default()
    });
    req
}

fn create_zone_req(app: &str, zone: &str, quota: i64) -> ManagerRequest {
    let mut req = ManagerRequest::new(OpType::CreateZone);
    req.zone = Some(ZoneInfo {
        zone_name: zone.to_string(),
        app_name: app.to_string(),
        quota: Some(quota),
        ..Default::default()
    });
    req
}

fn create_servlet_req(app: &str, zone: &str, servlet: &str) -> ManagerRequest {
    let mut req = ManagerRequest::new(OpType::CreateServlet);
    req.servlet = Some(ServletInfo {
        servlet_name: servlet.to_string(),
        zone_name: zone.to_string(),
        app_name: app.to_string(),
        ..Default::default()
    });
    req
}

fn instance_req(op: OpType, addr: &str, env: &str, color: &str) -> ManagerRequest {
    let mut req = ManagerRequest::new(op);
    req.instance = Some(InstanceInfo {
        address: addr.to_string(),
        app_name: "sug".to_string(),
        zone_name: "cn".to_string(),
        servlet_name: "api".to_string(),
        env: Some(env.to_string()),
        color: Some(color.to_string()),
        status: None,
        ..Default::default()
    });
    req
}

fn config_req(name: &str, version: ConfigVersion, content: &str) -> ManagerRequest {
    let mut req = ManagerRequest::new(OpType::CreateConfig);
    req.config = Some(ConfigInfo {
        name: name.to_string(),
        version,
        content: content.to_string(),
        ..Default::default()
    });
    req
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_catalog_create_hierarchy() -> Result<()> {
    // S1: create app, zone, servlet; naming is empty until an instance lands.

    let config = new_test_config();
    let mut sm = CatalogStateMachine::open(&config).await?;
    let mut ap = Applier::new();

    let resp = ap.apply(&mut sm, create_app_req("sug", 10)).await?;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(Some(1), resp.app_id);
    assert_eq!(Some(1), resp.version);

    // duplicate name
    let resp = ap.apply(&mut sm, create_app_req("sug", 10)).await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);

    let resp = ap.apply(&mut sm, create_zone_req("sug", "cn", 5)).await?;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(Some(1), resp.zone_id);

    // zone under an unknown app
    let resp = ap.apply(&mut sm, create_zone_req("nope", "cn", 5)).await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);
    assert_eq!("app not exist", resp.errmsg);

    let resp = ap
        .apply(&mut sm, create_servlet_req("sug", "cn", "api"))
        .await?;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(Some(1), resp.servlet_id);

    let got = sm.naming(&NamingRequest {
        app_name: "sug".to_string(),
        zones: vec!["cn".to_string()],
        ..Default::default()
    });
    assert!(got.is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_catalog_referential_integrity() -> Result<()> {
    // A parent with children refuses to drop; empty parents drop fine.

    let config = new_test_config();
    let mut sm = CatalogStateMachine::open(&config).await?;
    let mut ap = Applier::new();

    ap.apply(&mut sm, create_app_req("sug", 10)).await?;
    ap.apply(&mut sm, create_zone_req("sug", "cn", 5)).await?;

    let mut drop_app = ManagerRequest::new(OpType::DropApp);
    drop_app.app = Some(AppInfo {
        app_name: "sug".to_string(),
        ..Default::default()
    });
    let resp = ap.apply(&mut sm, drop_app.clone()).await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);
    assert_eq!("app has zone", resp.errmsg);

    let mut drop_zone = ManagerRequest::new(OpType::DropZone);
    drop_zone.zone = Some(ZoneInfo {
        zone_name: "cn".to_string(),
        app_name: "sug".to_string(),
        ..Default::default()
    });
    let resp = ap.apply(&mut sm, drop_zone).await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    let resp = ap.apply(&mut sm, drop_app).await?;
    assert_eq!(ErrCode::Success, resp.errcode);
    assert_eq!(None, sm.get_app("sug"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_catalog_config_version_monotonic() -> Result<()> {
    // S3: duplicate and non-increasing versions are refused.

    let config = new_test_config();
    let mut sm = CatalogStateMachine::open(&config).await?;
    let mut ap = Applier::new();

    let v100 = ConfigVersion::new(1, 0, 0);
    let resp = ap.apply(&mut sm, config_req("c", v100, "a")).await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    let resp = ap.apply(&mut sm, config_req("c", v100, "b")).await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);
    assert_eq!("config already exist", resp.errmsg);

    let resp = ap
        .apply(&mut sm, config_req("c", ConfigVersion::new(0, 9, 0), "b"))
        .await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);
    assert_eq!("Version numbers must increase monotonically", resp.errmsg);

    let v110 = ConfigVersion::new(1, 1, 0);
    let resp = ap.apply(&mut sm, config_req("c", v110, "b")).await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    assert_eq!(vec![v100, v110], sm.list_config_versions("c"));
    assert_eq!("b", sm.get_config("c", None).unwrap().content);
    assert_eq!("a", sm.get_config("c", Some(v100)).unwrap().content);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_catalog_instance_quarantine() -> Result<()> {
    // Registering a just-dropped address fails until the window elapses.
    // The window is 2s in the test config.

    let config = new_test_config();
    let mut sm = CatalogStateMachine::open(&config).await?;
    let mut ap = Applier::new();

    ap.apply(&mut sm, create_app_req("sug", 10)).await?;
    ap.apply(&mut sm, create_zone_req("sug", "cn", 5)).await?;
    ap.apply(&mut sm, create_servlet_req("sug", "cn", "api"))
        .await?;

    let addr = "10.0.0.1:8080";
    let resp = ap
        .apply(&mut sm, instance_req(OpType::AddInstance, addr, "prod", "green"))
        .await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    let resp = ap
        .apply(&mut sm, instance_req(OpType::DropInstance, addr, "prod", "green"))
        .await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    let resp = ap
        .apply(&mut sm, instance_req(OpType::AddInstance, addr, "prod", "green"))
        .await?;
    assert_eq!(ErrCode::InputParamError, resp.errcode);
    assert_eq!("instance removed recently, in quarantine", resp.errmsg);

    tokio::time::sleep(Duration::from_millis(2200)).await;

    let resp = ap
        .apply(&mut sm, instance_req(OpType::AddInstance, addr, "prod", "green"))
        .await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_catalog_naming_filter() -> Result<()> {
    // S2 and the filter matrix: zones constrain, empty axes do not.

    let config = new_test_config();
    let mut sm = CatalogStateMachine::open(&config).await?;
    let mut ap = Applier::new();

    ap.apply(&mut sm, create_app_req("sug", 10)).await?;
    ap.apply(&mut sm, create_zone_req("sug", "z1", 5)).await?;
    ap.apply(&mut sm, create_zone_req("sug", "z2", 5)).await?;

    for (zone, servlet) in [("z1", "api"), ("z2", "api")] {
        ap.apply(&mut sm, create_servlet_req("sug", zone, servlet))
            .await?;
    }

    let add = |zone: &str, addr: &str, env: &str, color: &str| {
        let mut req = ManagerRequest::new(OpType::AddInstance);
        req.instance = Some(InstanceInfo {
            address: addr.to_string(),
            app_name: "sug".to_string(),
            zone_name: zone.to_string(),
            servlet_name: "api".to_string(),
            env: Some(env.to_string()),
            color: Some(color.to_string()),
            ..Default::default()
        });
        req
    };

    let reqs = vec![
        add("z1", "10.0.0.1:80", "e1", "green"),
        add("z1", "10.0.0.2:80", "e2", "green"),
        add("z2", "10.0.0.3:80", "e1", "red"),
    ];
    for req in reqs {
        let resp = ap.apply(&mut sm, req).await?;
        assert_eq!(ErrCode::Success, resp.errcode);
    }

    let got = sm.naming(&NamingRequest {
        app_name: "sug".to_string(),
        zones: vec!["z1".to_string()],
        envs: vec![],
        colors: vec!["green".to_string()],
        status: None,
    });
    let mut addrs = got.iter().map(|i| i.address.clone()).collect::<Vec<_>>();
    addrs.sort();
    assert_eq!(vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()], addrs);

    let got = sm.naming(&NamingRequest {
        app_name: "sug".to_string(),
        ..Default::default()
    });
    assert_eq!(3, got.len());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_catalog_privilege_merge() -> Result<()> {
    // add-privilege widens unless forced; drop downgrades on a lower rw.

    let config = new_test_config();
    let mut sm = CatalogStateMachine::open(&config).await?;
    let mut ap = Applier::new();

    let mut create = ManagerRequest::new(OpType::CreateUser);
    create.privilege = Some(UserPrivilege {
        username: "u1".to_string(),
        password: "secret".to_string(),
        app_name: "sug".to_string(),
        ..Default::default()
    });
    let resp = ap.apply(&mut sm, create).await?;
    assert_eq!(ErrCode::Success, resp.errcode);

    // stored as a digest, never plaintext
    let stored = sm.get_privilege("u1").unwrap();
    assert_ne!("secret", stored.password);
    assert_eq!(64, stored.password.len());

    let grant = |rw, force| {
        let mut req = ManagerRequest::new(OpType::AddPrivilege);
        req.privilege = Some(UserPrivilege {
            username: "u1".to_string(),
            privilege_zone: vec![PrivilegeZone {
                zone_id: 7,
                zone_rw: Some(rw),
                force,
            }],
            ..Default::default()
        });
        req
    };

    ap.apply(&mut sm, grant(PrivilegeRw::Write, false)).await?;
    // a plain Read grant does not narrow an existing Write
    ap.apply(&mut sm, grant(PrivilegeRw::Read, false)).await?;
    let got = sm.get_privilege("u1").unwrap();
    assert_eq!(Some(PrivilegeRw::Write), got.privilege_zone[0].zone_rw);

    // forced Read narrows it
    ap.apply(&mut sm, grant(PrivilegeRw::Read, true)).await?;
    let got = sm.get_privilege("u1").unwrap();
    assert_eq!(Some(PrivilegeRw::Read), got.privilege_zone[0].zone_rw);

    // drop with no rw removes the grant
    let mut drop = ManagerRequest::new(OpType::DropPrivilege);
    drop.privilege = Some(UserPrivilege {
        username: "u1".to_string(),
        privilege_zone: vec![PrivilegeZone {
            zone_id: 7,
            zone_rw: None,
            force: false,
        }],
        ..Default::default()
    });
    ap.apply(&mut sm, drop).await?;
    let got = sm.get_privilege("u1").unwrap();
    assert!(got.privilege_zone.is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_catalog_snapshot_roundtrip() -> Result<()> {
    // Dump a populated catalog and install it into a fresh state machine.

    let config = new_test_config();
    let mut sm = CatalogStateMachine::open(&config).await?;
    let mut ap = Applier::new();

    ap.apply(&mut sm, create_app_req("sug", 10)).await?;
    ap.apply(&mut sm, create_zone_req("sug", "cn", 5)).await?;
    ap.apply(
        &mut sm,
        config_req("c", ConfigVersion::new(1, 0, 0), "body"),
    )
    .await?;

    let data = sm.snapshot_data()?;

    let config2 = new_test_config();
    let mut sm2 = CatalogStateMachine::open(&config2).await?;
    sm2.install_snapshot_data(&data).await?;

    assert_eq!(Some(10), sm2.get_app("sug").unwrap().quota);
    assert_eq!(1, sm2.get_zone("sug", "cn").unwrap().zone_id);
    assert_eq!("body", sm2.get_config("c", None).unwrap().content);

    // ids keep increasing after the restore
    let mut ap2 = Applier::new();
    ap2.index = 100;
    let resp = ap2.apply(&mut sm2, create_app_req("other", 1)).await?;
    assert_eq!(Some(2), resp.app_id);

    Ok(())
}
