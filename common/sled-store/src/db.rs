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

use lazy_static::lazy_static;
use tempfile::TempDir;

struct GlobalSledDb {
    /// Keeps the temp dir alive if the db is ephemeral.
    _temp_dir: Option<TempDir>,
    db: sled::Db,
}

lazy_static! {
    static ref GLOBAL_SLED: Arc<Mutex<Option<GlobalSledDb>>> = Arc::new(Mutex::new(None));
}

/// Open a process-wide sled::Db rooted at `path`.
///
/// A sled::Db has to be a singleton per process; every tree in this process
/// is opened on this db. Calling it twice is a no-op.
pub fn init_sled_db(path: String) {
    let mut guard = GLOBAL_SLED.as_ref().lock().unwrap();
    if guard.is_some() {
        return;
    }
    *guard = Some(GlobalSledDb {
        _temp_dir: None,
        db: sled::open(path).expect("open global sled::Db"),
    });
}

/// Open a process-wide sled::Db in a temp dir. For tests.
pub fn init_temp_sled_db(temp_dir: TempDir) {
    let mut guard = GLOBAL_SLED.as_ref().lock().unwrap();
    if guard.is_some() {
        return;
    }
    let path = temp_dir.path().to_str().unwrap().to_string();
    *guard = Some(GlobalSledDb {
        _temp_dir: Some(temp_dir),
        db: sled::open(path).expect("open temp sled::Db"),
    });
}

pub fn get_sled_db() -> sled::Db {
    GLOBAL_SLED
        .as_ref()
        .lock()
        .unwrap()
        .as_ref()
        .expect("init_sled_db() or init_temp_sled_db() must be called before get_sled_db()")
        .db
        .clone()
}
