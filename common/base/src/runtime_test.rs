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

use common_exception::Result;

use crate::Runtime;
use crate::TrySpawn;

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_runtime_spawn() -> Result<()> {
    let counter = Arc::new(Mutex::new(0));

    let runtime = Runtime::with_worker_threads(2)?;
    let inner = Arc::clone(&counter);
    let handle = runtime.spawn(async move {
        *inner.lock().unwrap() += 1;
    });
    handle.await.unwrap();

    assert_eq!(1, *counter.lock().unwrap());
    Ok(())
}
