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

use std::sync::Once;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

static START: Once = Once::new();

/// Write logs to stderr, filtered by RUST_LOG. For tests and tools.
pub fn init_default_tracing() {
    START.call_once(|| {
        let fmt_layer = fmt::Layer::default()
            .with_ansi(false)
            .with_writer(std::io::stderr);

        let subscriber = Registry::default()
            .with(EnvFilter::from_default_env())
            .with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });
}

/// Write logs to a daily-rolling file under `dir`, and return the guards that
/// flush the writers on drop. The server holds the guards for its lifetime.
pub fn init_tracing_with_file(app_name: &str, dir: &str, level: &str) -> Vec<WorkerGuard> {
    let mut guards = vec![];

    let file_appender = tracing_appender::rolling::daily(dir, app_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    guards.push(file_guard);

    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(stderr_guard);

    let subscriber = Registry::default()
        .with(EnvFilter::new(level))
        .with(fmt::Layer::default().with_ansi(false).with_writer(file_writer))
        .with(fmt::Layer::default().with_ansi(false).with_writer(stderr_writer));

    tracing::subscriber::set_global_default(subscriber)
        .expect("error setting global tracing subscriber");

    guards
}
