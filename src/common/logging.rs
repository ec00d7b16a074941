// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Tracing setup for driver diagnostics.
//!
//! One event per line. Driver logs are read while chasing races between
//! pump, close, and update threads, so every line carries the emitting
//! thread and the exact source location.

use std::fmt;
use std::sync::OnceLock;

use chrono::Local;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

static INIT: OnceLock<()> = OnceLock::new();

/// `LEVEL date time thread target:line] message`
struct DriverLineFormat;

impl<S, N> FormatEvent<S, N> for DriverLineFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let thread = std::thread::current();
        write!(
            writer,
            "{:<5} {} {} {}",
            metadata.level().as_str(),
            Local::now().format("%y%m%d %H:%M:%S%.6f"),
            thread.name().unwrap_or("-"),
            metadata.target(),
        )?;
        if let Some(line) = metadata.line() {
            write!(writer, ":{}", line)?;
        }
        write!(writer, "] ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the process-wide subscriber with `level` as the fallback filter;
/// a `RUST_LOG` directive in the environment wins over it. Safe to call
/// more than once, so tests and embedding servers need not coordinate.
pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .event_format(DriverLineFormat)
            .try_init();
    });
}

pub fn init() {
    init_with_level("info");
}

pub use tracing::{debug, error, info, trace, warn};
