// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Logging bootstrap built on the `tracing` ecosystem.

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize logging for a Tidal process.
///
/// The filter is taken from `TIDAL_LOG_LEVEL`, then `RUST_LOG`, then the
/// `verbosity` argument (0 = info, 1 = debug, 2+ = trace). With a `log_dir`
/// the process appends to `<log_dir>/<component>.log`, otherwise stderr.
pub fn init_logging(component: &str, log_dir: Option<&Path>, verbosity: i32) {
    let filter = EnvFilter::try_from_env("TIDAL_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| {
            let level = match verbosity {
                0 => "info",
                1 => "debug",
                _ => "trace",
            };
            EnvFilter::new(level)
        });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if let Some(dir) = log_dir {
        let log_file = dir.join(format!("{component}.log"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .expect("failed to open log file");
        subscriber.with_writer(std::sync::Arc::new(file)).init();
    } else {
        subscriber.init();
    }

    tracing::info!(component, "logging initialized");
}
