// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, future::Future, process::ExitCode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use chatlog::{
    config::ChatLogConfig,
    entry::Entry,
    errors::SubmitError,
    service::{ChatLogHandle, ChatLogService},
    sink::SinkHealth,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("CHATLOG_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("async_nats=warn,{}", log_level);

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match ChatLogConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let (service, handle) = match ChatLogService::from_config(&config) {
        Ok(started) => started,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    tokio::spawn(service.run());

    let mut health = handle.health();
    tokio::spawn(async move {
        while health.changed().await.is_ok() {
            match &*health.borrow_and_update() {
                SinkHealth::Healthy => info!("Sink recovered"),
                SinkHealth::Unavailable { reason } => error!("Sink unavailable: {}", reason),
            }
        }
    });

    info!(
        "Chat log started for protocol {} with {:?} backend",
        config.protocol, config.backend
    );

    let stop = forward(
        BufReader::new(tokio::io::stdin()),
        &handle,
        tokio::signal::ctrl_c(),
    )
    .await;
    debug!("Input stopped ({:?}), draining queued entries", stop);

    handle.shutdown();
    handle.closed().await;

    let stats = handle.stats();
    info!(
        "Chat log closed: {} submitted, {} persisted, {} dropped, {} rotations",
        stats.submitted, stats.persisted, stats.dropped, stats.rotations
    );

    if stats.dropped > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Why [`forward`] stopped reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    EndOfInput,
    Interrupted,
    ReadError,
    Shutdown,
}

/// Submits one entry per input line until the input ends, the chat log shuts
/// down or `interrupt` resolves. The interrupt is also honoured while a
/// submission waits for room in a full queue.
async fn forward<R, I>(reader: R, handle: &ChatLogHandle, interrupt: I) -> Stop
where
    R: AsyncBufRead + Unpin,
    I: Future,
{
    let mut lines = reader.lines();
    tokio::pin!(interrupt);

    loop {
        let line = tokio::select! {
            _ = &mut interrupt => {
                info!("Interrupted, draining queued entries");
                return Stop::Interrupted;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return Stop::EndOfInput,
            Err(e) => {
                error!("Failed to read input: {}", e);
                return Stop::ReadError;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let entry: Entry = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping malformed entry: {}", e);
                continue;
            }
        };

        let submitted = tokio::select! {
            _ = &mut interrupt => {
                info!("Interrupted while waiting for queue space, draining queued entries");
                return Stop::Interrupted;
            }
            submitted = handle.submit(entry) => submitted,
        };
        if let Err(SubmitError::Shutdown) = submitted {
            return Stop::Shutdown;
        }
    }
}
