// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded queue between producers and the single writer task.
//!
//! ```text
//!    ┌──────────────┐
//!    │   Handles    │ (many producers, Clone)
//!    └──────┬───────┘
//!           │ bounded mpsc, FIFO, waits when full
//!           v
//!    ┌──────────────┐
//!    │   Service    │ (single consumer task)
//!    └──────┬───────┘
//!           │ owns resolver + sink, no locks
//!           v
//!    ┌──────────────┐
//!    │     Sink     │ (files or durable queue)
//!    └──────────────┘
//! ```
//!
//! Shutdown stops new submissions, drains what is already queued, closes the
//! sink and only then reports the chat log as closed.

use crate::config::ChatLogConfig;
use crate::entry::Entry;
use crate::errors::{ConfigError, SubmitError};
use crate::sink::{Sink, SinkHealth};
use crate::stats::{SinkStats, StatsSnapshot};
use crate::timestamp::{Clock, Stamper, SystemClock};
use crate::writer::{Writer, WriterState};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Producer side of a chat log. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ChatLogHandle {
    tx: mpsc::Sender<Entry>,
    stamper: Stamper,
    shutdown: CancellationToken,
    closed: CancellationToken,
    stats: Arc<SinkStats>,
    state_rx: watch::Receiver<WriterState>,
    health_rx: watch::Receiver<SinkHealth>,
}

impl ChatLogHandle {
    /// Queues the entry, waiting while the queue is full. The entry is
    /// stamped once a slot is reserved, not while it waits for one.
    ///
    /// Fails with [`SubmitError::Shutdown`] once shutdown has begun, including
    /// for calls that were still waiting for room in the queue.
    pub async fn submit(&self, mut entry: Entry) -> Result<(), SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::Shutdown);
        }

        let permit = tokio::select! {
            biased;
            permit = self.tx.reserve() => permit.map_err(|_| SubmitError::Shutdown)?,
            _ = self.shutdown.cancelled() => return Err(SubmitError::Shutdown),
        };
        self.stamper.stamp(&mut entry);
        permit.send(entry);
        self.stats.record_submitted();
        Ok(())
    }

    /// Queues the entry only if there is room right now. A full queue hands the
    /// (already stamped) entry back in [`SubmitError::QueueFull`].
    pub fn try_submit(&self, mut entry: Entry) -> Result<(), SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::Shutdown);
        }
        self.stamper.stamp(&mut entry);

        self.tx.try_send(entry).map_err(|e| match e {
            mpsc::error::TrySendError::Full(entry) => SubmitError::QueueFull(entry),
            mpsc::error::TrySendError::Closed(_) => SubmitError::Shutdown,
        })?;
        self.stats.record_submitted();
        Ok(())
    }

    /// Blocking variant of [`ChatLogHandle::submit`] for synchronous callers.
    ///
    /// Must not be called from within an asynchronous execution context.
    pub fn blocking_submit(&self, mut entry: Entry) -> Result<(), SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::Shutdown);
        }
        self.stamper.stamp(&mut entry);

        self.tx
            .blocking_send(entry)
            .map_err(|_| SubmitError::Shutdown)?;
        self.stats.record_submitted();
        Ok(())
    }

    /// Signals shutdown. Entries already queued are still persisted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the writer has drained the queue and closed the sink.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn state(&self) -> WriterState {
        *self.state_rx.borrow()
    }

    /// Receiver for the sink availability signal.
    pub fn health(&self) -> watch::Receiver<SinkHealth> {
        self.health_rx.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Consumer side of a chat log: owns the queue receiver and the writer.
pub struct ChatLogService {
    rx: mpsc::Receiver<Entry>,
    writer: Writer,
    shutdown: CancellationToken,
    closed: CancellationToken,
}

impl ChatLogService {
    /// Validates `config` and builds the sink it describes.
    pub fn from_config(config: &ChatLogConfig) -> Result<(Self, ChatLogHandle), ConfigError> {
        config.validate()?;
        Self::new(config, config.build_sink())
    }

    pub fn new(
        config: &ChatLogConfig,
        sink: Box<dyn Sink>,
    ) -> Result<(Self, ChatLogHandle), ConfigError> {
        Self::with_clock(config, sink, Arc::new(SystemClock::default()))
    }

    /// Like [`ChatLogService::new`], with an explicit source of submission
    /// instants. Fails if `config` does not validate.
    pub fn with_clock(
        config: &ChatLogConfig,
        sink: Box<dyn Sink>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, ChatLogHandle), ConfigError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (state_tx, state_rx) = watch::channel(WriterState::Idle);
        let (health_tx, health_rx) = watch::channel(SinkHealth::Healthy);
        let stats = Arc::new(SinkStats::default());
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        let writer = Writer::new(
            sink,
            config.resolver(),
            config.partition_defaults(),
            config.retry_strategy.clone(),
            Arc::clone(&stats),
            state_tx,
            health_tx,
        );

        let service = Self {
            rx,
            writer,
            shutdown: shutdown.clone(),
            closed: closed.clone(),
        };

        let handle = ChatLogHandle {
            tx,
            stamper: Stamper::new(config.timestamp_format, config.timestamp_policy, clock),
            shutdown,
            closed,
            stats,
            state_rx,
            health_rx,
        };

        Ok((service, handle))
    }

    pub async fn run(mut self) {
        debug!("Chat log writer started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                entry = self.rx.recv() => match entry {
                    Some(entry) => self.writer.write(entry).await,
                    // Every handle was dropped.
                    None => break,
                },
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(entry) = self.rx.recv().await {
            self.writer.write(entry).await;
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {} queued entries during shutdown", drained);
        }

        self.writer.close().await;
        self.closed.cancel();
        debug!("Chat log writer stopped");
    }
}
