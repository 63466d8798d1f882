// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-entry write path of the consumer task.
//!
//! For every entry the writer resolves the destination, lets the sink rotate
//! if that destination changed, and persists the serialized line. Failures are
//! retried according to the configured [`RetryStrategy`]; an entry that still
//! cannot be persisted is dropped and counted, and the writer moves on.

use crate::destination::{DestinationResolver, PartitionDefaults};
use crate::entry::Entry;
use crate::errors::SinkError;
use crate::retry::RetryStrategy;
use crate::sink::{Persisted, Sink, SinkHealth};
use crate::stats::SinkStats;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, trace, warn};

/// Observable state of the writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Waiting for the next entry.
    Idle,
    /// An entry was taken off the queue.
    Draining,
    /// Computing the entry's destination.
    Resolving,
    /// Closing the previous handle and opening the new destination.
    Rotating,
    /// Serializing and writing.
    Persisting,
    /// Shut down and drained; every handle is closed.
    Closed,
}

pub(crate) struct Writer {
    sink: Box<dyn Sink>,
    resolver: DestinationResolver,
    defaults: PartitionDefaults,
    retry_strategy: RetryStrategy,
    stats: Arc<SinkStats>,
    state_tx: watch::Sender<WriterState>,
    health_tx: watch::Sender<SinkHealth>,
}

impl Writer {
    pub(crate) fn new(
        sink: Box<dyn Sink>,
        resolver: DestinationResolver,
        defaults: PartitionDefaults,
        retry_strategy: RetryStrategy,
        stats: Arc<SinkStats>,
        state_tx: watch::Sender<WriterState>,
        health_tx: watch::Sender<SinkHealth>,
    ) -> Self {
        Self {
            sink,
            resolver,
            defaults,
            retry_strategy,
            stats,
            state_tx,
            health_tx,
        }
    }

    fn transition(&self, state: WriterState) {
        trace!("Writer state: {:?}", state);
        self.state_tx.send_replace(state);
    }

    pub(crate) async fn write(&mut self, entry: Entry) {
        self.transition(WriterState::Draining);

        match serde_json::to_vec(&entry) {
            Ok(line) => self.persist_with_retry(&entry, &line).await,
            Err(e) => {
                error!("Dropping entry: {}", SinkError::from(e));
                self.stats.record_dropped();
            }
        }

        self.transition(WriterState::Idle);
    }

    async fn persist_with_retry(&mut self, entry: &Entry, line: &[u8]) {
        let partition = self.defaults.partition_for(entry);
        let at = entry.submitted_at().unwrap_or_else(Utc::now);
        let attempts = self.retry_strategy.attempts();
        let mut failures = 0;

        loop {
            self.transition(WriterState::Resolving);
            let destination = self.resolver.resolve(&partition, at);

            if self.sink.needs_rotation(&partition, &destination) {
                self.transition(WriterState::Rotating);
            }
            self.transition(WriterState::Persisting);

            match self.sink.persist(&partition, &destination, line).await {
                Ok(outcome) => {
                    if outcome == Persisted::Rotated {
                        self.stats.record_rotation();
                    }
                    self.stats.record_persisted();
                    self.mark_healthy();
                    return;
                }
                Err(e) if e.is_retryable() && failures + 1 < attempts => {
                    failures += 1;
                    let delay = self.retry_strategy.delay(failures);
                    warn!(
                        "Attempt {}/{} to persist entry for {} failed, retrying in {:?}: {}",
                        failures, attempts, partition, delay, e
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    error!(
                        "Dropping entry for {} after {} attempt(s): {}",
                        partition,
                        failures + 1,
                        e
                    );
                    self.stats.record_dropped();
                    if let SinkError::Unavailable(reason) = e {
                        error!("Sink unavailable: {}", reason);
                        self.health_tx.send_replace(SinkHealth::Unavailable { reason });
                    }
                    return;
                }
            }
        }
    }

    fn mark_healthy(&self) {
        self.health_tx.send_if_modified(|health| {
            if *health == SinkHealth::Healthy {
                false
            } else {
                *health = SinkHealth::Healthy;
                true
            }
        });
    }

    pub(crate) async fn close(&mut self) {
        self.sink.close().await;
        self.transition(WriterState::Closed);
    }
}
