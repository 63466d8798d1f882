// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persistence backends.
//!
//! A [`Sink`] is owned by the writer task and only ever driven from it, so
//! implementations keep their handles without any locking.

use crate::destination::{Destination, Partition};
use crate::errors::SinkError;
use async_trait::async_trait;

pub mod file;
pub mod queue;

pub use file::FileSink;
pub use queue::{NatsPublisher, NatsPublisherConfig, QueuePublisher, QueueSink};

/// Outcome of a successful [`Sink::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    /// Written through the handle that was already open.
    Appended,
    /// A handle was opened, or replaced, before writing.
    Rotated,
}

/// Operator facing availability of the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SinkHealth {
    #[default]
    Healthy,
    /// The last entry could not be persisted even after retrying.
    Unavailable { reason: String },
}

#[async_trait]
pub trait Sink: Send {
    /// Whether persisting to `destination` requires opening a new handle for
    /// `partition`. Checked by the writer before every write.
    fn needs_rotation(&self, _partition: &Partition, _destination: &Destination) -> bool {
        false
    }

    /// Durably persists one serialized entry (without trailing newline).
    async fn persist(
        &mut self,
        partition: &Partition,
        destination: &Destination,
        line: &[u8],
    ) -> Result<Persisted, SinkError>;

    /// Closes every open handle.
    async fn close(&mut self);
}
