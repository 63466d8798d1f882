// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable queue backend.
//!
//! Entries are published to a NATS JetStream stream backed by file storage.
//! Each message carries the JSON body and a single `Content-Type` header; the
//! subject is the configured queue name. The connection is established lazily
//! and dropped on any failure so the next attempt reconnects.

use crate::destination::{Destination, Partition};
use crate::errors::SinkError;
use crate::sink::{Persisted, Sink};
use async_nats::jetstream::{self, stream};
use async_nats::{ConnectOptions, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Transport used by [`QueueSink`].
#[async_trait]
pub trait QueuePublisher: Send {
    /// Publishes one JSON message and waits until the broker has stored it.
    async fn publish(&mut self, queue_name: &str, payload: Bytes) -> Result<(), SinkError>;

    async fn close(&mut self) {}
}

/// Forwards entries to a durable queue instead of writing files.
pub struct QueueSink<P> {
    publisher: P,
}

impl<P: QueuePublisher> QueueSink<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

#[async_trait]
impl<P: QueuePublisher> Sink for QueueSink<P> {
    async fn persist(
        &mut self,
        _partition: &Partition,
        destination: &Destination,
        line: &[u8],
    ) -> Result<Persisted, SinkError> {
        let Destination::Queue(queue_name) = destination else {
            return Err(SinkError::UnsupportedDestination(destination.clone()));
        };
        self.publisher
            .publish(queue_name, Bytes::copy_from_slice(line))
            .await?;
        Ok(Persisted::Appended)
    }

    async fn close(&mut self) {
        self.publisher.close().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsPublisherConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_timeout: Duration,
}

impl NatsPublisherConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// [`QueuePublisher`] backed by NATS JetStream.
pub struct NatsPublisher {
    config: NatsPublisherConfig,
    client: Option<async_nats::Client>,
    jetstream: Option<jetstream::Context>,
    streams: HashSet<String>,
}

impl NatsPublisher {
    pub fn new(config: NatsPublisherConfig) -> Self {
        Self {
            config,
            client: None,
            jetstream: None,
            streams: HashSet::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.jetstream.is_some()
    }

    async fn context(&mut self) -> Result<jetstream::Context, SinkError> {
        if let Some(context) = &self.jetstream {
            return Ok(context.clone());
        }

        let address = self.config.address();
        let options = match (&self.config.username, &self.config.password) {
            (Some(username), Some(password)) => {
                ConnectOptions::with_user_and_password(username.clone(), password.clone())
            }
            _ => ConnectOptions::new(),
        };
        let client = options
            .connection_timeout(self.config.connection_timeout)
            .connect(address.as_str())
            .await
            .map_err(|e| SinkError::Unavailable(format!("failed to connect to {address}: {e}")))?;
        info!("Connected to NATS at {}", address);

        let context = jetstream::new(client.clone());
        self.client = Some(client);
        self.jetstream = Some(context.clone());
        self.streams.clear();
        Ok(context)
    }

    async fn ensure_stream(
        &mut self,
        context: &jetstream::Context,
        queue_name: &str,
    ) -> Result<(), SinkError> {
        if self.streams.contains(queue_name) {
            return Ok(());
        }

        let name = stream_name(queue_name);
        context
            .get_or_create_stream(stream::Config {
                name: name.clone(),
                subjects: vec![queue_name.to_string()],
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| SinkError::Unavailable(format!("failed to create stream {name}: {e}")))?;
        debug!("Using JetStream stream {} for {}", name, queue_name);

        self.streams.insert(queue_name.to_string());
        Ok(())
    }

    async fn try_publish(&mut self, queue_name: &str, payload: Bytes) -> Result<(), SinkError> {
        let context = self.context().await?;
        self.ensure_stream(&context, queue_name).await?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE);

        let ack = context
            .publish_with_headers(queue_name.to_string(), headers, payload)
            .await
            .map_err(|e| SinkError::Unavailable(format!("failed to publish: {e}")))?;
        ack.await
            .map_err(|e| SinkError::Unavailable(format!("publish was not acknowledged: {e}")))?;
        Ok(())
    }

    fn reset(&mut self) {
        if self.jetstream.take().is_some() {
            warn!("Dropping NATS connection to {}", self.config.address());
        }
        self.client = None;
        self.streams.clear();
    }
}

#[async_trait]
impl QueuePublisher for NatsPublisher {
    async fn publish(&mut self, queue_name: &str, payload: Bytes) -> Result<(), SinkError> {
        let result = self.try_publish(queue_name, payload).await;
        if result.is_err() {
            self.reset();
        }
        result
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.flush().await {
                warn!("Failed to flush NATS connection on close: {}", e);
            }
        }
        self.jetstream = None;
        self.streams.clear();
    }
}

/// JetStream stream names may not contain subject tokens or separators.
fn stream_name(queue_name: &str) -> String {
    queue_name
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '/' | '\\' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}
