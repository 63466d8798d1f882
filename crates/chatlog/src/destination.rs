// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination resolution.
//!
//! Every entry belongs to a [`Partition`] (protocol and server) and is routed
//! to a [`Destination`] computed from that partition and the entry's
//! submission time. For files the time is truncated to the configured
//! [`RotationGranularity`], giving paths of the form
//! `{root}/{protocol}/{server}/{YYYY}/{MM}/{DD}/{HH[-MM[-SS]]}.csl`.
//! Queues do not rotate, so every entry resolves to the configured queue name.

use crate::entry::Entry;
use crate::errors::ConfigError;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const FILE_EXTENSION: &str = "csl";

/// Server used when neither the entry nor the configuration names one.
pub const DEFAULT_SERVER: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationGranularity {
    #[default]
    Hour,
    Minute,
    Second,
}

impl RotationGranularity {
    fn file_stem(self, at: DateTime<Utc>) -> String {
        let pattern = match self {
            RotationGranularity::Hour => "%H",
            RotationGranularity::Minute => "%H-%M",
            RotationGranularity::Second => "%H-%M-%S",
        };
        at.format(pattern).to_string()
    }
}

impl FromStr for RotationGranularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" => Ok(RotationGranularity::Hour),
            "minute" => Ok(RotationGranularity::Minute),
            "second" => Ok(RotationGranularity::Second),
            other => Err(ConfigError::Invalid(format!(
                "Invalid rotation granularity '{other}'. Must be one of: hour, minute, second"
            ))),
        }
    }
}

/// Logical stream an entry belongs to. Sinks keep at most one open
/// destination per partition.
///
/// Both keys are cleaned into single path components on construction, so two
/// partitions that would share a file are the same partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    protocol: String,
    server: String,
}

impl Partition {
    pub fn new(protocol: impl AsRef<str>, server: impl AsRef<str>) -> Self {
        Self {
            protocol: path_component(protocol.as_ref()).into_owned(),
            server: path_component(server.as_ref()).into_owned(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.server)
    }
}

/// Fallback partition keys for entries that do not carry their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDefaults {
    pub protocol: String,
    /// `None` in multi-server mode.
    pub server: Option<String>,
}

impl PartitionDefaults {
    pub fn partition_for(&self, entry: &Entry) -> Partition {
        let protocol = entry.protocol().unwrap_or(&self.protocol);
        let server = entry
            .server()
            .or(self.server.as_deref())
            .unwrap_or(DEFAULT_SERVER);
        Partition::new(protocol, server)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    Queue(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationResolver {
    File {
        root: PathBuf,
        granularity: RotationGranularity,
    },
    Queue {
        /// Fixed queue for every entry; `None` gives each protocol its own
        /// `chatlog.<protocol>` queue.
        queue_name: Option<String>,
    },
}

impl DestinationResolver {
    pub fn resolve(&self, partition: &Partition, at: DateTime<Utc>) -> Destination {
        match self {
            DestinationResolver::File { root, granularity } => {
                let mut path = root.clone();
                path.push(partition.protocol());
                path.push(partition.server());
                path.push(at.format("%Y").to_string());
                path.push(at.format("%m").to_string());
                path.push(at.format("%d").to_string());
                path.push(format!("{}.{}", granularity.file_stem(at), FILE_EXTENSION));
                Destination::File(path)
            }
            DestinationResolver::Queue { queue_name } => Destination::Queue(
                queue_name
                    .clone()
                    .unwrap_or_else(|| default_queue_name(partition.protocol())),
            ),
        }
    }
}

/// Queue used for `protocol` when no queue name is configured. Subject
/// wildcards and whitespace are not allowed in a published subject.
pub fn default_queue_name(protocol: &str) -> String {
    let token: String = protocol
        .chars()
        .map(|c| match c {
            '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    format!("chatlog.{token}")
}

/// Turns a partition key into a single path component that stays inside the
/// root directory.
fn path_component(raw: &str) -> Cow<'_, str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cow::Borrowed("_");
    }
    if trimmed.chars().all(|c| c == '.') {
        return Cow::Owned("_".repeat(trimmed.len()));
    }
    if trimmed.len() == raw.len() && !raw.contains(['/', '\\', '\0']) {
        return Cow::Borrowed(raw);
    }
    Cow::Owned(trimmed.replace(['/', '\\', '\0'], "_"))
}
