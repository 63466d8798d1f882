// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Chat log entries.
//!
//! An [`Entry`] is an ordered set of string fields. Keys keep the order in
//! which they were first set, and that order is preserved on disk. A handful
//! of field names are reserved: the chat fields (`Initiator`, `LineType`,
//! `Content`), the partition keys (`Server`, `Protocol`) and `Timestamp`,
//! which is stamped by the handle at submission.

use crate::timestamp::{TimestampFormat, TimestampPolicy};
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub const TIMESTAMP: &str = "Timestamp";
pub const SERVER: &str = "Server";
pub const PROTOCOL: &str = "Protocol";
pub const INITIATOR: &str = "Initiator";
pub const LINE_TYPE: &str = "LineType";
pub const CONTENT: &str = "Content";

/// One chat event waiting to be persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    fields: Vec<(String, String)>,
    submitted_at: Option<DateTime<Utc>>,
}

impl Entry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`Entry::set`].
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a field. An existing key keeps its position and gets the new value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let position = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(position).1)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn initiator(&self) -> Option<&str> {
        self.get(INITIATOR)
    }

    pub fn line_type(&self) -> Option<&str> {
        self.get(LINE_TYPE)
    }

    pub fn content(&self) -> Option<&str> {
        self.get(CONTENT)
    }

    pub fn server(&self) -> Option<&str> {
        self.get(SERVER)
    }

    pub fn protocol(&self) -> Option<&str> {
        self.get(PROTOCOL)
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.get(TIMESTAMP)
    }

    /// Instant at which the entry was submitted, set once by the handle.
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    /// Records the submission instant and injects `Timestamp` according to
    /// `policy`. An entry is only ever stamped once; later calls are no-ops so
    /// an entry handed back by a full queue keeps its original time.
    pub(crate) fn stamp(
        &mut self,
        at: DateTime<Utc>,
        format: TimestampFormat,
        policy: TimestampPolicy,
    ) {
        if self.submitted_at.is_some() {
            return;
        }
        self.submitted_at = Some(at);

        if policy == TimestampPolicy::PreserveExisting && self.timestamp().is_some() {
            return;
        }
        self.remove(TIMESTAMP);
        self.fields.push((TIMESTAMP.to_string(), format.encode(at)));
    }
}

impl<K, V> FromIterator<(K, V)> for Entry
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut entry = Entry::new();
        for (key, value) in iter {
            entry.set(key, value);
        }
        entry
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = Entry;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a JSON object with string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Entry, A::Error> {
                let mut entry = Entry::new();
                while let Some((key, value)) = map.next_entry::<String, String>()? {
                    entry.set(key, value);
                }
                Ok(entry)
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

/// Typed chat line: the reserved chat fields plus protocol specific extras.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogLine {
    pub initiator: String,
    pub line_type: String,
    pub content: String,
    pub extensions: BTreeMap<String, String>,
}

impl LogLine {
    pub fn new(
        initiator: impl Into<String>,
        line_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            initiator: initiator.into(),
            line_type: line_type.into(),
            content: content.into(),
            extensions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

impl From<LogLine> for Entry {
    fn from(line: LogLine) -> Self {
        let mut entry = Entry::new()
            .with_field(INITIATOR, line.initiator)
            .with_field(LINE_TYPE, line.line_type)
            .with_field(CONTENT, line.content);
        // Extensions never shadow the typed fields.
        for (key, value) in line.extensions {
            if entry.get(&key).is_none() {
                entry.set(key, value);
            }
        }
        entry
    }
}
