// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only NDJSON files, one open file per partition.

use crate::destination::{Destination, Partition};
use crate::errors::SinkError;
use crate::sink::{Persisted, Sink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

struct OpenFile {
    path: PathBuf,
    file: File,
}

/// Writes every entry as one line to the file its destination names. A file
/// is opened lazily on the first write for a partition and replaced when the
/// destination of that partition changes.
#[derive(Default)]
pub struct FileSink {
    handles: HashMap<Partition, OpenFile>,
}

impl FileSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path currently open for `partition`, if any.
    pub fn open_path(&self, partition: &Partition) -> Option<&Path> {
        self.handles.get(partition).map(|open| open.path.as_path())
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    async fn rotate(&mut self, partition: &Partition, path: &Path) -> Result<(), SinkError> {
        // The previous file is closed before the new one is opened so a
        // partition never has two destinations at once.
        if let Some(previous) = self.handles.remove(partition) {
            debug!(
                "Rotating {} from {} to {}",
                partition,
                previous.path.display(),
                path.display()
            );
            close_file(previous).await;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| SinkError::DirectoryCreation {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("Opened log file {}", path.display());
        self.handles.insert(
            partition.clone(),
            OpenFile {
                path: path.to_path_buf(),
                file,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    fn needs_rotation(&self, partition: &Partition, destination: &Destination) -> bool {
        match (self.handles.get(partition), destination) {
            (Some(open), Destination::File(path)) => open.path != *path,
            _ => true,
        }
    }

    async fn persist(
        &mut self,
        partition: &Partition,
        destination: &Destination,
        line: &[u8],
    ) -> Result<Persisted, SinkError> {
        let Destination::File(path) = destination else {
            return Err(SinkError::UnsupportedDestination(destination.clone()));
        };

        let outcome = if self.needs_rotation(partition, destination) {
            self.rotate(partition, path).await?;
            Persisted::Rotated
        } else {
            Persisted::Appended
        };

        let Some(open) = self.handles.get_mut(partition) else {
            return Err(SinkError::Open {
                path: path.clone(),
                source: std::io::Error::other("handle missing after rotation"),
            });
        };

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');

        if let Err(source) = write_synced(&mut open.file, &buf).await {
            // A file that failed a write is not trusted again; the next
            // attempt reopens it.
            if let Some(broken) = self.handles.remove(partition) {
                close_file(broken).await;
            }
            return Err(SinkError::Write {
                path: path.clone(),
                source,
            });
        }

        Ok(outcome)
    }

    async fn close(&mut self) {
        for (_, open) in self.handles.drain() {
            close_file(open).await;
        }
    }
}

async fn write_synced(file: &mut File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await?;
    file.sync_data().await
}

async fn close_file(open: OpenFile) {
    let OpenFile { path, mut file } = open;
    if let Err(e) = file.flush().await {
        warn!("Failed to flush {} on close: {}", path.display(), e);
    }
    // Waits for in-flight operations; dropping the std file closes it here
    // rather than on a background thread.
    drop(file.into_std().await);
    debug!("Closed log file {}", path.display());
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::destination::{DestinationResolver, RotationGranularity};
    use chrono::{TimeZone, Utc};

    fn resolver(root: &Path) -> DestinationResolver {
        DestinationResolver::File {
            root: root.to_path_buf(),
            granularity: RotationGranularity::Hour,
        }
    }

    #[tokio::test]
    async fn test_first_write_opens_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let partition = Partition::new("irc", "foo");
        let destination = resolver(dir.path()).resolve(
            &partition,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        );

        let mut sink = FileSink::new();
        assert!(sink.needs_rotation(&partition, &destination));

        let outcome = sink
            .persist(&partition, &destination, br#"{"Content":"hi"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Persisted::Rotated);
        assert!(!sink.needs_rotation(&partition, &destination));

        let outcome = sink
            .persist(&partition, &destination, br#"{"Content":"again"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Persisted::Appended);
        sink.close().await;

        let path = dir.path().join("irc/foo/2024/01/02/03.csl");
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written, "{\"Content\":\"hi\"}\n{\"Content\":\"again\"}\n");
    }

    #[tokio::test]
    async fn test_rotation_closes_previous_handle() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());
        let partition = Partition::new("irc", "foo");
        let before = resolver.resolve(
            &partition,
            Utc.timestamp_millis_opt(1_704_200_399_999).unwrap(),
        );
        let after = resolver.resolve(
            &partition,
            Utc.timestamp_millis_opt(1_704_200_400_000).unwrap(),
        );

        let mut sink = FileSink::new();
        sink.persist(&partition, &before, b"{\"n\":\"1\"}").await.unwrap();
        assert!(sink.needs_rotation(&partition, &after));

        let outcome = sink.persist(&partition, &after, b"{\"n\":\"2\"}").await.unwrap();
        assert_eq!(outcome, Persisted::Rotated);
        assert_eq!(sink.open_handles(), 1);
        assert_eq!(
            sink.open_path(&partition),
            Some(dir.path().join("irc/foo/2024/01/02/13.csl").as_path())
        );
        sink.close().await;
        assert_eq!(sink.open_handles(), 0);

        let first = std::fs::read_to_string(dir.path().join("irc/foo/2024/01/02/12.csl")).unwrap();
        let second = std::fs::read_to_string(dir.path().join("irc/foo/2024/01/02/13.csl")).unwrap();
        assert_eq!(first, "{\"n\":\"1\"}\n");
        assert_eq!(second, "{\"n\":\"2\"}\n");
    }

    #[tokio::test]
    async fn test_partitions_do_not_share_handles() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let foo = Partition::new("irc", "foo");
        let bar = Partition::new("irc", "bar");

        let mut sink = FileSink::new();
        sink.persist(&foo, &resolver.resolve(&foo, at), b"{}").await.unwrap();
        sink.persist(&bar, &resolver.resolve(&bar, at), b"{}").await.unwrap();
        assert_eq!(sink.open_handles(), 2);
        assert_ne!(sink.open_path(&foo), sink.open_path(&bar));
        sink.close().await;
    }

    #[tokio::test]
    async fn test_servers_cleaned_to_same_path_share_one_handle() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let slashed = Partition::new("irc", "a/b");
        let underscored = Partition::new("irc", "a_b");

        let mut sink = FileSink::new();
        sink.persist(&slashed, &resolver.resolve(&slashed, at), b"{\"n\":\"1\"}")
            .await
            .unwrap();
        let outcome = sink
            .persist(&underscored, &resolver.resolve(&underscored, at), b"{\"n\":\"2\"}")
            .await
            .unwrap();
        assert_eq!(outcome, Persisted::Appended);
        assert_eq!(sink.open_handles(), 1);
        sink.close().await;

        let written = std::fs::read_to_string(dir.path().join("irc/a_b/2024/01/02/03.csl")).unwrap();
        assert_eq!(written, "{\"n\":\"1\"}\n{\"n\":\"2\"}\n");
    }

    #[tokio::test]
    async fn test_existing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("irc/foo/2024/01/02")).unwrap();
        let partition = Partition::new("irc", "foo");
        let destination = resolver(dir.path()).resolve(
            &partition,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        );

        let mut sink = FileSink::new();
        sink.persist(&partition, &destination, b"{}").await.unwrap();
        sink.close().await;
    }

    #[tokio::test]
    async fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("irc/foo/2024/01/02/03.csl");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"n\":\"0\"}\n").unwrap();

        let partition = Partition::new("irc", "foo");
        let mut sink = FileSink::new();
        sink.persist(&partition, &Destination::File(path.clone()), b"{\"n\":\"1\"}")
            .await
            .unwrap();
        sink.close().await;

        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "{\"n\":\"0\"}\n{\"n\":\"1\"}\n"
        );
    }

    #[tokio::test]
    async fn test_directory_creation_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the protocol directory should be.
        std::fs::write(dir.path().join("irc"), "").unwrap();
        let partition = Partition::new("irc", "foo");
        let destination = resolver(dir.path()).resolve(&partition, Utc::now());

        let mut sink = FileSink::new();
        let err = sink.persist(&partition, &destination, b"{}").await.unwrap_err();
        assert!(matches!(err, SinkError::DirectoryCreation { .. }));
        assert!(err.is_retryable());
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_rejects_queue_destination() {
        let mut sink = FileSink::new();
        let err = sink
            .persist(
                &Partition::new("irc", "foo"),
                &Destination::Queue("chatlog.irc".to_string()),
                b"{}",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::UnsupportedDestination(_)));
    }
}
