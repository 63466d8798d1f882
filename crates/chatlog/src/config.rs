// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::destination::{
    default_queue_name, DestinationResolver, PartitionDefaults, RotationGranularity,
};
use crate::errors::ConfigError;
use crate::retry::RetryStrategy;
use crate::sink::{FileSink, NatsPublisher, NatsPublisherConfig, QueueSink, Sink};
use crate::timestamp::{TimestampFormat, TimestampPolicy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

const DEFAULT_ROOT_DIRECTORY: &str = "./logs";
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_QUEUE_HOST: &str = "localhost";
const DEFAULT_QUEUE_PORT: u16 = 4222;
const DEFAULT_RETRY_ATTEMPTS: u64 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 100;
const DEFAULT_RETRY_MAX_MS: u64 = 5_000;
const QUEUE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest bound the submission queue accepts.
pub const MAX_QUEUE_CAPACITY: usize = Semaphore::MAX_PERMITS;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Where entries are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    File,
    Queue,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "queue" => Ok(BackendKind::Queue),
            other => Err(ConfigError::Invalid(format!(
                "Invalid backend '{other}'. Must be one of: file, queue"
            ))),
        }
    }
}

/// Connection settings for the durable queue backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Defaults to `chatlog.<protocol>`.
    pub queue_name: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_QUEUE_HOST.to_string(),
            port: DEFAULT_QUEUE_PORT,
            username: None,
            password: None,
            queue_name: None,
        }
    }
}

/// Configuration for one chat log instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLogConfig {
    /// Root of the file layout
    pub root_directory: PathBuf,
    /// Default protocol for entries without a `Protocol` field
    pub protocol: String,
    /// Default server; `None` partitions by each entry's `Server` field
    pub server: Option<String>,
    /// Bound of the submission queue
    pub queue_capacity: usize,
    pub rotation_granularity: RotationGranularity,
    pub timestamp_format: TimestampFormat,
    pub timestamp_policy: TimestampPolicy,
    pub backend: BackendKind,
    pub queue: QueueConfig,
    pub retry_strategy: RetryStrategy,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ChatLogConfig {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from(DEFAULT_ROOT_DIRECTORY),
            protocol: String::new(),
            server: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rotation_granularity: RotationGranularity::default(),
            timestamp_format: TimestampFormat::default(),
            timestamp_policy: TimestampPolicy::default(),
            backend: BackendKind::default(),
            queue: QueueConfig::default(),
            retry_strategy: RetryStrategy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ChatLogConfig {
    /// Create configuration from `CHATLOG_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let retry_attempts = parse_var(&lookup, "CHATLOG_RETRY_ATTEMPTS")?
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS);
        let retry_base_ms =
            parse_var(&lookup, "CHATLOG_RETRY_BASE_MS")?.unwrap_or(DEFAULT_RETRY_BASE_MS);

        let config = Self {
            root_directory: non_empty("CHATLOG_ROOT_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.root_directory),
            protocol: non_empty("CHATLOG_PROTOCOL").unwrap_or_default(),
            server: non_empty("CHATLOG_SERVER"),
            queue_capacity: parse_var(&lookup, "CHATLOG_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            rotation_granularity: parse_var(&lookup, "CHATLOG_ROTATION_GRANULARITY")?
                .unwrap_or_default(),
            timestamp_format: parse_var(&lookup, "CHATLOG_TIMESTAMP_FORMAT")?.unwrap_or_default(),
            timestamp_policy: parse_var(&lookup, "CHATLOG_TIMESTAMP_POLICY")?.unwrap_or_default(),
            backend: parse_var(&lookup, "CHATLOG_BACKEND")?.unwrap_or_default(),
            queue: QueueConfig {
                host: non_empty("CHATLOG_QUEUE_HOST").unwrap_or(defaults.queue.host),
                port: parse_var(&lookup, "CHATLOG_QUEUE_PORT")?.unwrap_or(defaults.queue.port),
                username: non_empty("CHATLOG_QUEUE_USERNAME"),
                password: non_empty("CHATLOG_QUEUE_PASSWORD"),
                queue_name: non_empty("CHATLOG_QUEUE_NAME"),
            },
            retry_strategy: RetryStrategy::ExponentialBackoff {
                attempts: retry_attempts,
                base_ms: retry_base_ms,
                max_ms: DEFAULT_RETRY_MAX_MS.max(retry_base_ms),
            },
            log_level: non_empty("CHATLOG_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "CHATLOG_PROTOCOL cannot be empty".to_string(),
            ));
        }

        if self.server.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "CHATLOG_SERVER cannot be empty when set".to_string(),
            ));
        }

        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "Queue capacity must be between 1 and {MAX_QUEUE_CAPACITY}, got {}",
                self.queue_capacity
            )));
        }

        if self.retry_strategy.attempts() == 0 {
            return Err(ConfigError::Invalid(
                "Retry attempts must be at least 1".to_string(),
            ));
        }

        match self.backend {
            BackendKind::File => {
                if self.root_directory.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "CHATLOG_ROOT_DIRECTORY cannot be empty".to_string(),
                    ));
                }
            }
            BackendKind::Queue => {
                if self.queue.host.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "CHATLOG_QUEUE_HOST cannot be empty".to_string(),
                    ));
                }
                if self.queue.port == 0 {
                    return Err(ConfigError::Invalid(
                        "Queue port must be greater than 0".to_string(),
                    ));
                }
                if self.queue.username.is_some() != self.queue.password.is_some() {
                    return Err(ConfigError::Invalid(
                        "CHATLOG_QUEUE_USERNAME and CHATLOG_QUEUE_PASSWORD must be set together"
                            .to_string(),
                    ));
                }
                if self
                    .queue
                    .queue_name
                    .as_deref()
                    .is_some_and(|name| name.trim().is_empty())
                {
                    return Err(ConfigError::Invalid(
                        "CHATLOG_QUEUE_NAME cannot be empty".to_string(),
                    ));
                }
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Queue that entries of the configured protocol are published to.
    pub fn queue_name(&self) -> String {
        self.queue
            .queue_name
            .clone()
            .unwrap_or_else(|| default_queue_name(&self.protocol))
    }

    pub fn resolver(&self) -> DestinationResolver {
        match self.backend {
            BackendKind::File => DestinationResolver::File {
                root: self.root_directory.clone(),
                granularity: self.rotation_granularity,
            },
            BackendKind::Queue => DestinationResolver::Queue {
                queue_name: self.queue.queue_name.clone(),
            },
        }
    }

    pub fn partition_defaults(&self) -> PartitionDefaults {
        PartitionDefaults {
            protocol: self.protocol.clone(),
            server: self.server.clone(),
        }
    }

    pub fn build_sink(&self) -> Box<dyn Sink> {
        match self.backend {
            BackendKind::File => Box::new(FileSink::new()),
            BackendKind::Queue => Box::new(QueueSink::new(NatsPublisher::new(
                NatsPublisherConfig {
                    host: self.queue.host.clone(),
                    port: self.queue.port,
                    username: self.queue.username.clone(),
                    password: self.queue.password.clone(),
                    connection_timeout: QUEUE_CONNECTION_TIMEOUT,
                },
            ))),
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("{name}: {e}"))),
        _ => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> ChatLogConfig {
        ChatLogConfig {
            protocol: "irc".to_string(),
            ..Default::default()
        }
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config_requires_protocol() {
        assert!(ChatLogConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_queue_capacity() {
        let config = ChatLogConfig {
            queue_capacity: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_queue_capacity() {
        let config = ChatLogConfig {
            queue_capacity: usize::MAX,
            ..valid_config()
        };
        assert!(config.validate().is_err());
        assert!(ChatLogConfig::from_lookup(lookup(&[
            ("CHATLOG_PROTOCOL", "irc"),
            ("CHATLOG_QUEUE_CAPACITY", "18446744073709551615"),
        ]))
        .is_err());

        let config = ChatLogConfig {
            queue_capacity: MAX_QUEUE_CAPACITY,
            ..valid_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_server() {
        let config = ChatLogConfig {
            server: Some("  ".to_string()),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_queue_backend() {
        let config = ChatLogConfig {
            backend: BackendKind::Queue,
            ..valid_config()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_name(), "chatlog.irc");

        let config = ChatLogConfig {
            backend: BackendKind::Queue,
            queue: QueueConfig {
                username: Some("guest".to_string()),
                ..Default::default()
            },
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = ChatLogConfig {
            backend: BackendKind::Queue,
            queue: QueueConfig {
                port: 0,
                ..Default::default()
            },
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let config = ChatLogConfig {
                log_level: level.to_string(),
                ..valid_config()
            };
            assert!(
                config.validate().is_ok(),
                "Log level '{}' should be valid",
                level
            );
        }

        let config = ChatLogConfig {
            log_level: "verbose".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = ChatLogConfig::from_lookup(lookup(&[
            ("CHATLOG_ROOT_DIRECTORY", "/logs"),
            ("CHATLOG_PROTOCOL", "irc"),
            ("CHATLOG_SERVER", "foo"),
            ("CHATLOG_QUEUE_CAPACITY", "16"),
            ("CHATLOG_ROTATION_GRANULARITY", "second"),
            ("CHATLOG_TIMESTAMP_FORMAT", "decimal"),
            ("CHATLOG_TIMESTAMP_POLICY", "preserve"),
            ("CHATLOG_RETRY_ATTEMPTS", "5"),
            ("CHATLOG_LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.root_directory, PathBuf::from("/logs"));
        assert_eq!(config.protocol, "irc");
        assert_eq!(config.server.as_deref(), Some("foo"));
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.rotation_granularity, RotationGranularity::Second);
        assert_eq!(config.timestamp_format, TimestampFormat::Decimal);
        assert_eq!(config.timestamp_policy, TimestampPolicy::PreserveExisting);
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.retry_strategy.attempts(), 5);
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.resolver(),
            DestinationResolver::File {
                root: PathBuf::from("/logs"),
                granularity: RotationGranularity::Second,
            }
        );
    }

    #[test]
    fn test_from_lookup_queue_backend() {
        let config = ChatLogConfig::from_lookup(lookup(&[
            ("CHATLOG_PROTOCOL", "irc"),
            ("CHATLOG_BACKEND", "queue"),
            ("CHATLOG_QUEUE_HOST", "nats.internal"),
            ("CHATLOG_QUEUE_PORT", "4333"),
            ("CHATLOG_QUEUE_USERNAME", "chatlog"),
            ("CHATLOG_QUEUE_PASSWORD", "secret"),
            ("CHATLOG_QUEUE_NAME", "chat.events"),
        ]))
        .unwrap();

        assert_eq!(config.backend, BackendKind::Queue);
        assert_eq!(config.queue.port, 4333);
        assert_eq!(
            config.resolver(),
            DestinationResolver::Queue {
                queue_name: Some("chat.events".to_string())
            }
        );
        assert!(config.server.is_none());
    }

    #[test]
    fn test_from_lookup_rejects_malformed_values() {
        assert!(ChatLogConfig::from_lookup(lookup(&[
            ("CHATLOG_PROTOCOL", "irc"),
            ("CHATLOG_QUEUE_CAPACITY", "lots"),
        ]))
        .is_err());
        assert!(ChatLogConfig::from_lookup(lookup(&[
            ("CHATLOG_PROTOCOL", "irc"),
            ("CHATLOG_ROTATION_GRANULARITY", "fortnight"),
        ]))
        .is_err());
        assert!(ChatLogConfig::from_lookup(lookup(&[("CHATLOG_SERVER", "foo")])).is_err());
    }
}
