//! Client configuration.
//!
//! Defaults follow the usual Kafka client settings. [`ClientConfig::from_env`]
//! reads overrides from `KAFKA_*` environment variables.

use std::time::Duration;

use crate::cluster::BrokerMetadata;
use crate::constants::{
    DEFAULT_BOOTSTRAP_SERVERS, DEFAULT_CLIENT_ID, DEFAULT_KAFKA_PORT, DEFAULT_METADATA_MAX_AGE_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS,
};
use crate::consumer::OffsetResetStrategy;
use crate::error::{Error, Result};

/// Settings consumed by cluster metadata, the refresh driver and subscription state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `bootstrap.servers`: comma separated `host[:port]` list.
    pub bootstrap_servers: String,
    /// `client.id`, sent in every request header.
    pub client_id: String,
    /// `metadata.max.age.ms`: refresh even without observed changes after this long.
    pub metadata_max_age: Duration,
    /// `retry.backoff.ms`: fixed delay between failed metadata refreshes.
    pub retry_backoff: Duration,
    /// `request.timeout.ms`.
    pub request_timeout: Duration,
    /// `auto.offset.reset`.
    pub auto_offset_reset: OffsetResetStrategy,
    /// `exclude.internal.topics`: hide internal topics from pattern subscriptions.
    pub exclude_internal_topics: bool,
    /// Refresh the full topic catalog while this member leads its group,
    /// so it can see topics other members subscribed to.
    pub metadata_full_catalog_for_group_leader: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            metadata_max_age: Duration::from_millis(DEFAULT_METADATA_MAX_AGE_MS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            auto_offset_reset: OffsetResetStrategy::Latest,
            exclude_internal_topics: true,
            metadata_full_catalog_for_group_leader: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KAFKA_BOOTSTRAP_SERVERS` (default `localhost:9092`)
    /// - `KAFKA_CLIENT_ID` (default `kafkaesque-client`)
    /// - `KAFKA_METADATA_MAX_AGE_MS` (default 300000)
    /// - `KAFKA_RETRY_BACKOFF_MS` (default 100)
    /// - `KAFKA_REQUEST_TIMEOUT_MS` (default 40000)
    /// - `KAFKA_AUTO_OFFSET_RESET`: `earliest`, `latest` or `none` (default `latest`)
    /// - `KAFKA_EXCLUDE_INTERNAL_TOPICS` (default `true`)
    /// - `KAFKA_FULL_CATALOG_FOR_GROUP_LEADER` (default `false`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let millis = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e))),
                None => Ok(default),
            }
        };
        let flag = |key: &str, default: bool| -> bool {
            lookup(key)
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default)
        };

        let auto_offset_reset = match lookup("KAFKA_AUTO_OFFSET_RESET") {
            Some(v) => v.parse()?,
            None => defaults.auto_offset_reset,
        };

        let config = Self {
            bootstrap_servers: lookup("KAFKA_BOOTSTRAP_SERVERS").unwrap_or(defaults.bootstrap_servers),
            client_id: lookup("KAFKA_CLIENT_ID").unwrap_or(defaults.client_id),
            metadata_max_age: millis("KAFKA_METADATA_MAX_AGE_MS", defaults.metadata_max_age)?,
            retry_backoff: millis("KAFKA_RETRY_BACKOFF_MS", defaults.retry_backoff)?,
            request_timeout: millis("KAFKA_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            auto_offset_reset,
            exclude_internal_topics: flag("KAFKA_EXCLUDE_INTERNAL_TOPICS", defaults.exclude_internal_topics),
            metadata_full_catalog_for_group_leader: flag(
                "KAFKA_FULL_CATALOG_FOR_GROUP_LEADER",
                defaults.metadata_full_catalog_for_group_leader,
            ),
        };

        config.validate().map_err(|errors| Error::Config(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.bootstrap_brokers() {
            errors.push(e.to_string());
        }

        if self.client_id.len() > i16::MAX as usize {
            errors.push("client_id is too long for the request header".to_string());
        }

        if self.retry_backoff.is_zero() {
            errors.push("retry_backoff must be greater than 0".to_string());
        }

        if self.metadata_max_age < self.retry_backoff {
            errors.push(format!(
                "metadata_max_age ({:?}) must not be shorter than retry_backoff ({:?})",
                self.metadata_max_age, self.retry_backoff
            ));
        }

        if self.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parse `bootstrap.servers` into brokers with synthetic ids `-1`, `-2`, ...
    ///
    /// Those ids never collide with real broker ids and are only used until
    /// the first successful metadata refresh.
    pub fn bootstrap_brokers(&self) -> Result<Vec<BrokerMetadata>> {
        let brokers = self
            .bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .enumerate()
            .map(|(idx, entry)| {
                let (host, port) = parse_host_port(entry)?;
                Ok(BrokerMetadata::new(-(idx as i32) - 1, host, port))
            })
            .collect::<Result<Vec<_>>>()?;

        if brokers.is_empty() {
            return Err(Error::Config("bootstrap_servers is empty".to_string()));
        }
        Ok(brokers)
    }
}

fn parse_host_port(entry: &str) -> Result<(String, i32)> {
    // Bracketed IPv6: [::1]:9092
    if let Some(rest) = entry.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("Invalid bootstrap server '{}'", entry)))?;
        let port = match after.strip_prefix(':') {
            Some(port) => parse_port(entry, port)?,
            None if after.is_empty() => DEFAULT_KAFKA_PORT,
            None => return Err(Error::Config(format!("Invalid bootstrap server '{}'", entry))),
        };
        return Ok((host.to_string(), port));
    }

    match entry.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok((host.to_string(), parse_port(entry, port)?)),
        Some(_) => Err(Error::Config(format!("Invalid bootstrap server '{}'", entry))),
        None => Ok((entry.to_string(), DEFAULT_KAFKA_PORT)),
    }
}

fn parse_port(entry: &str, port: &str) -> Result<i32> {
    port.parse::<i32>()
        .ok()
        .filter(|p| (1..=65535).contains(p))
        .ok_or_else(|| Error::Config(format!("Invalid port in bootstrap server '{}'", entry)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.metadata_max_age, Duration::from_secs(300));
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert_eq!(config.auto_offset_reset, OffsetResetStrategy::Latest);
        assert!(config.exclude_internal_topics);
        assert!(!config.metadata_full_catalog_for_group_leader);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("KAFKA_BOOTSTRAP_SERVERS", "k1:9093,k2"),
            ("KAFKA_METADATA_MAX_AGE_MS", "1000"),
            ("KAFKA_RETRY_BACKOFF_MS", "50"),
            ("KAFKA_AUTO_OFFSET_RESET", "earliest"),
            ("KAFKA_FULL_CATALOG_FOR_GROUP_LEADER", "true"),
            ("KAFKA_EXCLUDE_INTERNAL_TOPICS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.metadata_max_age, Duration::from_secs(1));
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.auto_offset_reset, OffsetResetStrategy::Earliest);
        assert!(config.metadata_full_catalog_for_group_leader);
        assert!(!config.exclude_internal_topics);
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let err = ClientConfig::from_lookup(lookup(&[("KAFKA_RETRY_BACKOFF_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("KAFKA_RETRY_BACKOFF_MS"));
    }

    #[test]
    fn test_from_lookup_invalid_reset_strategy() {
        assert!(ClientConfig::from_lookup(lookup(&[("KAFKA_AUTO_OFFSET_RESET", "sometimes")])).is_err());
    }

    #[test]
    fn test_bootstrap_brokers_synthetic_ids() {
        let config = ClientConfig {
            bootstrap_servers: "a:1, b , [::1]:9095".to_string(),
            ..Default::default()
        };
        let brokers = config.bootstrap_brokers().unwrap();
        assert_eq!(brokers.len(), 3);
        assert_eq!((brokers[0].node_id, brokers[0].port), (-1, 1));
        assert_eq!((brokers[1].node_id, brokers[1].host.as_str()), (-2, "b"));
        assert_eq!(brokers[1].port, DEFAULT_KAFKA_PORT);
        assert_eq!((brokers[2].node_id, brokers[2].host.as_str()), (-3, "::1"));
        assert_eq!(brokers[2].port, 9095);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = ClientConfig {
            bootstrap_servers: " , ".to_string(),
            retry_backoff: Duration::ZERO,
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("bootstrap_servers")));
    }

    #[test]
    fn test_validate_bad_port() {
        let config = ClientConfig {
            bootstrap_servers: "host:99999".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
