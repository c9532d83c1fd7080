//! Configuration for [`AgentMemory`](crate::AgentMemory).
//!
//! Values come from defaults, optionally overridden by a TOML document and
//! then by `ENGRAM_*` environment variables:
//!
//! ```toml
//! replica_id = "agent-7"
//! embed_timeout_ms = 2000
//! search_timeout_ms = 2000
//! recall_oversample = 2
//! strict_recall = false
//! default_memory_type = "semantic"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 25
//! max_delay_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use engram_crdt::MemoryType;
use serde::Deserialize;
use tracing::info;

use crate::error::AgentMemoryError;
use crate::retry::RetryConfig;

/// Settings for one [`AgentMemory`](crate::AgentMemory) instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentMemoryConfig {
    /// Writer identity stamped on local mutations. Must be unique among
    /// replicas that exchange documents.
    pub replica_id: String,
    /// Timeout for one `embed` call in milliseconds.
    pub embed_timeout_ms: u64,
    /// Timeout for one `similarity_search` call in milliseconds.
    pub search_timeout_ms: u64,
    /// Ask the search for `limit * recall_oversample` candidates so that
    /// ids purged since indexing do not shrink the result.
    pub recall_oversample: usize,
    /// Surface embedding failures from `recall` as errors instead of a
    /// degraded result.
    pub strict_recall: bool,
    /// Memory type for `learn` calls that do not name one.
    pub default_memory_type: MemoryType,
    /// Number of per-document lock stripes in storage.
    pub lock_stripes: usize,
    /// Retry policy for transient storage failures.
    pub retry: RetryConfig,
}

impl Default for AgentMemoryConfig {
    fn default() -> Self {
        Self {
            replica_id: format!("replica-{}", uuid::Uuid::new_v4()),
            embed_timeout_ms: 2_000,
            search_timeout_ms: 2_000,
            recall_oversample: 2,
            strict_recall: false,
            default_memory_type: MemoryType::Episodic,
            lock_stripes: 64,
            retry: RetryConfig::default(),
        }
    }
}

impl AgentMemoryConfig {
    /// Defaults with an explicit replica id.
    pub fn for_replica(replica_id: impl Into<String>) -> Self {
        Self {
            replica_id: replica_id.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, AgentMemoryError> {
        let config: Self =
            toml::from_str(text).map_err(|e| AgentMemoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, AgentMemoryError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AgentMemoryError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), replica_id = %config.replica_id, "loaded configuration");
        Ok(config)
    }

    /// Apply `ENGRAM_*` overrides from the process environment.
    pub fn with_env(self) -> Result<Self, AgentMemoryError> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `ENGRAM_*` overrides from `lookup`.
    ///
    /// Recognized keys: `ENGRAM_REPLICA_ID`, `ENGRAM_EMBED_TIMEOUT_MS`,
    /// `ENGRAM_SEARCH_TIMEOUT_MS`, `ENGRAM_RECALL_OVERSAMPLE`,
    /// `ENGRAM_STRICT_RECALL`, `ENGRAM_DEFAULT_MEMORY_TYPE`,
    /// `ENGRAM_LOCK_STRIPES`, `ENGRAM_RETRY_MAX_ATTEMPTS`.
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self, AgentMemoryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENGRAM_REPLICA_ID") {
            self.replica_id = v;
        }
        if let Some(v) = lookup("ENGRAM_EMBED_TIMEOUT_MS") {
            self.embed_timeout_ms = parse_env("ENGRAM_EMBED_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ENGRAM_SEARCH_TIMEOUT_MS") {
            self.search_timeout_ms = parse_env("ENGRAM_SEARCH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ENGRAM_RECALL_OVERSAMPLE") {
            self.recall_oversample = parse_env("ENGRAM_RECALL_OVERSAMPLE", &v)?;
        }
        if let Some(v) = lookup("ENGRAM_STRICT_RECALL") {
            self.strict_recall = parse_env("ENGRAM_STRICT_RECALL", &v)?;
        }
        if let Some(v) = lookup("ENGRAM_DEFAULT_MEMORY_TYPE") {
            self.default_memory_type = parse_env("ENGRAM_DEFAULT_MEMORY_TYPE", &v)?;
        }
        if let Some(v) = lookup("ENGRAM_LOCK_STRIPES") {
            self.lock_stripes = parse_env("ENGRAM_LOCK_STRIPES", &v)?;
        }
        if let Some(v) = lookup("ENGRAM_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("ENGRAM_RETRY_MAX_ATTEMPTS", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings no instance can run with.
    pub fn validate(&self) -> Result<(), AgentMemoryError> {
        if self.replica_id.trim().is_empty() {
            return Err(AgentMemoryError::Config("replica_id is empty".into()));
        }
        if self.recall_oversample == 0 {
            return Err(AgentMemoryError::Config(
                "recall_oversample must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AgentMemoryError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// [`embed_timeout_ms`](Self::embed_timeout_ms) as a duration.
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    /// [`search_timeout_ms`](Self::search_timeout_ms) as a duration.
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, AgentMemoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AgentMemoryError::Config(format!("{key}={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = AgentMemoryConfig::default();
        assert!(config.replica_id.starts_with("replica-"));
        assert!(config.validate().is_ok());
        assert_eq!(config.embed_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = AgentMemoryConfig::from_toml_str(
            r#"
            replica_id = "agent-7"
            embed_timeout_ms = 150
            default_memory_type = "procedural"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.replica_id, "agent-7");
        assert_eq!(config.embed_timeout_ms, 150);
        assert_eq!(config.search_timeout_ms, 2_000);
        assert_eq!(config.default_memory_type, MemoryType::Procedural);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
    }

    #[test]
    fn toml_errors_are_config_errors() {
        let err = AgentMemoryConfig::from_toml_str("embed_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, AgentMemoryError::Config(_)));

        let err = AgentMemoryConfig::from_toml_str("replica_id = \"\"").unwrap_err();
        assert!(matches!(err, AgentMemoryError::Config(_)));
    }

    #[test]
    fn env_overrides_toml() {
        let env: HashMap<&str, &str> = [
            ("ENGRAM_REPLICA_ID", "from-env"),
            ("ENGRAM_STRICT_RECALL", "true"),
            ("ENGRAM_DEFAULT_MEMORY_TYPE", "Working"),
            ("ENGRAM_RETRY_MAX_ATTEMPTS", "7"),
        ]
        .into_iter()
        .collect();

        let config = AgentMemoryConfig::from_toml_str("replica_id = \"from-file\"")
            .unwrap()
            .with_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.replica_id, "from-env");
        assert!(config.strict_recall);
        assert_eq!(config.default_memory_type, MemoryType::Working);
        assert_eq!(config.retry.max_attempts, 7);
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let err = AgentMemoryConfig::default()
            .with_env_from(|k| (k == "ENGRAM_RECALL_OVERSAMPLE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, AgentMemoryError::Config(msg) if msg.contains("ENGRAM_RECALL_OVERSAMPLE")));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.toml");
        std::fs::write(&path, "replica_id = \"disk\"\nrecall_oversample = 3\n").unwrap();
        let config = AgentMemoryConfig::load(&path).unwrap();
        assert_eq!(config.replica_id, "disk");
        assert_eq!(config.recall_oversample, 3);

        assert!(AgentMemoryConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
