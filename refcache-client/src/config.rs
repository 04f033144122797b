// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::batcher::{BatcherConfig, FlushTrigger};
use anyhow::Result;
use refcache_core::CachePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Refcache client configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub testsets: TestsetConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// API base URL (e.g., "http://localhost/api")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sent as `Authorization: ApiKey <key>`
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Age after which a cached entry is refetched on next access
    #[serde(default = "default_stale_time")]
    pub stale_time_secs: u64,

    /// Idle time after which an entry is evicted
    #[serde(default = "default_gc_time")]
    pub gc_time_secs: u64,

    /// Maximum entries per entity kind
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSettings {
    /// Unique keys per request before a window closes early
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Batch window in milliseconds (0 = next tick)
    #[serde(default)]
    pub flush_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestsetConfig {
    /// Testcases inspected when computing a testset's columns
    #[serde(default = "default_preview_testcases")]
    pub preview_testcases: usize,
}

// Default values
fn default_base_url() -> String {
    "http://localhost/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_stale_time() -> u64 {
    60
}

fn default_gc_time() -> u64 {
    300
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_max_batch_size() -> usize {
    100
}

fn default_preview_testcases() -> usize {
    refcache_core::normalize::DEFAULT_PREVIEW_TESTCASES
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: default_stale_time(),
            gc_time_secs: default_gc_time(),
            max_capacity: default_max_capacity(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_delay_ms: 0,
        }
    }
}

impl Default for TestsetConfig {
    fn default() -> Self {
        Self {
            preview_testcases: default_preview_testcases(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - REFCACHE_API_URL: API base URL (default: http://localhost/api)
    /// - REFCACHE_API_KEY: API key
    /// - REFCACHE_STALE_TIME_SECS: Stale time in seconds (default: 60)
    /// - REFCACHE_GC_TIME_SECS: GC time in seconds (default: 300)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REFCACHE_API_URL") {
            config.api.base_url = url;
        }

        if let Ok(key) = std::env::var("REFCACHE_API_KEY") {
            config.api.api_key = Some(key);
        }

        if let Ok(stale) = std::env::var("REFCACHE_STALE_TIME_SECS") {
            if let Ok(val) = stale.parse() {
                config.cache.stale_time_secs = val;
            }
        }

        if let Ok(gc) = std::env::var("REFCACHE_GC_TIME_SECS") {
            if let Ok(val) = gc.parse() {
                config.cache.gc_time_secs = val;
            }
        }

        config
    }

    /// Load configuration with priority: file > env > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config = Self::merge_with_env(config);
        config.validate()?;

        Ok(config)
    }

    /// Merge config with environment variables (env takes priority)
    fn merge_with_env(mut config: Self) -> Self {
        let env_config = Self::from_env();

        if std::env::var("REFCACHE_API_URL").is_ok() {
            config.api.base_url = env_config.api.base_url;
        }
        if std::env::var("REFCACHE_API_KEY").is_ok() {
            config.api.api_key = env_config.api.api_key;
        }
        if std::env::var("REFCACHE_STALE_TIME_SECS").is_ok() {
            config.cache.stale_time_secs = env_config.cache.stale_time_secs;
        }
        if std::env::var("REFCACHE_GC_TIME_SECS").is_ok() {
            config.cache.gc_time_secs = env_config.cache.gc_time_secs;
        }

        config
    }

    /// Cache policy shared by every entity kind
    pub fn policy(&self) -> CachePolicy {
        CachePolicy::new(
            Duration::from_secs(self.cache.stale_time_secs),
            Duration::from_secs(self.cache.gc_time_secs),
        )
        .with_max_capacity(self.cache.max_capacity)
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        let flush = match self.batch.flush_delay_ms {
            0 => FlushTrigger::NextTick,
            ms => FlushTrigger::Delay(Duration::from_millis(ms)),
        };
        BatcherConfig {
            max_batch_size: self.batch.max_batch_size,
            flush,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("API base URL must not be empty");
        }

        if self.batch.max_batch_size == 0 {
            anyhow::bail!("batch.max_batch_size must be at least 1");
        }

        self.policy().validate()?;

        Ok(())
    }
}
