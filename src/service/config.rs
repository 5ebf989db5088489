// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

extern crate config as _;

use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};
use crate::record::DEFAULT_MAX_CARRY_BYTES;
use crate::source::DEFAULT_CHUNK_SIZE;

/// Set once by the binary. Library code receives its configuration explicitly.
pub static GLOBAL_CONFIG: OnceCell<AppConfig> = OnceCell::new();

pub fn global_config() -> &'static AppConfig {
    GLOBAL_CONFIG.get_or_init(AppConfig::default)
}

/// Environment overrides look like `VITALSTREAM__RETRY__MAX_ATTEMPTS=5`.
const ENV_PREFIX: &str = "VITALSTREAM";

/// How the export is cut and reassembled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Bytes per ranged fetch.
    pub chunk_size: usize,
    /// Cap on bytes held while waiting for a record terminator.
    pub max_carry_bytes: usize,
    /// Chunks fetched ahead of the parser.
    pub prefetch_chunks: usize,
    /// Records between two progress updates.
    pub progress_interval: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_carry_bytes: DEFAULT_MAX_CARRY_BYTES,
            prefetch_chunks: 2,
            progress_interval: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            attempt_timeout_ms: 60_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobConfig {
    /// Wall-clock budget for one extraction run.
    pub time_budget_secs: u64,
    /// How long to wait for queued progress when a job finishes.
    pub status_flush_timeout_ms: u64,
    pub progress_channel_capacity: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            time_budget_secs: 15 * 60,
            status_flush_timeout_ms: 2_000,
            progress_channel_capacity: 16,
        }
    }
}

impl JobConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn status_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.status_flush_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the per-owner series documents.
    pub series_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            series_dir: "data/series".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    pub log_dir: String,
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// OTLP collector, e.g. `http://localhost:4317`. Export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            log_dir: "logs".to_string(),
            level: "info".to_string(),
            otlp_endpoint: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub extract: ExtractConfig,
    pub retry: RetryConfig,
    pub job: JobConfig,
    pub storage: StorageConfig,
    pub tracing: TracingConfig,
}

impl AppConfig {
    /// Reads `path` (any format the `config` crate knows, usually TOML) and
    /// applies `VITALSTREAM__SECTION__KEY` environment overrides on top.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        Self::load(path.as_ref(), true)
    }

    /// Like `set_up_config`, but a missing file means defaults plus environment.
    pub fn set_up_optional_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        Self::load(path.as_ref(), false)
    }

    fn load(path: &Path, required: bool) -> AppResult<AppConfig> {
        let path_str = path.to_str().ok_or(AppError::InvalidValue(format!(
            "config file path: {}",
            path.to_string_lossy()
        )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: &str| Err(AppError::InvalidValue(msg.to_string()));
        if self.extract.chunk_size == 0 {
            return invalid("extract.chunk_size must be greater than 0");
        }
        if self.extract.prefetch_chunks == 0 {
            return invalid("extract.prefetch_chunks must be greater than 0");
        }
        if self.extract.progress_interval == 0 {
            return invalid("extract.progress_interval must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return invalid("retry.base_backoff_ms exceeds retry.max_backoff_ms");
        }
        if self.retry.attempt_timeout_ms == 0 {
            return invalid("retry.attempt_timeout_ms must be greater than 0");
        }
        if self.job.time_budget_secs == 0 {
            return invalid("job.time_budget_secs must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.extract.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn rejects_inverted_backoff() {
        let mut config = AppConfig::default();
        config.retry.base_backoff_ms = 10_000;
        config.retry.max_backoff_ms = 100;
        assert!(matches!(config.validate(), Err(AppError::InvalidValue(_))));
    }
}
