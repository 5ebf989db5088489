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

use std::time::Duration;

use crate::source::FetchError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// chunk fetch failed; retryable until the retry policy gives up
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("job exceeded its time budget of {0:?}")]
    Timeout(Duration),

    #[error("job cancelled")]
    Cancelled,

    /// carry buffer grew past its cap without yielding a record, recovered by trimming
    #[error("carry buffer reached {len} bytes (max {max}) without a record boundary")]
    BufferOverflow { len: usize, max: usize },

    #[error("persistence error: {0}")]
    Persistence(String),

    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    #[error("tracing setup error: {0}")]
    TracingSetup(String),
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        AppError::IllegalStateError(format!("task join error: {}", value))
    }
}

impl From<tracing_subscriber::util::TryInitError> for AppError {
    fn from(value: tracing_subscriber::util::TryInitError) -> Self {
        AppError::TracingSetup(value.to_string())
    }
}
