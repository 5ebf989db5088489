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

use rand::Rng;

use crate::service::RetryConfig;

/// Bounded retry with exponential backoff around each chunk fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// total attempts per chunk, including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// upper bound for a single attempt
    pub attempt_timeout: Duration,
    /// add up to one extra `base_backoff` of random delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed_attempts + 1`: base, 2x base, 4x base, ... capped.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        let delay = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        if self.jitter && !self.base_backoff.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=self.base_backoff.as_millis() as u64);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            attempt_timeout: Duration::from_secs(1),
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let policy = policy();
        let delays: Vec<u128> = (1..=4).map(|n| policy.backoff(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_one_base_step() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy()
        };
        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
    }
}
