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

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use super::RetryPolicy;
use crate::source::{Chunk, ChunkSource, FetchError};

/// How the fetch task ended.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    /// the source has no more chunks
    Exhausted,
    /// stop was requested, or the consumer went away
    Stopped,
    /// the time budget ran out
    TimedOut,
    /// one chunk failed on every allowed attempt
    Failed { error: FetchError, attempts: u32 },
}

#[derive(Debug)]
pub(crate) struct FetchSummary {
    pub outcome: FetchOutcome,
    pub chunks: u64,
    pub bytes: u64,
    pub retries: u64,
}

/// Pulls chunks in order and hands them to the consumer through a bounded channel.
///
/// The single producer plus a FIFO channel keeps chunks in file order; the channel
/// capacity bounds how far fetching runs ahead of parsing.
#[instrument(name = "fetch_loop", skip_all)]
pub(crate) async fn fetch_loop<S: ChunkSource>(
    mut source: S,
    tx: async_channel::Sender<Chunk>,
    policy: RetryPolicy,
    deadline: Instant,
    stop: CancellationToken,
) -> FetchSummary {
    let mut chunks = 0;
    let mut bytes = 0;
    let mut retries = 0;

    let outcome = loop {
        let chunk = match fetch_with_retry(&mut source, &policy, deadline, &stop, &mut retries).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break FetchOutcome::Exhausted,
            Err(outcome) => break outcome,
        };
        chunks += 1;
        bytes += chunk.len() as u64;
        trace!(ordinal = chunk.ordinal, offset = chunk.offset, len = chunk.len(), "handing off chunk");

        // waits while the consumer is busy, this is the only backpressure on fetching
        tokio::select! {
            biased;
            _ = stop.cancelled() => break FetchOutcome::Stopped,
            sent = tx.send(chunk) => {
                if sent.is_err() {
                    break FetchOutcome::Stopped;
                }
            }
        }
    };

    debug!(chunks, bytes, retries, ?outcome, "fetch loop finished");
    FetchSummary {
        outcome,
        chunks,
        bytes,
        retries,
    }
}

/// One chunk, with up to `policy.max_attempts` calls to `next_chunk`.
/// An error that is not retryable ends the fetch on the spot.
async fn fetch_with_retry<S: ChunkSource>(
    source: &mut S,
    policy: &RetryPolicy,
    deadline: Instant,
    stop: &CancellationToken,
    retries: &mut u64,
) -> Result<Option<Chunk>, FetchOutcome> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(FetchOutcome::Stopped),
            _ = time::sleep_until(deadline) => return Err(FetchOutcome::TimedOut),
            result = time::timeout(policy.attempt_timeout, source.next_chunk()) => result,
        };
        let error = match result {
            Ok(Ok(chunk)) => return Ok(chunk),
            Ok(Err(e)) => e,
            Err(_) => FetchError::new(
                None,
                format!("attempt timed out after {:?}", policy.attempt_timeout),
            ),
        };

        if !error.retryable || attempt >= policy.max_attempts {
            error!(attempt, retryable = error.retryable, error = %error, "chunk fetch failed, giving up");
            return Err(FetchOutcome::Failed {
                error,
                attempts: attempt,
            });
        }
        *retries += 1;
        let delay = policy.backoff(attempt);
        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            ?delay,
            error = %error,
            "chunk fetch failed, retrying"
        );
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(FetchOutcome::Stopped),
            _ = time::sleep_until(deadline) => return Err(FetchOutcome::TimedOut),
            _ = time::sleep(delay) => {}
        }
    }
}
