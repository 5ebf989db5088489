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

use std::fmt;

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// a chunk fetch failed on every allowed attempt
    FetchExhausted,
    /// the wall-clock budget ran out
    TimedOut,
    /// the caller cancelled the job
    Cancelled,
    /// the extracted series could not be stored
    Persistence,
}

/// State of one extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, nothing fetched yet
    ///
    /// transition: run starts => Fetching
    Idle,

    /// Waiting on the first chunk
    ///
    /// transition: first chunk received => Processing
    ///             source exhausted, stop requested => Draining
    ///             fetch retries exhausted, budget expired, cancelled => Failed
    Fetching,

    /// Reassembling and parsing chunks while the fetch task keeps pulling
    ///
    /// transition: source exhausted, early stop, budget expired => Draining
    ///             fetch retries exhausted, cancelled => Failed
    Processing,

    /// No new chunks are pulled; already fetched data is being finished
    ///
    /// transition: drained cleanly => Done
    ///             drained after budget expiry or a fetch failure => Failed
    Draining,

    /// Terminal, every fetched chunk was processed
    Done,

    /// Terminal, partial results are kept
    Failed(FailureKind),
}

impl JobState {
    pub const fn can_transition_to(current: JobState, target: JobState) -> bool {
        match (current, target) {
            (JobState::Done, _) | (JobState::Failed(_), _) => false,
            (_, JobState::Failed(_)) => !matches!(current, JobState::Idle),
            (JobState::Idle, JobState::Fetching) => true,
            (JobState::Fetching, JobState::Processing) => true,
            (JobState::Fetching, JobState::Draining) => true,
            (JobState::Processing, JobState::Draining) => true,
            (JobState::Draining, JobState::Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Fetching => write!(f, "fetching"),
            JobState::Processing => write!(f, "processing"),
            JobState::Draining => write!(f, "draining"),
            JobState::Done => write!(f, "done"),
            JobState::Failed(kind) => write!(f, "failed ({:?})", kind),
        }
    }
}
