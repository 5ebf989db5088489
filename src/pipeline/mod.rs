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

//! The extraction run: fetch task, reassembly, parsing and classification,
//! plus the job bookkeeping around it.

mod extraction;
mod fetcher;
mod job_state;
mod progress;
mod retry;

pub use extraction::{EarlyStop, ExtractStats, ExtractedBatch, ExtractionPipeline, ExtractionReport};
pub use job_state::{FailureKind, JobState};
pub use progress::{
    JobStatus, JobTracker, MemoryJobTracker, ProcessingJob, Progress, ProgressHandle,
};
pub use retry::RetryPolicy;
