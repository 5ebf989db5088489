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

//! Streaming extraction of health measurements from large XML exports.
//!
//! Bytes come in as ordered chunks from a [`ChunkSource`], complete `<Record>`
//! elements are reassembled across chunk boundaries, parsed, classified into
//! [`MetricKind`] buckets and merged into per-owner [`MetricSeries`].

pub mod metric;
pub mod pipeline;
pub mod record;
pub mod service;
pub mod sink;
pub mod source;

pub use metric::{Classify, MetricClassifier, MetricKind};
pub use pipeline::{
    EarlyStop, ExtractedBatch, ExtractionPipeline, ExtractionReport, JobState, JobStatus,
    JobTracker, MemoryJobTracker, ProgressHandle, RetryPolicy,
};
pub use record::{HealthRecord, RawRecord, RecordReassembler};
pub use service::{
    global_config, setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult,
    IngestSummary, Ingestor, JobContext, GLOBAL_CONFIG,
};
pub use sink::{FileSeriesStore, MemorySeriesStore, MergeSink, MetricSeries, SeriesStore};
pub use source::{Chunk, ChunkSource, FetchError, FileRangeReader, RangedSource, StreamSource};
