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

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::{AppConfig, AppResult};
use crate::metric::{Classify, MetricClassifier};
use crate::pipeline::{
    EarlyStop, ExtractStats, ExtractionPipeline, FailureKind, JobState, JobStatus, JobTracker,
    ProgressHandle,
};
use crate::sink::{MergeOutcome, MergeSink, SeriesStore};
use crate::source::ChunkSource;

/// Identifies one ingestion job and whose data it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: String,
    pub owner_id: String,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        JobContext {
            job_id: job_id.into(),
            owner_id: owner_id.into(),
        }
    }
}

#[derive(Debug)]
pub struct IngestSummary {
    pub job_id: String,
    pub state: JobState,
    pub merged: Vec<MergeOutcome>,
    pub stats: ExtractStats,
}

/// Runs extraction jobs end to end: pipeline, merge into the owner's series and
/// job status reporting.
pub struct Ingestor<T, St, C = MetricClassifier> {
    config: AppConfig,
    tracker: Arc<T>,
    sink: MergeSink<St>,
    pipeline: ExtractionPipeline<C>,
}

impl<T, St, C> Ingestor<T, St, C>
where
    T: JobTracker,
    St: SeriesStore,
    C: Classify,
{
    pub fn new(config: AppConfig, tracker: Arc<T>, store: St, classifier: C) -> Self {
        let pipeline = ExtractionPipeline::from_config(&config, classifier);
        Ingestor {
            config,
            tracker,
            sink: MergeSink::new(store),
            pipeline,
        }
    }

    pub fn with_early_stop(mut self, early_stop: EarlyStop) -> Self {
        self.pipeline = self.pipeline.with_early_stop(early_stop);
        self
    }

    pub fn store(&self) -> &St {
        self.sink.store()
    }

    /// Extracts `source` into the owner's series.
    ///
    /// Whatever was extracted is merged even when the run fails. Exactly one
    /// terminal status reaches the tracker before this returns, and a failed job
    /// returns its error.
    #[instrument(name = "ingest", skip_all, fields(job_id = %job.job_id, owner_id = %job.owner_id))]
    pub async fn ingest<S: ChunkSource>(
        &self,
        job: JobContext,
        source: S,
        cancel: CancellationToken,
    ) -> AppResult<IngestSummary> {
        self.report_status(&job, JobStatus::Processing, "extraction started")
            .await;

        let progress = ProgressHandle::spawn(
            job.job_id.clone(),
            self.tracker.clone(),
            self.config.job.progress_channel_capacity,
        );
        let report = self.pipeline.run(source, &progress, cancel).await;

        let committed = if report.batch.is_empty() {
            Ok(Vec::new())
        } else {
            self.sink.commit(&job.owner_id, &report.batch).await
        };
        progress
            .close(self.config.job.status_flush_timeout())
            .await;

        let (state, merged, failure) = match (report.error, committed) {
            (None, Ok(merged)) => (report.state, merged, None),
            (Some(e), Ok(merged)) => (report.state, merged, Some(e)),
            (None, Err(e)) => (
                JobState::Failed(FailureKind::Persistence),
                Vec::new(),
                Some(e),
            ),
            (Some(e), Err(commit_error)) => {
                error!(error = %commit_error, "partial results could not be stored");
                (report.state, Vec::new(), Some(e))
            }
        };

        match failure {
            None => {
                let details = completion_details(&report.stats, &merged);
                info!(%state, "ingestion completed: {}", details);
                self.report_status(&job, JobStatus::Completed, &details)
                    .await;
                Ok(IngestSummary {
                    job_id: job.job_id,
                    state,
                    merged,
                    stats: report.stats,
                })
            }
            Some(e) => {
                error!(%state, error = %e, "ingestion failed");
                self.report_status(&job, JobStatus::Failed, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// Status reports are best effort, a tracker outage must not fail the job.
    async fn report_status(&self, job: &JobContext, status: JobStatus, details: &str) {
        if let Err(e) = self
            .tracker
            .report_status(&job.job_id, status, details)
            .await
        {
            warn!(%status, error = %e, "job status report failed");
        }
    }
}

fn completion_details(stats: &ExtractStats, merged: &[MergeOutcome]) -> String {
    let added: usize = merged.iter().map(|outcome| outcome.added).sum();
    let per_metric: Vec<String> = merged
        .iter()
        .map(|outcome| format!("{}: +{} ({} total)", outcome.metric, outcome.added, outcome.total))
        .collect();
    if per_metric.is_empty() {
        format!("{} records processed, nothing to store", stats.records_seen)
    } else {
        format!(
            "{} records processed, {} new points; {}",
            stats.records_seen,
            added,
            per_metric.join(", ")
        )
    }
}

