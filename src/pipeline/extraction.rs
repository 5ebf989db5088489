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

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::fetcher::{fetch_loop, FetchOutcome, FetchSummary};
use super::{FailureKind, JobState, Progress, ProgressHandle, RetryPolicy};
use crate::metric::{Classify, MetricClassifier, MetricKind};
use crate::record::{parse_record, HealthRecord, RecordReassembler};
use crate::service::{AppConfig, ExtractConfig};
use crate::source::{Chunk, ChunkSource};
use crate::AppError;

/// Records handled between two cancellation checks inside a chunk.
const CANCEL_CHECK_INTERVAL: u64 = 512;

/// Stop once `count` records of `metric` have been collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyStop {
    pub metric: MetricKind,
    pub count: usize,
}

/// Extracted records per metric, each list in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedBatch {
    records: BTreeMap<MetricKind, Vec<HealthRecord>>,
}

impl ExtractedBatch {
    pub fn push(&mut self, metric: MetricKind, record: HealthRecord) {
        self.records.entry(metric).or_default().push(record);
    }

    pub fn get(&self, metric: MetricKind) -> &[HealthRecord] {
        self.records.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, metric: MetricKind) -> usize {
        self.records.get(&metric).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, &[HealthRecord])> {
        self.records
            .iter()
            .map(|(metric, records)| (*metric, records.as_slice()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub chunks: u64,
    pub bytes: u64,
    /// complete `<Record>` elements handed to the parser
    pub records_seen: u64,
    pub records_parsed: u64,
    /// records the parser rejected
    pub records_skipped: u64,
    /// parsed records of an untracked type
    pub records_unclassified: u64,
    pub fetch_retries: u64,
    pub overflow_trims: u64,
    pub unterminated_skipped: u64,
    pub truncated_tail_bytes: u64,
    pub progress_dropped: u64,
    pub elapsed: Duration,
}

/// Result of one run. The batch holds whatever was extracted, also on failure.
#[derive(Debug)]
pub struct ExtractionReport {
    pub state: JobState,
    pub error: Option<AppError>,
    pub batch: ExtractedBatch,
    pub stats: ExtractStats,
}

impl ExtractionReport {
    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }
}

/// Why the consumer loop stopped taking chunks.
enum Ending {
    SourceClosed,
    EarlyStop,
    Cancelled,
}

enum ChunkFlow {
    Continue,
    EarlyStop,
    Cancelled,
}

/// Consumer-side state of a single run.
struct RunContext<'a> {
    state: JobState,
    reassembler: RecordReassembler,
    batch: ExtractedBatch,
    stats: ExtractStats,
    progress: &'a ProgressHandle,
    size_hint: Option<u64>,
}

impl RunContext<'_> {
    fn transition(&mut self, target: JobState) {
        if JobState::can_transition_to(self.state, target) {
            debug!(from = %self.state, to = %target, "job state change");
            self.state = target;
        } else {
            warn!(from = %self.state, to = %target, "ignoring illegal job state change");
        }
    }

    fn report_progress(&self) {
        let current = self.stats.records_seen;
        let total = match self.size_hint {
            Some(size) if self.stats.bytes > 0 && size > self.stats.bytes => {
                (current as u128 * size as u128 / self.stats.bytes as u128) as u64
            }
            _ => current,
        };
        self.progress.update(Progress {
            current,
            total,
            message: format!(
                "{} records processed, {} extracted",
                current,
                self.batch.total()
            ),
        });
    }
}

/// Streams an export through fetch, reassembly, parsing and classification.
pub struct ExtractionPipeline<C = MetricClassifier> {
    extract: ExtractConfig,
    retry: RetryPolicy,
    classifier: C,
    time_budget: Duration,
    early_stop: Option<EarlyStop>,
}

impl<C: Classify> ExtractionPipeline<C> {
    pub fn new(extract: ExtractConfig, retry: RetryPolicy, classifier: C) -> Self {
        ExtractionPipeline {
            extract,
            retry,
            classifier,
            time_budget: crate::service::JobConfig::default().time_budget(),
            early_stop: None,
        }
    }

    pub fn from_config(config: &AppConfig, classifier: C) -> Self {
        Self::new(
            config.extract.clone(),
            RetryPolicy::from(&config.retry),
            classifier,
        )
        .with_time_budget(config.job.time_budget())
    }

    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = time_budget;
        self
    }

    pub fn with_early_stop(mut self, early_stop: EarlyStop) -> Self {
        self.early_stop = Some(early_stop);
        self
    }

    pub fn extract_config(&self) -> &ExtractConfig {
        &self.extract
    }

    /// Runs one extraction to a terminal state.
    ///
    /// A fetch task pulls chunks into a bounded channel while this task reassembles
    /// and parses them. Fetch exhaustion, budget expiry and cancellation end the run
    /// in `Failed`, but records extracted up to that point stay in the report.
    #[instrument(name = "extraction", skip_all)]
    pub async fn run<S: ChunkSource>(
        &self,
        mut source: S,
        progress: &ProgressHandle,
        cancel: CancellationToken,
    ) -> ExtractionReport {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.time_budget)
            .unwrap_or_else(|| started + Duration::from_secs(100 * 365 * 24 * 3600));

        // cancellation and budget expiry are picked up again by the fetch task right after
        let size_hint = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("cancelled during the source size lookup");
                None
            }
            _ = time::sleep_until(deadline) => {
                debug!("time budget ran out during the source size lookup");
                None
            }
            lookup = time::timeout(self.retry.attempt_timeout, source.size()) => match lookup {
                Ok(Ok(size)) => size,
                Ok(Err(e)) => {
                    warn!(error = %e, "source size unavailable, progress totals are estimates");
                    None
                }
                Err(_) => {
                    warn!("source size lookup timed out, progress totals are estimates");
                    None
                }
            },
        };

        let mut ctx = RunContext {
            state: JobState::Idle,
            reassembler: RecordReassembler::new(self.extract.max_carry_bytes),
            batch: ExtractedBatch::default(),
            stats: ExtractStats::default(),
            progress,
            size_hint,
        };
        info!(size = ?size_hint, chunk_size = self.extract.chunk_size, "extraction started");
        ctx.transition(JobState::Fetching);

        let stop = cancel.child_token();
        let (tx, rx) = async_channel::bounded::<Chunk>(self.extract.prefetch_chunks.max(1));
        let fetcher = tokio::spawn(fetch_loop(source, tx, self.retry, deadline, stop.clone()));

        let ending = loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ending::Cancelled,
                received = rx.recv() => match received {
                    Ok(chunk) => chunk,
                    Err(_) => break Ending::SourceClosed,
                },
            };
            if ctx.state == JobState::Fetching {
                ctx.transition(JobState::Processing);
            }
            match self.process_chunk(chunk, &mut ctx, &cancel) {
                ChunkFlow::Continue => {}
                ChunkFlow::EarlyStop => break Ending::EarlyStop,
                ChunkFlow::Cancelled => break Ending::Cancelled,
            }
        };

        // stop the fetch task; the consumer side is finished with the channel
        stop.cancel();
        rx.close();
        let fetched = match fetcher.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "fetch task failed");
                None
            }
        };

        let reassembly = ctx.reassembler.finish();
        ctx.stats.overflow_trims = reassembly.overflow_trims;
        ctx.stats.unterminated_skipped = reassembly.unterminated_skipped;
        ctx.stats.truncated_tail_bytes = reassembly.truncated_tail_bytes;
        if let Some(summary) = &fetched {
            debug!(
                fetched_chunks = summary.chunks,
                fetched_bytes = summary.bytes,
                "fetch task joined"
            );
            ctx.stats.fetch_retries = summary.retries;
        }

        let error = self.settle(&mut ctx, ending, fetched, &cancel);
        ctx.report_progress();
        ctx.stats.progress_dropped = progress.dropped();
        ctx.stats.elapsed = started.elapsed();
        log_run(&ctx, error.as_ref());

        ExtractionReport {
            state: ctx.state,
            error,
            batch: ctx.batch,
            stats: ctx.stats,
        }
    }

    /// Drives the state machine to its terminal state.
    fn settle(
        &self,
        ctx: &mut RunContext<'_>,
        ending: Ending,
        fetched: Option<FetchSummary>,
        cancel: &CancellationToken,
    ) -> Option<AppError> {
        let failure = match ending {
            Ending::Cancelled => Some((FailureKind::Cancelled, AppError::Cancelled)),
            Ending::EarlyStop => None,
            Ending::SourceClosed => match fetched.map(|summary| summary.outcome) {
                Some(FetchOutcome::Exhausted) => None,
                Some(FetchOutcome::Stopped) if !cancel.is_cancelled() => None,
                Some(FetchOutcome::Stopped) => Some((FailureKind::Cancelled, AppError::Cancelled)),
                Some(FetchOutcome::TimedOut) => Some((
                    FailureKind::TimedOut,
                    AppError::Timeout(self.time_budget),
                )),
                Some(FetchOutcome::Failed { error, attempts }) => {
                    error!(attempts, error = %error, "giving up on the source");
                    Some((FailureKind::FetchExhausted, AppError::Fetch(error)))
                }
                None => Some((
                    FailureKind::FetchExhausted,
                    AppError::IllegalStateError("fetch task ended abnormally".to_string()),
                )),
            },
        };

        match failure {
            // cancellation does not drain, whatever is queued is abandoned
            Some((FailureKind::Cancelled, error)) => {
                ctx.transition(JobState::Failed(FailureKind::Cancelled));
                Some(error)
            }
            Some((kind, error)) => {
                ctx.transition(JobState::Draining);
                ctx.transition(JobState::Failed(kind));
                Some(error)
            }
            None => {
                ctx.transition(JobState::Draining);
                ctx.transition(JobState::Done);
                None
            }
        }
    }

    fn process_chunk(
        &self,
        chunk: Chunk,
        ctx: &mut RunContext<'_>,
        cancel: &CancellationToken,
    ) -> ChunkFlow {
        trace!(ordinal = chunk.ordinal, offset = chunk.offset, len = chunk.len(), "processing chunk");
        ctx.stats.chunks += 1;
        ctx.stats.bytes += chunk.len() as u64;
        ctx.reassembler.push(&chunk.data);

        let mut stop_reached = false;
        let mut handled = 0u64;
        while let Some(raw) = ctx.reassembler.next_record() {
            ctx.stats.records_seen += 1;
            handled += 1;

            match parse_record(&raw) {
                Ok(record) => {
                    ctx.stats.records_parsed += 1;
                    match self.classifier.classify(&record.record_type) {
                        Some(metric) => {
                            ctx.batch.push(metric, record);
                            if let Some(early) = self.early_stop {
                                if early.metric == metric && ctx.batch.count(metric) >= early.count {
                                    stop_reached = true;
                                }
                            }
                        }
                        None => {
                            trace!(record_type = %record.record_type, "untracked record type");
                            ctx.stats.records_unclassified += 1;
                        }
                    }
                }
                Err(e) => {
                    debug!(offset = raw.offset, error = %e, "skipping malformed record");
                    ctx.stats.records_skipped += 1;
                }
            }

            if ctx.stats.records_seen % self.extract.progress_interval.max(1) == 0 {
                ctx.report_progress();
            }
            if handled % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return ChunkFlow::Cancelled;
            }
        }

        if stop_reached {
            info!(
                ordinal = chunk.ordinal,
                records = ctx.stats.records_seen,
                "early stop target reached"
            );
            ChunkFlow::EarlyStop
        } else {
            ChunkFlow::Continue
        }
    }
}

fn log_run(ctx: &RunContext<'_>, error: Option<&AppError>) {
    let stats = &ctx.stats;
    let counts: Vec<String> = ctx
        .batch
        .iter()
        .map(|(metric, records)| format!("{}={}", metric, records.len()))
        .collect();
    match error {
        None => info!(
            state = %ctx.state,
            chunks = stats.chunks,
            bytes = stats.bytes,
            records = stats.records_seen,
            extracted = ctx.batch.total(),
            elapsed = ?stats.elapsed,
            "extraction finished: {}",
            counts.join(", ")
        ),
        Some(e) => error!(
            state = %ctx.state,
            chunks = stats.chunks,
            bytes = stats.bytes,
            records = stats.records_seen,
            extracted = ctx.batch.total(),
            elapsed = ?stats.elapsed,
            error = %e,
            "extraction failed: {}",
            counts.join(", ")
        ),
    }
    if stats.records_skipped > 0 || stats.overflow_trims > 0 || stats.truncated_tail_bytes > 0 {
        warn!(
            skipped = stats.records_skipped,
            overflow_trims = stats.overflow_trims,
            unterminated = stats.unterminated_skipped,
            truncated_tail_bytes = stats.truncated_tail_bytes,
            "data quality issues in export"
        );
    }

    // picked up by the opentelemetry metrics layer
    info!(
        monotonic_counter.extraction_chunks = stats.chunks,
        monotonic_counter.extraction_bytes = stats.bytes,
        monotonic_counter.extraction_records_seen = stats.records_seen,
        monotonic_counter.extraction_records_parsed = stats.records_parsed,
        monotonic_counter.extraction_records_skipped = stats.records_skipped,
        monotonic_counter.extraction_records_unclassified = stats.records_unclassified,
        monotonic_counter.extraction_fetch_retries = stats.fetch_retries,
        monotonic_counter.extraction_overflow_trims = stats.overflow_trims,
        monotonic_counter.extraction_truncated_tail_bytes = stats.truncated_tail_bytes,
        "extraction counters"
    );
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::source::RangedSource;

    fn pipeline() -> ExtractionPipeline {
        let extract = ExtractConfig {
            chunk_size: 64,
            ..ExtractConfig::default()
        };
        ExtractionPipeline::new(extract, RetryPolicy::default(), MetricClassifier::new())
    }

    fn export(records: usize) -> Bytes {
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<HealthData>\n");
        for i in 0..records {
            xml.push_str(&format!(
                "<Record type=\"HKQuantityTypeIdentifierHeartRate\" value=\"{}\" startDate=\"2024-01-01 00:{:02}:00 +0000\"/>\n",
                60 + i,
                i % 60
            ));
        }
        xml.push_str("</HealthData>\n");
        Bytes::from(xml)
    }

    #[tokio::test]
    async fn extracts_every_record() {
        let pipeline = pipeline();
        let source = RangedSource::new(export(40), 64);
        let report = pipeline
            .run(source, &ProgressHandle::disabled(), CancellationToken::new())
            .await;

        assert!(report.is_done(), "{:?}", report.error);
        assert_eq!(report.batch.count(MetricKind::HeartRate), 40);
        assert_eq!(report.stats.records_seen, 40);
        assert_eq!(report.batch.get(MetricKind::HeartRate)[0].value, 60.0);
    }

    #[tokio::test]
    async fn empty_source_is_done() {
        let report = pipeline()
            .run(
                RangedSource::new(Bytes::new(), 64),
                &ProgressHandle::disabled(),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(report.state, JobState::Done);
        assert!(report.batch.is_empty());
    }

    #[test]
    fn batch_counts_per_metric() {
        let mut batch = ExtractedBatch::default();
        assert!(batch.get(MetricKind::Weight).is_empty());
        let record = HealthRecord {
            record_type: "weight".into(),
            value: 80.0,
            date: "2024-01-01T00:00:00Z".into(),
            source_name: String::new(),
            unit: None,
            start_time: chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            end_time: None,
        };
        batch.push(MetricKind::Weight, record.clone());
        batch.push(MetricKind::Weight, record);
        assert_eq!(batch.count(MetricKind::Weight), 2);
        assert_eq!(batch.total(), 2);
        assert_eq!(batch.iter().count(), 1);
    }
}
