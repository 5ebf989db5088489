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

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::AppResult;

/// Job status as seen by the external job bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: u64,
    /// estimate, refined as more of the file is consumed
    pub total: u64,
    pub message: String,
}

/// External job-status store.
pub trait JobTracker: Send + Sync + 'static {
    fn report_progress(
        &self,
        job_id: &str,
        progress: Progress,
    ) -> impl Future<Output = AppResult<()>> + Send;

    fn report_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: &str,
    ) -> impl Future<Output = AppResult<()>> + Send;
}

/// Fire-and-forget progress channel between the pipeline and a `JobTracker`.
///
/// `update` never waits: when the tracker lags behind and the channel is full the
/// update is dropped, the next one supersedes it anyway.
pub struct ProgressHandle {
    tx: Option<mpsc::Sender<Progress>>,
    task: Option<JoinHandle<()>>,
    dropped: AtomicU64,
}

impl ProgressHandle {
    pub fn spawn<T: JobTracker>(job_id: impl Into<String>, tracker: Arc<T>, capacity: usize) -> Self {
        let job_id = job_id.into();
        let (tx, mut rx) = mpsc::channel::<Progress>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if let Err(e) = tracker.report_progress(&job_id, progress).await {
                    warn!(job_id = %job_id, error = %e, "progress report failed");
                }
            }
            trace!(job_id = %job_id, "progress dispatcher finished");
        });
        ProgressHandle {
            tx: Some(tx),
            task: Some(task),
            dropped: AtomicU64::new(0),
        }
    }

    /// A handle that discards every update.
    pub fn disabled() -> Self {
        ProgressHandle {
            tx: None,
            task: None,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn update(&self, progress: Progress) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.try_send(progress).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Updates that were discarded because the tracker lagged.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Lets queued updates go out, waiting at most `timeout` for a slow tracker.
    pub async fn close(mut self, timeout: Duration) {
        drop(self.tx.take());
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!(?timeout, "job tracker too slow, abandoning queued progress");
                task.abort();
            }
        }
    }
}

/// One job as tracked by `MemoryJobTracker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingJob {
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub status: JobStatus,
}

impl Default for ProcessingJob {
    fn default() -> Self {
        ProcessingJob {
            current: 0,
            total: 0,
            message: String::new(),
            status: JobStatus::Pending,
        }
    }
}

/// In-process job bookkeeping, used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryJobTracker {
    jobs: Mutex<HashMap<String, ProcessingJob>>,
    statuses: Mutex<HashMap<String, Vec<JobStatus>>>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, job_id: &str) -> Option<ProcessingJob> {
        self.jobs.lock().get(job_id).cloned()
    }

    /// Every status reported for `job_id`, oldest first.
    pub fn status_history(&self, job_id: &str) -> Vec<JobStatus> {
        self.statuses
            .lock()
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl JobTracker for MemoryJobTracker {
    async fn report_progress(&self, job_id: &str, progress: Progress) -> AppResult<()> {
        debug!(
            job_id,
            current = progress.current,
            total = progress.total,
            "{}",
            progress.message
        );
        let mut jobs = self.jobs.lock();
        let job = jobs.entry(job_id.to_string()).or_default();
        job.current = progress.current;
        job.total = progress.total;
        job.message = progress.message;
        Ok(())
    }

    async fn report_status(&self, job_id: &str, status: JobStatus, details: &str) -> AppResult<()> {
        info!(job_id, %status, "{}", details);
        {
            let mut jobs = self.jobs.lock();
            let job = jobs.entry(job_id.to_string()).or_default();
            job.status = status;
            job.message = details.to_string();
        }
        self.statuses
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .push(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn updates_reach_the_tracker() {
        let tracker = Arc::new(MemoryJobTracker::new());
        let handle = ProgressHandle::spawn("job-1", tracker.clone(), 8);
        handle.update(Progress {
            current: 10,
            total: 100,
            message: "10 records".into(),
        });
        handle.close(Duration::from_secs(5)).await;

        let job = tracker.job("job-1").unwrap();
        assert_eq!((job.current, job.total), (10, 100));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn status_history_is_kept() {
        let tracker = MemoryJobTracker::new();
        tracker
            .report_status("job-2", JobStatus::Processing, "started")
            .await
            .unwrap();
        tracker
            .report_status("job-2", JobStatus::Completed, "done")
            .await
            .unwrap();
        assert_eq!(
            tracker.status_history("job-2"),
            vec![JobStatus::Processing, JobStatus::Completed]
        );
        assert_eq!(tracker.job("job-2").unwrap().message, "done");
    }

    #[test]
    fn disabled_handle_ignores_updates() {
        let handle = ProgressHandle::disabled();
        handle.update(Progress {
            current: 1,
            total: 1,
            message: String::new(),
        });
        assert_eq!(handle.dropped(), 0);
    }
}
