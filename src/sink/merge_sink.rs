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

use serde::Serialize;
use tracing::{info, instrument};

use super::{merge_series, SeriesStore};
use crate::metric::MetricKind;
use crate::pipeline::ExtractedBatch;
use crate::AppResult;

/// What a commit did to one metric's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub metric: MetricKind,
    pub previous: usize,
    /// points that were not already present
    pub added: usize,
    pub total: usize,
}

/// Folds extracted batches into the stored series of an owner.
pub struct MergeSink<St> {
    store: St,
}

impl<St: SeriesStore> MergeSink<St> {
    pub fn new(store: St) -> Self {
        MergeSink { store }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Loads, merges and saves every metric present in `batch`. Metrics without
    /// records are left untouched.
    #[instrument(skip(self, batch), fields(metrics = batch.iter().count()))]
    pub async fn commit(&self, owner_id: &str, batch: &ExtractedBatch) -> AppResult<Vec<MergeOutcome>> {
        let mut outcomes = Vec::new();
        for (metric, records) in batch.iter() {
            if records.is_empty() {
                continue;
            }
            let baseline = self.store.load(owner_id, metric).await?;
            let merged = merge_series(&baseline, metric, records);
            self.store.save(owner_id, metric, &merged).await?;

            let outcome = MergeOutcome {
                metric,
                previous: baseline.len(),
                added: merged.len().saturating_sub(baseline.len()),
                total: merged.len(),
            };
            info!(
                owner_id,
                %metric,
                previous = outcome.previous,
                added = outcome.added,
                total = outcome.total,
                "series merged"
            );
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}
