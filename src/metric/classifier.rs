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

use std::collections::BTreeSet;

use super::MetricKind;

/// Decides which bucket, if any, a record type belongs to.
pub trait Classify: Send + Sync + 'static {
    fn classify(&self, record_type: &str) -> Option<MetricKind>;
}

impl<F> Classify for F
where
    F: Fn(&str) -> Option<MetricKind> + Send + Sync + 'static,
{
    fn classify(&self, record_type: &str) -> Option<MetricKind> {
        self(record_type)
    }
}

/// The standard classifier, optionally narrowed to a subset of metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricClassifier {
    only: Option<BTreeSet<MetricKind>>,
}

impl MetricClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks only `kinds`; an empty list tracks everything.
    pub fn only(kinds: impl IntoIterator<Item = MetricKind>) -> Self {
        let kinds: BTreeSet<MetricKind> = kinds.into_iter().collect();
        MetricClassifier {
            only: (!kinds.is_empty()).then_some(kinds),
        }
    }
}

impl Classify for MetricClassifier {
    fn classify(&self, record_type: &str) -> Option<MetricKind> {
        let kind = MetricKind::from_record_type(record_type)?;
        match &self.only {
            Some(kinds) if !kinds.contains(&kind) => None,
            _ => Some(kind),
        }
    }
}
