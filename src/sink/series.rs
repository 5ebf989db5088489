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

use serde::{Deserialize, Serialize};

use crate::metric::{DateGranularity, MetricKind};
use crate::record::HealthRecord;

/// One stored data point. `date` is the series key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub date: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MetricPoint {
    /// `Instant` keeps the normalized UTC timestamp, `Day` keeps the calendar
    /// day the measurement was taken on, in the offset it was recorded with.
    pub fn from_record(record: &HealthRecord, granularity: DateGranularity) -> Self {
        let date = match granularity {
            DateGranularity::Instant => record.date.clone(),
            DateGranularity::Day => record.start_time.format("%Y-%m-%d").to_string(),
        };
        MetricPoint {
            date,
            value: record.value,
            source_name: Some(record.source_name.clone()).filter(|s| !s.is_empty()),
            unit: record.unit.clone(),
        }
    }
}

/// Points of one metric, ascending and unique by `date`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSeries {
    points: Vec<MetricPoint>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<MetricPoint> {
        self.points
    }
}

impl From<Vec<MetricPoint>> for MetricSeries {
    /// Normalizes arbitrary points: sorted by date, first point of each date kept.
    fn from(points: Vec<MetricPoint>) -> Self {
        normalize(points)
    }
}

/// Merges freshly extracted records into a stored series.
///
/// Baseline points go first, so on a date collision the stored point wins over
/// the re-extracted one. Merging the same records twice changes nothing.
pub fn merge_series(
    baseline: &MetricSeries,
    metric: MetricKind,
    records: &[HealthRecord],
) -> MetricSeries {
    let granularity = metric.granularity();
    let mut points = Vec::with_capacity(baseline.len() + records.len());
    points.extend_from_slice(baseline.points());
    points.extend(
        records
            .iter()
            .map(|record| MetricPoint::from_record(record, granularity)),
    );
    normalize(points)
}

fn normalize(mut points: Vec<MetricPoint>) -> MetricSeries {
    // stable, equal dates keep their relative order
    points.sort_by(|a, b| a.date.cmp(&b.date));
    // dedup_by hands (later, earlier); dropping the later one keeps the first occurrence
    points.dedup_by(|later, earlier| later.date == earlier.date);
    MetricSeries { points }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn record(start: &str, value: f64) -> HealthRecord {
        let start_time = DateTime::parse_from_rfc3339(start).unwrap();
        HealthRecord {
            record_type: "HKQuantityTypeIdentifierBodyMass".into(),
            value,
            date: start_time
                .with_timezone(&chrono::Utc)
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
            source_name: "Scale".into(),
            unit: Some("lb".into()),
            start_time,
            end_time: None,
        }
    }

    #[test]
    fn day_points_use_the_local_calendar_day() {
        let late_evening = record("2024-03-01T23:30:00-05:00", 180.0);
        let point = MetricPoint::from_record(&late_evening, DateGranularity::Day);
        assert_eq!(point.date, "2024-03-01");
        let point = MetricPoint::from_record(&late_evening, DateGranularity::Instant);
        assert_eq!(point.date, "2024-03-02T04:30:00Z");
    }

    #[test]
    fn one_point_per_day_first_wins() {
        let records = [
            record("2024-03-02T08:00:00Z", 181.0),
            record("2024-03-01T08:00:00Z", 180.0),
            record("2024-03-01T20:00:00Z", 179.0),
        ];
        let series = merge_series(&MetricSeries::new(), MetricKind::Weight, &records);
        let values: Vec<(&str, f64)> = series
            .points()
            .iter()
            .map(|p| (p.date.as_str(), p.value))
            .collect();
        assert_eq!(values, vec![("2024-03-01", 180.0), ("2024-03-02", 181.0)]);
    }

    #[test]
    fn serializes_as_a_plain_array() {
        let series = MetricSeries::from(vec![MetricPoint {
            date: "2024-03-01".into(),
            value: 180.0,
            source_name: None,
            unit: Some("lb".into()),
        }]);
        let json = serde_json::to_string(&series).unwrap();
        assert_eq!(json, r#"[{"date":"2024-03-01","value":180.0,"unit":"lb"}]"#);
        let back: MetricSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back, series);
    }
}
