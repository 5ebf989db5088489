use chrono::{DateTime, SecondsFormat, Utc};
use tempfile::TempDir;
use vitalstream::pipeline::ExtractedBatch;
use vitalstream::sink::{merge_series, MergeOutcome};
use vitalstream::{
    AppResult, FileSeriesStore, HealthRecord, MemorySeriesStore, MergeSink, MetricKind,
    MetricSeries, SeriesStore,
};

fn record(record_type: &str, start: &str, value: f64) -> HealthRecord {
    let start_time = DateTime::parse_from_rfc3339(start).unwrap();
    HealthRecord {
        record_type: record_type.to_string(),
        value,
        date: start_time
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        source_name: "Watch".to_string(),
        unit: None,
        start_time,
        end_time: None,
    }
}

fn heart_rates() -> Vec<HealthRecord> {
    vec![
        record("heartRate", "2024-01-01T08:00:00Z", 70.0),
        record("heartRate", "2024-01-01T08:05:00Z", 75.0),
        record("heartRate", "2024-01-01T07:55:00Z", 68.0),
    ]
}

#[test]
fn merging_twice_changes_nothing() {
    let once = merge_series(&MetricSeries::new(), MetricKind::HeartRate, &heart_rates());
    let twice = merge_series(&once, MetricKind::HeartRate, &heart_rates());
    assert_eq!(once, twice);
    assert_eq!(once.len(), 3);

    let dates: Vec<&str> = once.points().iter().map(|p| p.date.as_str()).collect();
    assert_eq!(
        dates,
        vec![
            "2024-01-01T07:55:00Z",
            "2024-01-01T08:00:00Z",
            "2024-01-01T08:05:00Z"
        ]
    );
}

#[test]
fn stored_point_wins_over_re_extraction() {
    let stored = merge_series(
        &MetricSeries::new(),
        MetricKind::Weight,
        &[record("weight", "2024-01-01T07:00:00Z", 180.0)],
    );
    let merged = merge_series(
        &stored,
        MetricKind::Weight,
        &[
            record("weight", "2024-01-01T19:00:00Z", 182.0),
            record("weight", "2024-01-02T07:00:00Z", 181.0),
        ],
    );
    let values: Vec<(&str, f64)> = merged
        .points()
        .iter()
        .map(|p| (p.date.as_str(), p.value))
        .collect();
    assert_eq!(values, vec![("2024-01-01", 180.0), ("2024-01-02", 181.0)]);
}

#[tokio::test]
async fn commit_reports_per_metric_outcomes() -> AppResult<()> {
    let sink = MergeSink::new(MemorySeriesStore::new());
    let mut batch = ExtractedBatch::default();
    for r in heart_rates() {
        batch.push(MetricKind::HeartRate, r);
    }
    batch.push(MetricKind::Weight, record("weight", "2024-01-01T07:00:00Z", 180.0));

    let first = sink.commit("owner", &batch).await?;
    assert_eq!(
        first,
        vec![
            MergeOutcome {
                metric: MetricKind::HeartRate,
                previous: 0,
                added: 3,
                total: 3
            },
            MergeOutcome {
                metric: MetricKind::Weight,
                previous: 0,
                added: 1,
                total: 1
            },
        ]
    );

    let second = sink.commit("owner", &batch).await?;
    assert!(second.iter().all(|outcome| outcome.added == 0));
    Ok(())
}

#[tokio::test]
async fn file_store_survives_a_new_instance() -> AppResult<()> {
    let dir = TempDir::new()?;
    let series = merge_series(&MetricSeries::new(), MetricKind::HeartRate, &heart_rates());

    FileSeriesStore::new(dir.path())
        .save("owner", MetricKind::HeartRate, &series)
        .await?;
    let reopened = FileSeriesStore::new(dir.path());
    assert_eq!(reopened.load("owner", MetricKind::HeartRate).await?, series);

    let raw = std::fs::read_to_string(dir.path().join("owner").join("heartRate.json"))?;
    assert!(raw.trim_start().starts_with('['));
    assert!(raw.contains("\"sourceName\": \"Watch\""));
    Ok(())
}
