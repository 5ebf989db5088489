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

//! The metrics this system understands and how source record types map onto them.

mod classifier;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

pub use classifier::{Classify, MetricClassifier};

/// Unit of the key a series is deduplicated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateGranularity {
    /// full UTC timestamp, for metrics sampled many times a day
    Instant,
    /// calendar day in the record's own offset, for daily measurements
    Day,
}

/// Tracked metric buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    HeartRate,
    RestingHeartRate,
    WalkingHeartRateAverage,
    HeartRateVariability,
    Vo2Max,
    Weight,
    BodyFat,
    LeanBodyMass,
    BodyMassIndex,
}

impl MetricKind {
    pub const ALL: [MetricKind; 9] = [
        MetricKind::HeartRate,
        MetricKind::RestingHeartRate,
        MetricKind::WalkingHeartRateAverage,
        MetricKind::HeartRateVariability,
        MetricKind::Vo2Max,
        MetricKind::Weight,
        MetricKind::BodyFat,
        MetricKind::LeanBodyMass,
        MetricKind::BodyMassIndex,
    ];

    /// Maps a source `type` attribute onto a bucket. Unknown types are `None`.
    ///
    /// Both the HealthKit identifiers and the short bucket names are accepted.
    pub fn from_record_type(record_type: &str) -> Option<MetricKind> {
        let kind = match record_type {
            "HKQuantityTypeIdentifierHeartRate" | "heartRate" => MetricKind::HeartRate,
            "HKQuantityTypeIdentifierRestingHeartRate" | "restingHeartRate" => {
                MetricKind::RestingHeartRate
            }
            "HKQuantityTypeIdentifierWalkingHeartRateAverage" | "walkingHeartRateAverage" => {
                MetricKind::WalkingHeartRateAverage
            }
            "HKQuantityTypeIdentifierHeartRateVariabilitySDNN" | "heartRateVariability" | "hrv" => {
                MetricKind::HeartRateVariability
            }
            "HKQuantityTypeIdentifierVO2Max" | "vo2Max" | "vo2max" => MetricKind::Vo2Max,
            "HKQuantityTypeIdentifierBodyMass" | "weight" | "bodyMass" => MetricKind::Weight,
            "HKQuantityTypeIdentifierBodyFatPercentage" | "bodyFat" | "bodyFatPercentage" => {
                MetricKind::BodyFat
            }
            "HKQuantityTypeIdentifierLeanBodyMass" | "leanBodyMass" => MetricKind::LeanBodyMass,
            "HKQuantityTypeIdentifierBodyMassIndex" | "bodyMassIndex" | "bmi" => {
                MetricKind::BodyMassIndex
            }
            _ => return None,
        };
        Some(kind)
    }

    /// Bucket name used in persisted documents and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "heartRate",
            MetricKind::RestingHeartRate => "restingHeartRate",
            MetricKind::WalkingHeartRateAverage => "walkingHeartRateAverage",
            MetricKind::HeartRateVariability => "heartRateVariability",
            MetricKind::Vo2Max => "vo2Max",
            MetricKind::Weight => "weight",
            MetricKind::BodyFat => "bodyFat",
            MetricKind::LeanBodyMass => "leanBodyMass",
            MetricKind::BodyMassIndex => "bodyMassIndex",
        }
    }

    pub fn granularity(&self) -> DateGranularity {
        match self {
            MetricKind::HeartRate
            | MetricKind::WalkingHeartRateAverage
            | MetricKind::HeartRateVariability => DateGranularity::Instant,
            MetricKind::RestingHeartRate
            | MetricKind::Vo2Max
            | MetricKind::Weight
            | MetricKind::BodyFat
            | MetricKind::LeanBodyMass
            | MetricKind::BodyMassIndex => DateGranularity::Day,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::from_record_type(s)
            .ok_or_else(|| AppError::InvalidValue(format!("unknown metric: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_round_trip() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.as_str().parse::<MetricKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
    }

    #[test]
    fn healthkit_identifiers_are_recognized() {
        assert_eq!(
            MetricKind::from_record_type("HKQuantityTypeIdentifierBodyMass"),
            Some(MetricKind::Weight)
        );
        assert_eq!(
            MetricKind::from_record_type("HKQuantityTypeIdentifierHeartRateVariabilitySDNN"),
            Some(MetricKind::HeartRateVariability)
        );
        assert_eq!(
            MetricKind::from_record_type("HKQuantityTypeIdentifierStepCount"),
            None
        );
        assert!("unknownType".parse::<MetricKind>().is_err());
    }
}
