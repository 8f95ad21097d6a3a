// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use serde::Serialize;
use std::collections::BTreeMap;
use xxhash_rust::xxh64::Xxh64;

//
// MetricKind
//

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKind {
  Cumulative,
  Gauge,
}

//
// ValueType
//

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
  Double,
  Int64,
  Distribution,
}

//
// MonitoredResource
//

// The entity being measured, derived from a subset of the series labels.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MonitoredResource {
  pub resource_type: String,
  pub labels: BTreeMap<String, String>,
}

//
// Metric
//

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Metric {
  pub metric_type: String,
  pub labels: BTreeMap<String, String>,
}

//
// Interval
//

// Millisecond timestamps. Gauge points carry no start time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Interval {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_ms: Option<i64>,
  pub end_ms: i64,
}

impl Interval {
  #[must_use]
  pub const fn gauge(end_ms: i64) -> Self {
    Self {
      start_ms: None,
      end_ms,
    }
  }

  #[must_use]
  pub const fn cumulative(start_ms: i64, end_ms: i64) -> Self {
    Self {
      start_ms: Some(start_ms),
      end_ms,
    }
  }
}

//
// Distribution
//

// A histogram with explicit bucket bounds. There is always one more bucket than bounds, the last
// bucket being the overflow bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Distribution {
  pub count: i64,
  pub mean: f64,
  pub sum_of_squared_deviation: f64,
  pub bounds: Vec<f64>,
  pub bucket_counts: Vec<i64>,
}

//
// PointValue
//

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointValue {
  Double(f64),
  Int64(i64),
  Distribution(Distribution),
}

//
// TimeSeriesPoint
//

// A single point as written to the backend.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
  pub resource: MonitoredResource,
  pub metric: Metric,
  pub metric_kind: MetricKind,
  pub value_type: ValueType,
  pub interval: Interval,
  pub value: PointValue,
}

// Stable hash of a series identity on the backend. Used both for shard assignment and to detect
// duplicate series within a batch.
#[must_use]
pub fn series_hash(resource: &MonitoredResource, metric: &Metric) -> u64 {
  fn write_labels(hasher: &mut Xxh64, labels: &BTreeMap<String, String>) {
    for (name, value) in labels {
      hasher.update(name.as_bytes());
      hasher.update(&[0xfe]);
      hasher.update(value.as_bytes());
      hasher.update(&[0xff]);
    }
  }

  let mut hasher = Xxh64::new(0);
  hasher.update(resource.resource_type.as_bytes());
  hasher.update(&[0xff]);
  hasher.update(metric.metric_type.as_bytes());
  hasher.update(&[0xff]);
  write_labels(&mut hasher, &resource.labels);
  hasher.update(&[0xff]);
  write_labels(&mut hasher, &metric.labels);
  hasher.digest()
}
