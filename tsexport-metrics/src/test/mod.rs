// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::pipeline::shard::QueueEntry;
use crate::pipeline::{MetricMetadata, SeriesLabels};
use crate::protos::labels::Labels;
use crate::protos::wire::{
  Interval,
  Metric,
  MetricKind,
  MonitoredResource,
  PointValue,
  TimeSeriesPoint,
  ValueType,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[must_use]
pub fn make_labels(labels: &[(&str, &str)]) -> Labels {
  labels.iter().copied().collect()
}

// Metadata lookup for a set of (family name, type) pairs.
#[must_use]
pub fn make_metadata(families: &[(&str, &str)]) -> HashMap<String, MetricMetadata> {
  families
    .iter()
    .map(|(name, metric_type)| ((*name).to_string(), MetricMetadata::new(metric_type)))
    .collect()
}

// A gauge point whose metric type is derived from the series hash, so equal hashes produce the
// same series.
#[must_use]
pub fn make_gauge_point(series_hash: u64, timestamp_ms: i64, value: f64) -> TimeSeriesPoint {
  TimeSeriesPoint {
    resource: MonitoredResource {
      resource_type: "prometheus_target".to_string(),
      labels: [("job", "j"), ("instance", "i")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    },
    metric: Metric {
      metric_type: format!("prometheus.googleapis.com/series_{series_hash}/gauge"),
      labels: BTreeMap::new(),
    },
    metric_kind: MetricKind::Gauge,
    value_type: ValueType::Double,
    interval: Interval::gauge(timestamp_ms),
    value: PointValue::Double(value),
  }
}

#[must_use]
pub fn make_queue_entry(series_hash: u64, value: f64) -> QueueEntry {
  QueueEntry {
    series_hash,
    point: make_gauge_point(series_hash, 0, value),
  }
}

//
// FakeSeriesLabels
//

// In memory series reference table. References can be added and removed while the pipeline is
// running.
#[derive(Default)]
pub struct FakeSeriesLabels {
  series: Mutex<HashMap<u64, Labels>>,
}

impl FakeSeriesLabels {
  #[must_use]
  pub fn new(series: &[(u64, &[(&str, &str)])]) -> Self {
    Self {
      series: Mutex::new(
        series
          .iter()
          .map(|(series_ref, labels)| (*series_ref, make_labels(labels)))
          .collect(),
      ),
    }
  }

  pub fn insert(&self, series_ref: u64, labels: Labels) {
    self.series.lock().insert(series_ref, labels);
  }

  pub fn remove(&self, series_ref: u64) {
    self.series.lock().remove(&series_ref);
  }
}

impl SeriesLabels for FakeSeriesLabels {
  fn labels_by_reference(&self, series_ref: u64) -> Option<Labels> {
    self.series.lock().get(&series_ref).cloned()
  }
}
