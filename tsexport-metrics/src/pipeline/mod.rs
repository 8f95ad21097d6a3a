// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::protos::labels::Labels;
use std::collections::HashMap;

pub mod batch;
pub mod classify;
pub mod exporter;
pub mod resource;
pub mod sample_builder;
pub mod series_cache;
pub mod shard;
pub mod time;

//
// ExportError
//

// Structural errors. These indicate a contract violation by the caller and are surfaced to the
// calling scrape cycle. Per-series problems never show up here, including references that are no
// longer valid; they are counted and dropped.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExportError {
  #[error("labels by reference lookup has not been set")]
  NotWired,
  #[error("labels by reference lookup has already been set")]
  AlreadyWired,
  #[error("exporter is already running")]
  AlreadyRunning,
}

//
// Sample
//

// A raw scraped sample. The series reference is opaque and is resolved through SeriesLabels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
  pub series_ref: u64,
  pub timestamp_ms: i64,
  pub value: f64,
}

impl Sample {
  #[must_use]
  pub const fn new(series_ref: u64, timestamp_ms: i64, value: f64) -> Self {
    Self {
      series_ref,
      timestamp_ms,
      value,
    }
  }
}

//
// MetricMetadata
//

// Metadata for a metric family as reported by the scrape target. The type is kept as the raw
// string so that unexpected types can be reported during classification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricMetadata {
  pub metric_type: String,
  pub help: String,
}

impl MetricMetadata {
  #[must_use]
  pub fn new(metric_type: &str) -> Self {
    Self {
      metric_type: metric_type.to_string(),
      help: String::new(),
    }
  }
}

//
// MetadataLookup
//

// Metadata lookup scoped to a single scrape target/cycle.
pub trait MetadataLookup {
  fn get(&self, metric_name: &str) -> Option<MetricMetadata>;
}

impl MetadataLookup for HashMap<String, MetricMetadata> {
  fn get(&self, metric_name: &str) -> Option<MetricMetadata> {
    Self::get(self, metric_name).cloned()
  }
}

impl<F: Fn(&str) -> Option<MetricMetadata>> MetadataLookup for F {
  fn get(&self, metric_name: &str) -> Option<MetricMetadata> {
    self(metric_name)
  }
}

//
// SeriesLabels
//

// Resolves a series reference to its full label set. None means the reference is no longer valid.
pub trait SeriesLabels: Send + Sync {
  fn labels_by_reference(&self, series_ref: u64) -> Option<Labels>;
}

impl<F: Fn(u64) -> Option<Labels> + Send + Sync> SeriesLabels for F {
  fn labels_by_reference(&self, series_ref: u64) -> Option<Labels> {
    self(series_ref)
  }
}
