// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./series_cache_test.rs"]
mod series_cache_test;

use super::classify::{
  BUCKET_BOUND_LABEL,
  ClassifyError,
  MAX_LABEL_COUNT,
  MetadataType,
  MetricSuffix,
  classify,
  lookup_metadata,
  metric_labels,
};
use super::resource::resolve;
use super::time::DurationJitter;
use super::{ExportError, MetadataLookup, SeriesLabels};
use crate::config::SeriesCacheConfig;
use crate::protos::labels::Labels;
use crate::protos::wire::{Metric, MetricKind, MonitoredResource, ValueType, series_hash};
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdown;
use bd_time::TimeDurationExt;
use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

//
// PopulationError
//

// Reasons a series cannot be exported. These are per-series and never surface to the caller.
#[derive(thiserror::Error, Debug)]
enum PopulationError {
  #[error("series has no metric name")]
  MissingMetricName,
  #[error("series is missing the job or instance label")]
  MissingTargetLabels,
  #[error("no metadata for {0}")]
  NoMetadata(String),
  #[error(transparent)]
  Classify(#[from] ClassifyError),
  #[error("invalid bucket bound {0:?}")]
  InvalidBucketBound(Option<String>),
  #[error("histogram series {0} has no _bucket/_sum/_count suffix")]
  BareHistogramSeries(String),
  #[error("too many metric labels: {0}")]
  TooManyLabels(usize),
}

//
// PopulatedSeries
//

// The backend descriptor of a series. Replaced as a whole on refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct PopulatedSeries {
  pub resource: MonitoredResource,
  pub metric: Metric,
  pub metric_kind: MetricKind,
  pub value_type: ValueType,
  pub metadata_type: MetadataType,
  pub suffix: MetricSuffix,
  pub base_name: String,
  // Parsed le label of histogram _bucket series.
  pub bucket_upper_bound: Option<f64>,
  pub series_hash: u64,
}

//
// ResetState
//

// Tracks the start of a cumulative series. The baseline is the first value ever seen, or zero after
// a counter reset.
#[derive(Debug, Default)]
struct ResetState {
  has_reset: bool,
  reset_value: f64,
  reset_timestamp_ms: i64,
  previous_value: f64,
}

impl ResetState {
  fn adjust(&mut self, timestamp_ms: i64, value: f64) -> Option<(i64, f64)> {
    if !self.has_reset {
      self.has_reset = true;
      self.reset_value = value;
      self.reset_timestamp_ms = timestamp_ms;
      self.previous_value = value;
      return None;
    }

    if value < self.previous_value {
      // The counter restarted somewhere between the previous sample and this one. Assume it
      // started from zero right before this sample.
      self.reset_value = 0.0;
      self.reset_timestamp_ms = timestamp_ms - 1;
    }
    self.previous_value = value;
    Some((self.reset_timestamp_ms, value - self.reset_value))
  }
}

//
// SeriesCacheEntry
//

struct SeriesCacheEntry {
  labels: Labels,
  populated: Option<Arc<PopulatedSeries>>,
  next_refresh_at: Option<Instant>,
  last_used_at: Instant,
  reset: ResetState,
}

impl SeriesCacheEntry {
  fn should_refresh(&self, now: Instant) -> bool {
    self.next_refresh_at.is_none_or(|at| now > at)
  }
}

//
// Stats
//

struct Stats {
  size: IntGauge,
  series_dropped: IntCounter,
  evicted: IntCounter,
  refreshes: IntCounter,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    let scope = scope.scope("series_cache");
    Self {
      size: scope.gauge("size"),
      series_dropped: scope.counter("series_dropped"),
      evicted: scope.counter("evicted"),
      refreshes: scope.counter("refreshes"),
    }
  }
}

//
// SeriesCache
//

// Maps series references to their backend descriptors and per-series counter reset state.
// Descriptors are periodically refreshed so that metadata and external label changes are picked
// up. Entries that have not been used for a while are garbage collected.
pub struct SeriesCache<J: DurationJitter> {
  entries: Mutex<HashMap<u64, Arc<Mutex<SeriesCacheEntry>>, ahash::RandomState>>,
  series_labels: OnceLock<Arc<dyn SeriesLabels>>,
  external_labels: Labels,
  metric_type_prefix: String,
  refresh_interval: Duration,
  refresh_jitter: Duration,
  gc_interval: Duration,
  gc_window: std::time::Duration,
  stats: Stats,
  phantom: PhantomData<J>,
}

impl<J: DurationJitter> SeriesCache<J> {
  pub fn new(
    config: &SeriesCacheConfig,
    external_labels: Labels,
    metric_type_prefix: String,
    scope: &Scope,
  ) -> anyhow::Result<Self> {
    Ok(Self {
      entries: Mutex::default(),
      series_labels: OnceLock::new(),
      external_labels,
      metric_type_prefix,
      refresh_interval: config.refresh_interval.try_into()?,
      refresh_jitter: config.refresh_jitter.try_into()?,
      gc_interval: config.gc_interval.try_into()?,
      gc_window: config.gc_window,
      stats: Stats::new(scope),
      phantom: PhantomData,
    })
  }

  // Wire the label lookup. Can only be done once.
  pub fn set_series_labels(&self, series_labels: Arc<dyn SeriesLabels>) -> Result<(), ExportError> {
    self
      .series_labels
      .set(series_labels)
      .map_err(|_| ExportError::AlreadyWired)
  }

  #[must_use]
  pub fn is_wired(&self) -> bool {
    self.series_labels.get().is_some()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  // Returns None if the scrape engine no longer knows the reference.
  fn find_or_insert(
    &self,
    series_ref: u64,
    now: Instant,
  ) -> Result<Option<Arc<Mutex<SeriesCacheEntry>>>, ExportError> {
    if let Some(entry) = self.entries.lock().get(&series_ref) {
      return Ok(Some(entry.clone()));
    }

    // The label lookup can be slow so do not hold the map lock across it.
    let series_labels = self.series_labels.get().ok_or(ExportError::NotWired)?;
    let Some(labels) = series_labels.labels_by_reference(series_ref) else {
      return Ok(None);
    };

    let mut entries = self.entries.lock();
    let entry = entries
      .entry(series_ref)
      .or_insert_with(|| {
        Arc::new(Mutex::new(SeriesCacheEntry {
          labels,
          populated: None,
          next_refresh_at: None,
          last_used_at: now,
          reset: ResetState::default(),
        }))
      })
      .clone();
    self.stats.size.set(i64::try_from(entries.len()).unwrap_or(i64::MAX));
    Ok(Some(entry))
  }

  // Get the descriptor for a series, populating or refreshing it as needed. Ok(None) means the
  // series cannot be exported and its samples should be dropped. This includes references the
  // scrape engine no longer knows about.
  pub fn get(
    &self,
    series_ref: u64,
    metadata: &dyn MetadataLookup,
  ) -> Result<Option<Arc<PopulatedSeries>>, ExportError> {
    let now = Instant::now();
    let Some(entry) = self.find_or_insert(series_ref, now)? else {
      log::debug!("dropping sample for unknown series reference {series_ref}");
      self.stats.series_dropped.inc();
      return Ok(None);
    };
    let mut entry = entry.lock();
    entry.last_used_at = now;
    if !entry.should_refresh(now) {
      return Ok(entry.populated.clone());
    }

    if entry.next_refresh_at.is_some() {
      self.stats.refreshes.inc();
    }
    let refresh_in = J::plus_minus_jitter_duration(self.refresh_interval, self.refresh_jitter);
    entry.next_refresh_at = Some(now + refresh_in.unsigned_abs());
    match self.populate(&entry.labels, metadata) {
      Ok(populated) => {
        log::trace!(
          "populated series {series_ref} {} as {}",
          entry.labels,
          populated.metric.metric_type
        );
        entry.populated = Some(Arc::new(populated));
      },
      Err(e) => {
        log::debug!("dropping series {series_ref} {}: {e}", entry.labels);
        self.stats.series_dropped.inc();
        entry.populated = None;
      },
    }
    Ok(entry.populated.clone())
  }

  fn populate(
    &self,
    labels: &Labels,
    metadata: &dyn MetadataLookup,
  ) -> Result<PopulatedSeries, PopulationError> {
    let name = labels
      .metric_name()
      .ok_or(PopulationError::MissingMetricName)?;
    let (resource, remaining_labels) =
      resolve(labels, &self.external_labels).ok_or(PopulationError::MissingTargetLabels)?;
    let (metadata_type, suffix) = lookup_metadata(name, metadata)?
      .ok_or_else(|| PopulationError::NoMetadata(name.to_string()))?;
    let classification = classify(&self.metric_type_prefix, name, metadata_type, suffix)?;

    let bucket_upper_bound = match (metadata_type, suffix) {
      (MetadataType::Histogram, MetricSuffix::Bucket) => {
        Some(parse_bucket_bound(labels.get(BUCKET_BOUND_LABEL))?)
      },
      (MetadataType::Histogram, MetricSuffix::None) => {
        return Err(PopulationError::BareHistogramSeries(name.to_string()));
      },
      _ => None,
    };

    let metric_labels = metric_labels(remaining_labels, metadata_type);
    if metric_labels.len() > MAX_LABEL_COUNT {
      return Err(PopulationError::TooManyLabels(metric_labels.len()));
    }

    let metric = Metric {
      metric_type: classification.metric_type,
      labels: metric_labels.into_inner(),
    };
    let series_hash = series_hash(&resource, &metric);
    Ok(PopulatedSeries {
      resource,
      metric,
      metric_kind: classification.metric_kind,
      value_type: classification.value_type,
      metadata_type,
      suffix,
      base_name: classification.base_name,
      bucket_upper_bound,
      series_hash,
    })
  }

  // Apply counter reset tracking to a cumulative sample. Returns the start timestamp and the value
  // relative to that start, or None if this is the first sample seen for the series.
  pub fn get_reset_adjusted(
    &self,
    series_ref: u64,
    timestamp_ms: i64,
    value: f64,
  ) -> Option<(i64, f64)> {
    let entry = self.entries.lock().get(&series_ref).cloned()?;
    let mut entry = entry.lock();
    entry.reset.adjust(timestamp_ms, value)
  }

  // Remove all entries that have not been used within the GC window. Returns the number evicted.
  // Entry locks are only ever tried, never waited on, so a series that is being populated is
  // treated as in use and the map lock is not held across a slow metadata lookup.
  pub fn garbage_collect(&self, now: Instant) -> usize {
    let Some(cutoff) = now.checked_sub(self.gc_window) else {
      return 0;
    };
    let is_idle = |entry: &Mutex<SeriesCacheEntry>| {
      entry
        .try_lock()
        .is_some_and(|entry| entry.last_used_at < cutoff)
    };

    let snapshot: Vec<(u64, Arc<Mutex<SeriesCacheEntry>>)> = self
      .entries
      .lock()
      .iter()
      .map(|(series_ref, entry)| (*series_ref, entry.clone()))
      .collect();
    let idle: Vec<u64> = snapshot
      .into_iter()
      .filter(|(_, entry)| is_idle(&**entry))
      .map(|(series_ref, _)| series_ref)
      .collect();
    if idle.is_empty() {
      return 0;
    }

    // The entry may have been used since the snapshot, so check again before removing it.
    let mut entries = self.entries.lock();
    let mut evicted = 0;
    for series_ref in idle {
      if entries.get(&series_ref).is_some_and(|entry| is_idle(&**entry)) {
        entries.remove(&series_ref);
        evicted += 1;
      }
    }
    self.stats.evicted.inc_by(evicted as u64);
    self.stats.size.set(i64::try_from(entries.len()).unwrap_or(i64::MAX));
    evicted
  }

  pub async fn gc_loop(self: Arc<Self>, mut shutdown: ComponentShutdown) {
    let mut interval = self.gc_interval.interval_at(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        () = shutdown.cancelled() => break,
        _ = interval.tick() => {
          let evicted = self.garbage_collect(Instant::now());
          log::debug!("series cache gc evicted {evicted} series, {} remaining", self.len());
        }
      }
    }
    log::debug!("series cache gc loop exiting");
  }
}

fn parse_bucket_bound(bound: Option<&str>) -> Result<f64, PopulationError> {
  match bound {
    Some("+Inf") => Ok(f64::INFINITY),
    Some(bound) => bound
      .parse()
      .map_err(|_| PopulationError::InvalidBucketBound(Some(bound.to_string()))),
    None => Err(PopulationError::InvalidBucketBound(None)),
  }
}
