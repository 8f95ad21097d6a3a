// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./exporter_test.rs"]
mod exporter_test;

use super::batch::Batch;
use super::sample_builder::SampleBuilder;
use super::series_cache::SeriesCache;
use super::shard::{QueueEntry, ShardArray};
use super::time::{DurationJitter, RealDurationJitter};
use super::{ExportError, MetadataLookup, Sample, SeriesLabels};
use crate::clients::time_series::TimeSeriesClient;
use crate::config::ExporterConfig;
use crate::protos::labels::Labels;
use bd_log::warn_every;
use bd_server_stats::stats::{AutoGauge, Scope};
use bd_shutdown::ComponentShutdown;
use bd_time::TimeDurationExt;
use prometheus::{Histogram, IntCounter, IntGauge};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::Duration;
use time::ext::NumericalDuration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

//
// Stats
//

struct Stats {
  samples_exported: IntCounter,
  batches_sent: IntCounter,
  batches_failed: IntCounter,
  points_sent: IntCounter,
  send_time: Histogram,
  requests_in_flight: IntGauge,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      samples_exported: scope.counter("samples_exported"),
      batches_sent: scope.counter("batches_sent"),
      batches_failed: scope.counter("batches_failed"),
      points_sent: scope.counter("points_sent"),
      send_time: scope.histogram("send_time"),
      requests_in_flight: scope.gauge("requests_in_flight"),
    }
  }
}

//
// Exporter
//

// Entry point of the pipeline. Scrape cycles call export() with raw samples, which are converted
// into points and queued per series shard. A single run() loop drains the shards into batches and
// hands them to the client. Every shard has at most one batch in flight, so points of a series are
// written in the order they were exported.
pub struct Exporter<J: DurationJitter = RealDurationJitter> {
  cache: Arc<SeriesCache<J>>,
  shards: Arc<ShardArray>,
  client: Arc<dyn TimeSeriesClient>,
  trigger: Notify,
  running: AtomicBool,
  batch_size_max: usize,
  batch_delay_max: Duration,
  stats: Stats,
}

impl<J: DurationJitter> Exporter<J> {
  pub fn new(
    config: &ExporterConfig,
    client: Arc<dyn TimeSeriesClient>,
    scope: &Scope,
  ) -> anyhow::Result<Arc<Self>> {
    config.validate()?;
    let external_labels: Labels = config.external_labels.clone().into();
    let cache = Arc::new(SeriesCache::new(
      &config.series_cache,
      external_labels,
      config.metric_type_prefix.clone(),
      scope,
    )?);
    let scope = scope.scope("exporter");
    let shards = ShardArray::new(&scope, config.shard_count, config.shard_queue_capacity);

    Ok(Arc::new(Self {
      cache,
      shards,
      client,
      trigger: Notify::new(),
      running: AtomicBool::new(false),
      batch_size_max: config.batch_size_max,
      batch_delay_max: config.batch_delay_max.try_into()?,
      stats: Stats::new(&scope),
    }))
  }

  // Wire the series label lookup of the scrape engine. Must happen exactly once before export().
  pub fn set_labels_by_reference(
    &self,
    series_labels: Arc<dyn SeriesLabels>,
  ) -> Result<(), ExportError> {
    self.cache.set_series_labels(series_labels)
  }

  // Convert and queue a scrape's worth of samples. Never blocks on the backend: points that do not
  // fit into their shard are dropped. Only structural errors are returned, in which case points
  // built before the error remain queued.
  pub fn export(
    &self,
    metadata: &dyn MetadataLookup,
    samples: &[Sample],
  ) -> Result<(), ExportError> {
    if !self.cache.is_wired() {
      return Err(ExportError::NotWired);
    }

    let builder = SampleBuilder::new(&self.cache);
    let mut remaining = samples;
    let mut result = Ok(());
    while !remaining.is_empty() {
      match builder.next(metadata, remaining) {
        Ok((point, tail)) => {
          if let Some((point, series_hash)) = point {
            if self.shards.enqueue(QueueEntry { series_hash, point }) {
              self.stats.samples_exported.inc();
            }
          }
          remaining = tail;
        },
        Err(e) => {
          result = Err(e);
          break;
        },
      }
    }

    self.trigger.notify_one();
    result
  }

  // The send loop. Runs until shutdown. Queued and in-flight points are not drained on shutdown.
  pub async fn run(self: Arc<Self>, mut shutdown: ComponentShutdown) -> Result<(), ExportError> {
    if self.running.swap(true, Ordering::SeqCst) {
      return Err(ExportError::AlreadyRunning);
    }

    tokio::spawn(self.cache.clone().gc_loop(shutdown.clone()));

    let mut flush_interval = self.batch_delay_max.interval_at(MissedTickBehavior::Delay);
    let mut batch = Batch::new(self.batch_size_max);
    let mut offset = 0;
    loop {
      tokio::select! {
        () = shutdown.cancelled() => break,
        () = self.trigger.notified() => {
          offset = self.drain(&mut batch, offset);
        }
        _ = flush_interval.tick() => {
          offset = self.drain(&mut batch, offset);
          if !batch.is_empty() {
            log::trace!("flush interval expired with {} point(s)", batch.len());
            self.send(std::mem::replace(&mut batch, Batch::new(self.batch_size_max)));
          }
        }
      }
    }

    log::debug!("exporter send loop exiting with {} queued point(s)", self.shards.total_len());
    Ok(())
  }

  // One pass over all shards starting at the given offset. Returns the offset for the next pass.
  // Shards left with points are either pending, and re-trigger the loop once their send
  // completes, or contributed to the current batch, which goes out when full or on the flush tick.
  fn drain(self: &Arc<Self>, batch: &mut Batch, offset: usize) -> usize {
    let shard_count = self.shards.shard_count();
    for i in 0 .. shard_count {
      let index = (offset + i) % shard_count;
      let result = self.shards.fill(index, batch);
      if result.pending {
        continue;
      }

      if batch.is_full() || result.collision {
        self.send(std::mem::replace(batch, Batch::new(self.batch_size_max)));
      }
    }
    (offset + 1) % shard_count
  }

  fn send(self: &Arc<Self>, batch: Batch) {
    let (points, leases) = batch.into_parts();
    let num_points = points.len();
    log::debug!(
      "sending batch of {num_points} point(s) from {} shard(s)",
      leases.len()
    );

    let auto_requests_in_flight = AutoGauge::new(self.stats.requests_in_flight.clone());
    let exporter = self.clone();
    tokio::spawn(async move {
      let time = exporter.stats.send_time.start_timer();
      let result = exporter.client.create_time_series(points).await;
      drop(time);

      match result {
        Ok(()) => {
          exporter.stats.batches_sent.inc();
          exporter.stats.points_sent.inc_by(num_points as u64);
        },
        Err(e) => {
          exporter.stats.batches_failed.inc();
          warn_every!(
            15.seconds(),
            "failed to write batch of {} point(s): {}",
            num_points,
            e
          );
        },
      }

      // Releasing the shards makes their remaining points eligible for the next batch.
      drop(leases);
      drop(auto_requests_in_flight);
      exporter.trigger.notify_one();
    });
  }
}
