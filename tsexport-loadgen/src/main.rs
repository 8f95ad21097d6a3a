// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use anyhow::Context;
use bd_server_stats::stats::Collector;
use bd_shutdown::{ComponentShutdown, ComponentShutdownTrigger};
use bd_time::TimeDurationExt;
use clap::Parser;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use time::ext::NumericalDuration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::MissedTickBehavior;
use tsexport_common::global_initialize;
use tsexport_metrics::clients::logging::LoggingClient;
use tsexport_metrics::config::{ExporterConfig, load_from_file};
use tsexport_metrics::pipeline::exporter::Exporter;
use tsexport_metrics::pipeline::time::RealDurationJitter;
use tsexport_metrics::pipeline::{MetricMetadata, Sample, SeriesLabels};
use tsexport_metrics::protos::labels::{Labels, METRIC_NAME_LABEL};

const LATENCY_BOUNDS: [&str; 4] = ["0.1", "0.5", "1", "+Inf"];
// requests, queue depth, latency buckets, latency sum, latency count
const SERIES_PER_WORKER: u64 = 3 + LATENCY_BOUNDS.len() as u64;

#[derive(Parser)]
struct Options {
  #[arg(short = 'c', long = "config")]
  config: Option<String>,

  #[arg(long = "config-check-and-exit")]
  config_check_and_exit: bool,

  #[arg(long, default_value_t = 10)]
  workers: u64,

  #[arg(long = "scrape-interval-secs", default_value_t = 15)]
  scrape_interval_secs: i64,

  // Simulate a target restart every N scrapes. 0 disables restarts.
  #[arg(long = "restart-every", default_value_t = 20)]
  restart_every: u64,
}

//
// WorkerState
//

#[derive(Default)]
struct WorkerState {
  requests: f64,
  latency_buckets: [f64; LATENCY_BOUNDS.len()],
  latency_sum: f64,
  latency_count: f64,
}

//
// SyntheticTarget
//

// Stands in for a scrape engine: owns the series reference table and produces one scrape worth of
// samples per call.
struct SyntheticTarget {
  series: HashMap<u64, Labels>,
  metadata: HashMap<String, MetricMetadata>,
  state: Mutex<(SmallRng, Vec<WorkerState>, u64)>,
  restart_every: u64,
}

impl SyntheticTarget {
  fn new(workers: u64, restart_every: u64) -> Self {
    let mut series = HashMap::new();
    for worker in 0 .. workers {
      let base = worker * SERIES_PER_WORKER;
      let make = |name: &str, extra: Option<(&str, &str)>| {
        let mut labels = Labels::default();
        labels.insert(METRIC_NAME_LABEL, name);
        labels.insert("job", "tsexport-loadgen");
        labels.insert("instance", "localhost:9090");
        labels.insert("worker", worker.to_string());
        if let Some((name, value)) = extra {
          labels.insert(name, value);
        }
        labels
      };

      series.insert(base, make("loadgen_requests_total", None));
      series.insert(base + 1, make("loadgen_queue_depth", None));
      for (i, bound) in (0_u64 ..).zip(LATENCY_BOUNDS) {
        series.insert(
          base + 2 + i,
          make("loadgen_latency_seconds_bucket", Some(("le", bound))),
        );
      }
      let after_buckets = base + 2 + LATENCY_BOUNDS.len() as u64;
      series.insert(after_buckets, make("loadgen_latency_seconds_sum", None));
      series.insert(after_buckets + 1, make("loadgen_latency_seconds_count", None));
    }

    let metadata = [
      ("loadgen_requests_total", "counter"),
      ("loadgen_queue_depth", "gauge"),
      ("loadgen_latency_seconds", "histogram"),
    ]
    .into_iter()
    .map(|(name, metric_type)| (name.to_string(), MetricMetadata::new(metric_type)))
    .collect();

    Self {
      series,
      metadata,
      state: Mutex::new((
        SmallRng::from_os_rng(),
        (0 .. workers).map(|_| WorkerState::default()).collect(),
        0,
      )),
      restart_every,
    }
  }

  fn scrape(&self) -> Vec<Sample> {
    let timestamp_ms = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .ok()
      .and_then(|d| i64::try_from(d.as_millis()).ok())
      .unwrap_or_default();

    let mut guard = self.state.lock();
    let (rng, workers, scrapes) = &mut *guard;
    *scrapes += 1;
    if self.restart_every > 0 && *scrapes % self.restart_every == 0 {
      log::info!("simulating target restart after {scrapes} scrape(s)");
      workers.iter_mut().for_each(|worker| *worker = WorkerState::default());
    }

    let mut samples = Vec::with_capacity(self.series.len());
    for (worker_index, worker) in (0_u64 ..).zip(workers.iter_mut()) {
      let base = worker_index * SERIES_PER_WORKER;

      worker.requests += f64::from(rng.random_range(0 .. 100_u32));
      samples.push(Sample::new(base, timestamp_ms, worker.requests));
      samples.push(Sample::new(
        base + 1,
        timestamp_ms,
        f64::from(rng.random_range(0 .. 50_u32)),
      ));

      for _ in 0 .. rng.random_range(0 .. 20) {
        let latency = rng.random::<f64>() * 2.0;
        for (bucket, bound) in worker.latency_buckets.iter_mut().zip(LATENCY_BOUNDS) {
          if bound == "+Inf" || bound.parse::<f64>().is_ok_and(|bound| latency <= bound) {
            *bucket += 1.0;
          }
        }
        worker.latency_sum += latency;
        worker.latency_count += 1.0;
      }
      for (i, bucket) in (0_u64 ..).zip(worker.latency_buckets) {
        samples.push(Sample::new(base + 2 + i, timestamp_ms, bucket));
      }
      let after_buckets = base + 2 + LATENCY_BOUNDS.len() as u64;
      samples.push(Sample::new(after_buckets, timestamp_ms, worker.latency_sum));
      samples.push(Sample::new(
        after_buckets + 1,
        timestamp_ms,
        worker.latency_count,
      ));
    }

    samples
  }
}

impl SeriesLabels for SyntheticTarget {
  fn labels_by_reference(&self, series_ref: u64) -> Option<Labels> {
    self.series.get(&series_ref).cloned()
  }
}

async fn scrape_loop(
  exporter: Arc<Exporter>,
  target: Arc<SyntheticTarget>,
  scrape_interval: time::Duration,
  mut shutdown: ComponentShutdown,
) {
  let mut interval = scrape_interval.interval(MissedTickBehavior::Delay);
  loop {
    tokio::select! {
      () = shutdown.cancelled() => break,
      _ = interval.tick() => {
        let samples = target.scrape();
        log::debug!("exporting {} sample(s)", samples.len());
        if let Err(e) = exporter.export(&target.metadata, &samples) {
          log::error!("export failed: {e}");
        }
      }
    }
  }
}

async fn run(options: Options, config: ExporterConfig) -> anyhow::Result<()> {
  let collector = Collector::default();
  let scope = collector.scope("tsexport_loadgen");
  let client = Arc::new(LoggingClient::default());
  let exporter = Exporter::<RealDurationJitter>::new(&config, client.clone(), &scope)?;

  let target = Arc::new(SyntheticTarget::new(
    options.workers,
    options.restart_every,
  ));
  exporter.set_labels_by_reference(target.clone())?;

  let shutdown_trigger = ComponentShutdownTrigger::default();
  let exporter_task = tokio::spawn(exporter.clone().run(shutdown_trigger.make_shutdown()));
  let scrape_task = tokio::spawn(scrape_loop(
    exporter,
    target,
    options.scrape_interval_secs.seconds(),
    shutdown_trigger.make_shutdown(),
  ));

  let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
  let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
  tokio::select! {
    _ = sigint.recv() => log::info!("received SIGINT"),
    _ = sigterm.recv() => log::info!("received SIGTERM"),
  }

  log::info!("shutting down");
  shutdown_trigger.shutdown().await;
  exporter_task.await??;
  scrape_task.await?;

  log::info!(
    "wrote {} batch(es) with {} point(s)",
    client.batches(),
    client.points()
  );
  Ok(())
}

fn main() -> anyhow::Result<()> {
  global_initialize();

  let options = Options::parse();
  let config = match &options.config {
    Some(path) => load_from_file(Path::new(path))
      .with_context(|| format!("failed to load config from {path}"))?,
    None => ExporterConfig::default(),
  };
  config.validate()?;
  log::info!("using config: {config:?}");

  if options.config_check_and_exit {
    log::info!("config is valid");
    return Ok(());
  }

  tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()?
    .block_on(run(options, config))
}
