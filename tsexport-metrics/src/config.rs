// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use crate::pipeline::classify::DEFAULT_METRIC_TYPE_PREFIX;
use anyhow::{Context, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const DEFAULT_SHARD_COUNT: usize = 1024;
const DEFAULT_SHARD_QUEUE_CAPACITY: usize = 2048;
const DEFAULT_BATCH_SIZE_MAX: usize = 200;
const DEFAULT_BATCH_DELAY_MAX: Duration = Duration::from_secs(5);
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_REFRESH_JITTER: Duration = Duration::from_secs(5 * 60);
const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_GC_WINDOW: Duration = Duration::from_secs(10 * 60);

//
// SeriesCacheConfig
//

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SeriesCacheConfig {
  // How often a cached series descriptor is recomputed, plus or minus refresh_jitter.
  #[serde(with = "humantime_serde")]
  pub refresh_interval: Duration,
  #[serde(with = "humantime_serde")]
  pub refresh_jitter: Duration,
  #[serde(with = "humantime_serde")]
  pub gc_interval: Duration,
  // Series not seen for this long are evicted.
  #[serde(with = "humantime_serde")]
  pub gc_window: Duration,
}

impl Default for SeriesCacheConfig {
  fn default() -> Self {
    Self {
      refresh_interval: DEFAULT_REFRESH_INTERVAL,
      refresh_jitter: DEFAULT_REFRESH_JITTER,
      gc_interval: DEFAULT_GC_INTERVAL,
      gc_window: DEFAULT_GC_WINDOW,
    }
  }
}

//
// ExporterConfig
//

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExporterConfig {
  pub shard_count: usize,
  pub shard_queue_capacity: usize,
  pub batch_size_max: usize,
  // A partial batch is sent once this much time passes without it filling up.
  #[serde(with = "humantime_serde")]
  pub batch_delay_max: Duration,
  pub metric_type_prefix: String,
  // Added to every series that does not already carry the label.
  pub external_labels: BTreeMap<String, String>,
  pub series_cache: SeriesCacheConfig,
}

impl Default for ExporterConfig {
  fn default() -> Self {
    Self {
      shard_count: DEFAULT_SHARD_COUNT,
      shard_queue_capacity: DEFAULT_SHARD_QUEUE_CAPACITY,
      batch_size_max: DEFAULT_BATCH_SIZE_MAX,
      batch_delay_max: DEFAULT_BATCH_DELAY_MAX,
      metric_type_prefix: DEFAULT_METRIC_TYPE_PREFIX.to_string(),
      external_labels: BTreeMap::new(),
      series_cache: SeriesCacheConfig::default(),
    }
  }
}

impl ExporterConfig {
  pub fn validate(&self) -> anyhow::Result<()> {
    if self.shard_count == 0 {
      bail!("shard_count must be > 0");
    }
    if self.shard_queue_capacity == 0 {
      bail!("shard_queue_capacity must be > 0");
    }
    if self.batch_size_max == 0 {
      bail!("batch_size_max must be > 0");
    }
    if self.batch_delay_max.is_zero() {
      bail!("batch_delay_max must be > 0");
    }
    if self.metric_type_prefix.is_empty() || self.metric_type_prefix.ends_with('/') {
      bail!(
        "invalid metric_type_prefix: {:?}",
        self.metric_type_prefix
      );
    }
    if self.series_cache.refresh_interval.is_zero() || self.series_cache.gc_interval.is_zero() {
      bail!("series cache refresh_interval and gc_interval must be > 0");
    }
    Ok(())
  }
}

// Load and validate an exporter config from a YAML file.
pub fn load_from_file(path: &Path) -> anyhow::Result<ExporterConfig> {
  let contents = std::fs::read_to_string(path)
    .with_context(|| format!("unable to read config file {}", path.display()))?;
  let config: ExporterConfig = serde_yaml::from_str(&contents)
    .with_context(|| format!("unable to parse config file {}", path.display()))?;
  config.validate()?;
  Ok(config)
}
