// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use pretty_assertions::assert_eq;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  file.write_all(contents.as_bytes()).unwrap();
  file
}

#[test]
fn empty_config_uses_defaults() {
  let config: ExporterConfig = serde_yaml::from_str("{}").unwrap();
  assert_eq!(ExporterConfig::default(), config);
  assert_eq!(1024, config.shard_count);
  assert_eq!(2048, config.shard_queue_capacity);
  assert_eq!(200, config.batch_size_max);
  assert_eq!(Duration::from_secs(5), config.batch_delay_max);
  assert_eq!("prometheus.googleapis.com", config.metric_type_prefix);
  assert_eq!(Duration::from_secs(600), config.series_cache.refresh_interval);
  assert_eq!(Duration::from_secs(300), config.series_cache.refresh_jitter);
  config.validate().unwrap();
}

#[test]
fn load_full_config() {
  let file = write_config(
    r"
shard_count: 16
shard_queue_capacity: 100
batch_size_max: 50
batch_delay_max: 500ms
metric_type_prefix: example.com/prom
external_labels:
  location: us-east1
  cluster: prod
series_cache:
  refresh_interval: 1m
  gc_window: 2h
",
  );

  let config = load_from_file(file.path()).unwrap();
  assert_eq!(
    ExporterConfig {
      shard_count: 16,
      shard_queue_capacity: 100,
      batch_size_max: 50,
      batch_delay_max: Duration::from_millis(500),
      metric_type_prefix: "example.com/prom".to_string(),
      external_labels: [("location", "us-east1"), ("cluster", "prod")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
      series_cache: SeriesCacheConfig {
        refresh_interval: Duration::from_secs(60),
        gc_window: Duration::from_secs(7200),
        ..Default::default()
      },
    },
    config
  );
}

#[test]
fn invalid_configs() {
  for contents in [
    "shard_count: 0",
    "shard_queue_capacity: 0",
    "batch_size_max: 0",
    "batch_delay_max: 0s",
    "metric_type_prefix: ''",
    "metric_type_prefix: example.com/",
    "series_cache: {gc_interval: 0s}",
  ] {
    let file = write_config(contents);
    assert!(load_from_file(file.path()).is_err(), "{contents}");
  }
}

#[test]
fn unknown_fields_rejected() {
  let file = write_config("shard_cuont: 4");
  let error = load_from_file(file.path()).unwrap_err();
  assert!(format!("{error:#}").contains("shard_cuont"), "{error:#}");
}

#[test]
fn missing_file() {
  assert!(load_from_file(Path::new("/does/not/exist.yaml")).is_err());
}
