// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::{make_labels, make_metadata};
use pretty_assertions::assert_eq;

fn classify_default(
  name: &str,
  metadata_type: MetadataType,
  suffix: MetricSuffix,
) -> Result<Classification, ClassifyError> {
  classify(DEFAULT_METRIC_TYPE_PREFIX, name, metadata_type, suffix)
}

#[test]
fn split_suffix() {
  assert_eq!(("foo", MetricSuffix::Bucket), split_metric_suffix("foo_bucket"));
  assert_eq!(("foo", MetricSuffix::Count), split_metric_suffix("foo_count"));
  assert_eq!(("foo", MetricSuffix::Sum), split_metric_suffix("foo_sum"));
  assert_eq!(("foo_total", MetricSuffix::None), split_metric_suffix("foo_total"));
  assert_eq!(("_sum", MetricSuffix::None), split_metric_suffix("_sum"));
  assert_eq!(
    ("foo_sum", MetricSuffix::Count),
    split_metric_suffix("foo_sum_count")
  );
}

#[test]
fn metadata_type_parsing() {
  assert_eq!(Ok(MetadataType::Counter), "counter".parse());
  assert_eq!(Ok(MetadataType::Gauge), "gauge".parse());
  assert_eq!(Ok(MetadataType::Unknown), "unknown".parse());
  assert_eq!(Ok(MetadataType::Unknown), "untyped".parse());
  assert_eq!(Ok(MetadataType::Summary), "summary".parse());
  assert_eq!(Ok(MetadataType::Histogram), "histogram".parse());
  assert_eq!(
    Err(ClassifyError::UnexpectedMetricType("gaugehistogram".to_string())),
    "gaugehistogram".parse::<MetadataType>()
  );
}

#[test]
fn simple_types() {
  assert_eq!(
    Classification {
      metric_type: "prometheus.googleapis.com/requests_total/counter".to_string(),
      metric_kind: MetricKind::Cumulative,
      value_type: ValueType::Double,
      base_name: "requests_total".to_string(),
    },
    classify_default("requests_total", MetadataType::Counter, MetricSuffix::None).unwrap()
  );

  let gauge = classify_default("temperature", MetadataType::Gauge, MetricSuffix::None).unwrap();
  assert_eq!(MetricKind::Gauge, gauge.metric_kind);
  assert_eq!(ValueType::Double, gauge.value_type);
  assert_eq!(
    "prometheus.googleapis.com/temperature/gauge",
    gauge.metric_type
  );

  let unknown = classify_default("things", MetadataType::Unknown, MetricSuffix::None).unwrap();
  assert_eq!(MetricKind::Gauge, unknown.metric_kind);
  assert_eq!(ValueType::Double, unknown.value_type);
}

#[test]
fn summary_components() {
  let sum = classify_default("rpc_seconds_sum", MetadataType::Summary, MetricSuffix::Sum).unwrap();
  assert_eq!(MetricKind::Gauge, sum.metric_kind);
  assert_eq!(ValueType::Double, sum.value_type);
  assert_eq!("rpc_seconds", sum.base_name);

  let count =
    classify_default("rpc_seconds_count", MetadataType::Summary, MetricSuffix::Count).unwrap();
  assert_eq!(MetricKind::Cumulative, count.metric_kind);
  assert_eq!(ValueType::Int64, count.value_type);

  let quantile =
    classify_default("rpc_seconds", MetadataType::Summary, MetricSuffix::None).unwrap();
  assert_eq!(MetricKind::Gauge, quantile.metric_kind);
  assert_eq!(ValueType::Double, quantile.value_type);

  assert_ne!(sum.metric_type, count.metric_type);
  assert_ne!(sum.metric_type, quantile.metric_type);

  assert!(matches!(
    classify_default("rpc_seconds_bucket", MetadataType::Summary, MetricSuffix::Bucket),
    Err(ClassifyError::UnexpectedSuffix { .. })
  ));
}

#[test]
fn histogram_suffix_round_trip() {
  let bucket =
    classify_default("latency_bucket", MetadataType::Histogram, MetricSuffix::Bucket).unwrap();
  let bare = classify_default("latency", MetadataType::Histogram, MetricSuffix::None).unwrap();
  let count =
    classify_default("latency_count", MetadataType::Histogram, MetricSuffix::Count).unwrap();
  assert_eq!(bucket, bare);
  assert_eq!(bucket, count);
  assert_eq!(
    "prometheus.googleapis.com/latency/histogram",
    bucket.metric_type
  );
  assert_eq!(ValueType::Distribution, bucket.value_type);
  assert_eq!(MetricKind::Cumulative, bucket.metric_kind);

  let labels = metric_labels(
    make_labels(&[("__name__", "latency_bucket"), ("le", "0.5"), ("path", "/")]),
    MetadataType::Histogram,
  );
  assert_eq!(make_labels(&[("path", "/")]), labels);
}

#[test]
fn le_kept_for_non_histograms() {
  let labels = metric_labels(
    make_labels(&[("__name__", "foo"), ("le", "0.5")]),
    MetadataType::Gauge,
  );
  assert_eq!(make_labels(&[("le", "0.5")]), labels);
}

#[test]
fn custom_prefix() {
  let classification = classify(
    "example.com/prom",
    "up",
    MetadataType::Gauge,
    MetricSuffix::None,
  )
  .unwrap();
  assert_eq!("example.com/prom/up/gauge", classification.metric_type);
}

#[test]
fn metadata_lookup_fallback() {
  let metadata = make_metadata(&[
    ("latency", "histogram"),
    ("rpc", "summary"),
    ("jobs_count", "gauge"),
    ("requests", "counter"),
    ("weird", "stateset"),
  ]);

  assert_eq!(
    Ok(Some((MetadataType::Histogram, MetricSuffix::Bucket))),
    lookup_metadata("latency_bucket", &metadata)
  );
  assert_eq!(
    Ok(Some((MetadataType::Histogram, MetricSuffix::None))),
    lookup_metadata("latency", &metadata)
  );
  assert_eq!(
    Ok(Some((MetadataType::Summary, MetricSuffix::Sum))),
    lookup_metadata("rpc_sum", &metadata)
  );

  // An exact match wins over the suffix split.
  assert_eq!(
    Ok(Some((MetadataType::Gauge, MetricSuffix::None))),
    lookup_metadata("jobs_count", &metadata)
  );

  // The fallback does not apply to simple families.
  assert_eq!(Ok(None), lookup_metadata("requests_count", &metadata));
  assert_eq!(Ok(None), lookup_metadata("missing", &metadata));
  assert_eq!(Ok(None), lookup_metadata("missing_sum", &metadata));

  assert_eq!(
    Err(ClassifyError::UnexpectedMetricType("stateset".to_string())),
    lookup_metadata("weird", &metadata)
  );
}
