// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./classify_test.rs"]
mod classify_test;

use super::MetadataLookup;
use crate::protos::labels::{Labels, METRIC_NAME_LABEL};
use crate::protos::wire::{MetricKind, ValueType};
use std::str::FromStr;

pub const DEFAULT_METRIC_TYPE_PREFIX: &str = "prometheus.googleapis.com";

// The backend rejects series with more metric labels than this.
pub const MAX_LABEL_COUNT: usize = 10;

pub const BUCKET_BOUND_LABEL: &str = "le";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ClassifyError {
  #[error("unexpected metric type: {0}")]
  UnexpectedMetricType(String),
  #[error("unexpected suffix {suffix:?} for {metadata_type:?} metric {name}")]
  UnexpectedSuffix {
    name: String,
    metadata_type: MetadataType,
    suffix: MetricSuffix,
  },
}

//
// MetadataType
//

// Metric family types as reported by scrape metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataType {
  Counter,
  Gauge,
  Unknown,
  Summary,
  Histogram,
}

impl FromStr for MetadataType {
  type Err = ClassifyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "counter" => Ok(Self::Counter),
      "gauge" => Ok(Self::Gauge),
      "unknown" | "untyped" => Ok(Self::Unknown),
      "summary" => Ok(Self::Summary),
      "histogram" => Ok(Self::Histogram),
      other => Err(ClassifyError::UnexpectedMetricType(other.to_string())),
    }
  }
}

//
// MetricSuffix
//

// Which sub-series of a summary or histogram family a series represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricSuffix {
  None,
  Sum,
  Count,
  Bucket,
}

impl MetricSuffix {
  // Ordered longest first so that the split is a longest match.
  const SPLITTABLE: [Self; 3] = [Self::Bucket, Self::Count, Self::Sum];

  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::None => "",
      Self::Sum => "_sum",
      Self::Count => "_count",
      Self::Bucket => "_bucket",
    }
  }
}

// Split a series name into a family base name and a summary/histogram suffix.
#[must_use]
pub fn split_metric_suffix(name: &str) -> (&str, MetricSuffix) {
  MetricSuffix::SPLITTABLE
    .iter()
    .find_map(|suffix| {
      name
        .strip_suffix(suffix.as_str())
        .filter(|base| !base.is_empty())
        .map(|base| (base, *suffix))
    })
    .unwrap_or((name, MetricSuffix::None))
}

// Find the metadata for a series name. The full name is tried first. Histogram and summary
// sub-series are not reported under their own name, so on a miss the suffix is split off and the
// family base name is tried. The fallback only applies to families that actually have sub-series.
pub fn lookup_metadata(
  name: &str,
  lookup: &dyn MetadataLookup,
) -> Result<Option<(MetadataType, MetricSuffix)>, ClassifyError> {
  if let Some(metadata) = lookup.get(name) {
    return Ok(Some((metadata.metric_type.parse()?, MetricSuffix::None)));
  }

  let (base_name, suffix) = split_metric_suffix(name);
  if suffix == MetricSuffix::None {
    return Ok(None);
  }
  let Some(metadata) = lookup.get(base_name) else {
    return Ok(None);
  };
  match metadata.metric_type.parse::<MetadataType>()? {
    metadata_type @ (MetadataType::Summary | MetadataType::Histogram) => {
      Ok(Some((metadata_type, suffix)))
    },
    MetadataType::Counter | MetadataType::Gauge | MetadataType::Unknown => {
      log::trace!("ignoring {metadata:?} for base name {base_name} of {name}");
      Ok(None)
    },
  }
}

//
// Classification
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
  pub metric_type: String,
  pub metric_kind: MetricKind,
  pub value_type: ValueType,
  pub base_name: String,
}

fn make_metric_type(prefix: &str, name: &str, kind: &str) -> String {
  format!("{prefix}/{name}/{kind}")
}

// Map a series to its wire metric descriptor.
pub fn classify(
  prefix: &str,
  metric_name: &str,
  metadata_type: MetadataType,
  suffix: MetricSuffix,
) -> Result<Classification, ClassifyError> {
  let base_name = metric_name
    .strip_suffix(suffix.as_str())
    .unwrap_or(metric_name);
  let simple = |kind: &str, metric_kind: MetricKind| Classification {
    metric_type: make_metric_type(prefix, metric_name, kind),
    metric_kind,
    value_type: ValueType::Double,
    base_name: metric_name.to_string(),
  };
  let complex = |kind: &str, metric_kind: MetricKind, value_type: ValueType| Classification {
    metric_type: make_metric_type(prefix, base_name, kind),
    metric_kind,
    value_type,
    base_name: base_name.to_string(),
  };

  Ok(match metadata_type {
    MetadataType::Counter => simple("counter", MetricKind::Cumulative),
    MetadataType::Gauge => simple("gauge", MetricKind::Gauge),
    MetadataType::Unknown => simple("unknown", MetricKind::Gauge),
    // Summary sums are gauges on the backend. Existing metric types depend on this kind.
    MetadataType::Summary => match suffix {
      MetricSuffix::Sum => complex("summary:sum", MetricKind::Gauge, ValueType::Double),
      MetricSuffix::Count => complex("summary:count", MetricKind::Cumulative, ValueType::Int64),
      MetricSuffix::None => complex("summary", MetricKind::Gauge, ValueType::Double),
      MetricSuffix::Bucket => {
        return Err(ClassifyError::UnexpectedSuffix {
          name: metric_name.to_string(),
          metadata_type,
          suffix,
        });
      },
    },
    MetadataType::Histogram => complex(
      "histogram",
      MetricKind::Cumulative,
      ValueType::Distribution,
    ),
  })
}

// Compute the metric labels from the non-resource labels of a series. The name becomes the metric
// type and histogram bucket bounds are carried in the distribution value.
#[must_use]
pub fn metric_labels(mut labels: Labels, metadata_type: MetadataType) -> Labels {
  labels.remove(METRIC_NAME_LABEL);
  if metadata_type == MetadataType::Histogram {
    labels.remove(BUCKET_BOUND_LABEL);
  }
  labels
}
