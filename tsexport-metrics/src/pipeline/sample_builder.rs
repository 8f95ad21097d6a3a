// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./sample_builder_test.rs"]
mod sample_builder_test;

use super::classify::{MetadataType, MetricSuffix};
use super::series_cache::{PopulatedSeries, SeriesCache};
use super::time::DurationJitter;
use super::{ExportError, MetadataLookup, Sample};
use crate::protos::wire::{
  Distribution,
  Interval,
  MetricKind,
  PointValue,
  TimeSeriesPoint,
  ValueType,
};
use std::sync::Arc;
use tsexport_common::LossyFloatToInt;

// Prometheus marks series that disappeared from a target with this NaN payload.
const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

fn is_stale_marker(value: f64) -> bool {
  value.to_bits() == STALE_NAN_BITS
}

// The output of a single build step: an optional point with its series hash, and the samples that
// have not been consumed yet.
pub type BuildResult<'s> = Result<(Option<(TimeSeriesPoint, u64)>, &'s [Sample]), ExportError>;

//
// SampleBuilder
//

// Turns raw samples into backend points, one series (or one histogram) at a time.
pub struct SampleBuilder<'a, J: DurationJitter> {
  cache: &'a SeriesCache<J>,
}

impl<'a, J: DurationJitter> SampleBuilder<'a, J> {
  #[must_use]
  pub const fn new(cache: &'a SeriesCache<J>) -> Self {
    Self { cache }
  }

  // Consume one or more samples from the front of the slice. A None point means the consumed
  // samples did not produce output, either because the series is not exportable or because a
  // cumulative series was seen for the first time.
  pub fn next<'s>(&self, metadata: &dyn MetadataLookup, samples: &'s [Sample]) -> BuildResult<'s> {
    let Some((sample, tail)) = samples.split_first() else {
      return Ok((None, samples));
    };
    let Some(series) = self.cache.get(sample.series_ref, metadata)? else {
      return Ok((None, tail));
    };
    // Histogram components are consumed as a group, stale or not.
    if series.metadata_type == MetadataType::Histogram {
      return self.next_histogram(metadata, &series, samples);
    }
    if is_stale_marker(sample.value) {
      log::trace!("skipping stale marker for {}", series.metric.metric_type);
      return Ok((None, tail));
    }

    let (interval, value) = match series.metric_kind {
      MetricKind::Gauge => (Interval::gauge(sample.timestamp_ms), sample.value),
      MetricKind::Cumulative => {
        let Some((start_ms, value)) =
          self
            .cache
            .get_reset_adjusted(sample.series_ref, sample.timestamp_ms, sample.value)
        else {
          return Ok((None, tail));
        };
        (Interval::cumulative(start_ms, sample.timestamp_ms), value)
      },
    };

    let value = match series.value_type {
      ValueType::Double => PointValue::Double(value),
      ValueType::Int64 => PointValue::Int64(value.lossy_to_i64()),
      ValueType::Distribution => {
        log::debug!(
          "unexpected distribution value for {}",
          series.metric.metric_type
        );
        return Ok((None, tail));
      },
    };

    Ok((Some((make_point(&series, interval, value), series.series_hash)), tail))
  }

  // Histograms arrive as one sample per bucket plus _sum and _count, all with the same timestamp.
  // Consume consecutive samples of the same histogram and assemble them into a single distribution.
  fn next_histogram<'s>(
    &self,
    metadata: &dyn MetadataLookup,
    series: &Arc<PopulatedSeries>,
    samples: &'s [Sample],
  ) -> BuildResult<'s> {
    let timestamp_ms = samples[0].timestamp_ms;
    let mut buckets: Vec<(f64, f64)> = Vec::new();
    let mut sum = None;
    let mut count = None;
    let mut incomplete = false;
    let mut consumed = 0;

    for (i, sample) in samples.iter().enumerate() {
      if sample.timestamp_ms != timestamp_ms {
        break;
      }
      let component = if i == 0 {
        series.clone()
      } else {
        match self.cache.get(sample.series_ref, metadata)? {
          Some(component) if component.series_hash == series.series_hash => component,
          _ => break,
        }
      };
      consumed = i + 1;
      if is_stale_marker(sample.value) {
        incomplete = true;
        continue;
      }

      let Some((start_ms, value)) =
        self
          .cache
          .get_reset_adjusted(sample.series_ref, sample.timestamp_ms, sample.value)
      else {
        incomplete = true;
        continue;
      };
      match component.suffix {
        MetricSuffix::Bucket => {
          if let Some(bound) = component.bucket_upper_bound {
            buckets.push((bound, value));
          }
        },
        MetricSuffix::Sum => sum = Some(value),
        MetricSuffix::Count => count = Some((start_ms, value)),
        MetricSuffix::None => incomplete = true,
      }
    }

    let tail = &samples[consumed ..];
    if incomplete {
      // A component is new or stale, so the start of the distribution is not known.
      return Ok((None, tail));
    }
    let Some((start_ms, count)) = count else {
      log::debug!("histogram {} has no _count", series.metric.metric_type);
      return Ok((None, tail));
    };

    let distribution = build_distribution(buckets, sum.unwrap_or_default(), count);
    Ok((
      Some((
        make_point(
          series,
          Interval::cumulative(start_ms, timestamp_ms),
          PointValue::Distribution(distribution),
        ),
        series.series_hash,
      )),
      tail,
    ))
  }
}

fn make_point(series: &PopulatedSeries, interval: Interval, value: PointValue) -> TimeSeriesPoint {
  TimeSeriesPoint {
    resource: series.resource.clone(),
    metric: series.metric.clone(),
    metric_kind: series.metric_kind,
    value_type: series.value_type,
    interval,
    value,
  }
}

// Convert cumulative (upper bound, count) buckets into an explicit bucket distribution. The sum of
// squared deviation is estimated by placing every observation of a bucket at a single point: the
// upper bound for the first bucket, the midpoint for interior buckets and the lower bound for the
// overflow bucket.
fn build_distribution(mut buckets: Vec<(f64, f64)>, sum: f64, count: f64) -> Distribution {
  buckets.sort_by(|a, b| a.0.total_cmp(&b.0));
  let mean = if count > 0.0 { sum / count } else { 0.0 };

  let mut bounds = Vec::with_capacity(buckets.len());
  let mut bucket_counts = Vec::with_capacity(buckets.len() + 1);
  let mut sum_of_squared_deviation = 0.0;
  let mut previous_bound = None;
  let mut previous_cumulative = 0.0;
  let mut has_overflow = false;

  for (bound, cumulative) in buckets {
    let bucket_count = (cumulative - previous_cumulative).max(0.0);
    previous_cumulative = cumulative;

    let representative = match (bound.is_finite(), previous_bound) {
      (true, None) => bound,
      (true, Some(lower)) => (lower + bound) / 2.0,
      (false, None) => mean,
      (false, Some(lower)) => lower,
    };
    sum_of_squared_deviation += bucket_count * (representative - mean).powi(2);
    bucket_counts.push(bucket_count.lossy_to_i64());

    if bound.is_finite() {
      bounds.push(bound);
      previous_bound = Some(bound);
    } else {
      has_overflow = true;
      break;
    }
  }

  if !has_overflow {
    let overflow = (count - previous_cumulative).max(0.0);
    if let Some(lower) = previous_bound {
      sum_of_squared_deviation += overflow * (lower - mean).powi(2);
    }
    bucket_counts.push(overflow.lossy_to_i64());
  }

  Distribution {
    count: count.lossy_to_i64(),
    mean,
    sum_of_squared_deviation,
    bounds,
    bucket_counts,
  }
}
