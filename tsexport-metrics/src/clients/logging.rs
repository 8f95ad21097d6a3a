// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./logging_test.rs"]
mod logging_test;

use super::time_series::{ClientError, Result, TimeSeriesClient};
use crate::protos::wire::TimeSeriesPoint;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

//
// LoggingClient
//

// A client that writes every batch to the log instead of a backend. Used for local runs.
#[derive(Default)]
pub struct LoggingClient {
  batches: AtomicU64,
  points: AtomicU64,
}

impl LoggingClient {
  #[must_use]
  pub fn batches(&self) -> u64 {
    self.batches.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn points(&self) -> u64 {
    self.points.load(Ordering::Relaxed)
  }
}

#[async_trait]
impl TimeSeriesClient for LoggingClient {
  async fn create_time_series(&self, points: Vec<TimeSeriesPoint>) -> Result<()> {
    let json =
      serde_json::to_string(&points).map_err(|e| ClientError::Rejected(e.to_string()))?;
    log::debug!("create_time_series: {json}");

    let batches = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
    let total_points = self.points.fetch_add(points.len() as u64, Ordering::Relaxed)
      + points.len() as u64;
    log::info!(
      "wrote batch of {} point(s) ({batches} batch(es), {total_points} point(s) total)",
      points.len()
    );
    Ok(())
  }
}
