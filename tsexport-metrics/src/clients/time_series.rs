// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::protos::wire::TimeSeriesPoint;
use async_trait::async_trait;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
  #[error("request rejected: {0}")]
  Rejected(String),
  #[error("backend unavailable: {0}")]
  Unavailable(String),
  #[error("request timeout")]
  Timeout,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// The backend write seam. Implementations own transport, auth and retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeSeriesClient: Send + Sync {
  async fn create_time_series(&self, points: Vec<TimeSeriesPoint>) -> Result<()>;
}
