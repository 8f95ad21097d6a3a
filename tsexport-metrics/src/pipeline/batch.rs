// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./batch_test.rs"]
mod batch_test;

use super::shard::{QueueEntry, ShardLease};
use crate::protos::wire::TimeSeriesPoint;
use std::collections::HashSet;

//
// Batch
//

// Points collected for a single backend write. The backend rejects a write that contains the same
// series twice, so a batch never holds two points with the same series hash.
pub struct Batch {
  points: Vec<TimeSeriesPoint>,
  seen: HashSet<u64, ahash::RandomState>,
  leases: Vec<ShardLease>,
  max_size: usize,
}

impl Batch {
  #[must_use]
  pub fn new(max_size: usize) -> Self {
    Self {
      points: Vec::with_capacity(max_size),
      seen: HashSet::default(),
      leases: Vec::new(),
      max_size,
    }
  }

  // Add an entry, handing it back if the batch is full or already contains the series.
  pub fn try_add(&mut self, entry: QueueEntry) -> Result<(), QueueEntry> {
    if self.is_full() || !self.seen.insert(entry.series_hash) {
      return Err(entry);
    }
    self.points.push(entry.point);
    Ok(())
  }

  #[must_use]
  pub fn contains(&self, series_hash: u64) -> bool {
    self.seen.contains(&series_hash)
  }

  pub fn add_lease(&mut self, lease: ShardLease) {
    self.leases.push(lease);
  }

  #[must_use]
  pub fn is_full(&self) -> bool {
    self.points.len() >= self.max_size
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.points.len()
  }

  // The points to write and the shard leases to release once the write completes.
  #[must_use]
  pub fn into_parts(self) -> (Vec<TimeSeriesPoint>, Vec<ShardLease>) {
    (self.points, self.leases)
  }
}
