// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./shard_test.rs"]
mod shard_test;

use super::batch::Batch;
use crate::protos::wire::TimeSeriesPoint;
use bd_server_stats::stats::Scope;
use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

//
// QueueEntry
//

#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
  pub series_hash: u64,
  pub point: TimeSeriesPoint,
}

//
// FillResult
//

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillResult {
  // The shard had a batch in flight and was not touched.
  pub pending: bool,
  pub taken: usize,
  pub remaining: usize,
  // Filling stopped because the head of the queue is a series already in the batch.
  pub collision: bool,
}

//
// ShardLease
//

// Held by a batch for every shard it took points from. While the lease is alive the shard is
// pending and will not contribute to any other batch, which keeps points for a series in order.
pub struct ShardLease {
  shards: Arc<ShardArray>,
  index: usize,
}

impl ShardLease {
  #[must_use]
  pub const fn index(&self) -> usize {
    self.index
  }
}

impl Drop for ShardLease {
  fn drop(&mut self) {
    log::trace!("releasing shard {}", self.index);
    self.shards.shards[self.index]
      .pending
      .store(false, Ordering::Release);
  }
}

struct Shard {
  queue: Mutex<VecDeque<QueueEntry>>,
  pending: AtomicBool,
}

struct Stats {
  samples_dropped: IntCounter,
  queued: IntGauge,
}

//
// ShardArray
//

// A fixed set of bounded FIFO queues. A series always maps to the same shard so its points are
// queued in order.
pub struct ShardArray {
  shards: Vec<Shard>,
  capacity: usize,
  stats: Stats,
}

impl ShardArray {
  pub fn new(scope: &Scope, shard_count: usize, capacity: usize) -> Arc<Self> {
    Arc::new(Self {
      shards: (0 .. shard_count)
        .map(|_| Shard {
          queue: Mutex::new(VecDeque::new()),
          pending: AtomicBool::new(false),
        })
        .collect(),
      capacity,
      stats: Stats {
        samples_dropped: scope.counter("samples_dropped"),
        queued: scope.gauge("queued"),
      },
    })
  }

  #[allow(clippy::cast_possible_truncation)]
  const fn shard_index(series_hash: u64, shard_count: usize) -> usize {
    (series_hash % shard_count as u64) as usize
  }

  #[must_use]
  pub fn shard_count(&self) -> usize {
    self.shards.len()
  }

  // Queue a point without blocking. If the shard is full the point is dropped and false is
  // returned.
  pub fn enqueue(&self, entry: QueueEntry) -> bool {
    let index = Self::shard_index(entry.series_hash, self.shards.len());
    let mut queue = self.shards[index].queue.lock();
    if queue.len() >= self.capacity {
      drop(queue);
      log::trace!("shard {index} full, dropping point for {}", entry.series_hash);
      self.stats.samples_dropped.inc();
      return false;
    }
    queue.push_back(entry);
    self.stats.queued.inc();
    true
  }

  // Move points from the front of a shard into the batch until the batch is full or the next point
  // belongs to a series that is already in the batch. If anything was taken the shard becomes
  // pending and the batch holds its lease.
  pub fn fill(self: &Arc<Self>, index: usize, batch: &mut Batch) -> FillResult {
    let shard = &self.shards[index];
    if shard.pending.load(Ordering::Acquire) {
      return FillResult {
        pending: true,
        ..Default::default()
      };
    }

    let mut queue = shard.queue.lock();
    let mut taken = 0;
    let mut collision = false;
    while let Some(entry) = queue.pop_front() {
      match batch.try_add(entry) {
        Ok(()) => taken += 1,
        Err(entry) => {
          collision = !batch.is_full();
          queue.push_front(entry);
          break;
        },
      }
    }
    let remaining = queue.len();
    drop(queue);

    if taken > 0 {
      self.stats.queued.sub(i64::try_from(taken).unwrap_or(i64::MAX));
      shard.pending.store(true, Ordering::Release);
      batch.add_lease(ShardLease {
        shards: self.clone(),
        index,
      });
    }

    FillResult {
      pending: false,
      taken,
      remaining,
      collision,
    }
  }

  #[must_use]
  pub fn len(&self, index: usize) -> usize {
    self.shards[index].queue.lock().len()
  }

  #[must_use]
  pub fn is_pending(&self, index: usize) -> bool {
    self.shards[index].pending.load(Ordering::Acquire)
  }

  #[cfg(test)]
  #[must_use]
  pub fn samples_dropped(&self) -> u64 {
    self.stats.samples_dropped.get()
  }

  // Total points queued across all shards.
  #[must_use]
  pub fn total_len(&self) -> usize {
    self.shards.iter().map(|shard| shard.queue.lock().len()).sum()
  }
}
