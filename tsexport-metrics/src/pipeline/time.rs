// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./time_test.rs"]
mod time_test;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use time::Duration;

//
// DurationJitter
//

pub trait DurationJitter: Send + Sync + 'static {
  // Jitter from input - jitter ..= input + jitter, clamped at zero.
  fn plus_minus_jitter_duration(input: Duration, jitter: Duration) -> Duration;
}

fn whole_millis(input: Duration) -> i64 {
  i64::try_from(input.whole_milliseconds()).unwrap_or(i64::MAX)
}

//
// RealDurationJitter
//

pub struct RealDurationJitter {}

impl RealDurationJitter {
  fn jitter_worker(min_millis: i64, max_millis: i64) -> Duration {
    thread_local! {
      static RANDOM: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
    }

    let jittered_as_millis =
      RANDOM.with(|random| random.borrow_mut().random_range(min_millis ..= max_millis));
    Duration::milliseconds(jittered_as_millis)
  }
}

impl DurationJitter for RealDurationJitter {
  fn plus_minus_jitter_duration(input: Duration, jitter: Duration) -> Duration {
    let input = whole_millis(input);
    let jitter = whole_millis(jitter.abs());
    Self::jitter_worker(
      input.saturating_sub(jitter).max(0),
      input.saturating_add(jitter).max(0),
    )
  }
}

//
// TestDurationJitter
//

pub struct TestDurationJitter {}

impl DurationJitter for TestDurationJitter {
  fn plus_minus_jitter_duration(input: Duration, _jitter: Duration) -> Duration {
    input
  }
}
