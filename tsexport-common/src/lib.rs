// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use bd_log::SwapLogger;
use bd_panic::PanicType;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

pub fn global_initialize() {
  // The panic handler must be installed before the logger. A log line with thread ids emitted
  // during ctor will otherwise panic.
  bd_panic::default(PanicType::ForceAbort);

  SwapLogger::initialize();

  // Buffered points are lost on abort, so make sure the panic itself at least reaches the logs on
  // release builds.
  #[cfg(not(debug_assertions))]
  unsafe {
    std::env::set_var("LOG_PANIC", "true");
  }

  log::debug!("global initialization complete");
}

pub trait LossyFloatToInt {
  fn lossy_to_i64(self) -> i64;
}

impl LossyFloatToInt for f64 {
  #[allow(clippy::cast_possible_truncation)]
  fn lossy_to_i64(self) -> i64 {
    self.round() as i64
  }
}
