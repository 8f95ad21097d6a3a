// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./resource_test.rs"]
mod resource_test;

use crate::protos::labels::Labels;
use crate::protos::wire::MonitoredResource;

pub const RESOURCE_TYPE: &str = "prometheus_target";

pub const KEY_LOCATION: &str = "location";
pub const KEY_CLUSTER: &str = "cluster";
pub const KEY_NAMESPACE: &str = "namespace";
pub const KEY_JOB: &str = "job";
pub const KEY_INSTANCE: &str = "instance";

const RESOURCE_LABEL_KEYS: [&str; 5] = [
  KEY_LOCATION,
  KEY_CLUSTER,
  KEY_NAMESPACE,
  KEY_JOB,
  KEY_INSTANCE,
];

// Split the labels of a series into the monitored resource and the remaining metric labels.
// Series without job and instance labels (for example rule evaluation output) cannot be mapped to
// a scrape target and return None. External labels only fill in keys the series does not already
// carry, so a series level label always wins over a global one.
#[must_use]
pub fn resolve(
  series_labels: &Labels,
  external_labels: &Labels,
) -> Option<(MonitoredResource, Labels)> {
  if series_labels.get(KEY_JOB).is_none() || series_labels.get(KEY_INSTANCE).is_none() {
    return None;
  }

  let mut labels = series_labels.clone();
  for (name, value) in external_labels.iter() {
    labels.insert_if_absent(name, value);
  }

  let resource_labels = RESOURCE_LABEL_KEYS
    .iter()
    .map(|key| ((*key).to_string(), labels.remove(key).unwrap_or_default()))
    .collect();

  Some((
    MonitoredResource {
      resource_type: RESOURCE_TYPE.to_string(),
      labels: resource_labels,
    },
    labels,
  ))
}
