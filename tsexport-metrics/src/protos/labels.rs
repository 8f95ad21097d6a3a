// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./labels_test.rs"]
mod labels_test;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::Display;

pub const METRIC_NAME_LABEL: &str = "__name__";

//
// Labels
//

// The label set identifying a series as handed to us by the scrape engine. Labels are kept sorted
// by name so that iteration order, equality, and hashing are stable regardless of input order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
  #[must_use]
  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  // The metric name carried in the __name__ label.
  #[must_use]
  pub fn metric_name(&self) -> Option<&str> {
    self.get(METRIC_NAME_LABEL)
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
    self.0.insert(name.into(), value.into())
  }

  // Insert the label only if the name is not already present. Returns whether it was inserted.
  pub fn insert_if_absent(&mut self, name: &str, value: &str) -> bool {
    match self.0.entry(name.to_string()) {
      Entry::Occupied(_) => false,
      Entry::Vacant(v) => {
        v.insert(value.to_string());
        true
      },
    }
  }

  pub fn remove(&mut self, name: &str) -> Option<String> {
    self.0.remove(name)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.0.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  #[must_use]
  pub fn into_inner(self) -> BTreeMap<String, String> {
    self.0
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

impl From<BTreeMap<String, String>> for Labels {
  fn from(labels: BTreeMap<String, String>) -> Self {
    Self(labels)
  }
}

impl Display for Labels {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{{")?;
    for (i, (name, value)) in self.iter().enumerate() {
      if i > 0 {
        write!(f, ",")?;
      }
      write!(f, "{name}={value:?}")?;
    }
    write!(f, "}}")
  }
}
