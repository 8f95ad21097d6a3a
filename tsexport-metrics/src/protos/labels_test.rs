// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;

#[test]
fn sorted_regardless_of_input_order() {
  let a: Labels = [("b", "2"), ("a", "1"), ("__name__", "foo")]
    .into_iter()
    .collect();
  let b: Labels = [("a", "1"), ("__name__", "foo"), ("b", "2")]
    .into_iter()
    .collect();
  assert_eq!(a, b);
  assert_eq!(
    vec!["__name__", "a", "b"],
    a.iter().map(|(name, _)| name).collect::<Vec<_>>()
  );
  assert_eq!(Some("foo"), a.metric_name());
  assert_eq!(r#"{__name__="foo",a="1",b="2"}"#, a.to_string());
}

#[test]
fn insert_if_absent() {
  let mut labels: Labels = [("job", "j")].into_iter().collect();
  assert!(!labels.insert_if_absent("job", "other"));
  assert!(labels.insert_if_absent("cluster", "c"));
  assert_eq!(Some("j"), labels.get("job"));
  assert_eq!(Some("c"), labels.get("cluster"));
  assert_eq!(2, labels.len());
}
