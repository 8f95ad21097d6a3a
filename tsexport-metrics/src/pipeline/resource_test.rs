// tsexport - bitdrift's time-series export pipeline
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::make_labels;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn resource_labels(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
  labels
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect()
}

#[test]
fn extracts_resource_labels() {
  let (resource, metric_labels) = resolve(
    &make_labels(&[
      ("__name__", "requests_total"),
      ("job", "j"),
      ("instance", "i"),
      ("namespace", "ns"),
      ("code", "200"),
    ]),
    &make_labels(&[("location", "us-east1"), ("cluster", "c1")]),
  )
  .unwrap();

  assert_eq!(RESOURCE_TYPE, resource.resource_type);
  assert_eq!(
    resource_labels(&[
      ("cluster", "c1"),
      ("instance", "i"),
      ("job", "j"),
      ("location", "us-east1"),
      ("namespace", "ns"),
    ]),
    resource.labels
  );
  assert_eq!(
    make_labels(&[("__name__", "requests_total"), ("code", "200")]),
    metric_labels
  );
}

#[test]
fn missing_optional_resource_labels_are_empty() {
  let (resource, _) = resolve(
    &make_labels(&[("job", "j"), ("instance", "i")]),
    &Labels::default(),
  )
  .unwrap();
  assert_eq!(
    resource_labels(&[
      ("cluster", ""),
      ("instance", "i"),
      ("job", "j"),
      ("location", ""),
      ("namespace", ""),
    ]),
    resource.labels
  );
}

#[test]
fn series_labels_take_precedence() {
  let (resource, metric_labels) = resolve(
    &make_labels(&[
      ("job", "j"),
      ("instance", "i"),
      ("cluster", "series"),
      ("env", "series"),
    ]),
    &make_labels(&[("cluster", "external"), ("env", "external"), ("team", "t")]),
  )
  .unwrap();
  assert_eq!("series", resource.labels["cluster"]);
  assert_eq!(
    make_labels(&[("env", "series"), ("team", "t")]),
    metric_labels
  );
}

#[test]
fn job_and_instance_required() {
  let external = make_labels(&[("job", "external"), ("instance", "external")]);
  assert!(resolve(&make_labels(&[("instance", "i")]), &external).is_none());
  assert!(resolve(&make_labels(&[("job", "j")]), &external).is_none());
  assert!(resolve(&make_labels(&[("__name__", "foo")]), &external).is_none());
  assert!(resolve(&make_labels(&[("job", "j"), ("instance", "i")]), &external).is_some());
}
