// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use assert2::check;
use metrique_rollup::{
    bucket::Buckets, kind::MetricDescriptor, tags::TagSet, window::TimeWindowReporter,
};
use metrique_rollup_writer::EntrySinkReporter;
use metrique_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
use metrique_writer::test_util::{TestEntry, test_entry_sink};

const WINDOW_MILLIS: u64 = 10_000;

fn at(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

fn tags(operation: &str) -> TagSet {
    TagSet::builder()
        .tag("operation", operation)
        .tag("status", "ok")
        .build()
}

fn entry_for<'e>(entries: &'e [TestEntry], operation: &str, metric: &str) -> &'e TestEntry {
    entries
        .iter()
        .find(|e| e.values["operation"] == operation && e.metrics.keys().any(|k| k.starts_with(metric)))
        .unwrap()
}

#[test]
fn report_cycles_become_entries() {
    let clock = ManuallyAdvancedTimeSource::at_time(at(0));
    let output = test_entry_sink();
    let reporter = TimeWindowReporter::builder()
        .window(Duration::from_millis(WINDOW_MILLIS))
        .time_source(TimeSource::custom(clock.clone()))
        .sink(EntrySinkReporter::new(output.sink))
        .build()
        .unwrap();

    let requests = MetricDescriptor::counter("requests");
    let latency = MetricDescriptor::timer("latency");
    reporter.emit(&requests, 1_000, 2, &tags("GetItem"));
    reporter.emit(&requests, 2_500, 3, &tags("GetItem"));
    reporter.emit(&requests, 3_000, 1, &tags("PutItem"));
    reporter.emit(&latency, 4_000, 7_000, &tags("GetItem"));
    reporter.emit(&latency, 4_200, 3_000, &tags("GetItem"));

    clock.update_time(at(WINDOW_MILLIS + 10));
    check!(reporter.report_now().unwrap() == 3);

    let entries = output.inspector.entries();
    check!(entries.len() == 3);

    let get = entry_for(&entries, "GetItem", "requests");
    check!(get.timestamp == Some(at(2_500)));
    check!(get.values["status"] == "ok");
    check!(get.metrics["requests.sum"].as_u64() == 5);

    let put = entry_for(&entries, "PutItem", "requests");
    check!(put.metrics["requests.sum"].as_u64() == 1);

    let timer = entry_for(&entries, "GetItem", "latency");
    check!(timer.timestamp == Some(at(4_200)));
    check!(timer.metrics["latency.count"].as_u64() == 2);
    check!(timer.metrics["latency.sum"].as_u64() == 10_000);
    check!(timer.metrics["latency.min"].as_u64() == 3_000);
    check!(timer.metrics["latency.max"].as_u64() == 7_000);
}

#[test]
fn histogram_buckets_are_separate_metrics() {
    let clock = ManuallyAdvancedTimeSource::at_time(at(0));
    let output = test_entry_sink();
    let reporter = TimeWindowReporter::builder()
        .window(Duration::from_millis(WINDOW_MILLIS))
        .time_source(TimeSource::custom(clock.clone()))
        .histogram("latency", Buckets::from_longs([10, 100]).unwrap())
        .sink(EntrySinkReporter::new(output.sink))
        .build()
        .unwrap();

    let latency = MetricDescriptor::timer("latency");
    for value in [5, 50, 60, 500] {
        reporter.emit(&latency, 100, value, &tags("Query"));
    }
    clock.update_time(at(WINDOW_MILLIS));
    check!(reporter.report_now().unwrap() == 1);

    let entries = output.inspector.entries();
    check!(entries.len() == 1);
    let entry = &entries[0];
    check!(entry.metrics["latency.count"].as_u64() == 4);
    check!(entry.metrics["latency.10_100"].as_u64() == 2);
}

#[test]
fn empty_cycles_append_nothing() {
    let clock = ManuallyAdvancedTimeSource::at_time(at(0));
    let output = test_entry_sink();
    let reporter = TimeWindowReporter::builder()
        .window(Duration::from_millis(WINDOW_MILLIS))
        .time_source(TimeSource::custom(clock.clone()))
        .sink(EntrySinkReporter::new(output.sink))
        .build()
        .unwrap();

    clock.update_time(at(WINDOW_MILLIS));
    check!(reporter.report_now().unwrap() == 0);
    check!(output.inspector.entries().is_empty());
}
