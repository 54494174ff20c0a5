// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Emits request metrics from a few worker threads and logs one rollup per tag-set every two seconds.
//!
//! Run with `RUST_LOG=info cargo run --example window_reporter`.

use std::{sync::Arc, thread, time::Duration};

use metrique_rollup::{
    bucket::Buckets, registry::MetricRegistry, report::LogSink, tags::TagSet,
    window::TimeWindowReporter,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let reporter = Arc::new(
        TimeWindowReporter::builder()
            .name("demo")
            .window(Duration::from_secs(2))
            .histogram(
                "latency",
                Buckets::from_longs([1_000_000, 5_000_000, 20_000_000]).unwrap(),
            )
            .sink(LogSink)
            .build()
            .unwrap(),
    );
    reporter.start().unwrap();

    let registry = MetricRegistry::new();
    registry.add_reporter(reporter.clone());

    thread::scope(|s| {
        for worker in 0..4 {
            let registry = registry.clone();
            s.spawn(move || {
                let requests = registry.counter("requests").unwrap();
                let latency = registry.timer("latency").unwrap();
                for i in 0..300u64 {
                    let tags = TagSet::builder()
                        .tag("operation", if i % 3 == 0 { "PutItem" } else { "GetItem" })
                        .tag("worker", worker.to_string())
                        .build();
                    requests.inc(&tags);
                    latency.update(Duration::from_micros(500 + (i * 97) % 30_000), &tags);
                    thread::sleep(Duration::from_millis(20));
                }
            });
        }
    });

    // one more window so the last writes are reported
    thread::sleep(reporter.window() * 2);
    reporter.stop().unwrap();
}
