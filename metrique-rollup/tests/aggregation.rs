// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashSet, sync::Arc, thread};

use assert2::check;
use metrique_rollup::{
    aggregator::Aggregator,
    bucket::Buckets,
    kind::StrategyRegistry,
    layout::FieldValue,
    monoid::{Gauge, MonoidStrategy, Sum},
    multi_cursor::MultiCursor,
    table::TableConfig,
    tags::{TagSet, compare_tag_sets},
};
use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use rstest::rstest;
use std::cmp::Ordering;

fn series(i: usize) -> TagSet {
    TagSet::builder()
        .tag("host", format!("host-{i}"))
        .tag("az", format!("az-{}", i % 3))
        .build()
}

#[rstest]
#[case(1, 10)]
#[case(16, 100)]
#[case(128, 4096)]
#[case(100, 333)]
fn ceiling_is_respected(#[case] initial: usize, #[case] ceiling: usize) {
    let aggregator = Aggregator::new(
        Arc::new(Sum::default()),
        TableConfig::new(initial, ceiling).unwrap(),
    );
    for i in 0..ceiling * 2 {
        aggregator.apply(&series(i), 1, 1);
    }
    check!(aggregator.table().size() == ceiling);
    check!(aggregator.table().capacity() <= ceiling);
    // new series are dropped, known ones keep counting
    aggregator.apply(&series(0), 1, 2);
    check!(aggregator.table().find(&series(0)).unwrap().read_long(0) == 2);
    check!(aggregator.table().find(&series(ceiling * 2 - 1)).is_none());
}

#[test]
fn occupancy_counts_distinct_series_only() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let aggregator = Aggregator::new(Arc::new(Sum::default()), TableConfig::new(4, 10_000).unwrap());
    let mut seen = HashSet::new();
    let mut last = 0;
    for _ in 0..5_000 {
        let i = rng.random_range(0..1_000);
        seen.insert(i);
        aggregator.apply(&series(i), 1, 1);
        let size = aggregator.table().size();
        check!(size >= last);
        last = size;
    }
    check!(last == seen.len());
}

#[test]
fn counter_and_gauge_combine() {
    let tags = series(1);
    let counter = Aggregator::new(Arc::new(Sum::default()), TableConfig::default());
    for v in [100, 10, 1] {
        counter.apply(&tags, v, 1);
    }
    let entry = counter.cursor().next().unwrap();
    check!(entry.read_long(0) == 111);

    let gauge = Aggregator::new(Arc::new(Gauge::default()), TableConfig::default());
    for v in [100, 10] {
        gauge.apply(&tags, v, 1);
    }
    let entry = gauge.cursor().next().unwrap();
    let fields: Vec<_> = gauge.fields().zip(entry.values()).collect();
    check!(
        fields
            == [
                ("count", FieldValue::Long(2)),
                ("sum", FieldValue::Long(110)),
                ("min", FieldValue::Long(10)),
                ("max", FieldValue::Long(100)),
                ("last_value", FieldValue::Long(10)),
            ]
    );
}

#[test]
fn histogram_buckets() {
    let strategy = StrategyRegistry::default()
        .create("gauge", Some(Arc::new(Buckets::from_longs([0, 10, 100]).unwrap())))
        .unwrap();
    let aggregator = Aggregator::new(strategy, TableConfig::default());
    let tags = TagSet::empty();
    for v in [-1, 0, 1, 10, 50, 100, 101] {
        aggregator.apply(&tags, v, 1);
    }
    let entry = aggregator.cursor().next().unwrap();
    let schema = aggregator.schema();
    let bucket = |name: &str| entry.read_long(schema.index_of(name).unwrap());
    check!(bucket("underflow") == 1);
    check!(bucket("0_10") == 2);
    check!(bucket("10_100") == 2);
    check!(bucket("overflow") == 2);
    check!(bucket("count") == 7);
}

#[test]
fn read_and_reset_returns_accumulated_value() {
    let aggregator = Aggregator::new(Arc::new(Gauge::default()), TableConfig::default());
    let tags = series(3);
    for v in [4, 8, 15, 16, 23, 42] {
        aggregator.apply(&tags, v, 1);
    }
    let entry = aggregator.cursor().next().unwrap();
    let identities = aggregator.schema().identity_bits().to_vec();
    check!(entry.read_and_reset_long(1) == 108);
    check!(entry.read_long(1) as u64 == identities[1]);
    check!(entry.read_and_reset_long(2) == 4);
    check!(entry.read_long(2) as u64 == identities[2]);

    // combining after a reset starts over from identity
    aggregator.apply(&tags, 5, 2);
    check!(entry.read_long(1) == 5);
    check!(entry.read_long(2) == 5);
    check!(entry.read_long(0) == 7);
}

#[test]
fn tag_set_ordering() {
    let short = TagSet::from_flattened([Some("a"), Some("1")]);
    let long = TagSet::from_flattened([Some("a"), Some("1"), Some("b"), Some("2")]);
    check!(compare_tag_sets(Some(&short), Some(&long)) == Ordering::Less);
    check!(compare_tag_sets(None, Some(&short)) == Ordering::Greater);
    check!(compare_tag_sets(Some(&short), None) == Ordering::Less);
    check!(compare_tag_sets(None, None) == Ordering::Equal);
}

#[test]
fn multi_cursor_groups_shared_tag_sets() {
    let x1 = TagSet::builder().tag("x", "1").build();
    let x2 = TagSet::builder().tag("x", "2").build();
    let a = Aggregator::new(Arc::new(Sum::default()), TableConfig::default());
    let b = Aggregator::new(Arc::new(Gauge::default()), TableConfig::default());
    a.apply(&x1, 1, 1);
    b.apply(&x2, 2, 1);
    b.apply(&x1, 3, 1);

    let mut merged = MultiCursor::new([("a", &a), ("b", &b)]);
    let mut groups = vec![];
    while let Some(tags) = merged.next_group() {
        let mut members = vec![];
        while let Some((name, entry)) = merged.next_entry() {
            members.push((*name, entry.read_long(if *name == "a" { 0 } else { 1 })));
        }
        groups.push((tags.clone(), members));
    }
    check!(groups == [(x1, vec![("a", 1), ("b", 3)]), (x2, vec![("b", 2)])]);
}

#[test]
fn concurrent_emits_create_one_record_per_series() {
    let aggregator = Arc::new(Aggregator::new(
        Arc::new(Sum::default()),
        TableConfig::new(8, 4096).unwrap(),
    ));
    let threads = 8;
    let per_thread = 20_000;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(t);
                let mut order: Vec<usize> = (0..per_thread).map(|i| i % 500).collect();
                order.shuffle(&mut rng);
                let mut total = 0i64;
                for i in order {
                    let value = rng.random_range(1..100);
                    total += value;
                    aggregator.apply(&series(i), value, 1);
                }
                total
            })
        })
        .collect();
    let expected: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    check!(aggregator.table().size() == 500);
    let entries: Vec<_> = aggregator.cursor().collect();
    check!(entries.len() == 500);
    let distinct: HashSet<_> = entries.iter().map(|e| e.tags().key()).collect();
    check!(distinct.len() == 500);
    check!(entries.iter().map(|e| e.read_long(0)).sum::<i64>() == expected);
}

#[test]
fn one_hot_series_under_contention() {
    let aggregator = Arc::new(Aggregator::new(Arc::new(Sum::default()), TableConfig::default()));
    let tags = series(42);
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..10_000 {
                    aggregator.apply(&tags, 1, 1);
                }
            });
        }
    });
    check!(aggregator.table().size() == 1);
    check!(aggregator.cursor().next().unwrap().read_long(0) == 80_000);
}

#[test]
fn custom_strategies_plug_in() {
    #[derive(Debug)]
    struct MaxOnly(metrique_rollup::layout::Schema);

    impl MonoidStrategy for MaxOnly {
        fn schema(&self) -> &metrique_rollup::layout::Schema {
            &self.0
        }

        fn combine(&self, record: metrique_rollup::record::Record<'_>, value: i64) {
            record.max_long(0, value);
        }
    }

    let mut registry = StrategyRegistry::default();
    registry.register("max", || {
        Arc::new(MaxOnly(
            metrique_rollup::layout::Schema::new([metrique_rollup::layout::FieldSpec::long(
                "max",
                i64::MIN,
            )])
            .unwrap(),
        ))
    });
    let aggregator = Aggregator::new(registry.create("max", None).unwrap(), TableConfig::default());
    for v in [3, 9, -2] {
        aggregator.apply(&TagSet::empty(), v, 1);
    }
    check!(aggregator.cursor().next().unwrap().read_long(0) == 9);
}
