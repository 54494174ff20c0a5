// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monoid combine strategies.
//!
//! A strategy declares the fields it keeps per record (with their identity values) and folds one emitted value into
//! a record. Combines only use the per-field atomic operations on [`Record`], never a lock spanning the record.
//!
//! Values reach a strategy as `i64`. Strategies over doubles receive the `f64` bit pattern and decode it with
//! [`MonoidStrategy::decode`].

use std::{fmt, sync::Arc};

use crate::{
    bucket::BucketProvider,
    error::ConfigError,
    layout::{FieldSpec, Schema},
    record::Record,
};

/// Per-metric-kind aggregation.
pub trait MonoidStrategy: Send + Sync + fmt::Debug {
    /// Fields maintained per record, with their identity values.
    fn schema(&self) -> &Schema;

    /// Fold `value` into `record`.
    fn combine(&self, record: Record<'_>, value: i64);

    /// Interpret an encoded value as a number, for bucketing.
    fn decode(&self, value: i64) -> f64 {
        value as f64
    }
}

/// Field names used by the built-in strategies.
pub mod fields {
    /// Number of combined values.
    pub const COUNT: &str = "count";
    /// Sum of combined values.
    pub const SUM: &str = "sum";
    /// Smallest combined value.
    pub const MIN: &str = "min";
    /// Largest combined value.
    pub const MAX: &str = "max";
    /// Most recently combined value.
    pub const LAST_VALUE: &str = "last_value";
}

const COUNT: usize = 0;
const SUM: usize = 1;
const MIN: usize = 2;
const MAX: usize = 3;
const LAST: usize = 4;

fn build(fields: impl IntoIterator<Item = FieldSpec>) -> Schema {
    match Schema::new(fields) {
        Ok(schema) => schema,
        // built-in field lists are static and valid
        Err(err) => unreachable!("{err}"),
    }
}

/// Counter: `sum += value`.
#[derive(Debug, Clone)]
pub struct Sum {
    schema: Schema,
}

impl Default for Sum {
    fn default() -> Self {
        Self {
            schema: build([FieldSpec::long(fields::SUM, 0)]),
        }
    }
}

impl MonoidStrategy for Sum {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    fn combine(&self, record: Record<'_>, value: i64) {
        record.add_long(0, value);
    }
}

/// Long gauge: count, sum, min, max and last value.
#[derive(Debug, Clone)]
pub struct Gauge {
    schema: Schema,
}

impl Default for Gauge {
    fn default() -> Self {
        Self {
            schema: build([
                FieldSpec::long(fields::COUNT, 0),
                FieldSpec::long(fields::SUM, 0),
                FieldSpec::long(fields::MIN, i64::MAX),
                FieldSpec::long(fields::MAX, i64::MIN),
                FieldSpec::long(fields::LAST_VALUE, 0),
            ]),
        }
    }
}

impl MonoidStrategy for Gauge {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    fn combine(&self, record: Record<'_>, value: i64) {
        record.increment(COUNT);
        record.add_long(SUM, value);
        record.min_long(MIN, value);
        record.max_long(MAX, value);
        record.set_long(LAST, value);
    }
}

/// Double gauge. Values are `f64` bit patterns; `count` stays a long.
#[derive(Debug, Clone)]
pub struct GaugeDouble {
    schema: Schema,
}

impl Default for GaugeDouble {
    fn default() -> Self {
        Self {
            schema: build([
                FieldSpec::long(fields::COUNT, 0),
                FieldSpec::double(fields::SUM, 0.0),
                FieldSpec::double(fields::MIN, f64::INFINITY),
                FieldSpec::double(fields::MAX, f64::NEG_INFINITY),
                FieldSpec::double(fields::LAST_VALUE, 0.0),
            ]),
        }
    }
}

impl MonoidStrategy for GaugeDouble {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    fn combine(&self, record: Record<'_>, value: i64) {
        let value = self.decode(value);
        record.increment(COUNT);
        record.add_double(SUM, value);
        record.min_double(MIN, value);
        record.max_double(MAX, value);
        record.set_double(LAST, value);
    }

    fn decode(&self, value: i64) -> f64 {
        f64::from_bits(value as u64)
    }
}

/// Timer: count, sum, min and max of durations.
#[derive(Debug, Clone)]
pub struct Timer {
    schema: Schema,
}

impl Default for Timer {
    fn default() -> Self {
        Self {
            schema: build([
                FieldSpec::long(fields::COUNT, 0),
                FieldSpec::long(fields::SUM, 0),
                FieldSpec::long(fields::MIN, i64::MAX),
                FieldSpec::long(fields::MAX, i64::MIN),
            ]),
        }
    }
}

impl MonoidStrategy for Timer {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    fn combine(&self, record: Record<'_>, value: i64) {
        record.increment(COUNT);
        record.add_long(SUM, value);
        record.min_long(MIN, value);
        record.max_long(MAX, value);
    }
}

/// Any base strategy plus one counter per histogram bucket, appended after the base fields.
#[derive(Debug, Clone)]
pub struct Histogram {
    base: Arc<dyn MonoidStrategy>,
    buckets: Arc<dyn BucketProvider>,
    offset: usize,
    schema: Schema,
}

impl Histogram {
    /// Wrap `base`, counting values into `buckets`.
    ///
    /// Fails if a bucket name clashes with a base field name.
    pub fn new(
        base: Arc<dyn MonoidStrategy>,
        buckets: Arc<dyn BucketProvider>,
    ) -> Result<Self, ConfigError> {
        let schema = base.schema().extend(
            buckets
                .bucket_names()
                .iter()
                .map(|name| FieldSpec::long(name.clone(), 0)),
        )?;
        Ok(Self {
            offset: base.schema().len(),
            base,
            buckets,
            schema,
        })
    }

    /// The bucket provider.
    pub fn buckets(&self) -> &Arc<dyn BucketProvider> {
        &self.buckets
    }
}

impl MonoidStrategy for Histogram {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    fn combine(&self, record: Record<'_>, value: i64) {
        self.base.combine(record, value);
        let bucket = self.buckets.bucket_index(self.base.decode(value));
        record.increment(self.offset + bucket);
    }

    fn decode(&self, value: i64) -> f64 {
        self.base.decode(value)
    }
}
