// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An [`Aggregator`] pairs one [`AggregationTable`] with the [`MonoidStrategy`] that combines values into it.

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    cursor::Cursor,
    layout::{FieldType, Schema},
    monoid::MonoidStrategy,
    rate_limit::RateLimiter,
    table::{AggregationTable, TableConfig},
    tags::TagSet,
};

const DROP_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Accumulates values per tag-set for one metric.
pub struct Aggregator {
    name: Option<Arc<str>>,
    strategy: Arc<dyn MonoidStrategy>,
    table: AggregationTable,
    drops: RateLimiter,
}

impl Aggregator {
    /// An empty aggregator.
    pub fn new(strategy: Arc<dyn MonoidStrategy>, config: TableConfig) -> Self {
        let table = AggregationTable::new(strategy.schema(), config);
        Self {
            name: None,
            strategy,
            table,
            drops: RateLimiter::new(DROP_LOG_INTERVAL),
        }
    }

    /// An empty aggregator for the metric `name`, which is included in its warnings.
    pub fn named(
        name: impl Into<Arc<str>>,
        strategy: Arc<dyn MonoidStrategy>,
        config: TableConfig,
    ) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(strategy, config)
        }
    }

    /// Combine `value` into the record for `tags`, stamping it with `timestamp_millis`.
    ///
    /// Never fails. If the table is at its cardinality ceiling and `tags` is a new series, the value is dropped and a
    /// rate-limited warning is logged.
    pub fn apply(&self, tags: &TagSet, value: i64, timestamp_millis: u64) {
        match self.table.find_or_claim(tags) {
            Some(record) => {
                self.strategy.combine(record, value);
                record.touch(timestamp_millis);
            }
            None => {
                if let Some(suppressed) = self.drops.check() {
                    tracing::warn!(
                        metric = self.name.as_deref(),
                        max_capacity = self.table.max_capacity(),
                        suppressed,
                        tags = %tags,
                        "aggregation table is at its cardinality ceiling, dropping value for new series"
                    )
                }
            }
        }
    }

    /// The metric name given to [`Self::named`].
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Iterate records in claim order.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self, false)
    }

    /// Iterate records in tag-set order.
    pub fn sorted_cursor(&self) -> Cursor<'_> {
        Cursor::new(self, true)
    }

    /// Field names, in storage order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.schema().names()
    }

    /// Field types, matching [`Self::fields`].
    pub fn types(&self) -> &[FieldType] {
        self.schema().types()
    }

    /// The strategy's schema.
    pub fn schema(&self) -> &Schema {
        self.strategy.schema()
    }

    /// The combine strategy.
    pub fn strategy(&self) -> &Arc<dyn MonoidStrategy> {
        &self.strategy
    }

    /// The backing table.
    pub fn table(&self) -> &AggregationTable {
        &self.table
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("table", &self.table)
            .finish()
    }
}
