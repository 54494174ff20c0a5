// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Read access to an [`Aggregator`]'s records.
//!
//! A [`Cursor`] walks the tag-sets an aggregator has seen, either in claim order or sorted, and re-resolves each one
//! to its record without ever creating records. Each step yields a [`CursorEntry`] whose fields can be read in place
//! or read-and-reset, which swaps the field back to its identity value and returns what it held.

use std::fmt;

use crate::{
    aggregator::Aggregator,
    layout::{FieldType, FieldValue, Schema},
    record::Record,
    tags::TagSet,
};

enum Source<'a> {
    Log { next: usize },
    Sorted(std::vec::IntoIter<&'a TagSet>),
}

/// Forward-only iterator over the records of one aggregator.
pub struct Cursor<'a> {
    aggregator: &'a Aggregator,
    source: Source<'a>,
    done: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(aggregator: &'a Aggregator, sorted: bool) -> Self {
        let source = if sorted {
            let mut tag_sets: Vec<&'a TagSet> = aggregator.table().tag_sets().iter().collect();
            tag_sets.sort();
            Source::Sorted(tag_sets.into_iter())
        } else {
            Source::Log { next: 0 }
        };
        Self {
            aggregator,
            source,
            done: false,
        }
    }

    fn next_tags(&mut self) -> Option<&'a TagSet> {
        match &mut self.source {
            Source::Sorted(tags) => tags.next(),
            Source::Log { next } => {
                let log = self.aggregator.table().tag_sets();
                while *next < log.len() {
                    let index = *next;
                    *next += 1;
                    // entries whose writer has not published yet are skipped
                    if let Some(tags) = log.get(index) {
                        return Some(tags);
                    }
                }
                None
            }
        }
    }

    /// Field names of the aggregator.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = &'a str> + 'a {
        self.aggregator.schema().names()
    }

    /// Field types of the aggregator.
    pub fn types(&self) -> &'a [FieldType] {
        self.aggregator.types()
    }

    /// The aggregator being read.
    pub fn aggregator(&self) -> &'a Aggregator {
        self.aggregator
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = CursorEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(tags) = self.next_tags() else {
            self.done = true;
            return None;
        };
        match self.aggregator.table().find(tags) {
            Some(record) => Some(CursorEntry {
                tags,
                record,
                schema: self.aggregator.schema(),
            }),
            None => {
                tracing::error!(
                    tags = %tags,
                    key = tags.key(),
                    "no record found for a logged tag-set, ending cursor"
                );
                self.done = true;
                None
            }
        }
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("sorted", &matches!(self.source, Source::Sorted(_)))
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// The record under a cursor.
#[derive(Clone, Copy)]
pub struct CursorEntry<'a> {
    tags: &'a TagSet,
    record: Record<'a>,
    schema: &'a Schema,
}

impl<'a> CursorEntry<'a> {
    /// The tag-set of this record.
    pub fn tags(&self) -> &'a TagSet {
        self.tags
    }

    /// Milliseconds since the epoch of the last combine.
    pub fn last_updated(&self) -> u64 {
        self.record.last_updated()
    }

    /// Field `index` as a long.
    pub fn read_long(&self, index: usize) -> i64 {
        self.record.read_long(index)
    }

    /// Field `index` as a double.
    pub fn read_double(&self, index: usize) -> f64 {
        self.record.read_double(index)
    }

    /// Field `index`, decoded by its declared type.
    pub fn read(&self, index: usize) -> FieldValue {
        self.schema.types()[index].decode(self.record.read_bits(index))
    }

    /// Swap field `index` back to its identity and return the long it held.
    pub fn read_and_reset_long(&self, index: usize) -> i64 {
        self.reset_bits(index) as i64
    }

    /// Swap field `index` back to its identity and return the double it held.
    pub fn read_and_reset_double(&self, index: usize) -> f64 {
        f64::from_bits(self.reset_bits(index))
    }

    /// Swap field `index` back to its identity and return its previous value, decoded by its declared type.
    pub fn read_and_reset(&self, index: usize) -> FieldValue {
        self.schema.types()[index].decode(self.reset_bits(index))
    }

    fn reset_bits(&self, index: usize) -> u64 {
        self.record
            .swap_bits(index, self.schema.identity_bits()[index])
    }

    /// All fields, read in place.
    pub fn values(&self) -> Vec<FieldValue> {
        (0..self.schema.len()).map(|i| self.read(i)).collect()
    }

    /// All fields, each read-and-reset.
    pub fn drain(&self) -> Vec<FieldValue> {
        (0..self.schema.len()).map(|i| self.read_and_reset(i)).collect()
    }

    /// The schema of the record.
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }
}

impl fmt::Debug for CursorEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorEntry")
            .field("tags", &self.tags)
            .field("last_updated", &self.last_updated())
            .field("values", &self.values())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert2::check;

    use super::*;
    use crate::{
        monoid::{Gauge, GaugeDouble, Sum},
        table::TableConfig,
    };

    fn tags(x: &str) -> TagSet {
        TagSet::builder().tag("x", x).build()
    }

    #[test]
    fn claim_order_and_sorted_order() {
        let aggregator = Aggregator::new(Arc::new(Sum::default()), TableConfig::default());
        for x in ["c", "a", "b"] {
            aggregator.apply(&tags(x), 1, 1);
        }
        let claimed: Vec<_> = aggregator
            .cursor()
            .map(|e| e.tags().value_of("x").unwrap().to_owned())
            .collect();
        check!(claimed == ["c", "a", "b"]);
        let sorted: Vec<_> = aggregator
            .sorted_cursor()
            .map(|e| e.tags().value_of("x").unwrap().to_owned())
            .collect();
        check!(sorted == ["a", "b", "c"]);
    }

    #[test]
    fn read_and_reset_restores_identity() {
        let aggregator = Aggregator::new(Arc::new(Gauge::default()), TableConfig::default());
        aggregator.apply(&tags("a"), 100, 7);
        aggregator.apply(&tags("a"), 10, 8);
        let entry = aggregator.cursor().next().unwrap();
        check!(entry.last_updated() == 8);
        check!(entry.read_and_reset_long(1) == 110);
        check!(entry.read_long(1) == 0);
        check!(entry.read_and_reset(2) == FieldValue::Long(10));
        check!(entry.read(2) == FieldValue::Long(i64::MAX));
        // unread fields are untouched
        check!(entry.read_long(0) == 2);
    }

    #[test]
    fn drain_resets_doubles() {
        let aggregator = Aggregator::new(Arc::new(GaugeDouble::default()), TableConfig::default());
        aggregator.apply(&tags("a"), 0.5f64.to_bits() as i64, 1);
        let entry = aggregator.cursor().next().unwrap();
        check!(
            entry.drain()
                == [
                    FieldValue::Long(1),
                    FieldValue::Double(0.5),
                    FieldValue::Double(0.5),
                    FieldValue::Double(0.5),
                    FieldValue::Double(0.5)
                ]
        );
        check!(entry.read_double(2) == f64::INFINITY);
        check!(entry.read_double(3) == f64::NEG_INFINITY);
    }

    #[test]
    fn empty_aggregator_has_empty_cursor() {
        let aggregator = Aggregator::new(Arc::new(Sum::default()), TableConfig::default());
        check!(aggregator.cursor().next().is_none());
        check!(aggregator.sorted_cursor().count() == 0);
        check!(aggregator.cursor().fields().collect::<Vec<_>>() == ["sum"]);
    }
}
