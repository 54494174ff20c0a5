// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sorted k-way merge of several aggregators' cursors.
//!
//! Each aggregator is read through a sorted [`Cursor`]. The merge keeps the head entry of every cursor in a binary
//! heap keyed by tag-set, so records of different metrics that share a tag-set come out as one group:
//!
//! ```
//! # use std::sync::Arc;
//! # use metrique_rollup::{aggregator::Aggregator, monoid::Sum, multi_cursor::MultiCursor, table::TableConfig, tags::TagSet};
//! let requests = Aggregator::new(Arc::new(Sum::default()), TableConfig::default());
//! let errors = Aggregator::new(Arc::new(Sum::default()), TableConfig::default());
//! let host_a = TagSet::builder().tag("host", "a").build();
//! requests.apply(&host_a, 10, 1);
//! errors.apply(&host_a, 1, 1);
//!
//! let mut merged = MultiCursor::new([("requests", &requests), ("errors", &errors)]);
//! assert_eq!(merged.next_group(), Some(&host_a));
//! let mut names = vec![];
//! while let Some((name, _entry)) = merged.next_entry() {
//!     names.push(*name);
//! }
//! assert_eq!(names, ["requests", "errors"]);
//! assert_eq!(merged.next_group(), None);
//! ```

use std::{cmp::Reverse, collections::BinaryHeap, fmt};

use crate::{
    aggregator::Aggregator,
    cursor::{Cursor, CursorEntry},
    tags::TagSet,
};

/// Merges sorted cursors into one stream grouped by tag-set.
pub struct MultiCursor<'a, K> {
    keys: Vec<K>,
    cursors: Vec<Cursor<'a>>,
    heads: Vec<Option<CursorEntry<'a>>>,
    heap: BinaryHeap<Reverse<(&'a TagSet, usize)>>,
    group: Option<&'a TagSet>,
}

impl<'a, K> MultiCursor<'a, K> {
    /// Merge the aggregators, each labelled with a key that is handed back with its entries.
    ///
    /// Within one group, entries come back in the order the aggregators were passed in.
    pub fn new(aggregators: impl IntoIterator<Item = (K, &'a Aggregator)>) -> Self {
        let (keys, cursors): (Vec<K>, Vec<Cursor<'a>>) = aggregators
            .into_iter()
            .map(|(key, aggregator)| (key, aggregator.sorted_cursor()))
            .unzip();
        let mut merged = Self {
            heads: Vec::with_capacity(cursors.len()),
            heap: BinaryHeap::with_capacity(cursors.len()),
            keys,
            cursors,
            group: None,
        };
        for index in 0..merged.cursors.len() {
            merged.heads.push(None);
            merged.advance(index);
        }
        merged
    }

    fn advance(&mut self, index: usize) {
        let head = self.cursors[index].next();
        if let Some(entry) = &head {
            self.heap.push(Reverse((entry.tags(), index)));
        }
        self.heads[index] = head;
    }

    fn pop_current(&mut self) -> Option<usize> {
        let group = self.group?;
        match self.heap.peek() {
            Some(Reverse((tags, _))) if *tags == group => {
                let Reverse((_, index)) = self.heap.pop()?;
                Some(index)
            }
            _ => None,
        }
    }

    /// Move to the next tag-set, skipping any entries of the current group that weren't read.
    ///
    /// Returns `None` once every cursor is exhausted.
    pub fn next_group(&mut self) -> Option<&'a TagSet> {
        while let Some(index) = self.pop_current() {
            self.advance(index);
        }
        self.group = self.heap.peek().map(|Reverse((tags, _))| *tags);
        self.group
    }

    /// The tag-set of the current group.
    pub fn group(&self) -> Option<&'a TagSet> {
        self.group
    }

    /// The next entry of the current group, with the key of the aggregator it came from.
    ///
    /// Each aggregator that has the group's tag-set is returned exactly once; its cursor is advanced as it is handed
    /// out.
    pub fn next_entry(&mut self) -> Option<(&K, CursorEntry<'a>)> {
        let index = self.pop_current()?;
        let entry = self.heads[index].take()?;
        self.advance(index);
        Some((&self.keys[index], entry))
    }
}

impl<K: fmt::Debug> fmt::Debug for MultiCursor<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiCursor")
            .field("keys", &self.keys)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert2::check;

    use super::*;
    use crate::{monoid::Sum, table::TableConfig};

    fn x(v: &str) -> TagSet {
        TagSet::builder().tag("x", v).build()
    }

    fn aggregator(values: &[&str]) -> Aggregator {
        let aggregator = Aggregator::new(Arc::new(Sum::default()), TableConfig::default());
        for v in values {
            aggregator.apply(&x(v), 1, 1);
        }
        aggregator
    }

    fn groups(merged: &mut MultiCursor<'_, &str>) -> Vec<(String, Vec<String>)> {
        let mut out = vec![];
        while let Some(tags) = merged.next_group() {
            let mut keys = vec![];
            while let Some((key, entry)) = merged.next_entry() {
                check!(entry.tags() == tags);
                keys.push(key.to_string());
            }
            out.push((tags.to_string(), keys));
        }
        out
    }

    #[test]
    fn shared_tag_sets_form_one_group() {
        let a = aggregator(&["1"]);
        let b = aggregator(&["2", "1"]);
        let mut merged = MultiCursor::new([("a", &a), ("b", &b)]);
        check!(
            groups(&mut merged)
                == [
                    ("{x=1}".to_owned(), vec!["a".to_owned(), "b".to_owned()]),
                    ("{x=2}".to_owned(), vec!["b".to_owned()]),
                ]
        );
    }

    #[test]
    fn unread_entries_are_skipped() {
        let a = aggregator(&["1", "2"]);
        let b = aggregator(&["1", "3"]);
        let mut merged = MultiCursor::new([("a", &a), ("b", &b)]);
        check!(merged.next_group() == Some(&x("1")));
        check!(merged.next_entry().map(|(k, _)| *k) == Some("a"));
        check!(merged.next_group() == Some(&x("2")));
        check!(merged.next_group() == Some(&x("3")));
        check!(merged.next_group().is_none());
        check!(merged.next_entry().is_none());
    }

    #[test]
    fn no_aggregators() {
        let mut merged = MultiCursor::<&str>::new(std::iter::empty());
        check!(merged.next_group().is_none());
    }
}
