// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A handle to one aggregate record and the per-field atomic operations strategies combine with.
//!
//! Every operation touches exactly one 64-bit word. Fields within a record are never updated as a unit, so a
//! concurrent reader may see `count` include an update that `sum` does not yet reflect.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::layout::{CacheLine, KEY_WORD, RESERVED_WORDS, TIMESTAMP_WORD, WORDS_PER_LINE};

/// A borrowed view of one record inside a table segment.
///
/// Field indexes are positions in the aggregator's [`Schema`](crate::layout::Schema). Indexing past the schema's
/// last field panics.
#[derive(Clone, Copy)]
pub struct Record<'a> {
    lines: &'a [CacheLine],
}

impl<'a> Record<'a> {
    pub(crate) fn new(lines: &'a [CacheLine]) -> Self {
        Self { lines }
    }

    #[inline]
    fn word(&self, index: usize) -> &'a AtomicU64 {
        &self.lines[index / WORDS_PER_LINE].0[index % WORDS_PER_LINE]
    }

    #[inline]
    fn field(&self, index: usize) -> &'a AtomicU64 {
        self.word(RESERVED_WORDS + index)
    }

    pub(crate) fn key_cell(&self) -> &'a AtomicU64 {
        self.word(KEY_WORD)
    }

    /// The 64-bit key this record was claimed for.
    pub fn key(&self) -> u64 {
        self.key_cell().load(Ordering::Acquire)
    }

    /// Milliseconds since the epoch of the most recent combine, 0 if none has happened yet.
    pub fn last_updated(&self) -> u64 {
        self.word(TIMESTAMP_WORD).load(Ordering::Relaxed)
    }

    /// Move the last update timestamp forward to `timestamp_millis`. Older timestamps are ignored.
    pub fn touch(&self, timestamp_millis: u64) {
        self.word(TIMESTAMP_WORD)
            .fetch_max(timestamp_millis, Ordering::Relaxed);
    }

    /// Reset the timestamp and write identity bits into every field. Called for every slot of a new segment.
    pub(crate) fn initialize(&self, identity: &[u64]) {
        self.word(TIMESTAMP_WORD).store(0, Ordering::Relaxed);
        for (index, bits) in identity.iter().enumerate() {
            self.field(index).store(*bits, Ordering::Relaxed);
        }
    }

    /// Raw bits of field `index`.
    pub fn read_bits(&self, index: usize) -> u64 {
        self.field(index).load(Ordering::Relaxed)
    }

    /// Replace field `index` with `bits`, returning the previous bits.
    pub fn swap_bits(&self, index: usize, bits: u64) -> u64 {
        self.field(index).swap(bits, Ordering::AcqRel)
    }

    /// Field `index` read as a long.
    pub fn read_long(&self, index: usize) -> i64 {
        self.read_bits(index) as i64
    }

    /// Field `index` read as a double.
    pub fn read_double(&self, index: usize) -> f64 {
        f64::from_bits(self.read_bits(index))
    }

    /// Wrapping add to a long field.
    #[inline]
    pub fn add_long(&self, index: usize, value: i64) {
        self.field(index).fetch_add(value as u64, Ordering::Relaxed);
    }

    /// Add one to a long field.
    #[inline]
    pub fn increment(&self, index: usize) {
        self.add_long(index, 1);
    }

    /// Store `value` into a long field.
    #[inline]
    pub fn set_long(&self, index: usize, value: i64) {
        self.field(index).store(value as u64, Ordering::Relaxed);
    }

    /// Lower a long field to `value` if `value` is smaller.
    #[inline]
    pub fn min_long(&self, index: usize, value: i64) {
        let _ = self
            .field(index)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (value < bits as i64).then_some(value as u64)
            });
    }

    /// Raise a long field to `value` if `value` is larger.
    #[inline]
    pub fn max_long(&self, index: usize, value: i64) {
        let _ = self
            .field(index)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (value > bits as i64).then_some(value as u64)
            });
    }

    /// Add to a double field with a compare-and-swap loop.
    #[inline]
    pub fn add_double(&self, index: usize, value: f64) {
        let _ = self
            .field(index)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    /// Store `value` into a double field.
    #[inline]
    pub fn set_double(&self, index: usize, value: f64) {
        self.field(index).store(value.to_bits(), Ordering::Relaxed);
    }

    /// Lower a double field to `value` if `value` is smaller. NaN is ignored.
    #[inline]
    pub fn min_double(&self, index: usize, value: f64) {
        let _ = self
            .field(index)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (value < f64::from_bits(bits)).then_some(value.to_bits())
            });
    }

    /// Raise a double field to `value` if `value` is larger. NaN is ignored.
    #[inline]
    pub fn max_double(&self, index: usize, value: f64) {
        let _ = self
            .field(index)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (value > f64::from_bits(bits)).then_some(value.to_bits())
            });
    }
}

impl std::fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key())
            .field("last_updated", &self.last_updated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    fn lines(n: usize) -> Box<[CacheLine]> {
        (0..n).map(|_| CacheLine::default()).collect()
    }

    #[test]
    fn fields_span_cache_lines() {
        let lines = lines(2);
        let record = Record::new(&lines);
        record.set_long(6, 42);
        check!(lines[1].0[0].load(Ordering::Relaxed) == 42);
        check!(record.read_long(6) == 42);
    }

    #[test]
    fn long_ops() {
        let lines = lines(1);
        let record = Record::new(&lines);
        record.initialize(&[0, i64::MAX as u64, i64::MIN as u64]);
        for v in [5, -3, 12] {
            record.add_long(0, v);
            record.min_long(1, v);
            record.max_long(2, v);
        }
        check!(record.read_long(0) == 14);
        check!(record.read_long(1) == -3);
        check!(record.read_long(2) == 12);
        check!(record.swap_bits(0, 0) as i64 == 14);
        check!(record.read_long(0) == 0);
    }

    #[test]
    fn double_ops_ignore_nan() {
        let lines = lines(1);
        let record = Record::new(&lines);
        record.initialize(&[
            0f64.to_bits(),
            f64::INFINITY.to_bits(),
            f64::NEG_INFINITY.to_bits(),
        ]);
        for v in [1.5, f64::NAN, -0.25] {
            record.min_double(1, v);
            record.max_double(2, v);
        }
        record.add_double(0, 1.5);
        record.add_double(0, -0.25);
        check!(record.read_double(0) == 1.25);
        check!(record.read_double(1) == -0.25);
        check!(record.read_double(2) == 1.5);
    }

    #[test]
    fn touch_only_moves_forward() {
        let lines = lines(1);
        let record = Record::new(&lines);
        record.touch(100);
        record.touch(50);
        check!(record.last_updated() == 100);
        record.initialize(&[]);
        check!(record.last_updated() == 0);
    }
}
