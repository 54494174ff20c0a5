// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Histogram bucket providers.

use std::fmt;

use crate::error::ConfigError;

/// Maps a value to a histogram bucket ordinal.
///
/// Implementations must be pure: the same value always lands in the same bucket, and
/// `bucket_index(v) < bucket_count()` for every `v`.
pub trait BucketProvider: Send + Sync + fmt::Debug {
    /// Number of buckets.
    fn bucket_count(&self) -> usize;

    /// The bucket `value` falls into.
    fn bucket_index(&self, value: f64) -> usize;

    /// One name per bucket, in ordinal order. Used as field names.
    fn bucket_names(&self) -> &[String];
}

/// Buckets delimited by a sorted list of boundaries.
///
/// For boundaries `b0 < b1 < ... < bn` the buckets are, in ordinal order:
///
/// | ordinal | range | name |
/// |---|---|---|
/// | `0 ..= n-1` | `[b(i), b(i+1))` | `"{b(i)}_{b(i+1)}"` |
/// | `n` | `>= bn` | `"overflow"` |
/// | `n + 1` | `< b0` | `"underflow"` |
///
/// ```
/// # use metrique_rollup::bucket::{BucketProvider, Buckets};
/// let buckets = Buckets::new([0.0, 10.0, 100.0]).unwrap();
/// assert_eq!(buckets.bucket_names(), ["0_10", "10_100", "overflow", "underflow"]);
/// assert_eq!(buckets.bucket_index(50.0), 1);
/// assert_eq!(buckets.bucket_index(-1.0), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Buckets {
    boundaries: Box<[f64]>,
    names: Box<[String]>,
}

impl Buckets {
    /// Buckets for `boundaries`, which must be finite, non-empty, and strictly increasing.
    pub fn new(boundaries: impl IntoIterator<Item = f64>) -> Result<Self, ConfigError> {
        let boundaries: Box<[f64]> = boundaries.into_iter().collect();
        if boundaries.is_empty() {
            return Err(ConfigError::invalid("at least one bucket boundary is required"));
        }
        if let Some(bad) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(ConfigError::invalid(format!(
                "bucket boundary {bad} is not finite"
            )));
        }
        if let Some(pair) = boundaries.windows(2).find(|w| w[0] >= w[1]) {
            return Err(ConfigError::invalid(format!(
                "bucket boundaries must be sorted and unique, found {} before {}",
                pair[0], pair[1]
            )));
        }
        let names = boundaries
            .windows(2)
            .map(|w| format!("{}_{}", w[0], w[1]))
            .chain(["overflow".to_owned(), "underflow".to_owned()])
            .collect();
        Ok(Self { boundaries, names })
    }

    /// Integer boundaries, as used for millisecond latencies.
    pub fn from_longs(boundaries: impl IntoIterator<Item = i64>) -> Result<Self, ConfigError> {
        Self::new(boundaries.into_iter().map(|b| b as f64))
    }

    /// The boundaries this provider was built from.
    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// Ordinal of the overflow bucket.
    pub fn overflow_index(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Ordinal of the underflow bucket.
    pub fn underflow_index(&self) -> usize {
        self.boundaries.len()
    }
}

impl BucketProvider for Buckets {
    fn bucket_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    fn bucket_index(&self, value: f64) -> usize {
        match self.boundaries.partition_point(|b| *b <= value) {
            0 => self.underflow_index(),
            n => n - 1,
        }
    }

    fn bucket_names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(-1.0, 3)]
    #[case(0.0, 0)]
    #[case(9.99, 0)]
    #[case(10.0, 1)]
    #[case(99.0, 1)]
    #[case(100.0, 2)]
    #[case(1e12, 2)]
    #[case(f64::NAN, 3)]
    fn maps_values(#[case] value: f64, #[case] expected: usize) {
        let buckets = Buckets::new([0.0, 10.0, 100.0]).unwrap();
        check!(buckets.bucket_index(value) == expected);
    }

    #[test]
    fn single_boundary_has_only_edges() {
        let buckets = Buckets::from_longs([5]).unwrap();
        check!(buckets.bucket_count() == 2);
        check!(buckets.bucket_names() == ["overflow", "underflow"]);
        check!(buckets.bucket_index(5.0) == 0);
        check!(buckets.bucket_index(4.0) == 1);
    }

    #[rstest]
    #[case(&[])]
    #[case(&[1.0, 1.0])]
    #[case(&[2.0, 1.0])]
    #[case(&[0.0, f64::INFINITY])]
    fn rejects_bad_boundaries(#[case] boundaries: &[f64]) {
        check!(Buckets::new(boundaries.iter().copied()).is_err());
    }

    #[test]
    fn names_keep_fractions() {
        let buckets = Buckets::new([0.5, 1.0, 2.5]).unwrap();
        check!(buckets.bucket_names()[..2] == ["0.5_1", "1_2.5"]);
    }
}
