// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Append-only log of the tag-sets a table has claimed records for, in claim order.
//!
//! Lookups never go through the log; cursors walk it to find out which tag-sets to re-resolve. Storage is a
//! series of chunks where chunk `k` holds `base << k` entries, so existing entries never move when the log
//! grows and readers can index it without a lock.

use std::sync::{
    OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use crate::tags::TagSet;

const MAX_CHUNKS: usize = usize::BITS as usize;

type Chunk = Box<[OnceLock<TagSet>]>;

pub(crate) struct TagSetLog {
    base_bits: u32,
    len: AtomicUsize,
    chunks: [OnceLock<Chunk>; MAX_CHUNKS],
}

impl TagSetLog {
    /// A log whose first chunk holds at least `initial` entries.
    pub(crate) fn with_capacity(initial: usize) -> Self {
        let base_bits = initial.max(1).next_power_of_two().trailing_zeros();
        Self {
            base_bits,
            len: AtomicUsize::new(0),
            chunks: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// (chunk, offset) for entry `index`.
    fn locate(&self, index: usize) -> (usize, usize) {
        let group = (index >> self.base_bits) + 1;
        let chunk = (usize::BITS - 1 - group.leading_zeros()) as usize;
        let first = ((1usize << chunk) - 1) << self.base_bits;
        (chunk, index - first)
    }

    pub(crate) fn push(&self, tags: TagSet) {
        let index = self.len.fetch_add(1, Ordering::AcqRel);
        let (chunk, offset) = self.locate(index);
        let chunk = self.chunks[chunk].get_or_init(|| {
            (0..(1usize << (self.base_bits as usize + chunk)))
                .map(|_| OnceLock::new())
                .collect()
        });
        let _ = chunk[offset].set(tags);
    }

    /// Number of entries reserved so far. Entries still being written read as `None` from [`Self::get`].
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&TagSet> {
        let (chunk, offset) = self.locate(index);
        self.chunks.get(chunk)?.get()?.get(offset)?.get()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &TagSet> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }
}
