// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The concurrent segmented hash table that maps a [`TagSet`] to its aggregate [`Record`].
//!
//! A table is a list of open-addressing segments, oldest first. Each segment is a flat array of records probed
//! linearly from `key % slots`. Claiming a record is a compare-and-swap of its key word from 0 to the tag-set key,
//! so writers never take a lock on the common path. Once claimed, a record keeps its key for the life of the
//! table.
//!
//! When every segment has reached its 70% load threshold a new segment is appended under a mutex. Segment
//! capacities follow a precomputed plan: the running total doubles until it reaches half of the ceiling, then grows
//! in fixed chunks until it reaches the ceiling exactly.
//!
//! Records are identified by their 64-bit key alone. Two distinct tag-sets whose keys collide share a record.
//!
//! A claim first reserves room below the segment's threshold, then swaps the key in. When every reservation is held
//! but not every claim has landed yet, a writer that meets an empty slot cannot tell whether an in-flight claim is
//! for its own key, so it spins on that slot until the claim lands or the segment reaches its threshold. That wait is
//! bounded by the other writer's next few instructions rather than by probe length, and only happens in the short
//! interval when a segment is filling its last slots. Lookups that don't claim never wait.

use std::sync::{
    Mutex, OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::ConfigError,
    layout::{CacheLine, RecordLayout, Schema},
    record::Record,
    tag_log::TagSetLog,
    tags::{EMPTY_KEY, TagSet},
};

/// Fraction of a segment's slots that may be claimed before the table grows.
pub const LOAD_FACTOR: f64 = 0.7;

const DEFAULT_INITIAL_CAPACITY: usize = 128;
const DEFAULT_MAX_CAPACITY: usize = 4096;

/// Sizing of an [`AggregationTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    initial_capacity: usize,
    max_capacity: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

impl TableConfig {
    /// A config holding `initial_capacity` records in its first segment and at most `max_capacity` in total.
    ///
    /// Both must be positive. An initial capacity above the ceiling is clipped to the ceiling.
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Result<Self, ConfigError> {
        if initial_capacity == 0 {
            return Err(ConfigError::invalid("must be positive").for_setting("initial_capacity"));
        }
        if max_capacity == 0 {
            return Err(ConfigError::invalid("must be positive").for_setting("max_capacity"));
        }
        Ok(Self {
            initial_capacity: initial_capacity.min(max_capacity),
            max_capacity,
        })
    }

    /// Records in the first segment.
    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    /// The cardinality ceiling.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Capacities of every segment the table may ever allocate, in allocation order. Sums to the ceiling.
    pub(crate) fn growth_plan(&self) -> Vec<usize> {
        let linear_step = self.initial_capacity.max(self.max_capacity / 16);
        let mut plan = vec![self.initial_capacity];
        let mut total = self.initial_capacity;
        while total < self.max_capacity {
            let next = if total < self.max_capacity / 2 {
                total
            } else {
                linear_step
            };
            let next = next.min(self.max_capacity - total);
            plan.push(next);
            total += next;
        }
        plan
    }
}

/// Smallest prime `>= n`.
pub(crate) fn next_prime(n: usize) -> usize {
    fn is_prime(n: usize) -> bool {
        if n < 4 {
            return n >= 2;
        }
        if n % 2 == 0 || n % 3 == 0 {
            return false;
        }
        let mut i = 5;
        while i * i <= n {
            if n % i == 0 || n % (i + 2) == 0 {
                return false;
            }
            i += 6;
        }
        true
    }
    (n.max(2)..).find(|&c| is_prime(c)).unwrap_or(n)
}

enum Probe<'a> {
    Found(Record<'a>),
    Claimed(Record<'a>),
    Missing,
}

struct Segment {
    lines: Box<[CacheLine]>,
    slots: usize,
    capacity: usize,
    reserved: AtomicUsize,
    size: AtomicUsize,
}

impl Segment {
    /// A segment whose every slot already holds the identity values, so a claimed record is usable as soon as its
    /// key is published.
    fn new(layout: RecordLayout, capacity: usize, identity: &[u64]) -> Self {
        let slots = next_prime((capacity as f64 / LOAD_FACTOR).ceil() as usize).max(capacity + 1);
        let lines = (0..slots * layout.lines_per_record())
            .map(|_| CacheLine::default())
            .collect();
        let segment = Self {
            lines,
            slots,
            capacity,
            reserved: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
        };
        for slot in 0..slots {
            segment.record(layout, slot).initialize(identity);
        }
        segment
    }

    fn record(&self, layout: RecordLayout, slot: usize) -> Record<'_> {
        let per = layout.lines_per_record();
        Record::new(&self.lines[slot * per..(slot + 1) * per])
    }

    fn is_at_threshold(&self) -> bool {
        self.size.load(Ordering::Acquire) >= self.capacity
    }

    /// Reserve room for one more claim, failing once the segment reached its load threshold.
    fn reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn probe(&self, layout: RecordLayout, key: u64, claim: bool) -> Probe<'_> {
        let start = (key % self.slots as u64) as usize;
        let mut slot = start;
        loop {
            let record = self.record(layout, slot);
            let cell = record.key_cell();
            let mut current = cell.load(Ordering::Acquire);
            loop {
                if current == key {
                    return Probe::Found(record);
                }
                if current != EMPTY_KEY {
                    break;
                }
                if !claim {
                    return Probe::Missing;
                }
                if !self.reserve() {
                    if self.is_at_threshold() {
                        // every reservation has landed, so a claim for this key would be visible by now
                        return if cell.load(Ordering::Acquire) == key {
                            Probe::Found(record)
                        } else {
                            Probe::Missing
                        };
                    }
                    // a claim is in flight and may be for this key
                    std::hint::spin_loop();
                    current = cell.load(Ordering::Acquire);
                    continue;
                }
                match cell.compare_exchange(EMPTY_KEY, key, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        self.size.fetch_add(1, Ordering::AcqRel);
                        return Probe::Claimed(record);
                    }
                    Err(actual) => {
                        self.reserved.fetch_sub(1, Ordering::AcqRel);
                        current = actual;
                    }
                }
            }
            slot += 1;
            if slot == self.slots {
                slot = 0;
            }
            if slot == start {
                return Probe::Missing;
            }
        }
    }
}

/// A growable, lock-free-on-write map from tag-set to aggregate record.
pub struct AggregationTable {
    layout: RecordLayout,
    identity: Box<[u64]>,
    plan: Box<[usize]>,
    segments: Box<[OnceLock<Segment>]>,
    segment_count: AtomicUsize,
    capacity: AtomicUsize,
    max_capacity: usize,
    grow_lock: Mutex<()>,
    tag_sets: TagSetLog,
}

impl AggregationTable {
    /// An empty table holding records for `schema`. The first segment is allocated up front.
    pub fn new(schema: &Schema, config: TableConfig) -> Self {
        let layout = RecordLayout::for_schema(schema);
        let plan: Box<[usize]> = config.growth_plan().into();
        let segments: Box<[OnceLock<Segment>]> = plan.iter().map(|_| OnceLock::new()).collect();
        let _ = segments[0].set(Segment::new(layout, plan[0], schema.identity_bits()));
        Self {
            layout,
            identity: schema.identity_bits().into(),
            segments,
            segment_count: AtomicUsize::new(1),
            capacity: AtomicUsize::new(plan[0]),
            max_capacity: config.max_capacity(),
            grow_lock: Mutex::new(()),
            tag_sets: TagSetLog::with_capacity(plan[0]),
            plan,
        }
    }

    /// The record for `tags`, if one was claimed already. Never creates.
    pub fn find(&self, tags: &TagSet) -> Option<Record<'_>> {
        self.locate(tags, false)
    }

    /// The record for `tags`, claiming and initializing one if this is the first time the tag-set is seen.
    ///
    /// Returns `None` if the table is at its cardinality ceiling.
    pub fn find_or_claim(&self, tags: &TagSet) -> Option<Record<'_>> {
        self.locate(tags, true)
    }

    fn locate(&self, tags: &TagSet, claim: bool) -> Option<Record<'_>> {
        let key = tags.key();
        loop {
            let count = self.segment_count.load(Ordering::Acquire);
            for segment in self.segments[..count].iter().filter_map(OnceLock::get) {
                match segment.probe(self.layout, key, claim) {
                    Probe::Found(record) => return Some(record),
                    Probe::Claimed(record) => {
                        self.tag_sets.push(tags.clone());
                        return Some(record);
                    }
                    Probe::Missing => {}
                }
            }
            if !claim || !self.grow(count) {
                return None;
            }
        }
    }

    /// Append the next planned segment. Returns false once the ceiling is reached.
    fn grow(&self, observed_count: usize) -> bool {
        let _guard = self
            .grow_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = self.segment_count.load(Ordering::Acquire);
        if count > observed_count {
            // someone else grew while we were probing
            return true;
        }
        if count >= self.plan.len() {
            return false;
        }
        let Some(last) = self.segments[count - 1].get() else {
            return false;
        };
        if !last.is_at_threshold() {
            return true;
        }
        let capacity = self.plan[count];
        let _ = self.segments[count].set(Segment::new(self.layout, capacity, &self.identity));
        let total = self.capacity.fetch_add(capacity, Ordering::AcqRel) + capacity;
        self.segment_count.store(count + 1, Ordering::Release);
        tracing::debug!(
            segment = count,
            segment_capacity = capacity,
            total_capacity = total,
            max_capacity = self.max_capacity,
            "grew aggregation table"
        );
        true
    }

    /// Number of records claimed so far.
    pub fn size(&self) -> usize {
        let count = self.segment_count.load(Ordering::Acquire);
        self.segments[..count]
            .iter()
            .filter_map(OnceLock::get)
            .map(|s| s.size.load(Ordering::Acquire))
            .sum()
    }

    /// Total declared capacity of the allocated segments. Never exceeds [`Self::max_capacity`].
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// The cardinality ceiling.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Number of allocated segments.
    pub fn segment_count(&self) -> usize {
        self.segment_count.load(Ordering::Acquire)
    }

    pub(crate) fn tag_sets(&self) -> &TagSetLog {
        &self.tag_sets
    }
}

impl std::fmt::Debug for AggregationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationTable")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity)
            .field("segments", &self.segment_count())
            .finish()
    }
}
