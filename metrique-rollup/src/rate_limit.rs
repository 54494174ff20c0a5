// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

fn seconds_since_process_epoch() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    Instant::now()
        .duration_since(*EPOCH.get_or_init(Instant::now))
        .as_secs()
}

/// Lets a log statement through at most once every interval across all threads, counting the calls it held back.
///
/// Used on the emit path, where the same failure (e.g. a table at its cardinality ceiling) can repeat millions of
/// times a second. Each owner keeps its own limiter, so one noisy metric cannot hide another's warnings.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    interval_secs: u64,
    next_call: AtomicU64,
    suppressed: AtomicU64,
}

impl RateLimiter {
    /// A limiter with second granularity. Intervals below one second are rounded up.
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval_secs: interval.as_secs().max(1),
            next_call: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// `Some(suppressed)` when the caller may log now, with the number of calls held back since the last one.
    pub(crate) fn check(&self) -> Option<u64> {
        self.check_at(seconds_since_process_epoch())
    }

    fn check_at(&self, now_secs: u64) -> Option<u64> {
        let next = self.next_call.load(Ordering::Relaxed);
        if next <= now_secs
            && self
                .next_call
                .compare_exchange(
                    next,
                    now_secs.saturating_add(self.interval_secs),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            return Some(self.suppressed.swap(0, Ordering::Relaxed));
        }
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        None
    }

    #[cfg(test)]
    pub(crate) fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}
