// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metric facades handed out by [`MetricRegistry`](crate::registry::MetricRegistry).
//!
//! Every facade stamps values with the registry's clock and passes them to each attached reporter. Facades are
//! cheap to clone and never block.

use std::time::Duration;

use crate::{
    kind::MetricDescriptor,
    registry::MetricHandle,
    tags::TagSet,
};

macro_rules! facade {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            handle: MetricHandle,
        }

        impl $name {
            pub(crate) fn new(handle: MetricHandle) -> Self {
                Self { handle }
            }

            /// Name and type tag of this metric.
            pub fn descriptor(&self) -> &MetricDescriptor {
                &self.handle.descriptor
            }
        }
    };
}

facade!(
    /// A monotonic sum.
    Counter
);
facade!(
    /// The latest long value, with count, sum, min and max per window.
    Gauge
);
facade!(
    /// The latest double value, with count, sum, min and max per window.
    GaugeDouble
);
facade!(
    /// Durations, recorded in nanoseconds.
    Timer
);
facade!(
    /// A metric whose aggregation is supplied by a registered strategy.
    CustomMetric
);

impl Counter {
    /// Add one.
    pub fn inc(&self, tags: &TagSet) {
        self.add(1, tags)
    }

    /// Subtract one.
    pub fn dec(&self, tags: &TagSet) {
        self.add(-1, tags)
    }

    /// Add `delta`.
    pub fn add(&self, delta: i64, tags: &TagSet) {
        self.handle.emit(delta, tags)
    }
}

impl Gauge {
    /// Record the current value.
    pub fn set(&self, value: i64, tags: &TagSet) {
        self.handle.emit(value, tags)
    }
}

impl GaugeDouble {
    /// Record the current value.
    pub fn set(&self, value: f64, tags: &TagSet) {
        self.handle.emit(value.to_bits() as i64, tags)
    }
}

impl Timer {
    /// Record one duration. Durations beyond `i64::MAX` nanoseconds saturate.
    pub fn update(&self, duration: Duration, tags: &TagSet) {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.handle.emit(nanos, tags)
    }

    /// Start timing. The elapsed time is recorded when the guard is stopped or dropped.
    pub fn start(&self, tags: TagSet) -> TimerGuard {
        TimerGuard {
            start: metrique_timesource::Instant::now(self.handle.registry.time_source()),
            timer: self.clone(),
            tags,
            recorded: false,
        }
    }
}

impl CustomMetric {
    /// Emit an encoded value.
    pub fn emit(&self, value: i64, tags: &TagSet) {
        self.handle.emit(value, tags)
    }
}

/// Records the time since [`Timer::start`] once, when stopped or dropped.
#[must_use = "dropping the guard immediately records a duration of zero"]
#[derive(Debug)]
pub struct TimerGuard {
    timer: Timer,
    tags: TagSet,
    start: metrique_timesource::Instant,
    recorded: bool,
}

impl TimerGuard {
    /// Record the elapsed time now and return it.
    pub fn stop(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.timer.update(elapsed, &self.tags);
        }
        elapsed
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if !self.recorded {
            self.record();
        }
    }
}
