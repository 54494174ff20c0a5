// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metric identity and the table of strategy factories keyed by metric type tag.
//!
//! Every metric carries a type tag (`"counter"`, `"gauge"`, ...). When a reporter first sees a metric it asks the
//! [`StrategyRegistry`] for a strategy matching that tag, wrapped in a [`Histogram`] if buckets are configured for
//! the metric's name. Applications can register their own tags with a factory closure.

use std::{fmt, sync::Arc};

use hashbrown::HashMap;

use crate::{
    bucket::BucketProvider,
    error::ConfigError,
    monoid::{Gauge, GaugeDouble, Histogram, MonoidStrategy, Sum, Timer},
};

/// Type tags of the built-in metric kinds.
pub mod type_tags {
    /// Monotonic sum.
    pub const COUNTER: &str = "counter";
    /// Long gauge.
    pub const GAUGE: &str = "gauge";
    /// Double gauge.
    pub const GAUGE_DOUBLE: &str = "gauge_double";
    /// Duration in nanoseconds.
    pub const TIMER: &str = "timer";
}

/// Name and type tag of a metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricDescriptor {
    name: Arc<str>,
    type_tag: Arc<str>,
}

impl MetricDescriptor {
    /// A metric called `name` aggregated by the strategy registered for `type_tag`.
    pub fn new(name: impl Into<Arc<str>>, type_tag: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }

    /// A counter.
    pub fn counter(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, type_tags::COUNTER)
    }

    /// A long gauge.
    pub fn gauge(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, type_tags::GAUGE)
    }

    /// A double gauge.
    pub fn gauge_double(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, type_tags::GAUGE_DOUBLE)
    }

    /// A timer.
    pub fn timer(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, type_tags::TIMER)
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The metric's type tag.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }
}

impl fmt::Display for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.type_tag)
    }
}

type Factory = Arc<dyn Fn() -> Arc<dyn MonoidStrategy> + Send + Sync>;

/// Strategy factories keyed by type tag.
///
/// [`Default`] registers the built-in tags in [`type_tags`].
#[derive(Clone)]
pub struct StrategyRegistry {
    factories: HashMap<Arc<str>, Factory>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(type_tags::COUNTER, || Arc::new(Sum::default()))
            .register(type_tags::GAUGE, || Arc::new(Gauge::default()))
            .register(type_tags::GAUGE_DOUBLE, || Arc::new(GaugeDouble::default()))
            .register(type_tags::TIMER, || Arc::new(Timer::default()));
        registry
    }
}

impl StrategyRegistry {
    /// A registry without any tags.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `factory` for `type_tag`, replacing any previous factory.
    pub fn register(
        &mut self,
        type_tag: impl Into<Arc<str>>,
        factory: impl Fn() -> Arc<dyn MonoidStrategy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.factories.insert(type_tag.into(), Arc::new(factory));
        self
    }

    /// Whether a factory is registered for `type_tag`.
    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    /// Registered tags, in no particular order.
    pub fn type_tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(|k| &**k)
    }

    /// Build the strategy for `type_tag`, adding a bucket counter per bucket if `buckets` is set.
    pub fn create(
        &self,
        type_tag: &str,
        buckets: Option<Arc<dyn BucketProvider>>,
    ) -> Result<Arc<dyn MonoidStrategy>, ConfigError> {
        let factory = self.factories.get(type_tag).ok_or_else(|| {
            ConfigError::invalid(format!("unknown metric type tag `{type_tag}`"))
        })?;
        let base = factory();
        match buckets {
            Some(buckets) => Ok(Arc::new(Histogram::new(base, buckets)?)),
            None => Ok(base),
        }
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.type_tags()).finish()
    }
}
