// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The metric registry: hands out metric facades by name and fans their values out to reporters.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use metrique_timesource::TimeSource;

use crate::{
    clock::now_millis,
    error::RegistryError,
    kind::MetricDescriptor,
    metric::{Counter, CustomMetric, Gauge, GaugeDouble, Timer},
    tags::TagSet,
};

/// Receives every value emitted through a [`MetricRegistry`].
///
/// Called on the application's hot path: implementations must not block or panic.
pub trait Reporter: Send + Sync {
    /// Record `value` for `metric` under `tags`.
    fn emit(&self, metric: &MetricDescriptor, timestamp_millis: u64, value: i64, tags: &TagSet);
}

impl<T: Reporter + ?Sized> Reporter for Arc<T> {
    fn emit(&self, metric: &MetricDescriptor, timestamp_millis: u64, value: i64, tags: &TagSet) {
        (**self).emit(metric, timestamp_millis, value, tags)
    }
}

pub(crate) struct RegistryInner {
    time_source: TimeSource,
    reporters: ArcSwap<Vec<Arc<dyn Reporter>>>,
    metrics: Mutex<HashMap<Arc<str>, MetricDescriptor>>,
}

impl RegistryInner {
    #[inline]
    pub(crate) fn emit(&self, metric: &MetricDescriptor, value: i64, tags: &TagSet) {
        let reporters = self.reporters.load();
        if reporters.is_empty() {
            return;
        }
        let timestamp_millis = now_millis(&self.time_source);
        for reporter in reporters.iter() {
            reporter.emit(metric, timestamp_millis, value, tags);
        }
    }

    pub(crate) fn time_source(&self) -> &TimeSource {
        &self.time_source
    }
}

/// A metric bound to the registry that created it.
#[derive(Clone)]
pub(crate) struct MetricHandle {
    pub(crate) descriptor: MetricDescriptor,
    pub(crate) registry: Arc<RegistryInner>,
}

impl MetricHandle {
    #[inline]
    pub(crate) fn emit(&self, value: i64, tags: &TagSet) {
        self.registry.emit(&self.descriptor, value, tags)
    }
}

impl fmt::Debug for MetricHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.descriptor, f)
    }
}

/// Hands out metrics by name. Cloning is cheap and clones share metrics and reporters.
///
/// ```
/// # use std::sync::Arc;
/// # use metrique_rollup::{registry::MetricRegistry, tags::TagSet, window::TimeWindowReporter};
/// let registry = MetricRegistry::new();
/// registry.add_reporter(Arc::new(TimeWindowReporter::builder().build().unwrap()));
///
/// let requests = registry.counter("requests").unwrap();
/// requests.inc(&TagSet::builder().tag("op", "get").build());
/// assert!(registry.gauge("requests").is_err());
/// ```
#[derive(Clone)]
pub struct MetricRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::with_time_source(TimeSource::default())
    }
}

impl MetricRegistry {
    /// A registry without reporters, stamping values with the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry stamping values with `time_source`.
    pub fn with_time_source(time_source: TimeSource) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                time_source,
                reporters: ArcSwap::from_pointee(Vec::new()),
                metrics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Send every subsequent value to `reporter` too.
    pub fn add_reporter(&self, reporter: Arc<dyn Reporter>) {
        self.inner.reporters.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&reporter));
            next
        });
    }

    /// Detach every reporter.
    pub fn clear_reporters(&self) {
        self.inner.reporters.store(Arc::new(Vec::new()));
    }

    /// Number of attached reporters.
    pub fn reporter_count(&self) -> usize {
        self.inner.reporters.load().len()
    }

    /// The counter called `name`.
    pub fn counter(&self, name: &str) -> Result<Counter, RegistryError> {
        self.register(MetricDescriptor::counter(name)).map(Counter::new)
    }

    /// The long gauge called `name`.
    pub fn gauge(&self, name: &str) -> Result<Gauge, RegistryError> {
        self.register(MetricDescriptor::gauge(name)).map(Gauge::new)
    }

    /// The double gauge called `name`.
    pub fn gauge_double(&self, name: &str) -> Result<GaugeDouble, RegistryError> {
        self.register(MetricDescriptor::gauge_double(name))
            .map(GaugeDouble::new)
    }

    /// The timer called `name`.
    pub fn timer(&self, name: &str) -> Result<Timer, RegistryError> {
        self.register(MetricDescriptor::timer(name)).map(Timer::new)
    }

    /// A metric aggregated by the strategy registered for `type_tag` in the reporters' strategy registries.
    pub fn custom(&self, name: &str, type_tag: &str) -> Result<CustomMetric, RegistryError> {
        self.register(MetricDescriptor::new(name, type_tag))
            .map(CustomMetric::new)
    }

    /// Descriptors of every registered metric, sorted by name.
    pub fn metrics(&self) -> Vec<MetricDescriptor> {
        let metrics = self
            .inner
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = metrics.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    fn register(&self, descriptor: MetricDescriptor) -> Result<MetricHandle, RegistryError> {
        let mut metrics = self
            .inner
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let descriptor = match metrics.get(descriptor.name()) {
            Some(existing) if existing.type_tag() == descriptor.type_tag() => existing.clone(),
            Some(existing) => {
                return Err(RegistryError {
                    name: descriptor.name().to_owned(),
                    registered: existing.type_tag().to_owned(),
                    requested: descriptor.type_tag().to_owned(),
                });
            }
            None => {
                metrics.insert(descriptor.name().into(), descriptor.clone());
                descriptor
            }
        };
        Ok(MetricHandle {
            descriptor,
            registry: Arc::clone(&self.inner),
        })
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("time_source", &self.inner.time_source)
            .field("reporters", &self.reporter_count())
            .finish_non_exhaustive()
    }
}
