// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The double-buffered time-window reporter.
//!
//! Every metric owns two [`Aggregator`]s, its generations. A value timestamped `t` is written to generation
//! `(t / window) % 2`, so consecutive windows alternate generations. A report running during window `w` reads the
//! generation written during `w - 1`, which nobody writes to until `w + 1` begins, and read-and-resets every record
//! updated since the previous report. Writers and the reporter never take a lock against each other.
//!
//! Records are not cleared between windows. A record that was not updated since the previous report has a
//! last-update timestamp at or below the reporter's watermark and is skipped.
//!
//! ```
//! use metrique_rollup::{kind::MetricDescriptor, report::LogSink, tags::TagSet, window::TimeWindowReporter};
//! use std::time::Duration;
//!
//! let reporter = TimeWindowReporter::builder()
//!     .window(Duration::from_secs(10))
//!     .sink(LogSink)
//!     .build()
//!     .unwrap();
//! reporter.start().unwrap();
//! let requests = MetricDescriptor::counter("requests");
//! reporter.emit(&requests, 1_700_000_000_000, 1, &TagSet::builder().tag("op", "get").build());
//! reporter.stop().unwrap();
//! ```

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use crossbeam_utils::sync::{Parker, Unparker};
use hashbrown::HashMap;
use metrique_timesource::TimeSource;

use crate::{
    aggregator::Aggregator,
    bucket::BucketProvider,
    clock::now_millis,
    error::{ConfigError, LifecycleError, SinkError},
    kind::{MetricDescriptor, StrategyRegistry},
    multi_cursor::MultiCursor,
    registry::Reporter,
    report::{LogSink, ReportRecord, ReportSink},
    table::TableConfig,
    tags::TagSet,
};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_PADDING: Duration = Duration::from_millis(100);
const DEFAULT_THREAD_NAME: &str = "metrique-rollup-reporter";

/// Plain-data reporter settings, e.g. loaded from a config file.
///
/// ```
/// # #[cfg(feature = "serde")] {
/// use metrique_rollup::window::ReporterConfig;
///
/// let config: ReporterConfig = serde_json::from_str(r#"{"window_millis": 10000}"#).unwrap();
/// assert_eq!(config.padding_millis, 100);
/// let reporter = config.into_builder().build().unwrap();
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct ReporterConfig {
    /// Length of one reporting window.
    pub window_millis: u64,
    /// Delay after a window boundary before the report runs.
    pub padding_millis: u64,
    /// Records in the first segment of every table.
    pub initial_capacity: usize,
    /// Cardinality ceiling of every table.
    pub max_capacity: usize,
    /// Name of the scheduler thread.
    pub thread_name: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        let table = TableConfig::default();
        Self {
            window_millis: DEFAULT_WINDOW.as_millis() as u64,
            padding_millis: DEFAULT_PADDING.as_millis() as u64,
            initial_capacity: table.initial_capacity(),
            max_capacity: table.max_capacity(),
            thread_name: DEFAULT_THREAD_NAME.into(),
        }
    }
}

impl ReporterConfig {
    /// A builder preloaded with these settings. Validation happens in [`TimeWindowReporterBuilder::build`].
    pub fn into_builder(self) -> TimeWindowReporterBuilder {
        TimeWindowReporterBuilder {
            window: Duration::from_millis(self.window_millis),
            padding: Duration::from_millis(self.padding_millis),
            initial_capacity: self.initial_capacity,
            max_capacity: self.max_capacity,
            thread_name: self.thread_name,
            ..Default::default()
        }
    }
}

/// Builder for [`TimeWindowReporter`].
pub struct TimeWindowReporterBuilder {
    name: String,
    window: Duration,
    padding: Duration,
    initial_capacity: usize,
    max_capacity: usize,
    histograms: HashMap<String, Arc<dyn BucketProvider>>,
    strategies: StrategyRegistry,
    time_source: TimeSource,
    thread_name: String,
    sink: Arc<dyn ReportSink>,
}

impl Default for TimeWindowReporterBuilder {
    fn default() -> Self {
        let table = TableConfig::default();
        Self {
            name: "default".into(),
            window: DEFAULT_WINDOW,
            padding: DEFAULT_PADDING,
            initial_capacity: table.initial_capacity(),
            max_capacity: table.max_capacity(),
            histograms: HashMap::new(),
            strategies: StrategyRegistry::default(),
            time_source: TimeSource::default(),
            thread_name: DEFAULT_THREAD_NAME.into(),
            sink: Arc::new(LogSink),
        }
    }
}

impl TimeWindowReporterBuilder {
    /// A builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Length of a reporting window. Must be at least one millisecond.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// How long after a window boundary the report runs. Must be shorter than the window.
    ///
    /// Values written just before the boundary by slow writers land in the generation before it is read.
    pub fn padding(mut self, padding: Duration) -> Self {
        self.padding = padding;
        self
    }

    /// Table sizing, applied to both generations of every metric.
    pub fn table_config(mut self, config: TableConfig) -> Self {
        self.initial_capacity = config.initial_capacity();
        self.max_capacity = config.max_capacity();
        self
    }

    /// Aggregate metric `name` as a histogram over `buckets`.
    pub fn histogram(
        mut self,
        name: impl Into<String>,
        buckets: impl BucketProvider + 'static,
    ) -> Self {
        self.histograms.insert(name.into(), Arc::new(buckets));
        self
    }

    /// Strategy factories used to resolve metric type tags.
    pub fn strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Clock used to pick the generation a report reads.
    pub fn time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Name of the scheduler thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Where drained records go. Defaults to [`LogSink`].
    pub fn sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Validate the settings and build a stopped reporter.
    pub fn build(self) -> Result<TimeWindowReporter, ConfigError> {
        let window_millis = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        if window_millis == 0 {
            return Err(ConfigError::invalid("must be at least 1ms").for_setting("window"));
        }
        let padding_millis = u64::try_from(self.padding.as_millis()).unwrap_or(u64::MAX);
        if padding_millis >= window_millis {
            return Err(
                ConfigError::invalid("must be shorter than the window").for_setting("padding")
            );
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::invalid("must not be empty").for_setting("thread_name"));
        }
        let table = TableConfig::new(self.initial_capacity, self.max_capacity)?;
        Ok(TimeWindowReporter {
            shared: Arc::new(Shared {
                name: self.name,
                window_millis,
                padding_millis,
                table,
                histograms: self.histograms,
                strategies: self.strategies,
                time_source: self.time_source,
                thread_name: self.thread_name,
                sink: self.sink,
                metrics: ArcSwap::from_pointee(HashMap::new()),
                insert_lock: Mutex::new(()),
                report_lock: Mutex::new(()),
                watermark: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
            scheduler: Mutex::new(None),
        })
    }
}

struct MetricSlot {
    descriptor: MetricDescriptor,
    generations: [Aggregator; 2],
}

// `None` marks a metric whose strategy could not be created, so the failure is only logged once.
type MetricMap = HashMap<Arc<str>, Option<Arc<MetricSlot>>>;

struct Shared {
    name: String,
    window_millis: u64,
    padding_millis: u64,
    table: TableConfig,
    histograms: HashMap<String, Arc<dyn BucketProvider>>,
    strategies: StrategyRegistry,
    time_source: TimeSource,
    thread_name: String,
    sink: Arc<dyn ReportSink>,
    metrics: ArcSwap<MetricMap>,
    insert_lock: Mutex<()>,
    report_lock: Mutex<()>,
    watermark: AtomicU64,
    epoch: AtomicU64,
}

struct Scheduler {
    handle: thread::JoinHandle<()>,
    unparker: Unparker,
}

/// Aggregates emitted values into two alternating generations and reports the idle one once per window.
pub struct TimeWindowReporter {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl TimeWindowReporter {
    /// A builder with default settings.
    pub fn builder() -> TimeWindowReporterBuilder {
        TimeWindowReporterBuilder::default()
    }

    /// Combine `value` into `metric`'s record for `tags`, in the generation owning `timestamp_millis`.
    ///
    /// Never blocks except the first time a metric name is seen.
    pub fn emit(&self, metric: &MetricDescriptor, timestamp_millis: u64, value: i64, tags: &TagSet) {
        let generation = self.shared.generation_for(timestamp_millis);
        let metrics = self.shared.metrics.load();
        match metrics.get(metric.name()) {
            Some(Some(slot)) => slot.generations[generation].apply(tags, value, timestamp_millis),
            Some(None) => {}
            None => {
                drop(metrics);
                if let Some(slot) = self.shared.register(metric) {
                    slot.generations[generation].apply(tags, value, timestamp_millis);
                }
            }
        }
    }

    /// Start the scheduler thread.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_some() {
            return Err(LifecycleError::AlreadyStarted);
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.shared.thread_name.clone())
            .spawn(move || shared.run(parker, epoch))
            .map_err(|err| LifecycleError::SpawnFailed(err.kind()))?;
        *scheduler = Some(Scheduler { handle, unparker });
        tracing::info!(
            reporter = %self.shared.name,
            window_millis = self.shared.window_millis,
            "started time window reporter"
        );
        Ok(())
    }

    /// Stop the scheduler thread, waiting for an in-flight report to finish.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(LifecycleError::NotStarted)?;
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        scheduler.unparker.unpark();
        if scheduler.handle.thread().id() == thread::current().id() {
            // stopped from within a report cycle, the thread exits once the cycle returns
            return Ok(());
        }
        tracing::debug!(reporter = %self.shared.name, "awaiting reporter thread shutdown");
        if scheduler.handle.join().is_err() {
            tracing::error!(reporter = %self.shared.name, "reporter thread panicked");
        }
        tracing::info!(reporter = %self.shared.name, "stopped time window reporter");
        Ok(())
    }

    /// Whether the scheduler thread is running.
    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Report the generation that is not being written right now, on the calling thread.
    ///
    /// Returns the number of records handed to the sink, or the sink's flush error. Records are drained even if the
    /// flush fails.
    pub fn report_now(&self) -> Result<usize, SinkError> {
        self.shared.report()
    }

    /// The generation values timestamped `timestamp_millis` are written to.
    pub fn generation_for(&self, timestamp_millis: u64) -> usize {
        self.shared.generation_for(timestamp_millis)
    }

    /// Newest last-update timestamp included in a report so far.
    pub fn watermark(&self) -> u64 {
        self.shared.watermark.load(Ordering::Acquire)
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.shared.window_millis)
    }

    /// Names of every metric seen so far.
    pub fn metric_names(&self) -> Vec<Arc<str>> {
        self.shared.metrics.load().keys().cloned().collect()
    }

    /// Total records claimed for `metric` across both generations.
    pub fn cardinality(&self, metric: &str) -> usize {
        match self.shared.metrics.load().get(metric) {
            Some(Some(slot)) => slot.generations.iter().map(|g| g.table().size()).sum(),
            _ => 0,
        }
    }
}

impl Reporter for TimeWindowReporter {
    fn emit(&self, metric: &MetricDescriptor, timestamp_millis: u64, value: i64, tags: &TagSet) {
        TimeWindowReporter::emit(self, metric, timestamp_millis, value, tags)
    }
}

impl Drop for TimeWindowReporter {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

impl fmt::Debug for TimeWindowReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWindowReporter")
            .field("name", &self.shared.name)
            .field("window_millis", &self.shared.window_millis)
            .field("padding_millis", &self.shared.padding_millis)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn generation_for(&self, timestamp_millis: u64) -> usize {
        ((timestamp_millis / self.window_millis) % 2) as usize
    }

    fn delay_to_next_report(&self) -> Duration {
        let now = now_millis(&self.time_source);
        Duration::from_millis(
            (self.window_millis - now % self.window_millis).saturating_add(self.padding_millis),
        )
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn register(&self, metric: &MetricDescriptor) -> Option<Arc<MetricSlot>> {
        let _guard = self
            .insert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = self.metrics.load_full();
        if let Some(existing) = current.get(metric.name()) {
            return existing.clone();
        }
        let buckets = self.histograms.get(metric.name()).cloned();
        let slot = match self.strategies.create(metric.type_tag(), buckets) {
            Ok(strategy) => {
                tracing::debug!(reporter = %self.name, %metric, "aggregating new metric");
                Some(Arc::new(MetricSlot {
                    descriptor: metric.clone(),
                    generations: [
                        Aggregator::named(metric.name(), Arc::clone(&strategy), self.table),
                        Aggregator::named(metric.name(), strategy, self.table),
                    ],
                }))
            }
            Err(err) => {
                tracing::error!(
                    reporter = %self.name,
                    %metric,
                    error = %err,
                    "cannot aggregate metric, its values will be dropped"
                );
                None
            }
        };
        let mut next = MetricMap::clone(&current);
        next.insert(metric.name().into(), slot.clone());
        self.metrics.store(Arc::new(next));
        slot
    }

    fn report(&self) -> Result<usize, SinkError> {
        let _guard = self
            .report_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = now_millis(&self.time_source);
        let frozen = 1 - self.generation_for(now);
        let watermark = self.watermark.load(Ordering::Acquire);

        let metrics = self.metrics.load();
        let mut slots: Vec<&MetricSlot> = metrics.values().filter_map(|s| s.as_deref()).collect();
        slots.sort_by(|a, b| a.descriptor.name().cmp(b.descriptor.name()));
        let mut merged = MultiCursor::new(
            slots
                .iter()
                .map(|slot| (&slot.descriptor, &slot.generations[frozen])),
        );

        let mut newest = watermark;
        let mut appended = 0;
        while let Some(tags) = merged.next_group() {
            while let Some((descriptor, entry)) = merged.next_entry() {
                let last_updated = entry.last_updated();
                if last_updated <= watermark {
                    continue;
                }
                newest = newest.max(last_updated);
                let values = entry.drain();
                self.sink.append(&ReportRecord::new(
                    descriptor.name(),
                    tags,
                    entry.schema(),
                    &values,
                    last_updated,
                ));
                appended += 1;
            }
        }
        self.watermark.fetch_max(newest, Ordering::AcqRel);
        self.sink.flush()?;
        Ok(appended)
    }

    fn run_cycle(&self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.report())) {
            Ok(Ok(records)) => tracing::debug!(records, "report cycle finished"),
            Ok(Err(err)) => tracing::error!(error = %err, "report sink failed to flush"),
            Err(_) => tracing::error!("report cycle panicked, retrying next window"),
        }
    }

    fn run(self: Arc<Self>, parker: Parker, epoch: u64) {
        let span = tracing::info_span!("time window reporter", reporter = %self.name);
        let _enter = span.enter();
        tracing::debug!(epoch, "reporter thread running");
        loop {
            let Some(deadline) = Instant::now().checked_add(self.delay_to_next_report()) else {
                tracing::warn!("next window boundary is too far away to schedule, waiting for stop");
                while self.is_current(epoch) {
                    parker.park();
                }
                break;
            };
            // wakeups before the deadline that aren't a stop request go back to sleep
            while self.is_current(epoch) && Instant::now() < deadline {
                parker.park_deadline(deadline);
            }
            if !self.is_current(epoch) {
                break;
            }
            self.run_cycle();
        }
        tracing::debug!(epoch, "reporter thread superseded, exiting");
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0)]
    #[case(999, 0)]
    #[case(1_000, 1)]
    #[case(2_500, 0)]
    #[case(3_000, 1)]
    fn generations_alternate(#[case] timestamp: u64, #[case] generation: usize) {
        let reporter = TimeWindowReporter::builder()
            .window(Duration::from_secs(1))
            .build()
            .unwrap();
        check!(reporter.generation_for(timestamp) == generation);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let err = TimeWindowReporter::builder()
            .window(Duration::ZERO)
            .build()
            .unwrap_err();
        check!(err.reason().contains("window"));

        let err = TimeWindowReporter::builder()
            .window(Duration::from_secs(1))
            .padding(Duration::from_secs(1))
            .build()
            .unwrap_err();
        check!(err.reason().contains("padding"));

        let err = ReporterConfig {
            max_capacity: 0,
            ..Default::default()
        }
        .into_builder()
        .build()
        .unwrap_err();
        check!(err.reason().contains("max_capacity"));
    }

    #[test]
    fn lifecycle_errors() {
        let reporter = TimeWindowReporter::builder().build().unwrap();
        check!(reporter.stop() == Err(LifecycleError::NotStarted));
        reporter.start().unwrap();
        check!(reporter.is_running());
        check!(reporter.start() == Err(LifecycleError::AlreadyStarted));
        reporter.stop().unwrap();
        check!(!reporter.is_running());
        check!(reporter.stop() == Err(LifecycleError::NotStarted));
        // restart after stop
        reporter.start().unwrap();
        drop(reporter);
    }

    #[test]
    fn extreme_windows_do_not_overflow() {
        let reporter = TimeWindowReporter::builder()
            .window(Duration::MAX)
            .padding(Duration::from_millis(u64::MAX - 1))
            .build()
            .unwrap();
        check!(reporter.window() == Duration::from_millis(u64::MAX));
        check!(reporter.shared.delay_to_next_report() == Duration::from_millis(u64::MAX));
        reporter.start().unwrap();
        reporter.stop().unwrap();
    }

    #[test]
    fn unknown_type_tag_drops_values() {
        let reporter = TimeWindowReporter::builder().build().unwrap();
        let metric = MetricDescriptor::new("weird", "meter");
        reporter.emit(&metric, 1, 1, &TagSet::empty());
        reporter.emit(&metric, 2, 1, &TagSet::empty());
        check!(reporter.metric_names() == [Arc::<str>::from("weird")]);
        check!(reporter.cardinality("weird") == 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_round_trips_through_json() {
        let config: ReporterConfig =
            serde_json::from_str(r#"{"window_millis": 5000, "max_capacity": 10}"#).unwrap();
        check!(config.window_millis == 5000);
        check!(config.initial_capacity == 128);
        check!(config.thread_name == "metrique-rollup-reporter");
        check!(serde_json::from_str::<ReporterConfig>(r#"{"window": 1}"#).is_err());
    }
}
