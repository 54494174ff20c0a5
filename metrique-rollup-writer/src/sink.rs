// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};

use metrique_rollup::{ReportRecord, ReportSink, SinkError};
use metrique_writer_core::EntrySink;

use crate::entry::RollupEntry;

/// A [`ReportSink`] that appends every drained record to a metrique-writer [`EntrySink`].
///
/// Each report cycle ends by waiting for the entry sink's flush on the reporter thread.
///
/// ```
/// # use metrique_rollup::TimeWindowReporter;
/// # use metrique_rollup_writer::EntrySinkReporter;
/// # use metrique_writer::test_util::test_entry_sink;
/// let output = test_entry_sink();
/// let reporter = TimeWindowReporter::builder()
///     .sink(EntrySinkReporter::new(output.sink))
///     .build()
///     .unwrap();
/// # drop(reporter);
/// ```
#[derive(Debug)]
pub struct EntrySinkReporter<S> {
    sink: S,
    pending: AtomicUsize,
}

impl<S> EntrySinkReporter<S> {
    /// Forward records into `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            pending: AtomicUsize::new(0),
        }
    }

    /// The wrapped entry sink.
    pub fn inner(&self) -> &S {
        &self.sink
    }
}

impl<S> ReportSink for EntrySinkReporter<S>
where
    S: EntrySink<RollupEntry> + Send + Sync,
{
    fn append(&self, record: &ReportRecord<'_>) {
        self.sink.append(RollupEntry::from(record));
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    fn flush(&self) -> Result<(), SinkError> {
        let entries = self.pending.swap(0, Ordering::Relaxed);
        futures::executor::block_on(self.sink.flush_async());
        tracing::debug!(entries, "flushed rollup entries");
        Ok(())
    }
}
