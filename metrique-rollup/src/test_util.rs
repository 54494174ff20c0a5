// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Utilities for testing code that reports through this crate.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::SinkError,
    report::{OwnedReportRecord, ReportRecord, ReportSink},
};

/// A [`ReportSink`] that keeps every record in memory.
///
/// Clones share the same storage, so a clone can be handed to a reporter and the original inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    records: Arc<Mutex<Vec<OwnedReportRecord>>>,
    flushes: Arc<AtomicUsize>,
}

impl CollectingSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record appended so far.
    pub fn records(&self) -> Vec<OwnedReportRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return every record appended so far.
    pub fn take(&self) -> Vec<OwnedReportRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Records of `metric`, in append order.
    pub fn records_for(&self, metric: &str) -> Vec<OwnedReportRecord> {
        self.records()
            .into_iter()
            .filter(|r| &*r.metric == metric)
            .collect()
    }

    /// Number of completed report cycles.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Acquire)
    }
}

impl ReportSink for CollectingSink {
    fn append(&self, record: &ReportRecord<'_>) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.to_owned_record());
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
