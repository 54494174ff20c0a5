// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod aggregator;
pub mod bucket;
pub(crate) mod clock;
pub mod cursor;
pub mod error;
pub mod kind;
pub mod layout;
pub mod metric;
pub mod monoid;
pub mod multi_cursor;
pub(crate) mod rate_limit;
pub mod record;
pub mod registry;
pub mod report;
pub mod table;
pub(crate) mod tag_log;
pub mod tags;
#[cfg(feature = "test-util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
pub mod window;

pub use aggregator::Aggregator;
pub use error::{ConfigError, LifecycleError, RegistryError, SinkError};
pub use kind::{MetricDescriptor, StrategyRegistry};
pub use registry::{MetricRegistry, Reporter};
pub use report::{ReportRecord, ReportSink};
pub use tags::TagSet;
pub use window::{TimeWindowReporter, TimeWindowReporterBuilder};
