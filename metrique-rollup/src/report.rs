// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Report sinks: where drained records go at the end of every window.
//!
//! A report cycle calls [`ReportSink::append`] once per record that changed since the previous cycle, then
//! [`ReportSink::flush`] once. What a sink does with the records (log them, queue them for a metrics backend,
//! collect them for a test) is up to the sink.

use std::{fmt, sync::Arc};

use crate::{
    error::SinkError,
    layout::{FieldType, FieldValue, Schema},
    tags::TagSet,
};

/// One drained record.
#[derive(Clone, Copy)]
pub struct ReportRecord<'a> {
    metric: &'a str,
    tags: &'a TagSet,
    schema: &'a Schema,
    values: &'a [FieldValue],
    last_updated_millis: u64,
}

impl<'a> ReportRecord<'a> {
    /// A record of `metric` for `tags`. `values` must match `schema` in length and order.
    pub fn new(
        metric: &'a str,
        tags: &'a TagSet,
        schema: &'a Schema,
        values: &'a [FieldValue],
        last_updated_millis: u64,
    ) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self {
            metric,
            tags,
            schema,
            values,
            last_updated_millis,
        }
    }

    /// Name of the metric.
    pub fn metric(&self) -> &'a str {
        self.metric
    }

    /// Tag-set of the record.
    pub fn tags(&self) -> &'a TagSet {
        self.tags
    }

    /// Field names, in value order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = &'a str> + 'a {
        self.schema.names()
    }

    /// Field types, in value order.
    pub fn types(&self) -> &'a [FieldType] {
        self.schema.types()
    }

    /// Field values.
    pub fn values(&self) -> &'a [FieldValue] {
        self.values
    }

    /// `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, FieldValue)> + 'a {
        self.schema.names().zip(self.values.iter().copied())
    }

    /// The value of field `name`.
    pub fn value(&self, name: &str) -> Option<FieldValue> {
        self.schema.index_of(name).map(|i| self.values[i])
    }

    /// Milliseconds since the epoch of the record's last update.
    pub fn last_updated_millis(&self) -> u64 {
        self.last_updated_millis
    }

    /// Copy into an owned record.
    pub fn to_owned_record(&self) -> OwnedReportRecord {
        OwnedReportRecord {
            metric: self.metric.into(),
            tags: self.tags.clone(),
            fields: self.iter().map(|(name, value)| (name.into(), value)).collect(),
            last_updated_millis: self.last_updated_millis,
        }
    }
}

impl fmt::Debug for ReportRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportRecord")
            .field("metric", &self.metric)
            .field("tags", &format_args!("{}", self.tags))
            .field("fields", &FieldsDisplay(self))
            .field("last_updated_millis", &self.last_updated_millis)
            .finish()
    }
}

struct FieldsDisplay<'r, 'a>(&'r ReportRecord<'a>);

impl fmt::Debug for FieldsDisplay<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for FieldsDisplay<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// An owned copy of a [`ReportRecord`], for sinks that hand records to another thread.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedReportRecord {
    /// Name of the metric.
    pub metric: Arc<str>,
    /// Tag-set of the record.
    pub tags: TagSet,
    /// `(name, value)` pairs in schema order.
    pub fields: Vec<(Arc<str>, FieldValue)>,
    /// Milliseconds since the epoch of the record's last update.
    pub last_updated_millis: u64,
}

impl OwnedReportRecord {
    /// The value of field `name`.
    pub fn value(&self, name: &str) -> Option<FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| &**field == name)
            .map(|(_, value)| *value)
    }
}

/// Receives drained records.
pub trait ReportSink: Send + Sync {
    /// Handle one record. Called from the reporter's thread, must not block for long.
    fn append(&self, record: &ReportRecord<'_>);

    /// Called once at the end of every report cycle.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<T: ReportSink + ?Sized> ReportSink for Arc<T> {
    fn append(&self, record: &ReportRecord<'_>) {
        (**self).append(record)
    }

    fn flush(&self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

impl<T: ReportSink + ?Sized> ReportSink for Box<T> {
    fn append(&self, record: &ReportRecord<'_>) {
        (**self).append(record)
    }

    fn flush(&self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// A sink calling a closure per record. Created by [`sink_fn`].
pub struct FnSink<F>(F);

/// Use a closure as a [`ReportSink`].
pub fn sink_fn<F: Fn(&ReportRecord<'_>) + Send + Sync>(f: F) -> FnSink<F> {
    FnSink(f)
}

impl<F: Fn(&ReportRecord<'_>) + Send + Sync> ReportSink for FnSink<F> {
    fn append(&self, record: &ReportRecord<'_>) {
        (self.0)(record)
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSink")
    }
}

/// Logs every record as an `INFO` event with target `metrique_rollup::report`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn append(&self, record: &ReportRecord<'_>) {
        tracing::info!(
            target: "metrique_rollup::report",
            metric = record.metric(),
            tags = %record.tags(),
            fields = %FieldsDisplay(record),
            last_updated_millis = record.last_updated_millis(),
            "metric record"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert2::check;

    use super::*;
    use crate::layout::FieldSpec;

    fn schema() -> Schema {
        Schema::new([FieldSpec::long("count", 0), FieldSpec::double("sum", 0.0)]).unwrap()
    }

    #[test]
    fn record_accessors() {
        let schema = schema();
        let tags = TagSet::builder().tag("host", "a").build();
        let values = [FieldValue::Long(3), FieldValue::Double(1.5)];
        let record = ReportRecord::new("latency", &tags, &schema, &values, 42);
        check!(record.value("sum") == Some(FieldValue::Double(1.5)));
        check!(record.value("max").is_none());
        check!(FieldsDisplay(&record).to_string() == "{count=3, sum=1.5}");

        let owned = record.to_owned_record();
        check!(&*owned.metric == "latency");
        check!(owned.value("count") == Some(FieldValue::Long(3)));
        check!(owned.last_updated_millis == 42);
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(vec![]);
        let sink = sink_fn(|record: &ReportRecord<'_>| {
            seen.lock().unwrap().push(record.metric().to_owned())
        });
        let schema = schema();
        let tags = TagSet::empty();
        let values = [FieldValue::Long(1), FieldValue::Double(1.0)];
        sink.append(&ReportRecord::new("a", &tags, &schema, &values, 1));
        check!(sink.flush().is_ok());
        check!(*seen.lock().unwrap() == ["a"]);
    }
}
