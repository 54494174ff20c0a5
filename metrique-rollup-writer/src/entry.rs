// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! [`RollupEntry`], a drained rollup record as a metrique-writer [`Entry`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrique_rollup::{
    ReportRecord,
    layout::FieldValue,
    report::OwnedReportRecord,
};
use metrique_writer_core::{Entry, EntryWriter, MetricFlags, Observation, Unit, Value, ValueWriter};

/// One drained record, written as a single entry.
///
/// The entry carries:
/// - the record's last-update time as its timestamp,
/// - every tag with a value as a string property,
/// - every field as a metric named `<metric>.<field>`.
///
/// Non-negative long fields are written as unsigned observations, negative ones and doubles as floating
/// observations. Non-finite doubles are left out of the entry.
#[derive(Debug, Clone)]
pub struct RollupEntry {
    record: OwnedReportRecord,
    names: Vec<String>,
}

impl RollupEntry {
    /// Wrap an owned record.
    pub fn new(record: OwnedReportRecord) -> Self {
        let names = record
            .fields
            .iter()
            .map(|(field, _)| format!("{}.{}", record.metric, field))
            .collect();
        Self { record, names }
    }

    /// The wrapped record.
    pub fn record(&self) -> &OwnedReportRecord {
        &self.record
    }

    /// Entry timestamp, the record's last update.
    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.record.last_updated_millis)
    }
}

impl From<OwnedReportRecord> for RollupEntry {
    fn from(record: OwnedReportRecord) -> Self {
        Self::new(record)
    }
}

impl From<&ReportRecord<'_>> for RollupEntry {
    fn from(record: &ReportRecord<'_>) -> Self {
        Self::new(record.to_owned_record())
    }
}

impl Entry for RollupEntry {
    fn write<'a>(&'a self, writer: &mut impl EntryWriter<'a>) {
        writer.timestamp(self.timestamp());
        for (key, value) in self.record.tags.pairs() {
            if let (Some(key), Some(value)) = (key, value) {
                writer.value(key, value);
            }
        }
        for (name, (_, value)) in self.names.iter().zip(&self.record.fields) {
            writer.value(name.as_str(), &FieldObservation(*value));
        }
    }
}

struct FieldObservation(FieldValue);

impl FieldObservation {
    fn observation(&self) -> Option<Observation> {
        match self.0 {
            FieldValue::Long(v) => Some(match u64::try_from(v) {
                Ok(unsigned) => Observation::Unsigned(unsigned),
                Err(_) => Observation::Floating(v as f64),
            }),
            FieldValue::Double(v) if v.is_finite() => Some(Observation::Floating(v)),
            FieldValue::Double(_) => None,
        }
    }
}

impl Value for FieldObservation {
    fn write(&self, writer: impl ValueWriter) {
        // an unset value leaves the name out of the entry, like `Option::None`
        if let Some(observation) = self.observation() {
            writer.metric([observation], Unit::None, [], MetricFlags::empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use metrique_rollup::TagSet;
    use metrique_writer::test_util::to_test_entry;

    use super::*;

    fn record(fields: Vec<(&str, FieldValue)>) -> OwnedReportRecord {
        OwnedReportRecord {
            metric: "load".into(),
            tags: TagSet::from_pairs([("host", "a"), ("az", "use1")]),
            fields: fields.into_iter().map(|(n, v)| (n.into(), v)).collect(),
            last_updated_millis: 1_500,
        }
    }

    #[test]
    fn writes_tags_fields_and_timestamp() {
        let entry = to_test_entry(RollupEntry::new(record(vec![
            ("count", FieldValue::Long(3)),
            ("sum", FieldValue::Long(-4)),
            ("last_value", FieldValue::Double(2.5)),
        ])));
        check!(entry.timestamp == Some(UNIX_EPOCH + Duration::from_millis(1_500)));
        check!(entry.values["host"] == "a");
        check!(entry.values["az"] == "use1");
        check!(entry.metrics["load.count"].as_u64() == 3);
        check!(entry.metrics["load.sum"].as_f64() == -4.0);
        check!(entry.metrics["load.last_value"].as_f64() == 2.5);
        check!(entry.metrics["load.count"].unit == Unit::None);
    }

    #[test]
    fn non_finite_doubles_are_left_out() {
        let entry = to_test_entry(RollupEntry::new(record(vec![
            ("min", FieldValue::Double(f64::INFINITY)),
            ("max", FieldValue::Double(f64::NAN)),
            ("count", FieldValue::Long(0)),
        ])));
        check!(!entry.metrics.contains_key("load.min"));
        check!(!entry.metrics.contains_key("load.max"));
        check!(entry.metrics["load.count"].as_u64() == 0);
    }

    #[test]
    fn tags_without_values_are_skipped() {
        let mut owned = record(vec![("count", FieldValue::Long(1))]);
        owned.tags = TagSet::from_flattened([Some("host"), None, Some("dangling")]);
        let entry = to_test_entry(RollupEntry::new(owned));
        check!(entry.values.is_empty());
        check!(entry.metrics.len() == 1);
    }
}
