// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Field schemas and the fixed-size record layout they map to.
//!
//! Every record in a table is a run of 64-bit words:
//!
//! ```text
//! | key | last updated | field 0 | field 1 | ... | field n-1 | padding to a 64 byte boundary |
//! ```
//!
//! Long fields hold an `i64`, double fields hold the bit pattern of an `f64`. Records start on a cache line and span
//! a whole number of cache lines, so two records that are updated concurrently never share a line.

use std::{borrow::Cow, fmt, sync::atomic::AtomicU64};

use crate::error::ConfigError;

/// Index of the word holding the record's key.
pub(crate) const KEY_WORD: usize = 0;
/// Index of the word holding the record's last update timestamp.
pub(crate) const TIMESTAMP_WORD: usize = 1;
/// Number of words in front of the aggregate fields.
pub(crate) const RESERVED_WORDS: usize = 2;

pub(crate) const WORDS_PER_LINE: usize = 8;

/// Upper bound on the number of aggregate fields in a schema.
pub const MAX_FIELDS: usize = 1024;

/// One cache line of atomic words.
#[repr(C, align(64))]
#[derive(Default)]
pub(crate) struct CacheLine(pub(crate) [AtomicU64; WORDS_PER_LINE]);

/// How a field's 64 bits are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum FieldType {
    /// A signed 64-bit integer.
    Long,
    /// An IEEE-754 double.
    Double,
}

impl FieldType {
    /// Decode raw bits according to this type.
    pub fn decode(self, bits: u64) -> FieldValue {
        match self {
            FieldType::Long => FieldValue::Long(bits as i64),
            FieldType::Double => FieldValue::Double(f64::from_bits(bits)),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldType::Long => "LONG",
            FieldType::Double => "DOUBLE",
        })
    }
}

/// A decoded field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// Value of a [`FieldType::Long`] field.
    Long(i64),
    /// Value of a [`FieldType::Double`] field.
    Double(f64),
}

impl FieldValue {
    /// The type of this value.
    pub fn field_type(self) -> FieldType {
        match self {
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Double(_) => FieldType::Double,
        }
    }

    /// Raw bits, as stored in a record.
    pub fn to_bits(self) -> u64 {
        match self {
            FieldValue::Long(v) => v as u64,
            FieldValue::Double(v) => v.to_bits(),
        }
    }

    /// Lossy conversion to `f64`.
    pub fn as_f64(self) -> f64 {
        match self {
            FieldValue::Long(v) => v as f64,
            FieldValue::Double(v) => v,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Long(v) => fmt::Display::fmt(v, f),
            FieldValue::Double(v) => fmt::Display::fmt(v, f),
        }
    }
}

/// Name, type and identity value of one aggregate field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: Cow<'static, str>,
    identity: FieldValue,
}

impl FieldSpec {
    /// A long field starting at `identity`.
    pub fn long(name: impl Into<Cow<'static, str>>, identity: i64) -> Self {
        Self {
            name: name.into(),
            identity: FieldValue::Long(identity),
        }
    }

    /// A double field starting at `identity`.
    pub fn double(name: impl Into<Cow<'static, str>>, identity: f64) -> Self {
        Self {
            name: name.into(),
            identity: FieldValue::Double(identity),
        }
    }

    /// The field name as reported.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field type.
    pub fn field_type(&self) -> FieldType {
        self.identity.field_type()
    }

    /// The value a field holds when its record is claimed, and after it is read-and-reset.
    pub fn identity(&self) -> FieldValue {
        self.identity
    }
}

/// The ordered list of aggregate fields a strategy maintains per record.
///
/// Field names and types are returned in the same order that values are stored, so `names()[i]`, `types()[i]` and
/// field index `i` on a [`Record`](crate::record::Record) all refer to the same field.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Box<[FieldSpec]>,
    types: Box<[FieldType]>,
    identity_bits: Box<[u64]>,
}

impl Schema {
    /// Build a schema, rejecting empty, oversized, or duplicate-named field lists.
    pub fn new(fields: impl IntoIterator<Item = FieldSpec>) -> Result<Self, ConfigError> {
        let fields: Box<[FieldSpec]> = fields.into_iter().collect();
        if fields.is_empty() {
            return Err(ConfigError::invalid("a schema needs at least one field"));
        }
        if fields.len() > MAX_FIELDS {
            return Err(ConfigError::invalid(format!(
                "a schema supports at most {MAX_FIELDS} fields, got {}",
                fields.len()
            )));
        }
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(ConfigError::invalid(format!("field {i} has an empty name")));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(ConfigError::invalid(format!(
                    "duplicate field name `{}`",
                    field.name
                )));
            }
        }
        let types = fields.iter().map(FieldSpec::field_type).collect();
        let identity_bits = fields.iter().map(|f| f.identity.to_bits()).collect();
        Ok(Self {
            fields,
            types,
            identity_bits,
        })
    }

    /// Build a schema from parallel arrays of names, types and raw identity bits.
    ///
    /// Fails if the arrays don't all have the same length.
    pub fn from_parts<S: AsRef<str>>(
        names: &[S],
        types: &[FieldType],
        identities: &[u64],
    ) -> Result<Self, ConfigError> {
        if names.len() != types.len() || names.len() != identities.len() {
            return Err(ConfigError::invalid(format!(
                "field names ({}), types ({}) and identities ({}) must have the same length",
                names.len(),
                types.len(),
                identities.len()
            )));
        }
        Self::new(
            names
                .iter()
                .zip(types)
                .zip(identities)
                .map(|((name, ty), bits)| FieldSpec {
                    name: Cow::Owned(name.as_ref().to_owned()),
                    identity: ty.decode(*bits),
                }),
        )
    }

    /// Append more fields, e.g. histogram buckets after a base schema.
    pub fn extend(&self, more: impl IntoIterator<Item = FieldSpec>) -> Result<Self, ConfigError> {
        Self::new(self.fields.iter().cloned().chain(more))
    }

    /// The field specs in storage order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Field names in storage order.
    pub fn names(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.fields.iter().map(FieldSpec::name)
    }

    /// Field types in storage order.
    pub fn types(&self) -> &[FieldType] {
        &self.types
    }

    /// Raw identity bits in storage order.
    pub fn identity_bits(&self) -> &[u64] {
        &self.identity_bits
    }

    /// Position of the field called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false, schemas have at least one field.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Size of one record in cache lines, derived from a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordLayout {
    lines_per_record: usize,
}

impl RecordLayout {
    pub(crate) fn for_schema(schema: &Schema) -> Self {
        let words = RESERVED_WORDS + schema.len();
        Self {
            lines_per_record: words.div_ceil(WORDS_PER_LINE),
        }
    }

    pub(crate) fn lines_per_record(self) -> usize {
        self.lines_per_record
    }

    pub(crate) fn bytes_per_record(self) -> usize {
        self.lines_per_record * size_of::<CacheLine>()
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    #[test]
    fn cache_line_is_64_bytes() {
        check!(size_of::<CacheLine>() == 64);
        check!(align_of::<CacheLine>() == 64);
    }

    #[test]
    fn record_rounds_up_to_whole_lines() {
        let one = Schema::new([FieldSpec::long("sum", 0)]).unwrap();
        check!(RecordLayout::for_schema(&one).bytes_per_record() == 64);

        let six = Schema::new((0..6).map(|i| FieldSpec::long(format!("f{i}"), 0))).unwrap();
        check!(RecordLayout::for_schema(&six).lines_per_record() == 1);

        let seven = Schema::new((0..7).map(|i| FieldSpec::long(format!("f{i}"), 0))).unwrap();
        check!(RecordLayout::for_schema(&seven).lines_per_record() == 2);
    }

    #[test]
    fn mismatched_parts_are_rejected() {
        let err = Schema::from_parts(&["a", "b"], &[FieldType::Long], &[0, 0]).unwrap_err();
        check!(err.reason().contains("same length"));
    }

    #[test]
    fn parts_decode_identities() {
        let schema = Schema::from_parts(
            &["count", "min"],
            &[FieldType::Long, FieldType::Double],
            &[0, f64::INFINITY.to_bits()],
        )
        .unwrap();
        check!(schema.fields()[1].identity() == FieldValue::Double(f64::INFINITY));
        check!(schema.types() == [FieldType::Long, FieldType::Double]);
        check!(schema.index_of("min") == Some(1));
    }

    #[test]
    fn duplicate_and_empty_schemas_are_rejected() {
        check!(Schema::new(Vec::<FieldSpec>::new()).is_err());
        check!(Schema::new([FieldSpec::long("a", 0), FieldSpec::double("a", 0.0)]).is_err());
    }
}
