// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tag-sets: the dimensional identity of a series.
//!
//! A [`TagSet`] is a flattened `[key0, value0, key1, value1, ...]` array that is sorted by key. Two tag-sets name the
//! same series iff their arrays are equal. Elements may be absent (a tag without a value), which matters for the
//! ordering used by sorted cursors, see [`compare_tag_sets`].
//!
//! The 64-bit [`TagSet::key`] is computed once, when the tag-set is built, and is the only thing the aggregation
//! tables compare on their hot path.

use std::{
    cmp::Ordering,
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    sync::Arc,
};

use smallvec::SmallVec;

/// The key value reserved for unclaimed table slots.
pub(crate) const EMPTY_KEY: u64 = 0;

// Substituted when a tag-set happens to hash to the reserved empty key.
const EMPTY_KEY_REMAP: u64 = 0x9e37_79b9_7f4a_7c15;

fn key_hasher() -> ahash::RandomState {
    // fixed seeds so that keys are stable for the lifetime of the process regardless of which thread hashes
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
}

fn compute_key(tags: &[Option<Box<str>>]) -> u64 {
    let mut hasher = key_hasher().build_hasher();
    hasher.write_usize(tags.len());
    for tag in tags {
        match tag {
            Some(tag) => {
                hasher.write_u8(1);
                tag.hash(&mut hasher);
            }
            None => hasher.write_u8(0),
        }
    }
    match hasher.finish() {
        EMPTY_KEY => EMPTY_KEY_REMAP,
        key => key,
    }
}

struct Inner {
    tags: Box<[Option<Box<str>>]>,
    key: u64,
}

/// An immutable, sorted, flattened array of tag keys and values.
///
/// Cloning is cheap (a reference count bump), so tables keep their own clone of the identity they were claimed
/// for.
///
/// ```
/// use metrique_rollup::tags::TagSet;
///
/// let tags = TagSet::builder().tag("region", "us-east-1").tag("host", "a").build();
/// assert_eq!(tags.get(0), Some("host"));
/// assert_eq!(tags.to_string(), "{host=a, region=us-east-1}");
/// ```
#[derive(Clone)]
pub struct TagSet(Arc<Inner>);

impl TagSet {
    /// The tag-set with no tags.
    pub fn empty() -> Self {
        Self::from_boxed(Box::new([]))
    }

    /// Start building a tag-set from (key, value) pairs in any order.
    pub fn builder() -> TagSetBuilder {
        TagSetBuilder::default()
    }

    /// Build a tag-set from an already flattened array.
    ///
    /// The caller is responsible for the array being sorted by key; it is stored as-is.
    pub fn from_flattened<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<Box<str>>,
    {
        Self::from_boxed(tags.into_iter().map(|t| t.map(Into::into)).collect())
    }

    /// Build a tag-set from (key, value) pairs, sorting them by key.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Box<str>>,
        V: Into<Box<str>>,
    {
        pairs
            .into_iter()
            .fold(Self::builder(), |b, (k, v)| b.tag(k, v))
            .build()
    }

    fn from_boxed(tags: Box<[Option<Box<str>>]>) -> Self {
        let key = compute_key(&tags);
        Self(Arc::new(Inner { tags, key }))
    }

    /// The 64-bit identity of this tag-set. Never zero.
    pub fn key(&self) -> u64 {
        self.0.key
    }

    /// Number of elements in the flattened array (twice the number of pairs).
    pub fn len(&self) -> usize {
        self.0.tags.len()
    }

    /// True if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.tags.is_empty()
    }

    /// The element at `index` of the flattened array, `None` if it's out of bounds or absent.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.tags.get(index).and_then(|t| t.as_deref())
    }

    /// Iterate over the flattened array.
    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        self.0.tags.iter().map(|t| t.as_deref())
    }

    /// Iterate over (key, value) pairs. A trailing key without a value is paired with `None`.
    pub fn pairs(&self) -> impl Iterator<Item = (Option<&str>, Option<&str>)> + '_ {
        self.0
            .tags
            .chunks(2)
            .map(|pair| (pair[0].as_deref(), pair.get(1).and_then(|v| v.as_deref())))
    }

    /// Look up the value of a tag key.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.pairs()
            .find(|(k, _)| *k == Some(key))
            .and_then(|(_, v)| v)
    }
}

impl Default for TagSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for TagSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || (self.0.key == other.0.key && self.0.tags == other.0.tags)
    }
}

impl Eq for TagSet {}

impl Hash for TagSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.key);
    }
}

impl PartialOrd for TagSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagSet {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_flattened(&self.0.tags, &other.0.tags)
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.pairs().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k.unwrap_or("null"), v.unwrap_or("null"))?;
        }
        f.write_str("}")
    }
}

/// Compare two optional tag-sets.
///
/// The order is lexicographic over the flattened arrays. A shorter array sorts before a longer one it is a prefix of,
/// an absent element sorts after a present one at the same position, and an absent tag-set sorts after every present
/// tag-set.
pub fn compare_tag_sets(a: Option<&TagSet>, b: Option<&TagSet>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_flattened(a: &[Option<Box<str>>], b: &[Option<Box<str>>]) -> Ordering {
    for (a, b) in a.iter().zip(b.iter()) {
        let ord = match (a, b) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Builder for [`TagSet`] that takes pairs in any order.
///
/// Pairs are sorted by key when built. If a key is added more than once, the last value wins.
#[derive(Default, Debug, Clone)]
pub struct TagSetBuilder {
    pairs: SmallVec<[(Box<str>, Option<Box<str>>); 8]>,
}

impl TagSetBuilder {
    /// Add a tag.
    pub fn tag(mut self, key: impl Into<Box<str>>, value: impl Into<Box<str>>) -> Self {
        self.pairs.push((key.into(), Some(value.into())));
        self
    }

    /// Add a tag whose value may be absent.
    pub fn tag_opt(mut self, key: impl Into<Box<str>>, value: Option<impl Into<Box<str>>>) -> Self {
        self.pairs.push((key.into(), value.map(Into::into)));
        self
    }

    /// Sort and freeze the tags.
    pub fn build(mut self) -> TagSet {
        // stable, so among duplicate keys the last added stays last
        self.pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let mut flattened: Vec<Option<Box<str>>> = Vec::with_capacity(self.pairs.len() * 2);
        for (key, value) in self.pairs {
            let len = flattened.len();
            if len >= 2 && flattened[len - 2].as_deref() == Some(&*key) {
                flattened[len - 1] = value;
            } else {
                flattened.push(Some(key));
                flattened.push(value);
            }
        }
        TagSet::from_boxed(flattened.into_boxed_slice())
    }
}
