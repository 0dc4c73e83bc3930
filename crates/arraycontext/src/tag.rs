//! Immutable metadata attached to arrays and to individual array axes.
//!
//! Tags never influence shape or equality. Tag sets are reference counted, so
//! propagating metadata through a computation copies a pointer rather than the set.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A hashable, immutable piece of metadata.
///
/// Tags are identified by a name and an optional value, e.g. `Tag::new("elements")` or
/// `Tag::with_value("discretization", "dg")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}({})", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// Deduplicated, unordered collection of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet(Arc<BTreeSet<Tag>>);

impl TagSet {
    pub fn new() -> Self {
        TagSet::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Returns `true` when both sets share the same allocation.
    pub fn ptr_eq(&self, other: &TagSet) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Union with `tags`. Returns a clone of `self` (same allocation) when nothing is new.
    pub fn union<I>(&self, tags: I) -> TagSet
    where
        I: IntoIterator<Item = Tag>,
    {
        let fresh: Vec<Tag> = tags.into_iter().filter(|t| !self.0.contains(t)).collect();
        if fresh.is_empty() {
            return self.clone();
        }
        let mut set = (*self.0).clone();
        set.extend(fresh);
        TagSet(Arc::new(set))
    }

    /// Removes `tags`; with `verify_existence`, an absent tag is a `ValueError`.
    pub fn without<I>(&self, tags: I, verify_existence: bool) -> Result<TagSet>
    where
        I: IntoIterator<Item = Tag>,
    {
        let mut set = (*self.0).clone();
        for tag in tags {
            if !set.remove(&tag) && verify_existence {
                return Err(Error::value_error(format!(
                    "cannot remove tag `{tag}`: not present in {self}"
                )));
            }
        }
        Ok(TagSet(Arc::new(set)))
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<T: IntoIterator<Item = Tag>>(iter: T) -> Self {
        TagSet(Arc::new(iter.into_iter().collect()))
    }
}

impl From<Tag> for TagSet {
    fn from(tag: Tag) -> Self {
        std::iter::once(tag).collect()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{tag}")?;
        }
        f.write_str("}")
    }
}

/// Values carrying a tag set that can be re-tagged without mutation.
pub trait Taggable: Sized {
    fn tags(&self) -> &TagSet;

    /// Returns a copy of `self` carrying exactly `tags`.
    fn with_tags(&self, tags: TagSet) -> Self;

    /// Returns a copy of `self` tagged with the union of its tags and `tags`.
    fn tagged<I>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.with_tags(self.tags().union(tags))
    }

    fn without_tags<I>(&self, tags: I, verify_existence: bool) -> Result<Self>
    where
        I: IntoIterator<Item = Tag>,
    {
        Ok(self.with_tags(self.tags().without(tags, verify_existence)?))
    }
}

/// Metadata for one dimension of an array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Axis {
    tags: TagSet,
}

impl Axis {
    pub fn new(tags: TagSet) -> Self {
        Axis { tags }
    }
}

impl Taggable for Axis {
    fn tags(&self) -> &TagSet {
        &self.tags
    }

    fn with_tags(&self, tags: TagSet) -> Self {
        Axis { tags }
    }
}

/// Shared untagged axis tuples, one per rank.
pub fn untagged_axes(ndim: usize) -> Arc<[Axis]> {
    static CACHE: OnceLock<RwLock<Vec<Arc<[Axis]>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| RwLock::new(Vec::new()));
    if let Some(axes) = cache
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(ndim)
    {
        return Arc::clone(axes);
    }
    let mut guard = cache.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    while guard.len() <= ndim {
        let rank = guard.len();
        guard.push(vec![Axis::default(); rank].into());
    }
    Arc::clone(&guard[ndim])
}

/// Arrays whose individual axes carry tag sets.
pub trait AxisTaggable: Taggable {
    fn axes(&self) -> &[Axis];

    /// Replaces the axis metadata. Callers guarantee `axes.len() == self.axes().len()`.
    fn with_axes_unchecked(&self, axes: Arc<[Axis]>) -> Self;

    /// Replaces the axis metadata, validating the axis count.
    fn with_axes(&self, axes: Vec<Axis>) -> Result<Self> {
        if axes.len() != self.axes().len() {
            return Err(Error::value_error(format!(
                "axes length does not match array dimension: got {} axes for {}d array",
                axes.len(),
                self.axes().len()
            )));
        }
        Ok(self.with_axes_unchecked(axes.into()))
    }

    /// Returns a copy with the `iaxis`-th axis additionally tagged with `tags`.
    fn with_tagged_axis<I>(&self, iaxis: usize, tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = Tag>,
    {
        let ndim = self.axes().len();
        if iaxis >= ndim {
            return Err(Error::index_error(format!(
                "axis {iaxis} is out of bounds for array of dimension {ndim}"
            )));
        }
        let mut axes = self.axes().to_vec();
        axes[iaxis] = axes[iaxis].tagged(tags);
        Ok(self.with_axes_unchecked(axes.into()))
    }

    /// Adds array tags and, optionally, per-axis tags in one step.
    ///
    /// `axes` must have one entry per dimension; their tags are merged into the existing
    /// axis tags.
    fn with_metadata(&self, axes: Option<&[Axis]>, tags: TagSet) -> Result<Self> {
        let mut out = self.tagged(tags.iter().cloned());
        if let Some(axes) = axes {
            if axes.len() != self.axes().len() {
                return Err(Error::value_error(format!(
                    "axes length does not match array dimension: got {} axes for {}d array",
                    axes.len(),
                    self.axes().len()
                )));
            }
            for (i, axis) in axes.iter().enumerate() {
                out = out.with_tagged_axis(i, axis.tags().iter().cloned())?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_without_new_tags_shares_allocation() {
        let set: TagSet = [Tag::new("a"), Tag::new("b")].into_iter().collect();
        let same = set.union([Tag::new("a")]);
        assert!(same.ptr_eq(&set));
        let grown = set.union([Tag::new("c")]);
        assert_eq!(grown.len(), 3);
        assert!(!grown.ptr_eq(&set));
    }

    #[test]
    fn removing_absent_tag_is_checked_on_request() {
        let set = TagSet::from(Tag::new("a"));
        assert!(set.without([Tag::new("b")], false).is_ok());
        assert!(matches!(
            set.without([Tag::new("b")], true),
            Err(Error::Value(_))
        ));
    }

    #[test]
    fn untagged_axes_are_memoized() {
        let a = untagged_axes(3);
        let b = untagged_axes(3);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 3);
    }
}
