//! Ordered index of semantic-version tags.

use semver::Version;

use super::{Constraint, parse_version_loose};
use crate::store::TagReference;

/// A tag reference paired with the version parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemverRef {
    pub version: Version,
    pub reference: TagReference,
}

/// Tags of a repository that parse as semantic versions, sorted ascending.
///
/// Tags whose names are not versions are left out without error.
#[derive(Debug, Clone, Default)]
pub struct SemverTagIndex {
    entries: Vec<SemverRef>,
}

impl SemverTagIndex {
    /// Builds an index from every tag.
    pub fn build<I>(tags: I) -> Self
    where
        I: IntoIterator<Item = TagReference>,
    {
        Self::build_filtered(tags, |_| true)
    }

    /// Builds an index from the tags accepted by `allow`.
    pub fn build_filtered<I, F>(tags: I, mut allow: F) -> Self
    where
        I: IntoIterator<Item = TagReference>,
        F: FnMut(&TagReference) -> bool,
    {
        let mut entries: Vec<SemverRef> = tags
            .into_iter()
            .filter(|tag| allow(tag))
            .filter_map(|reference| {
                parse_version_loose(reference.short_name())
                    .map(|version| SemverRef { version, reference })
            })
            .collect();

        // Equal precedence (`v1.0.0` and `1.0.0`, or differing build
        // metadata) is broken by the full version and then the ref name so
        // the order never depends on input order.
        entries.sort_by(|a, b| {
            a.version
                .cmp_precedence(&b.version)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.reference.name().cmp(b.reference.name()))
        });

        Self { entries }
    }

    /// Returns the highest tag of the first contiguous run of tags matching
    /// `constraint`.
    ///
    /// The scan walks the sorted tags upwards and stops as soon as a
    /// non-matching tag follows a match; later runs are not considered.
    pub fn highest_match(&self, constraint: &Constraint) -> Option<&SemverRef> {
        let mut last_match = None;

        for entry in &self.entries {
            if constraint.matches(&entry.version) {
                last_match = Some(entry);
            } else if last_match.is_some() {
                break;
            }
        }

        last_match
    }

    /// Iterates over the entries in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &SemverRef> {
        self.entries.iter()
    }

    /// Iterates over the versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.entries.iter().map(|e| &e.version)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
