//! Version selectors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::repository::SelectorPolicy;
use crate::store::looks_like_object_id;
use crate::versioning::Constraint;

/// The kinds of selector a repository may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// A semantic-version constraint matched against tags.
    Semver,
    /// A full or abbreviated commit hash.
    Commit,
    /// Any other revision expression: branch or tag name, fully-qualified ref.
    Reference,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semver => "semver",
            Self::Commit => "commit",
            Self::Reference => "reference",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed client-supplied version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// A revision expression resolved as-is by the object store.
    ExactRevision(String),
    /// A range matched against the repository's semantic-version tags.
    SemverConstraint(Constraint),
}

impl VersionSelector {
    /// Parses `raw` under `policy`.
    ///
    /// Never fails. When semver selectors are enabled the string is tried as
    /// a constraint first; anything else is an exact revision whose existence
    /// is checked at resolution time.
    pub fn parse(raw: &str, policy: &SelectorPolicy) -> Self {
        let raw = raw.trim();

        if policy.allows(SelectorKind::Semver) {
            if let Ok(constraint) = Constraint::parse(raw) {
                return Self::SemverConstraint(constraint);
            }
        }

        Self::ExactRevision(raw.to_string())
    }

    /// Classifies the selector for policy checks.
    ///
    /// Exact revisions that look like a hash are commits. The check is
    /// syntactic, so a branch named `cafe` counts as a commit selector.
    pub fn kind(&self) -> SelectorKind {
        match self {
            Self::SemverConstraint(_) => SelectorKind::Semver,
            Self::ExactRevision(raw) if looks_like_object_id(raw) => SelectorKind::Commit,
            Self::ExactRevision(_) => SelectorKind::Reference,
        }
    }

    /// The selector as written.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExactRevision(raw) => raw,
            Self::SemverConstraint(constraint) => constraint.as_str(),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
