//! Object store abstraction.
//!
//! The engine never talks to Git directly. A [`Transport`] clones and fetches
//! mirrors and hands back [`ObjectStore`] handles, which answer read-only
//! questions about one consistent state of a mirror. Two backends exist:
//! [`GixTransport`] keeps bare repositories on disk, [`MemoryTransport`]
//! keeps everything in memory.

mod gix;
mod memory;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;

use crate::error::StoreError;

pub use self::gix::{GixStore, GixTransport};
pub use self::memory::{MemoryRepository, MemoryStore, MemoryTransport, RemoteFailure};

/// Hex object id of a commit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in logs.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag reference and the commit it ultimately points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagReference {
    name: String,
    target: CommitId,
}

impl TagReference {
    /// Creates a tag reference from its full name (`refs/tags/v1.0.0`).
    pub fn new(name: impl Into<String>, target: CommitId) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// The full reference name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tag name without the `refs/tags/` prefix.
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix("refs/tags/").unwrap_or(&self.name)
    }

    /// The peeled commit.
    pub fn target(&self) -> &CommitId {
        &self.target
    }
}

/// Result of a fetch against an existing mirror.
pub enum FetchOutcome {
    /// The origin had nothing new.
    UpToDate,
    /// New objects or references arrived; the handle reflects them.
    Updated(Arc<dyn ObjectStore>),
}

impl fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("UpToDate"),
            Self::Updated(store) => f.debug_tuple("Updated").field(store).finish(),
        }
    }
}

/// Read access to one state of a mirrored repository.
///
/// All methods are blocking and are called from `spawn_blocking`.
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Resolves a revision expression (hash, abbreviated hash, branch or tag
    /// name, fully-qualified ref) to a commit.
    ///
    /// # Errors
    ///
    /// `StoreError::RevisionNotFound` for anything that does not resolve.
    fn resolve_revision(&self, expr: &str) -> Result<CommitId, StoreError>;

    /// The full name of the reference a short or full name denotes, if
    /// one exists. Revision operators are not interpreted.
    fn reference_name(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Lists every tag with its peeled target.
    fn tag_references(&self) -> Result<Vec<TagReference>, StoreError>;

    /// Reads the blob at `path` in the tree of `commit`.
    ///
    /// A leading `/` is ignored. Missing commits, missing paths and paths
    /// naming a directory all fail.
    fn read_file(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>, StoreError>;

    /// The commit `HEAD` points at, if any.
    fn head_commit(&self) -> Result<Option<CommitId>, StoreError>;

    /// The armored signature on a commit, if it is signed.
    fn commit_signature(&self, commit: &CommitId) -> Result<Option<String>, StoreError>;

    /// The armored signature on an annotated tag, if it is one and is signed.
    fn tag_signature(&self, tag: &TagReference) -> Result<Option<String>, StoreError>;
}

/// Creates and updates mirrors.
///
/// All methods are blocking and are called from `spawn_blocking`.
/// Implementations must leave `path` untouched when a clone fails or is
/// interrupted, and must leave the previous mirror state readable when a
/// fetch fails.
pub trait Transport: Send + Sync {
    /// Opens a mirror left at `path` by a previous run, if there is one.
    fn open(&self, path: &Path) -> Result<Option<Arc<dyn ObjectStore>>, StoreError>;

    /// Clones `url` with all references and tags and no working tree.
    fn clone_bare(
        &self,
        url: &str,
        path: &Path,
        interrupt: &AtomicBool,
    ) -> Result<Arc<dyn ObjectStore>, StoreError>;

    /// Fetches new objects and references into the mirror at `path`.
    fn fetch(&self, path: &Path, interrupt: &AtomicBool) -> Result<FetchOutcome, StoreError>;
}

/// Patterns tried, in order, when a revision names a reference.
pub(crate) const REF_RULES: [&str; 6] = [
    "{}",
    "refs/{}",
    "refs/tags/{}",
    "refs/heads/{}",
    "refs/remotes/{}",
    "refs/remotes/{}/HEAD",
];

/// Expands a short reference name into the full names it may denote,
/// most specific first, ending with the origin's remote-tracking branch.
pub(crate) fn reference_candidates(name: &str) -> Vec<String> {
    REF_RULES
        .iter()
        .map(|rule| rule.replace("{}", name))
        .chain(std::iter::once(format!("refs/remotes/origin/{}", name)))
        .collect()
}

/// Cleans a slash-separated path: drops empty and `.` segments, resolves
/// `..` without climbing above the root, and removes the leading `/`.
///
/// Returns `None` when nothing is left.
pub fn clean_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                segments.pop();
            },
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// The reference name a revision expression starts from: everything before
/// the first `~`, `^`, `:`, `@{` or `..` operator. A lone `@` is `HEAD`.
pub fn revision_base(expr: &str) -> &str {
    let end = [expr.find(['~', '^', ':']), expr.find("@{"), expr.find("..")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(expr.len());

    match &expr[..end] {
        "@" => "HEAD",
        base => base,
    }
}

/// True for strings that look like a full or abbreviated object id.
pub fn looks_like_object_id(expr: &str) -> bool {
    (4..=40).contains(&expr.len()) && expr.bytes().all(|b| b.is_ascii_hexdigit())
}
