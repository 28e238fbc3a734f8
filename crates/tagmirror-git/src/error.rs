//! Error types for the object store, mirror synchronization and resolution.

use crate::selector::SelectorKind;

/// Errors reported by an object store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A revision expression did not resolve to a commit.
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// The commit exists but the path is absent or not a file.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The commit object could not be found.
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// The origin repository does not exist.
    #[error("repository not found at origin: {0}")]
    OriginNotFound(String),

    /// The origin could not be reached.
    #[error("network failure: {0}")]
    Network(String),

    /// The origin rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The operation was interrupted before completing.
    #[error("operation interrupted")]
    Interrupted,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other Git failure.
    #[error("git error: {0}")]
    Git(String),
}

impl StoreError {
    /// Creates a new Git error.
    pub fn git(msg: impl Into<String>) -> Self {
        Self::Git(msg.into())
    }

    /// Classifies a transport failure message into network, auth or not-found.
    pub fn transport(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let lower = msg.to_ascii_lowercase();

        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("authentication")
            || lower.contains("credentials")
            || lower.contains("permission denied")
        {
            Self::Auth(msg)
        } else if lower.contains("404") || lower.contains("not found") {
            Self::OriginNotFound(msg)
        } else {
            Self::Network(msg)
        }
    }
}

/// Errors produced while cloning or fetching a mirror.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The origin could not be reached.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The origin rejected our credentials.
    #[error("authentication failure: {0}")]
    AuthFailure(String),

    /// The origin repository does not exist.
    #[error("origin not found: {0}")]
    OriginNotFound(String),

    /// The origin host resolved outside the allowed networks.
    #[error("origin host {host} not allowed: {reason}")]
    HostNotAllowed { host: String, reason: String },

    /// The operation took longer than its deadline.
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The operation was abandoned (shutdown or timeout).
    #[error("operation interrupted")]
    Interrupted,

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Returns true if a later attempt could plausibly succeed without a
    /// configuration change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure(_) | Self::Timeout { .. } | Self::Interrupted
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Network(msg) => Self::NetworkFailure(msg),
            StoreError::Auth(msg) => Self::AuthFailure(msg),
            StoreError::OriginNotFound(msg) => Self::OriginNotFound(msg),
            StoreError::Interrupted => Self::Interrupted,
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Errors found while validating repository configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Names become directory names, so they are restricted.
    #[error("invalid repository name {0:?}")]
    InvalidName(String),

    #[error("invalid ref pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid network {network:?}: {reason}")]
    InvalidNetwork { network: String, reason: String },

    #[error("invalid signer key id {0:?}")]
    InvalidKeyId(String),

    #[error("repository {0} is already registered")]
    DuplicateRepository(String),

    #[error("sync.{field} {reason}")]
    InvalidSyncSetting {
        field: &'static str,
        reason: &'static str,
    },
}

/// Errors produced while resolving `(repository, version, path)` to content.
///
/// Every variant is a "not found" outcome for untrusted callers; the
/// distinction only exists for logging and trusted diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    #[error("{kind} selectors are disabled for repository {repository}")]
    SelectorKindDisabled {
        repository: String,
        kind: SelectorKind,
    },

    /// The repository is registered but has not been cloned yet.
    #[error("repository {0} is not cloned yet")]
    MirrorAbsent(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("no tag matches constraint {0}")]
    NoMatchingTag(String),

    /// The reference is excluded by the repository's allow/deny lists.
    #[error("reference not allowed: {0}")]
    RefNotAllowed(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The resolved object does not satisfy the trust policy.
    #[error("untrusted object: {0}")]
    Untrusted(String),

    #[error("update API disabled for repository {0}")]
    UpdateApiDisabled(String),

    /// The object store failed in an unexpected way.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ResolveError {
    /// Short, stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownRepository(_) => "unknown_repository",
            Self::SelectorKindDisabled { .. } => "selector_kind_disabled",
            Self::MirrorAbsent(_) => "mirror_absent",
            Self::RevisionNotFound(_) => "revision_not_found",
            Self::NoMatchingTag(_) => "no_matching_tag",
            Self::RefNotAllowed(_) => "ref_not_allowed",
            Self::PathNotFound(_) => "path_not_found",
            Self::Untrusted(_) => "untrusted",
            Self::UpdateApiDisabled(_) => "update_api_disabled",
            Self::Storage(_) => "storage",
        }
    }
}

impl ResolveError {
    /// True for outcomes caused by the request rather than by the server.
    pub fn is_not_found(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

impl From<StoreError> for ResolveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RevisionNotFound(rev) => Self::RevisionNotFound(rev),
            StoreError::PathNotFound(path) => Self::PathNotFound(path),
            StoreError::CommitNotFound(commit) => Self::PathNotFound(commit),
            other => Self::Storage(other.to_string()),
        }
    }
}
