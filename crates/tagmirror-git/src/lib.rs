//! # tagmirror engine
//!
//! Serves files out of mirrored git repositories, addressed by repository,
//! version and path.
//!
//! A version is either a semantic-version constraint matched against the
//! repository's tags (`^1.2`, `~2.0.0-0`, `>=1.0, <2`) or an exact revision:
//! a commit hash, a branch or tag name, or a fully-qualified reference.
//!
//! ## Features
//!
//! - Bare mirrors via pure-Rust `gix`, or an in-memory store for tests
//! - Background clone and refresh with a bounded worker pool
//! - Per-repository selector, reference, origin network and signature policy
//! - Consistent reads while a fetch is in flight
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tagmirror_git::{GixTransport, RepositoryConfig, RepositoryRegistry, Resolver, SyncScheduler};
//!
//! let config = RepositoryConfig::builder()
//!     .name("config")
//!     .url("https://github.com/org/config-repo.git")
//!     .refresh_interval(std::time::Duration::from_secs(300))
//!     .build()?;
//!
//! let registry = Arc::new(RepositoryRegistry::from_configs("/var/lib/tagmirror", [config])?);
//! let handle = SyncScheduler::with_defaults(Arc::clone(&registry), Arc::new(GixTransport::new())).start();
//!
//! let resolver = Resolver::new(registry).with_trigger(handle.trigger());
//! let file = resolver.resolve("config", "^1.0.0", "app.yml").await?;
//! ```

pub mod error;
pub mod metrics;
pub mod mirror;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod selector;
pub mod store;
pub mod sync;
pub mod versioning;

// Re-exports
pub use error::{ConfigError, ResolveError, StoreError, SyncError};
pub use mirror::{MirrorSnapshot, MirrorStatus, RepositoryMirror, SyncOutcome, SyncState};
pub use registry::RepositoryRegistry;
pub use repository::{RepositoryConfig, RepositoryConfigBuilder, RepositoryPolicy};
pub use resolver::{NotFound, ResolvedFile, Resolver, ResolverOptions};
pub use selector::{SelectorKind, VersionSelector};
pub use store::{CommitId, GixTransport, MemoryRepository, MemoryTransport, ObjectStore, Transport};
pub use sync::{SyncConfig, SyncHandle, SyncScheduler, SyncTrigger};
pub use versioning::{Constraint, SemverTagIndex};
