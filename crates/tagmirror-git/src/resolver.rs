//! Resolution of (repository, version, path) requests to file content.

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::ResolveError;
use crate::metrics;
use crate::mirror::MirrorSnapshot;
use crate::registry::RepositoryRegistry;
use crate::repository::RepositoryPolicy;
use crate::selector::{SelectorKind, VersionSelector};
use crate::store::{CommitId, clean_path, revision_base};
use crate::sync::SyncTrigger;
use crate::versioning::SemverTagIndex;

/// Resolver behavior toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Include the underlying error message in [`NotFound`]. Only for
    /// trusted callers.
    pub expose_diagnostics: bool,
}

/// The uniform failure returned to untrusted callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    detail: Option<String>,
}

impl NotFound {
    /// The underlying error message, when diagnostics are exposed.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "not found: {}", detail),
            None => f.write_str("not found"),
        }
    }
}

impl std::error::Error for NotFound {}

/// A file read at a resolved commit. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub content: Vec<u8>,
    pub size: u64,
    pub commit: CommitId,
    /// The reference the selector resolved through, if any.
    pub reference: Option<String>,
    /// The cleaned path the content was read from.
    pub path: String,
}

impl ResolvedFile {
    pub fn into_reader(self) -> io::Cursor<Vec<u8>> {
        io::Cursor::new(self.content)
    }

    /// Last segment of the path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// The single entry point for serving layers.
///
/// Every read of one request goes through a single [`MirrorSnapshot`], so a
/// concurrent fetch is observed entirely or not at all.
pub struct Resolver {
    registry: Arc<RepositoryRegistry>,
    options: ResolverOptions,
    trigger: Option<SyncTrigger>,
}

impl Resolver {
    pub fn new(registry: Arc<RepositoryRegistry>) -> Self {
        Self {
            registry,
            options: ResolverOptions::default(),
            trigger: None,
        }
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Attaches a running scheduler for [`request_refresh`](Self::request_refresh).
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Resolves `version` in `repository` and reads `path` at that commit.
    ///
    /// # Errors
    ///
    /// Returns the specific [`ResolveError`]; use
    /// [`resolve_public`](Self::resolve_public) at untrusted boundaries.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        repository: &str,
        version: &str,
        path: &str,
    ) -> Result<ResolvedFile, ResolveError> {
        let result = self.resolve_inner(repository, version, path).await;

        match &result {
            Ok(file) => {
                metrics::record_resolve("ok");
                debug!(commit = %file.commit.short(), size = file.size, "Resolved");
            },
            Err(e) => metrics::record_resolve(e.kind()),
        }

        result
    }

    async fn resolve_inner(
        &self,
        repository: &str,
        version: &str,
        path: &str,
    ) -> Result<ResolvedFile, ResolveError> {
        let mirror = self.registry.get(repository)?;
        let policy = Arc::clone(mirror.policy());

        let selector = VersionSelector::parse(version, &policy.selectors);
        let kind = selector.kind();
        if !policy.selectors.allows(kind) {
            return Err(ResolveError::SelectorKindDisabled {
                repository: repository.to_string(),
                kind,
            });
        }

        let path = clean_path(path).ok_or_else(|| ResolveError::PathNotFound(path.to_string()))?;

        let snapshot = mirror
            .snapshot()
            .await
            .ok_or_else(|| ResolveError::MirrorAbsent(repository.to_string()))?;

        tokio::task::spawn_blocking(move || read_at_selector(&snapshot, &policy, &selector, path))
            .await
            .map_err(|e| ResolveError::Storage(format!("resolve task failed: {}", e)))?
    }

    /// Like [`resolve`](Self::resolve), with every failure collapsed to
    /// [`NotFound`].
    pub async fn resolve_public(
        &self,
        repository: &str,
        version: &str,
        path: &str,
    ) -> Result<ResolvedFile, NotFound> {
        self.resolve(repository, version, path).await.map_err(|e| {
            if e.is_not_found() {
                debug!(repository, version, path, kind = e.kind(), error = %e, "Not found");
            } else {
                warn!(repository, version, path, kind = e.kind(), error = %e, "Resolution failed");
            }

            NotFound {
                detail: self.options.expose_diagnostics.then(|| e.to_string()),
            }
        })
    }

    /// Queues an immediate sync of `repository` when its update API is
    /// enabled. Returns false if nothing was queued.
    pub async fn request_refresh(&self, repository: &str) -> Result<bool, ResolveError> {
        let mirror = self.registry.get(repository)?;
        if !mirror.policy().update_api {
            return Err(ResolveError::UpdateApiDisabled(repository.to_string()));
        }

        let Some(trigger) = &self.trigger else {
            debug!(repository, "No scheduler attached, refresh ignored");
            return Ok(false);
        };

        let queued = trigger.request(repository).await?;
        debug!(repository, queued, "Refresh requested");
        Ok(queued)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("repositories", &self.registry.len())
            .field("options", &self.options)
            .field("update_api", &self.trigger.is_some())
            .finish()
    }
}

/// Applies the reference filter to `base`, both as written and under the
/// full name it resolves to.
fn check_reference(
    snapshot: &MirrorSnapshot,
    policy: &RepositoryPolicy,
    raw: &str,
    base: &str,
) -> Result<(), ResolveError> {
    if policy.refs.is_unrestricted() {
        return Ok(());
    }

    let allowed = !base.is_empty()
        && match snapshot.reference_name(base)? {
            Some(full) => policy.refs.is_allowed_as(&[base, &full]),
            None => policy.refs.is_allowed(base),
        };

    if allowed {
        Ok(())
    } else {
        Err(ResolveError::RefNotAllowed(raw.to_string()))
    }
}

fn read_at_selector(
    snapshot: &MirrorSnapshot,
    policy: &RepositoryPolicy,
    selector: &VersionSelector,
    path: String,
) -> Result<ResolvedFile, ResolveError> {
    let (commit, reference) = match selector {
        VersionSelector::SemverConstraint(constraint) => {
            let tags = snapshot.tag_references()?;
            let index = SemverTagIndex::build_filtered(tags, |tag| policy.refs.is_allowed(tag.name()));
            let best = index
                .highest_match(constraint)
                .ok_or_else(|| ResolveError::NoMatchingTag(constraint.to_string()))?;

            if policy.trust.verify_tags() && snapshot.tag_signature(&best.reference)?.is_none() {
                return Err(ResolveError::Untrusted(format!(
                    "tag {} is not signed",
                    best.reference.short_name()
                )));
            }

            (
                best.reference.target().clone(),
                Some(best.reference.name().to_string()),
            )
        },
        VersionSelector::ExactRevision(raw) if selector.kind() == SelectorKind::Commit => {
            // A branch or tag may be named like a hash.
            if !policy.refs.is_unrestricted() && snapshot.reference_name(raw)?.is_some() {
                check_reference(snapshot, policy, raw, raw)?;
            }
            (snapshot.resolve_revision(raw)?, None)
        },
        VersionSelector::ExactRevision(raw) => {
            check_reference(snapshot, policy, raw, revision_base(raw))?;
            (snapshot.resolve_revision(raw)?, Some(raw.clone()))
        },
    };

    // TODO: check the signature against the accepted signer key ids once an
    // OpenPGP implementation is available; only presence is enforced now.
    if policy.trust.verify_commits() && snapshot.commit_signature(&commit)?.is_none() {
        return Err(ResolveError::Untrusted(format!(
            "commit {} is not signed",
            commit.short()
        )));
    }

    let content = snapshot.open_file_at_commit(&path, &commit)?;

    Ok(ResolvedFile {
        size: content.len() as u64,
        content,
        commit,
        reference,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryConfig;
    use crate::store::{MemoryRepository, MemoryTransport, Transport};
    use crate::sync::SyncConfig;
    use std::io::Read;
    use std::sync::atomic::AtomicBool;

    async fn resolver_with(config: RepositoryConfig, repo: MemoryRepository) -> Resolver {
        let memory = MemoryTransport::new();
        memory.publish(config.url(), repo);
        let transport: Arc<dyn Transport> = Arc::new(memory);

        let registry = Arc::new(RepositoryRegistry::new("/mirrors"));
        let mirror = registry.register(config).unwrap();
        mirror
            .sync(&transport, &SyncConfig::default(), &Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        Resolver::new(registry)
    }

    fn config() -> crate::repository::RepositoryConfigBuilder {
        RepositoryConfig::builder().name("cfg").url("mem://cfg")
    }

    fn config_unrestricted() -> RepositoryConfig {
        config().build().unwrap()
    }

    fn origin() -> MemoryRepository {
        let mut repo = MemoryRepository::new();
        let first = repo.commit(&[("app.yml", "v: 1")]);
        let second = repo.commit(&[("app.yml", "v: 2"), ("nested/db.yml", "db: 2")]);
        repo.branch("master", &second)
            .tag("v1.0.0", &first)
            .tag("v1.1.0", &second)
            .tag("release", &second);
        repo
    }

    #[tokio::test]
    async fn test_resolve_semver() {
        let resolver = resolver_with(config().build().unwrap(), origin()).await;

        let file = resolver.resolve("cfg", "^1.0.0", "app.yml").await.unwrap();
        assert_eq!(file.content, b"v: 2");
        assert_eq!(file.size, 4);
        assert_eq!(file.reference.as_deref(), Some("refs/tags/v1.1.0"));

        let file = resolver.resolve("cfg", "1.0.0", "app.yml").await.unwrap();
        assert_eq!(file.content, b"v: 1");
    }

    #[tokio::test]
    async fn test_resolve_reference_and_commit() {
        let resolver = resolver_with(config().build().unwrap(), origin()).await;

        let by_branch = resolver.resolve("cfg", "master", "/nested/db.yml").await.unwrap();
        assert_eq!(by_branch.file_name(), "db.yml");
        assert_eq!(by_branch.path, "nested/db.yml");

        let by_hash = resolver
            .resolve("cfg", by_branch.commit.as_str(), "nested/db.yml")
            .await
            .unwrap();
        assert_eq!(by_hash.content, by_branch.content);
        assert_eq!(by_hash.reference, None);

        let mut text = String::new();
        by_hash.into_reader().read_to_string(&mut text).unwrap();
        assert_eq!(text, "db: 2");
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let resolver = resolver_with(config().build().unwrap(), origin()).await;

        assert!(matches!(
            resolver.resolve("other", "master", "app.yml").await,
            Err(ResolveError::UnknownRepository(_))
        ));
        assert!(matches!(
            resolver.resolve("cfg", "~9.9.9", "app.yml").await,
            Err(ResolveError::NoMatchingTag(_))
        ));
        assert!(matches!(
            resolver.resolve("cfg", "nope", "app.yml").await,
            Err(ResolveError::RevisionNotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("cfg", "master", "missing.yml").await,
            Err(ResolveError::PathNotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("cfg", "master", "../..").await,
            Err(ResolveError::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_absent_mirror() {
        let registry = Arc::new(RepositoryRegistry::new("/mirrors"));
        registry.register(config().build().unwrap()).unwrap();
        let resolver = Resolver::new(registry);

        assert!(matches!(
            resolver.resolve("cfg", "master", "app.yml").await,
            Err(ResolveError::MirrorAbsent(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_kinds() {
        let config = config().commits(false).semver_tags(false).build().unwrap();
        let resolver = resolver_with(config, origin()).await;

        let master = resolver.resolve("cfg", "master", "app.yml").await.unwrap();
        assert!(matches!(
            resolver.resolve("cfg", master.commit.as_str(), "app.yml").await,
            Err(ResolveError::SelectorKindDisabled {
                kind: SelectorKind::Commit,
                ..
            })
        ));

        // With semver disabled the constraint is an exact revision name.
        assert!(matches!(
            resolver.resolve("cfg", "^1.0.0", "app.yml").await,
            Err(ResolveError::RevisionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ref_filters() {
        let config = config().deny_ref("v1.1.*").deny_ref("release").build().unwrap();
        let resolver = resolver_with(config, origin()).await;

        let file = resolver.resolve("cfg", "^1.0.0", "app.yml").await.unwrap();
        assert_eq!(file.reference.as_deref(), Some("refs/tags/v1.0.0"));

        assert!(matches!(
            resolver.resolve("cfg", "release", "app.yml").await,
            Err(ResolveError::RefNotAllowed(_))
        ));
        assert!(matches!(
            resolver.resolve("cfg", "refs/tags/release", "app.yml").await,
            Err(ResolveError::RefNotAllowed(_))
        ));
        assert!(resolver.resolve("cfg", "master", "app.yml").await.is_ok());
    }

    #[tokio::test]
    async fn test_ref_filters_see_through_revision_operators() {
        let config = config().deny_ref("release").build().unwrap();
        let resolver = resolver_with(config, origin()).await;

        for version in ["release~0", "release^{commit}", "release^0", "refs/tags/release~0", ":/v"] {
            assert!(
                matches!(
                    resolver.resolve("cfg", version, "app.yml").await,
                    Err(ResolveError::RefNotAllowed(_))
                ),
                "{}",
                version
            );
        }

        // Unrestricted repositories leave operators to the store.
        let resolver = resolver_with(config_unrestricted(), origin()).await;
        assert!(matches!(
            resolver.resolve("cfg", "release~0", "app.yml").await,
            Err(ResolveError::RevisionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ref_filters_apply_to_hash_like_branches() {
        let mut repo = MemoryRepository::new();
        let head = repo.commit(&[("app.yml", "v: 1")]);
        repo.branch("master", &head)
            .branch("cafe", &head)
            .branch("beef", &head);

        let config = config().deny_ref("cafe").build().unwrap();
        let resolver = resolver_with(config, repo).await;

        assert!(matches!(
            resolver.resolve("cfg", "cafe", "app.yml").await,
            Err(ResolveError::RefNotAllowed(_))
        ));
        assert!(resolver.resolve("cfg", "beef", "app.yml").await.is_ok());
        assert!(resolver.resolve("cfg", head.as_str(), "app.yml").await.is_ok());
    }

    #[tokio::test]
    async fn test_allow_list_checks_resolved_name() {
        let config = config().allow_ref("refs/tags/*").build().unwrap();
        let resolver = resolver_with(config, origin()).await;

        assert!(resolver.resolve("cfg", "release", "app.yml").await.is_ok());
        assert!(matches!(
            resolver.resolve("cfg", "master", "app.yml").await,
            Err(ResolveError::RefNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_trust_policy() {
        let mut repo = MemoryRepository::new();
        let unsigned = repo.commit(&[("app.yml", "unsigned")]);
        let signed = repo.commit_signed(&[("app.yml", "signed")], "-----BEGIN PGP SIGNATURE-----");
        repo.branch("master", &signed)
            .branch("dev", &unsigned)
            .annotated_tag("v1.0.0", &signed, Some("-----BEGIN PGP SIGNATURE-----"))
            .annotated_tag("v2.0.0", &signed, None);

        let config = config().verify_commits(true).verify_tags(true).build().unwrap();
        let resolver = resolver_with(config, repo).await;

        assert_eq!(
            resolver.resolve("cfg", "master", "app.yml").await.unwrap().content,
            b"signed"
        );
        assert!(matches!(
            resolver.resolve("cfg", "dev", "app.yml").await,
            Err(ResolveError::Untrusted(_))
        ));
        assert!(resolver.resolve("cfg", "~1.0", "app.yml").await.is_ok());
        assert!(matches!(
            resolver.resolve("cfg", "^2.0.0", "app.yml").await,
            Err(ResolveError::Untrusted(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_public_collapses() {
        let resolver = resolver_with(config().build().unwrap(), origin()).await;

        let err = resolver.resolve_public("cfg", "nope", "app.yml").await.unwrap_err();
        assert_eq!(err.detail(), None);
        assert_eq!(err.to_string(), "not found");

        let unknown = resolver.resolve_public("x", "master", "app.yml").await.unwrap_err();
        assert_eq!(unknown, err);

        let resolver = resolver.with_options(ResolverOptions {
            expose_diagnostics: true,
        });
        let err = resolver.resolve_public("cfg", "nope", "app.yml").await.unwrap_err();
        assert_eq!(err.detail(), Some("revision not found: nope"));
    }

    #[tokio::test]
    async fn test_request_refresh_gated() {
        let resolver = resolver_with(config().build().unwrap(), origin()).await;
        assert!(matches!(
            resolver.request_refresh("cfg").await,
            Err(ResolveError::UpdateApiDisabled(_))
        ));

        let resolver = resolver_with(config().update_api(true).build().unwrap(), origin()).await;
        assert!(!resolver.request_refresh("cfg").await.unwrap());
        assert!(matches!(
            resolver.request_refresh("x").await,
            Err(ResolveError::UnknownRepository(_))
        ));
    }
}
