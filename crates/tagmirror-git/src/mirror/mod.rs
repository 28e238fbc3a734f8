//! Live mirrors of configured repositories.
//!
//! A [`RepositoryMirror`] is `Absent` until its first successful clone and
//! `Present` afterwards; a fetch never demotes it. The object store handle
//! sits behind a per-mirror read/write lock: resolutions read through a
//! [`MirrorSnapshot`], and a fetch takes the write side only while the fetch
//! itself runs, then swaps in the new handle. A separate sync mutex keeps a
//! second clone or fetch from starting while one is in flight.

mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

pub use state::SyncState;

use crate::error::{ConfigError, StoreError, SyncError};
use crate::repository::{RepositoryConfig, RepositoryPolicy};
use crate::store::{CommitId, FetchOutcome, ObjectStore, TagReference, Transport};
use crate::sync::SyncConfig;

type StoreSlot = Option<Arc<dyn ObjectStore>>;

/// What one sync step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The mirror was cloned from the origin.
    Cloned,
    /// A mirror left on disk by a previous run was opened and fetched.
    Adopted,
    /// A fetch brought new objects or references.
    Updated,
    /// A fetch found nothing new.
    UpToDate,
    /// Another sync of this mirror was already running.
    Skipped,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloned => "cloned",
            Self::Adopted => "adopted",
            Self::Updated => "updated",
            Self::UpToDate => "up_to_date",
            Self::Skipped => "skipped",
        }
    }
}

/// Point-in-time view of a mirror for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorStatus {
    pub name: String,
    pub url: String,
    pub present: bool,
    pub head: Option<CommitId>,
    pub seconds_since_sync: Option<u64>,
    pub last_error: Option<String>,
    pub failure_count: u32,
}

/// A local mirror of one repository.
pub struct RepositoryMirror {
    config: RepositoryConfig,
    policy: Arc<RepositoryPolicy>,
    path: PathBuf,
    store: Arc<RwLock<StoreSlot>>,
    sync_lock: Mutex<()>,
    queued: AtomicBool,
    state: SyncState,
}

impl RepositoryMirror {
    /// Creates an absent mirror stored at `<mirror_root>/<name>.git`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or its policy is invalid.
    pub fn new(config: RepositoryConfig, mirror_root: &Path) -> Result<Self, ConfigError> {
        let policy = config.compile()?;
        let path = mirror_root.join(format!("{}.git", config.name()));

        if !policy.trust.signer_key_ids().is_empty() {
            // Signatures are required to be present; keys are not checked yet.
            info!(
                repository = %config.name(),
                signer_key_ids = ?policy.trust.signer_key_ids(),
                "Accepted signer keys configured"
            );
        }

        Ok(Self {
            config,
            policy: Arc::new(policy),
            path,
            store: Arc::new(RwLock::new(None)),
            sync_lock: Mutex::new(()),
            queued: AtomicBool::new(false),
            state: SyncState::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn policy(&self) -> &Arc<RepositoryPolicy> {
        &self.policy
    }

    /// Where the mirror lives on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// True once the mirror has been cloned or adopted.
    pub async fn is_present(&self) -> bool {
        self.store.read().await.is_some()
    }

    /// Takes a consistent read view of the mirror, or `None` while absent.
    ///
    /// A fetch cannot swap the store while the snapshot is alive.
    pub async fn snapshot(&self) -> Option<MirrorSnapshot> {
        let guard = Arc::clone(&self.store).read_owned().await;
        let store = (*guard).as_ref().map(Arc::clone)?;

        Some(MirrorSnapshot {
            repository: self.name().to_string(),
            store,
            _guard: guard,
        })
    }

    pub async fn status(&self) -> MirrorStatus {
        MirrorStatus {
            name: self.name().to_string(),
            url: self.config.url().to_string(),
            present: self.is_present().await,
            head: self.state.head(),
            seconds_since_sync: self.state.time_since_sync().map(|d| d.as_secs()),
            last_error: self.state.last_error(),
            failure_count: self.state.failure_count(),
        }
    }

    /// Marks the mirror as waiting in the sync queue. Returns false if it
    /// already was.
    pub(crate) fn mark_queued(&self) -> bool {
        !self.queued.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    /// Runs one sync step: clone (or adopt) when absent, fetch when present.
    ///
    /// Returns [`SyncOutcome::Skipped`] without doing anything if another
    /// sync of this mirror is running. Results are recorded in
    /// [`state`](Self::state). Setting `interrupt` aborts the transfer;
    /// an aborted clone leaves the mirror absent and an aborted fetch leaves
    /// the previous state readable.
    pub async fn sync(
        &self,
        transport: &Arc<dyn Transport>,
        config: &SyncConfig,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<SyncOutcome, SyncError> {
        let Ok(_sync_guard) = self.sync_lock.try_lock() else {
            debug!(repository = %self.name(), "Sync already in progress");
            return Ok(SyncOutcome::Skipped);
        };

        let result = self.sync_locked(transport, config, interrupt).await;

        match &result {
            Ok(outcome) => {
                let head = self.read_head().await;
                self.state.record_success(head);
                debug!(repository = %self.name(), outcome = outcome.as_str(), "Sync finished");
            },
            Err(e) => self.state.record_failure(e.to_string()),
        }

        result
    }

    async fn sync_locked(
        &self,
        transport: &Arc<dyn Transport>,
        config: &SyncConfig,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<SyncOutcome, SyncError> {
        self.policy.hosts.check(self.config.url()).await?;

        if self.is_present().await {
            return self.fetch(transport, config, interrupt).await;
        }

        let opener = Arc::clone(transport);
        let path = self.path.clone();
        let existing = tokio::task::spawn_blocking(move || opener.open(&path))
            .await
            .map_err(|e| SyncError::Storage(format!("open task failed: {}", e)))?;

        match existing {
            Ok(Some(store)) => {
                info!(repository = %self.name(), path = %self.path.display(), "Adopted existing mirror");
                *self.store.write().await = Some(store);
                self.fetch(transport, config, interrupt).await?;
                return Ok(SyncOutcome::Adopted);
            },
            Ok(None) => {},
            Err(e) => warn!(
                repository = %self.name(),
                error = %e,
                "Existing mirror is unusable, cloning again"
            ),
        }

        info!(repository = %self.name(), url = %self.config.url(), "Cloning repository");

        let cloner = Arc::clone(transport);
        let url = self.config.url().to_string();
        let path = self.path.clone();
        let store = run_blocking(config.clone_timeout, interrupt, move |flag| {
            cloner.clone_bare(&url, &path, flag)
        })
        .await?;

        *self.store.write().await = Some(store);
        info!(repository = %self.name(), "Repository cloned");

        Ok(SyncOutcome::Cloned)
    }

    async fn fetch(
        &self,
        transport: &Arc<dyn Transport>,
        config: &SyncConfig,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<SyncOutcome, SyncError> {
        // Readers wait for at most one fetch; new snapshots see the result.
        let mut slot = self.store.write().await;

        let fetcher = Arc::clone(transport);
        let path = self.path.clone();
        let outcome = run_blocking(config.fetch_timeout, interrupt, move |flag| {
            fetcher.fetch(&path, flag)
        })
        .await?;

        match outcome {
            FetchOutcome::UpToDate => Ok(SyncOutcome::UpToDate),
            FetchOutcome::Updated(store) => {
                *slot = Some(store);
                info!(repository = %self.name(), "Mirror updated");
                Ok(SyncOutcome::Updated)
            },
        }
    }

    async fn read_head(&self) -> Option<CommitId> {
        let snapshot = self.snapshot().await?;
        tokio::task::spawn_blocking(move || snapshot.head_commit().ok().flatten())
            .await
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for RepositoryMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryMirror")
            .field("name", &self.name())
            .field("url", &self.config.url())
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

/// Runs a blocking store operation with a deadline.
///
/// On timeout the interrupt flag is raised and the operation is awaited
/// until it unwinds, so it never outlives the caller's locks.
async fn run_blocking<T, F>(
    timeout: Duration,
    interrupt: &Arc<AtomicBool>,
    op: F,
) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: FnOnce(&AtomicBool) -> Result<T, StoreError> + Send + 'static,
{
    let flag = Arc::clone(interrupt);
    let mut task = tokio::task::spawn_blocking(move || op(&flag));

    let joined = match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            interrupt.store(true, Ordering::SeqCst);
            let _ = task.await;
            return Err(SyncError::Timeout {
                seconds: timeout.as_secs(),
            });
        },
    };

    joined
        .map_err(|e| SyncError::Storage(format!("sync task failed: {}", e)))?
        .map_err(SyncError::from)
}

/// A read view of a present mirror.
///
/// Holds the mirror's read lock, so every call observes the same state.
/// Methods block and belong on `spawn_blocking`.
pub struct MirrorSnapshot {
    repository: String,
    store: Arc<dyn ObjectStore>,
    _guard: OwnedRwLockReadGuard<StoreSlot>,
}

impl MirrorSnapshot {
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn resolve_revision(&self, expr: &str) -> Result<CommitId, StoreError> {
        self.store.resolve_revision(expr)
    }

    pub fn reference_name(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.store.reference_name(name)
    }

    pub fn tag_references(&self) -> Result<Vec<TagReference>, StoreError> {
        self.store.tag_references()
    }

    pub fn open_file_at_commit(&self, path: &str, commit: &CommitId) -> Result<Vec<u8>, StoreError> {
        self.store.read_file(commit, path)
    }

    pub fn head_commit(&self) -> Result<Option<CommitId>, StoreError> {
        self.store.head_commit()
    }

    pub fn commit_signature(&self, commit: &CommitId) -> Result<Option<String>, StoreError> {
        self.store.commit_signature(commit)
    }

    pub fn tag_signature(&self, tag: &TagReference) -> Result<Option<String>, StoreError> {
        self.store.tag_signature(tag)
    }
}

impl std::fmt::Debug for MirrorSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSnapshot")
            .field("repository", &self.repository)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepository, MemoryTransport, RemoteFailure};

    const URL: &str = "mem://cfg";

    fn mirror() -> RepositoryMirror {
        let config = RepositoryConfig::builder()
            .name("cfg")
            .url(URL)
            .build()
            .unwrap();
        RepositoryMirror::new(config, Path::new("/var/lib/tagmirror")).unwrap()
    }

    fn origin() -> MemoryRepository {
        let mut repo = MemoryRepository::new();
        let commit = repo.commit(&[("app.yml", "v: 1")]);
        repo.branch("master", &commit).tag("v1.0.0", &commit);
        repo
    }

    fn parts(transport: &MemoryTransport) -> (Arc<dyn Transport>, SyncConfig, Arc<AtomicBool>) {
        (
            Arc::new(transport.clone()),
            SyncConfig::default(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_mirror_path() {
        assert_eq!(mirror().path(), Path::new("/var/lib/tagmirror/cfg.git"));
    }

    #[tokio::test]
    async fn test_clone_then_fetch() {
        let memory = MemoryTransport::new();
        memory.publish(URL, origin());
        let (transport, config, interrupt) = parts(&memory);
        let mirror = mirror();

        assert!(!mirror.is_present().await);
        assert!(mirror.snapshot().await.is_none());

        let outcome = mirror.sync(&transport, &config, &interrupt).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Cloned);
        assert!(mirror.is_present().await);
        assert!(mirror.state().head().is_some());

        let outcome = mirror.sync(&transport, &config, &interrupt).await.unwrap();
        assert_eq!(outcome, SyncOutcome::UpToDate);

        memory.update(URL, |repo| {
            let commit = repo.commit(&[("app.yml", "v: 2")]);
            repo.tag("v2.0.0", &commit);
        });
        let outcome = mirror.sync(&transport, &config, &interrupt).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);

        let snapshot = mirror.snapshot().await.unwrap();
        assert_eq!(snapshot.tag_references().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_clone_stays_absent() {
        let memory = MemoryTransport::new();
        memory.publish(URL, origin());
        memory.set_failure(URL, Some(RemoteFailure::Network));
        let (transport, config, interrupt) = parts(&memory);
        let mirror = mirror();

        let err = mirror.sync(&transport, &config, &interrupt).await.unwrap_err();
        assert!(matches!(err, SyncError::NetworkFailure(_)));
        assert!(!mirror.is_present().await);
        assert_eq!(mirror.state().failure_count(), 1);
        assert!(mirror.state().last_error().is_some());

        memory.set_failure(URL, None);
        let outcome = mirror.sync(&transport, &config, &interrupt).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Cloned);
        assert_eq!(mirror.state().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_state() {
        let memory = MemoryTransport::new();
        memory.publish(URL, origin());
        let (transport, config, interrupt) = parts(&memory);
        let mirror = mirror();
        mirror.sync(&transport, &config, &interrupt).await.unwrap();

        memory.set_failure(URL, Some(RemoteFailure::Auth));
        let err = mirror.sync(&transport, &config, &interrupt).await.unwrap_err();
        assert!(matches!(err, SyncError::AuthFailure(_)));
        assert!(mirror.is_present().await);

        let snapshot = mirror.snapshot().await.unwrap();
        let commit = snapshot.resolve_revision("master").unwrap();
        assert_eq!(snapshot.open_file_at_commit("/app.yml", &commit).unwrap(), b"v: 1");
    }

    #[tokio::test]
    async fn test_adopts_existing_mirror() {
        let memory = MemoryTransport::new();
        memory.publish(URL, origin());
        let mirror = mirror();
        memory.seed_mirror(URL, mirror.path());
        let (transport, config, interrupt) = parts(&memory);

        let outcome = mirror.sync(&transport, &config, &interrupt).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Adopted);
        assert_eq!(memory.clone_count(URL), 0);
        assert_eq!(memory.fetch_count(URL), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_skipped() {
        let memory = MemoryTransport::new();
        memory.publish(URL, origin());
        memory.set_delay(Some(Duration::from_millis(200)));
        let (transport, config, interrupt) = parts(&memory);
        let mirror = Arc::new(mirror());

        let first = {
            let mirror = Arc::clone(&mirror);
            let transport = Arc::clone(&transport);
            let config = config.clone();
            let interrupt = Arc::clone(&interrupt);
            tokio::spawn(async move { mirror.sync(&transport, &config, &interrupt).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = mirror.sync(&transport, &config, &interrupt).await.unwrap();
        assert_eq!(second, SyncOutcome::Skipped);
        assert_eq!(first.await.unwrap().unwrap(), SyncOutcome::Cloned);
        assert_eq!(memory.clone_count(URL), 1);
    }

    #[tokio::test]
    async fn test_clone_timeout() {
        let memory = MemoryTransport::new();
        memory.publish(URL, origin());
        memory.set_delay(Some(Duration::from_secs(10)));
        let (transport, mut config, interrupt) = parts(&memory);
        config.clone_timeout = Duration::from_millis(50);
        let mirror = mirror();

        let err = mirror.sync(&transport, &config, &interrupt).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { .. }));
        assert!(!mirror.is_present().await);
        assert!(!memory.has_mirror(mirror.path()));
    }

    #[tokio::test]
    async fn test_host_policy_blocks_sync() {
        let url = "https://192.168.0.5/org/cfg.git";
        let memory = MemoryTransport::new();
        memory.publish(url, origin());
        let (transport, config, interrupt) = parts(&memory);

        let repo_config = RepositoryConfig::builder()
            .name("cfg")
            .url(url)
            .allow_host("10.0.0.0/8")
            .build()
            .unwrap();
        let mirror = RepositoryMirror::new(repo_config, Path::new("/tmp")).unwrap();

        let err = mirror.sync(&transport, &config, &interrupt).await.unwrap_err();
        assert!(matches!(err, SyncError::HostNotAllowed { .. }));
        assert_eq!(memory.clone_count(url), 0);
    }

    #[tokio::test]
    async fn test_status() {
        let memory = MemoryTransport::new();
        memory.publish(URL, origin());
        let (transport, config, interrupt) = parts(&memory);
        let mirror = mirror();

        let status = mirror.status().await;
        assert!(!status.present);
        assert!(status.head.is_none());

        mirror.sync(&transport, &config, &interrupt).await.unwrap();
        let status = mirror.status().await;
        assert_eq!(status.name, "cfg");
        assert!(status.present);
        assert!(status.head.is_some());
        assert_eq!(status.seconds_since_sync, Some(0));
        assert_eq!(status.failure_count, 0);
    }
}
