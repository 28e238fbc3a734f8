//! Bare mirrors on disk, using gix (pure Rust).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gix::bstr::ByteSlice;
use gix::remote::fetch::Tags;
use gix::remote::fetch::refs::update::Mode;
use tracing::{debug, info};

use super::{CommitId, FetchOutcome, ObjectStore, TagReference, Transport, clean_path};
use crate::error::StoreError;

/// A bare repository opened for reading.
pub struct GixStore {
    repo: gix::ThreadSafeRepository,
    path: PathBuf,
}

impl GixStore {
    /// Opens the bare repository at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let repo = gix::open(path)
            .map_err(|e| StoreError::git(format!("Failed to open repo: {}", e)))?;

        Ok(Self {
            repo: repo.into_sync(),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn local(&self) -> gix::Repository {
        self.repo.to_thread_local()
    }

    fn find_commit<'r>(
        repo: &'r gix::Repository,
        commit: &CommitId,
    ) -> Result<gix::Commit<'r>, StoreError> {
        let not_found = || StoreError::CommitNotFound(commit.to_string());

        let oid = gix::ObjectId::from_hex(commit.as_str().as_bytes()).map_err(|_| not_found())?;
        repo.find_object(oid)
            .map_err(|_| not_found())?
            .try_into_commit()
            .map_err(|_| not_found())
    }

    fn peel_to_commit(repo: &gix::Repository, expr: &str) -> Option<CommitId> {
        let id = repo.rev_parse_single(expr).ok()?;
        let commit = id.object().ok()?.peel_to_commit().ok()?;
        Some(CommitId::new(commit.id.to_string()))
    }
}

impl ObjectStore for GixStore {
    fn resolve_revision(&self, expr: &str) -> Result<CommitId, StoreError> {
        let repo = self.local();

        // Bare mirrors keep remote branches under refs/remotes/origin, which
        // rev-parse does not consult for a short branch name.
        Self::peel_to_commit(&repo, expr)
            .or_else(|| Self::peel_to_commit(&repo, &format!("refs/remotes/origin/{}", expr)))
            .ok_or_else(|| StoreError::RevisionNotFound(expr.to_string()))
    }

    fn reference_name(&self, name: &str) -> Result<Option<String>, StoreError> {
        let repo = self.local();
        let found = |candidate: &str| -> Option<String> {
            let reference = repo.try_find_reference(candidate).ok()??;
            reference.name().as_bstr().to_str().ok().map(str::to_string)
        };

        Ok(found(name).or_else(|| found(&format!("refs/remotes/origin/{}", name))))
    }

    fn tag_references(&self) -> Result<Vec<TagReference>, StoreError> {
        let repo = self.local();
        let platform = repo
            .references()
            .map_err(|e| StoreError::git(format!("Failed to list references: {}", e)))?;
        let tags = platform
            .tags()
            .map_err(|e| StoreError::git(format!("Failed to list tags: {}", e)))?;

        let mut out = Vec::new();
        for reference in tags.flatten() {
            let Ok(name) = reference.name().as_bstr().to_str() else {
                continue;
            };
            let name = name.to_string();

            match reference.into_fully_peeled_id() {
                Ok(id) => out.push(TagReference::new(name, CommitId::new(id.to_string()))),
                Err(e) => debug!(tag = %name, error = %e, "Skipping tag that does not peel"),
            }
        }

        Ok(out)
    }

    fn read_file(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>, StoreError> {
        let repo = self.local();
        let path = clean_path(path).ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;
        let not_found = || StoreError::PathNotFound(path.clone());

        let commit = Self::find_commit(&repo, commit)?;
        let mut tree = commit
            .tree()
            .map_err(|e| StoreError::git(format!("Failed to read tree: {}", e)))?;

        let entry = tree
            .peel_to_entry_by_path(path.as_str())
            .map_err(|e| StoreError::git(format!("Failed to look up {}: {}", path, e)))?
            .ok_or_else(not_found)?;

        if entry.mode().is_tree() || entry.mode().is_commit() {
            return Err(not_found());
        }

        let mut object = entry
            .object()
            .map_err(|e| StoreError::git(format!("Failed to read blob: {}", e)))?;

        Ok(std::mem::take(&mut object.data))
    }

    fn head_commit(&self) -> Result<Option<CommitId>, StoreError> {
        let repo = self.local();
        Ok(repo.head_id().ok().map(|id| CommitId::new(id.to_string())))
    }

    fn commit_signature(&self, commit: &CommitId) -> Result<Option<String>, StoreError> {
        let repo = self.local();
        let commit = Self::find_commit(&repo, commit)?;
        let decoded = commit
            .decode()
            .map_err(|e| StoreError::git(format!("Failed to decode commit: {}", e)))?;

        let signature = decoded.extra_headers.iter().find_map(|(key, value)| {
            let key: &[u8] = key;
            (key == b"gpgsig").then(|| value.to_str_lossy().into_owned())
        });

        Ok(signature)
    }

    fn tag_signature(&self, tag: &TagReference) -> Result<Option<String>, StoreError> {
        let repo = self.local();
        let reference = repo
            .find_reference(tag.name())
            .map_err(|_| StoreError::RevisionNotFound(tag.name().to_string()))?;

        // Lightweight tags point straight at the commit.
        let Some(id) = reference.try_id() else {
            return Ok(None);
        };
        let object = id
            .object()
            .map_err(|e| StoreError::git(format!("Failed to read tag: {}", e)))?;
        if object.kind != gix::object::Kind::Tag {
            return Ok(None);
        }

        let tag_object = object.into_tag();
        let decoded = tag_object
            .decode()
            .map_err(|e| StoreError::git(format!("Failed to decode tag: {}", e)))?;

        Ok(decoded
            .pgp_signature
            .map(|signature| signature.to_str_lossy().into_owned()))
    }
}

impl std::fmt::Debug for GixStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GixStore").field("path", &self.path).finish()
    }
}

/// Clones and fetches bare mirrors over the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct GixTransport;

impl GixTransport {
    pub fn new() -> Self {
        Self
    }

    fn failure(interrupt: &AtomicBool, context: &str, err: impl std::fmt::Display) -> StoreError {
        if interrupt.load(Ordering::Relaxed) {
            StoreError::Interrupted
        } else {
            StoreError::transport(format!("{}: {}", context, err))
        }
    }

    fn clone_blocking(
        url: &str,
        dest: &Path,
        interrupt: &AtomicBool,
    ) -> Result<GixStore, StoreError> {
        let parent = dest
            .parent()
            .ok_or_else(|| StoreError::git(format!("{} has no parent directory", dest.display())))?;
        std::fs::create_dir_all(parent)?;

        // Clone next to the destination and rename into place, so a failed
        // or interrupted clone never leaves a partial mirror behind.
        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)?;

        let parsed = gix::url::parse(url.into())
            .map_err(|e| StoreError::git(format!("Invalid URL: {}", e)))?;

        let mut prepare = gix::prepare_clone_bare(parsed, staging.path())
            .map_err(|e| StoreError::git(format!("Failed to prepare clone: {}", e)))?
            .configure_remote(|remote| Ok(remote.with_fetch_tags(Tags::All)));

        let (repo, _outcome) = prepare
            .fetch_only(gix::progress::Discard, interrupt)
            .map_err(|e| Self::failure(interrupt, "Clone failed", e))?;
        drop(repo);

        if interrupt.load(Ordering::Relaxed) {
            return Err(StoreError::Interrupted);
        }

        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }
        let staged = staging.keep();
        std::fs::rename(&staged, dest)?;

        GixStore::open(dest)
    }

    fn fetch_blocking(path: &Path, interrupt: &AtomicBool) -> Result<FetchOutcome, StoreError> {
        let repo = gix::open(path)
            .map_err(|e| StoreError::git(format!("Failed to open repo: {}", e)))?;

        let remote = repo
            .find_default_remote(gix::remote::Direction::Fetch)
            .ok_or_else(|| StoreError::git("No default remote found"))?
            .map_err(|e| StoreError::git(format!("Failed to find remote: {}", e)))?
            .with_fetch_tags(Tags::All);

        let outcome = remote
            .connect(gix::remote::Direction::Fetch)
            .map_err(|e| Self::failure(interrupt, "Failed to connect", e))?
            .prepare_fetch(gix::progress::Discard, Default::default())
            .map_err(|e| Self::failure(interrupt, "Failed to prepare fetch", e))?
            .receive(gix::progress::Discard, interrupt)
            .map_err(|e| Self::failure(interrupt, "Fetch failed", e))?;

        let changed = match &outcome.status {
            gix::remote::fetch::Status::NoPackReceived { update_refs, .. } => {
                update_refs
                    .updates
                    .iter()
                    .any(|update| matches!(update.mode, Mode::FastForward | Mode::Forced | Mode::New))
            },
            gix::remote::fetch::Status::Change { .. } => true,
        };

        if !changed {
            debug!(path = %path.display(), "Mirror already up to date");
            return Ok(FetchOutcome::UpToDate);
        }

        Ok(FetchOutcome::Updated(Arc::new(GixStore::open(path)?)))
    }
}

impl Transport for GixTransport {
    fn open(&self, path: &Path) -> Result<Option<Arc<dyn ObjectStore>>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }

        let store = GixStore::open(path)?;
        info!(path = %path.display(), "Adopting existing mirror");
        Ok(Some(Arc::new(store)))
    }

    fn clone_bare(
        &self,
        url: &str,
        path: &Path,
        interrupt: &AtomicBool,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        info!(url, path = %path.display(), "Cloning mirror");
        let store = Self::clone_blocking(url, path, interrupt)?;
        Ok(Arc::new(store))
    }

    fn fetch(&self, path: &Path, interrupt: &AtomicBool) -> Result<FetchOutcome, StoreError> {
        debug!(path = %path.display(), "Fetching mirror");
        Self::fetch_blocking(path, interrupt)
    }
}
