//! In-memory repositories and transport.
//!
//! Used by tests and for running the engine without network access. The
//! transport serves origins registered by URL and keeps mirrors keyed by
//! their local path, so adoption, fetch and failure handling behave the same
//! way they do against real repositories.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    CommitId, FetchOutcome, ObjectStore, TagReference, Transport, clean_path, looks_like_object_id,
    reference_candidates,
};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
struct MemoryCommit {
    files: BTreeMap<String, Vec<u8>>,
    signature: Option<String>,
}

#[derive(Debug, Clone)]
struct MemoryTag {
    target: CommitId,
    annotated: bool,
    signature: Option<String>,
}

/// A repository built in memory: commits with file trees, branches and tags.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    commits: HashMap<CommitId, MemoryCommit>,
    refs: BTreeMap<String, CommitId>,
    tags: BTreeMap<String, MemoryTag>,
    head: Option<String>,
    sequence: u64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> CommitId {
        self.sequence += 1;

        // splitmix64, so abbreviated ids are distinct in practice
        let mut state = self.sequence.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut hex = String::with_capacity(48);
        for _ in 0..3 {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            hex.push_str(&format!("{:016x}", z));
        }
        hex.truncate(40);

        CommitId::new(hex)
    }

    fn insert_commit(&mut self, files: &[(&str, &str)], signature: Option<String>) -> CommitId {
        let id = self.next_id();
        let files = files
            .iter()
            .filter_map(|(path, content)| {
                clean_path(path).map(|path| (path, content.as_bytes().to_vec()))
            })
            .collect();

        self.commits.insert(id.clone(), MemoryCommit { files, signature });
        id
    }

    /// Adds an unsigned commit holding `files` and returns its id.
    pub fn commit(&mut self, files: &[(&str, &str)]) -> CommitId {
        self.insert_commit(files, None)
    }

    /// Adds a commit carrying a signature header.
    pub fn commit_signed(&mut self, files: &[(&str, &str)], signature: &str) -> CommitId {
        self.insert_commit(files, Some(signature.to_string()))
    }

    /// Points `refs/heads/<name>` at `commit`. The first branch becomes HEAD.
    pub fn branch(&mut self, name: &str, commit: &CommitId) -> &mut Self {
        let full = format!("refs/heads/{}", name);
        self.refs.insert(full.clone(), commit.clone());
        self.head.get_or_insert(full);
        self
    }

    /// Points `refs/remotes/origin/<name>` at `commit`.
    pub fn remote_branch(&mut self, name: &str, commit: &CommitId) -> &mut Self {
        self.refs
            .insert(format!("refs/remotes/origin/{}", name), commit.clone());
        self
    }

    /// Creates a lightweight tag.
    pub fn tag(&mut self, name: &str, commit: &CommitId) -> &mut Self {
        self.insert_tag(name, commit, false, None)
    }

    /// Creates an annotated tag, signed when `signature` is given.
    pub fn annotated_tag(
        &mut self,
        name: &str,
        commit: &CommitId,
        signature: Option<&str>,
    ) -> &mut Self {
        self.insert_tag(name, commit, true, signature.map(str::to_string))
    }

    fn insert_tag(
        &mut self,
        name: &str,
        commit: &CommitId,
        annotated: bool,
        signature: Option<String>,
    ) -> &mut Self {
        let full = format!("refs/tags/{}", name);
        self.refs.insert(full.clone(), commit.clone());
        self.tags.insert(
            full,
            MemoryTag {
                target: commit.clone(),
                annotated,
                signature,
            },
        );
        self
    }

    /// Removes a branch or tag given by full name.
    pub fn delete_ref(&mut self, full_name: &str) -> &mut Self {
        self.refs.remove(full_name);
        self.tags.remove(full_name);
        self
    }

    fn find_ref(&self, expr: &str) -> Option<&CommitId> {
        self.find_ref_name(expr).and_then(|name| self.refs.get(name))
    }

    fn find_ref_name(&self, expr: &str) -> Option<&str> {
        if expr == "HEAD" {
            return self.head.as_deref().filter(|head| self.refs.contains_key(*head));
        }

        reference_candidates(expr)
            .into_iter()
            .find_map(|candidate| self.refs.get_key_value(&candidate).map(|(name, _)| name.as_str()))
    }

    fn find_object_id(&self, expr: &str) -> Result<Option<CommitId>, StoreError> {
        if !looks_like_object_id(expr) {
            return Ok(None);
        }

        let prefix = expr.to_ascii_lowercase();
        let mut matches = self
            .commits
            .keys()
            .filter(|id| id.as_str().starts_with(&prefix));

        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(Some(id.clone())),
            (Some(_), Some(_)) => Err(StoreError::RevisionNotFound(format!(
                "{} (ambiguous)",
                expr
            ))),
            _ => Ok(None),
        }
    }
}

/// An immutable snapshot of a [`MemoryRepository`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    repo: Arc<MemoryRepository>,
}

impl MemoryStore {
    pub fn new(repo: MemoryRepository) -> Self {
        Self {
            repo: Arc::new(repo),
        }
    }
}

impl ObjectStore for MemoryStore {
    fn resolve_revision(&self, expr: &str) -> Result<CommitId, StoreError> {
        // Full hashes win, references come before abbreviated hashes.
        if expr.len() == 40 {
            if let Some(id) = self.repo.find_object_id(expr)? {
                return Ok(id);
            }
        }
        if let Some(id) = self.repo.find_ref(expr) {
            return Ok(id.clone());
        }
        self.repo
            .find_object_id(expr)?
            .ok_or_else(|| StoreError::RevisionNotFound(expr.to_string()))
    }

    fn reference_name(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.repo.find_ref_name(name).map(str::to_string))
    }

    fn tag_references(&self) -> Result<Vec<TagReference>, StoreError> {
        Ok(self
            .repo
            .tags
            .iter()
            .map(|(name, tag)| TagReference::new(name.clone(), tag.target.clone()))
            .collect())
    }

    fn read_file(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>, StoreError> {
        let commit = self
            .repo
            .commits
            .get(commit)
            .ok_or_else(|| StoreError::CommitNotFound(commit.to_string()))?;
        let cleaned = clean_path(path).ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;

        commit
            .files
            .get(&cleaned)
            .cloned()
            .ok_or(StoreError::PathNotFound(cleaned))
    }

    fn head_commit(&self) -> Result<Option<CommitId>, StoreError> {
        Ok(self.repo.find_ref("HEAD").cloned())
    }

    fn commit_signature(&self, commit: &CommitId) -> Result<Option<String>, StoreError> {
        self.repo
            .commits
            .get(commit)
            .map(|c| c.signature.clone())
            .ok_or_else(|| StoreError::CommitNotFound(commit.to_string()))
    }

    fn tag_signature(&self, tag: &TagReference) -> Result<Option<String>, StoreError> {
        let stored = self
            .repo
            .tags
            .get(tag.name())
            .ok_or_else(|| StoreError::RevisionNotFound(tag.name().to_string()))?;

        Ok(if stored.annotated {
            stored.signature.clone()
        } else {
            None
        })
    }
}

/// Failure an origin can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFailure {
    Network,
    Auth,
    NotFound,
}

impl RemoteFailure {
    fn to_error(self, url: &str) -> StoreError {
        match self {
            Self::Network => StoreError::Network(format!("{}: connection refused", url)),
            Self::Auth => StoreError::Auth(format!("{}: authentication required", url)),
            Self::NotFound => StoreError::OriginNotFound(url.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct Origin {
    repo: MemoryRepository,
    generation: u64,
    failure: Option<RemoteFailure>,
    clones: usize,
    fetches: usize,
}

#[derive(Debug, Clone)]
struct LocalMirror {
    url: String,
    generation: u64,
    store: Arc<MemoryStore>,
}

#[derive(Debug, Default)]
struct TransportState {
    origins: HashMap<String, Origin>,
    mirrors: HashMap<PathBuf, LocalMirror>,
    delay: Option<Duration>,
}

/// Transport serving [`MemoryRepository`] origins.
///
/// Cloning is cheap, clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `repo` at `url`, replacing what was there.
    pub fn publish(&self, url: &str, repo: MemoryRepository) {
        let mut state = self.state.lock();
        let origin = state.origins.entry(url.to_string()).or_default();
        origin.repo = repo;
        origin.generation += 1;
    }

    /// Changes the repository served at `url` in place.
    pub fn update<F>(&self, url: &str, change: F)
    where
        F: FnOnce(&mut MemoryRepository),
    {
        let mut state = self.state.lock();
        let origin = state.origins.entry(url.to_string()).or_default();
        change(&mut origin.repo);
        origin.generation += 1;
    }

    /// Makes every clone and fetch of `url` fail, or heals it with `None`.
    pub fn set_failure(&self, url: &str, failure: Option<RemoteFailure>) {
        self.state
            .lock()
            .origins
            .entry(url.to_string())
            .or_default()
            .failure = failure;
    }

    /// Makes every clone and fetch take at least `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Places a mirror at `path` as if a previous run had cloned it.
    pub fn seed_mirror(&self, url: &str, path: &Path) {
        let mut state = self.state.lock();
        let (repo, generation) = state
            .origins
            .get(url)
            .map(|o| (o.repo.clone(), o.generation))
            .unwrap_or_default();
        state.mirrors.insert(
            path.to_path_buf(),
            LocalMirror {
                url: url.to_string(),
                generation,
                store: Arc::new(MemoryStore::new(repo)),
            },
        );
    }

    pub fn clone_count(&self, url: &str) -> usize {
        self.state.lock().origins.get(url).map_or(0, |o| o.clones)
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.state.lock().origins.get(url).map_or(0, |o| o.fetches)
    }

    pub fn has_mirror(&self, path: &Path) -> bool {
        self.state.lock().mirrors.contains_key(path)
    }

    fn wait(&self, interrupt: &AtomicBool) -> Result<(), StoreError> {
        let Some(delay) = self.state.lock().delay else {
            return Ok(());
        };

        let step = Duration::from_millis(5);
        let mut waited = Duration::ZERO;
        while waited < delay {
            if interrupt.load(Ordering::Relaxed) {
                return Err(StoreError::Interrupted);
            }
            std::thread::sleep(step);
            waited += step;
        }

        if interrupt.load(Ordering::Relaxed) {
            return Err(StoreError::Interrupted);
        }
        Ok(())
    }

    /// Takes the current state of an origin, counting the access.
    fn pull(&self, url: &str, for_clone: bool) -> Result<(MemoryRepository, u64), StoreError> {
        let mut state = self.state.lock();
        let origin = state
            .origins
            .get_mut(url)
            .ok_or_else(|| StoreError::OriginNotFound(url.to_string()))?;

        if for_clone {
            origin.clones += 1;
        } else {
            origin.fetches += 1;
        }

        if let Some(failure) = origin.failure {
            return Err(failure.to_error(url));
        }

        Ok((origin.repo.clone(), origin.generation))
    }
}

impl Transport for MemoryTransport {
    fn open(&self, path: &Path) -> Result<Option<Arc<dyn ObjectStore>>, StoreError> {
        Ok(self
            .state
            .lock()
            .mirrors
            .get(path)
            .map(|mirror| Arc::clone(&mirror.store) as Arc<dyn ObjectStore>))
    }

    fn clone_bare(
        &self,
        url: &str,
        path: &Path,
        interrupt: &AtomicBool,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        let (repo, generation) = self.pull(url, true)?;
        self.wait(interrupt)?;

        let store = Arc::new(MemoryStore::new(repo));
        self.state.lock().mirrors.insert(
            path.to_path_buf(),
            LocalMirror {
                url: url.to_string(),
                generation,
                store: Arc::clone(&store),
            },
        );

        Ok(store)
    }

    fn fetch(&self, path: &Path, interrupt: &AtomicBool) -> Result<FetchOutcome, StoreError> {
        let mirror = self
            .state
            .lock()
            .mirrors
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::git(format!("no mirror at {}", path.display())))?;

        let (repo, generation) = self.pull(&mirror.url, false)?;
        self.wait(interrupt)?;

        if generation == mirror.generation {
            return Ok(FetchOutcome::UpToDate);
        }

        let store = Arc::new(MemoryStore::new(repo));
        self.state.lock().mirrors.insert(
            path.to_path_buf(),
            LocalMirror {
                url: mirror.url,
                generation,
                store: Arc::clone(&store),
            },
        );

        Ok(FetchOutcome::Updated(store))
    }
}
