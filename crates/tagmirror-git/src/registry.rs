//! The set of mirrored repositories.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{ConfigError, ResolveError};
use crate::mirror::{MirrorStatus, RepositoryMirror};
use crate::repository::RepositoryConfig;

/// Owns every [`RepositoryMirror`], keyed by repository name.
///
/// The map lock is only held to look up or insert a handle, never across an
/// await; mirrors guard their own state.
#[derive(Debug)]
pub struct RepositoryRegistry {
    mirror_root: PathBuf,
    mirrors: RwLock<BTreeMap<String, Arc<RepositoryMirror>>>,
}

impl RepositoryRegistry {
    /// Creates an empty registry storing mirrors under `mirror_root`.
    pub fn new(mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            mirror_root: mirror_root.into(),
            mirrors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a registry holding one mirror per configuration.
    pub fn from_configs<I>(mirror_root: impl Into<PathBuf>, configs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = RepositoryConfig>,
    {
        let registry = Self::new(mirror_root);
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// Adds a repository. Names must be unique.
    pub fn register(&self, config: RepositoryConfig) -> Result<Arc<RepositoryMirror>, ConfigError> {
        let mirror = Arc::new(RepositoryMirror::new(config, &self.mirror_root)?);
        let name = mirror.name().to_string();

        let mut mirrors = self.mirrors.write();
        if mirrors.contains_key(&name) {
            return Err(ConfigError::DuplicateRepository(name));
        }
        mirrors.insert(name.clone(), Arc::clone(&mirror));
        drop(mirrors);

        info!(repository = %name, url = %mirror.config().url(), "Repository registered");
        Ok(mirror)
    }

    pub fn get(&self, name: &str) -> Result<Arc<RepositoryMirror>, ResolveError> {
        self.mirrors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownRepository(name.to_string()))
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.mirrors.read().keys().cloned().collect()
    }

    /// All mirrors, ordered by name.
    pub fn mirrors(&self) -> Vec<Arc<RepositoryMirror>> {
        self.mirrors.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.mirrors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.read().is_empty()
    }

    /// Status of every mirror, ordered by name.
    pub async fn status(&self) -> Vec<MirrorStatus> {
        let mut statuses = Vec::new();
        for mirror in self.mirrors() {
            statuses.push(mirror.status().await);
        }
        statuses
    }
}
