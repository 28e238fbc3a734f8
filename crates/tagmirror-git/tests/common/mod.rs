#![allow(dead_code)]
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tagmirror_git::store::MemoryRepository;
use tagmirror_git::{
    CommitId, MemoryTransport, RepositoryConfig, RepositoryRegistry, Resolver, SyncConfig,
    SyncOutcome, Transport,
};

/// Commits of the standard fixture repository.
pub struct Fixture {
    pub v1: CommitId,
    pub v2: CommitId,
}

pub fn url(name: &str) -> String {
    format!("mem://{}", name)
}

/// A repository config with every selector kind enabled.
pub fn config(name: &str) -> RepositoryConfig {
    RepositoryConfig::builder()
        .name(name)
        .url(url(name))
        .build()
        .expect("valid test config")
}

/// Two commits: `v1` tagged 1.0.0 and `v2` tagged 1.1.0 on `master`, also
/// reachable as `origin/master`.
pub fn origin() -> (MemoryRepository, Fixture) {
    let mut repo = MemoryRepository::new();
    let v1 = repo.commit(&[("app.yml", "version: 1"), ("db/pool.yml", "size: 1")]);
    let v2 = repo.commit(&[("app.yml", "version: 2"), ("db/pool.yml", "size: 2")]);

    repo.branch("master", &v2)
        .remote_branch("master", &v2)
        .tag("v1.0.0", &v1)
        .tag("v1.1.0", &v2)
        .tag("latest", &v2);

    (repo, Fixture { v1, v2 })
}

pub fn interrupt() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

/// A registry over `transport` with the given repositories registered.
pub fn registry(configs: Vec<RepositoryConfig>) -> Arc<RepositoryRegistry> {
    Arc::new(RepositoryRegistry::from_configs("/mirrors", configs).expect("valid registry"))
}

/// Syncs one repository and returns the outcome.
pub async fn sync(
    registry: &RepositoryRegistry,
    transport: &MemoryTransport,
    name: &str,
) -> SyncOutcome {
    let transport: Arc<dyn Transport> = Arc::new(transport.clone());
    registry
        .get(name)
        .expect("registered")
        .sync(&transport, &SyncConfig::default(), &interrupt())
        .await
        .expect("sync succeeds")
}

/// Publishes the fixture as `name`, clones it and returns a resolver.
pub async fn cloned_resolver(name: &str) -> (Resolver, MemoryTransport, Fixture) {
    let memory = MemoryTransport::new();
    let (repo, fixture) = origin();
    memory.publish(&url(name), repo);

    let registry = registry(vec![config(name)]);
    sync(&registry, &memory, name).await;

    (Resolver::new(registry), memory, fixture)
}
