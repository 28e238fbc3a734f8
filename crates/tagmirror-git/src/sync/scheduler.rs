//! Background sync scheduler.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::SyncConfig;
use crate::error::{ConfigError, ResolveError, SyncError};
use crate::metrics;
use crate::mirror::{RepositoryMirror, SyncOutcome};
use crate::registry::RepositoryRegistry;
use crate::store::Transport;

/// Keeps every registered repository cloned and refreshed.
///
/// One timer task per repository feeds a bounded queue; a fixed pool of
/// workers drains it. A repository is queued at most once at a time, and
/// the mirror's own sync lock keeps two clones or fetches from overlapping.
pub struct SyncScheduler {
    registry: Arc<RepositoryRegistry>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
}

impl SyncScheduler {
    /// Creates a scheduler after validating `config`.
    pub fn new(
        registry: Arc<RepositoryRegistry>,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            registry,
            transport,
            config,
        })
    }

    /// Creates a scheduler with default configuration.
    pub fn with_defaults(registry: Arc<RepositoryRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            config: SyncConfig::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Syncs every registered repository once, at most `workers` at a time,
    /// and returns the results ordered by repository name.
    pub async fn sync_all(&self) -> Vec<(String, Result<SyncOutcome, SyncError>)> {
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for mirror in self.registry.mirrors() {
            let permits = Arc::clone(&permits);
            let transport = Arc::clone(&self.transport);
            let config = self.config.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let interrupt = Arc::new(AtomicBool::new(false));
                let started = Instant::now();

                let result = mirror.sync(&transport, &config, &interrupt).await;
                report(&mirror, &result, started);

                (mirror.name().to_string(), result)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Sync task failed"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Starts the workers and one timer per registered repository.
    ///
    /// Must be called from within a tokio runtime. Returns a handle that
    /// stops everything when dropped.
    pub fn start(self) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let workers = self.config.workers.max(1);
        let shared = Arc::new(Shared {
            registry: self.registry,
            transport: self.transport,
            config: self.config,
            queue: queue_tx,
            shutdown: shutdown_rx,
        });

        info!(
            workers,
            repositories = shared.registry.len(),
            "Starting sync scheduler"
        );

        let mut tasks = Vec::new();
        for id in 0..workers {
            tasks.push(tokio::spawn(run_worker(
                id,
                Arc::clone(&shared),
                Arc::clone(&queue_rx),
            )));
        }

        let names = shared.registry.names();
        for name in &names {
            tasks.push(tokio::spawn(run_timer(Arc::clone(&shared), name.clone())));
        }

        SyncHandle {
            shutdown_tx,
            shared,
            tasks: Mutex::new(tasks),
            tracked: Mutex::new(names.into_iter().collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueued {
    Queued,
    AlreadyQueued,
    Closed,
}

struct Shared {
    registry: Arc<RepositoryRegistry>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    queue: mpsc::Sender<String>,
    shutdown: watch::Receiver<bool>,
}

impl Shared {
    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Queues `mirror` unless it is already waiting.
    async fn enqueue(&self, mirror: &RepositoryMirror) -> Enqueued {
        if self.is_shutting_down() {
            return Enqueued::Closed;
        }
        if !mirror.mark_queued() {
            debug!(repository = %mirror.name(), "Already queued");
            return Enqueued::AlreadyQueued;
        }

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            sent = self.queue.send(mirror.name().to_string()) => {
                if sent.is_err() {
                    mirror.clear_queued();
                    return Enqueued::Closed;
                }
                Enqueued::Queued
            }
            _ = shutdown.changed() => {
                mirror.clear_queued();
                Enqueued::Closed
            }
        }
    }

    async fn sync_one(&self, name: &str) {
        let mirror = match self.registry.get(name) {
            Ok(mirror) => mirror,
            Err(e) => {
                warn!(repository = %name, error = %e, "Queued repository vanished");
                return;
            },
        };
        mirror.clear_queued();

        let interrupt = Arc::new(AtomicBool::new(false));
        let started = Instant::now();
        let mut shutdown = self.shutdown.clone();

        let op = mirror.sync(&self.transport, &self.config, &interrupt);
        tokio::pin!(op);

        // On shutdown the transfer is told to stop and then awaited, so the
        // mirror is never left half-updated.
        let result = tokio::select! {
            result = &mut op => result,
            _ = shutdown.changed() => {
                interrupt.store(true, Ordering::SeqCst);
                op.await
            }
        };

        report(&mirror, &result, started);
    }
}

fn report(mirror: &RepositoryMirror, result: &Result<SyncOutcome, SyncError>, started: Instant) {
    let elapsed = started.elapsed();

    match result {
        Ok(SyncOutcome::Skipped) => {
            debug!(repository = %mirror.name(), "Sync skipped, another one is running");
        },
        Ok(outcome) => {
            metrics::record_sync(mirror.name(), outcome.as_str(), elapsed);
            debug!(
                repository = %mirror.name(),
                outcome = outcome.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Sync complete"
            );
        },
        Err(e) => {
            metrics::record_sync(mirror.name(), "error", elapsed);
            warn!(
                repository = %mirror.name(),
                error = %e,
                transient = e.is_transient(),
                failures = mirror.state().failure_count(),
                "Sync failed"
            );
        },
    }
}

async fn run_worker(
    id: usize,
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
) {
    let mut shutdown = shared.shutdown.clone();

    loop {
        if shared.is_shutting_down() {
            break;
        }

        let next = tokio::select! {
            name = async { queue.lock().await.recv().await } => name,
            _ = shutdown.changed() => None,
        };
        let Some(name) = next else {
            break;
        };

        shared.sync_one(&name).await;
    }

    debug!(worker = id, "Sync worker stopped");
}

async fn run_timer(shared: Arc<Shared>, name: String) {
    let Ok(mirror) = shared.registry.get(&name) else {
        return;
    };
    let refresh = mirror.config().refresh_interval();
    let period = refresh.unwrap_or(shared.config.retry_interval);
    let mut shutdown = shared.shutdown.clone();

    loop {
        // Without a refresh interval a mirror is only synced until present.
        if refresh.is_none() && mirror.is_present().await {
            debug!(repository = %name, "No refresh interval, timer done");
            break;
        }

        if shared.enqueue(&mirror).await == Enqueued::Closed {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Handle for controlling a running scheduler.
pub struct SyncHandle {
    shutdown_tx: watch::Sender<bool>,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    tracked: Mutex<HashSet<String>>,
}

impl SyncHandle {
    /// Signals the scheduler to stop. In-flight transfers are interrupted.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the scheduler and waits for every task to finish.
    pub async fn shutdown(self) {
        self.stop();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        info!("Sync scheduler stopped");
    }

    /// Returns a cloneable handle for requesting immediate syncs.
    pub fn trigger(&self) -> SyncTrigger {
        SyncTrigger {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Starts a timer for a repository registered after [`SyncScheduler::start`].
    ///
    /// Does nothing if the repository already has one.
    pub fn track(&self, name: &str) -> Result<(), ResolveError> {
        self.shared.registry.get(name)?;

        if !self.tracked.lock().insert(name.to_string()) {
            return Ok(());
        }

        let task = tokio::spawn(run_timer(Arc::clone(&self.shared), name.to_string()));
        self.tasks.lock().push(task);
        Ok(())
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("stopped", &*self.shutdown_tx.borrow())
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

/// Requests immediate syncs from a running scheduler.
#[derive(Clone)]
pub struct SyncTrigger {
    shared: Arc<Shared>,
}

impl SyncTrigger {
    /// Queues a sync of `name`.
    ///
    /// Returns `Ok(false)` when the repository was already queued or the
    /// scheduler is stopping.
    pub async fn request(&self, name: &str) -> Result<bool, ResolveError> {
        let mirror = self.shared.registry.get(name)?;
        Ok(self.shared.enqueue(&mirror).await == Enqueued::Queued)
    }
}

impl std::fmt::Debug for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTrigger").finish_non_exhaustive()
    }
}
