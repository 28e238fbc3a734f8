//! The `run`, `get` and `check` commands.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use tagmirror_git::{
    GixTransport, RepositoryRegistry, ResolvedFile, Resolver, SelectorKind, SyncScheduler,
    Transport,
};
use tracing::{info, warn};

use crate::settings::Settings;
use crate::telemetry;

/// Keeps every configured mirror synced until Ctrl-C or SIGTERM.
pub async fn run(settings: Settings) -> Result<()> {
    if let Some(addr) = settings.metrics_addr {
        telemetry::init_metrics(addr).context("failed to start metrics exporter")?;
    }

    let registry = Arc::new(prepare_registry(&settings)?);
    info!(
        version = crate::version(),
        repositories = registry.len(),
        mirror_root = %settings.mirror_root.display(),
        "Starting tagmirror daemon"
    );

    let handle = SyncScheduler::new(
        Arc::clone(&registry),
        Arc::new(GixTransport::new()),
        settings.sync.clone(),
    )?
    .start();

    shutdown_signal().await;
    handle.shutdown().await;

    for status in registry.status().await {
        if status.present {
            info!(
                repository = %status.name,
                head = ?status.head.as_ref().map(|c| c.short().to_string()),
                "Mirror present"
            );
        } else {
            warn!(
                repository = %status.name,
                last_error = ?status.last_error,
                "Mirror was never cloned"
            );
        }
    }

    Ok(())
}

/// Syncs `repository` once and reads `path` at `version`.
pub async fn get(
    settings: &Settings,
    repository: &str,
    version: &str,
    path: &str,
) -> Result<ResolvedFile> {
    let registry = Arc::new(prepare_registry(settings)?);
    let transport: Arc<dyn Transport> = Arc::new(GixTransport::new());
    get_with(settings, registry, transport, repository, version, path).await
}

pub(crate) async fn get_with(
    settings: &Settings,
    registry: Arc<RepositoryRegistry>,
    transport: Arc<dyn Transport>,
    repository: &str,
    version: &str,
    path: &str,
) -> Result<ResolvedFile> {
    let mirror = registry.get(repository)?;
    let interrupt = Arc::new(AtomicBool::new(false));

    mirror
        .sync(&transport, &settings.sync, &interrupt)
        .await
        .with_context(|| format!("failed to sync {}", repository))?;

    let resolver = Resolver::new(registry).with_options(settings.resolver.clone());
    let file = resolver.resolve(repository, version, path).await?;
    Ok(file)
}

/// Validates the settings and describes each repository, one line each.
pub fn check(settings: &Settings) -> Result<Vec<String>> {
    let registry = settings.build_registry()?;

    Ok(registry
        .mirrors()
        .iter()
        .map(|mirror| {
            let config = mirror.config();
            let policy = mirror.policy();

            let kinds: Vec<&str> = [SelectorKind::Semver, SelectorKind::Commit, SelectorKind::Reference]
                .into_iter()
                .filter(|kind| policy.selectors.allows(*kind))
                .map(|kind| kind.as_str())
                .collect();

            let refresh = config
                .refresh_interval()
                .map_or_else(|| "never".to_string(), |d| format!("{}s", d.as_secs()));

            let mut line = format!(
                "{} {} refresh={} selectors={}",
                mirror.name(),
                config.url(),
                refresh,
                kinds.join(",")
            );
            if !policy.refs.is_unrestricted() {
                line.push_str(" refs=filtered");
            }
            if !policy.hosts.is_unrestricted() {
                line.push_str(" hosts=restricted");
            }
            if policy.trust.is_enforced() {
                line.push_str(" signatures=required");
            }
            if policy.update_api {
                line.push_str(" update_api");
            }
            line
        })
        .collect())
}

fn prepare_registry(settings: &Settings) -> Result<RepositoryRegistry> {
    std::fs::create_dir_all(&settings.mirror_root).with_context(|| {
        format!(
            "failed to create mirror root {}",
            settings.mirror_root.display()
        )
    })?;

    Ok(settings.build_registry()?)
}

/// Completes on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
