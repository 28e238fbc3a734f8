//! Sync and resolution metrics.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless the
//! binary installs a recorder.

use std::time::Duration;

use metrics::{counter, histogram};

pub const SYNC_TOTAL: &str = "tagmirror_sync_total";
pub const SYNC_DURATION_SECONDS: &str = "tagmirror_sync_duration_seconds";
pub const RESOLVE_TOTAL: &str = "tagmirror_resolve_total";

/// Registra las descripciones de las metricas.
/// Llamar una vez al inicio, despues de instalar el recorder.
pub fn register_metrics() {
    metrics::describe_counter!(
        SYNC_TOTAL,
        "Clone and fetch attempts per repository and outcome"
    );
    metrics::describe_histogram!(
        SYNC_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent cloning or fetching a mirror"
    );
    metrics::describe_counter!(RESOLVE_TOTAL, "Resolution requests by outcome");
}

/// Registra un intento de sincronizacion.
pub(crate) fn record_sync(repository: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        SYNC_TOTAL,
        "repository" => repository.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(SYNC_DURATION_SECONDS, "repository" => repository.to_string())
        .record(elapsed.as_secs_f64());
}

/// Registra una resolucion; `outcome` es `ok` o el tipo de error.
pub(crate) fn record_resolve(outcome: &'static str) {
    counter!(RESOLVE_TOTAL, "outcome" => outcome).increment(1);
}
