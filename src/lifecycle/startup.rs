//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order (metrics, shutdown, gateway, watcher)
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::watcher::ConfigWatcher;
use crate::config::RelayConfig;
use crate::dedup::{DuplicateSuppressor, Normalizer};
use crate::gateway::Gateway;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::observability::metrics;
use crate::relay::RelayError;

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// Run the relay until a termination signal arrives.
pub async fn run(config: RelayConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let gateway = Arc::new(Gateway::from_config(&config)?.with_shutdown(&shutdown));

    if let Some(path) = config_path {
        let (watcher, updates) = ConfigWatcher::new(&path);
        let handle = watcher.run()?;
        let suppressor = gateway.suppressor().clone();
        let mut stop = shutdown.subscribe();
        let mut updates = updates;
        tokio::spawn(async move {
            // Dropping the handle stops the file watch.
            let _handle = handle;
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(new_config) => apply_reload(&suppressor, &new_config),
                        None => break,
                    },
                    _ = stop.recv() => break,
                }
            }
            tracing::debug!("Config reload task stopped");
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        capacity = config.admission.capacity,
        upstreams = config.upstreams.len(),
        "Listening for connections"
    );

    signals::spawn_signal_handler(shutdown.clone());
    serve(gateway, &config, listener, shutdown.subscribe()).await
}

/// Serve an already-built gateway on `listener`.
pub async fn serve(
    gateway: Arc<Gateway>,
    config: &RelayConfig,
    listener: TcpListener,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), StartupError> {
    HttpServer::new(gateway, config).run(listener, shutdown).await?;
    Ok(())
}

/// Apply the hot-reloadable part of a new configuration.
///
/// Only the dedup normalization rules change at runtime; anything else in the
/// file takes effect on restart.
pub fn apply_reload(suppressor: &DuplicateSuppressor, config: &RelayConfig) {
    match Normalizer::from_config(&config.dedup.rules) {
        Ok(normalizer) => {
            suppressor.set_normalizer(normalizer);
            tracing::info!("Configuration reloaded; other changes apply on restart");
        }
        Err(e) => tracing::error!(error = %e, "Rejected reloaded dedup rules"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizationRuleConfig;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_reload_swaps_rules() {
        let suppressor = DuplicateSuppressor::new(Duration::from_secs(60), Normalizer::default());
        let a = json!({"ticket": "T-100"});
        let b = json!({"ticket": "T-200"});
        assert_ne!(suppressor.fingerprint("x", &a), suppressor.fingerprint("x", &b));

        let mut config = RelayConfig::default();
        config.dedup.rules = vec![NormalizationRuleConfig {
            pattern: r"T-\d+".to_string(),
            replacement: "T-N".to_string(),
        }];
        apply_reload(&suppressor, &config);
        assert_eq!(suppressor.fingerprint("x", &a), suppressor.fingerprint("x", &b));
    }

    #[test]
    fn test_invalid_reload_keeps_current_rules() {
        let normalizer = Normalizer::from_config(&RelayConfig::default().dedup.rules).unwrap();
        let suppressor = DuplicateSuppressor::new(Duration::from_secs(60), normalizer);
        let a = json!({"t": "截止至 01:00:00"});
        let b = json!({"t": "截止至 02:00:00"});

        let mut config = RelayConfig::default();
        config.dedup.rules = vec![NormalizationRuleConfig {
            pattern: "(".to_string(),
            replacement: String::new(),
        }];
        apply_reload(&suppressor, &config);
        assert_eq!(suppressor.fingerprint("x", &a), suppressor.fingerprint("x", &b));
    }
}
