//! Shared application context for Axum handlers.
//!
//! Built once at startup and cloned into every request. Holds:
//!
//! - **Configuration**: immutable after startup
//! - **Auth**: token codec and credential verifier
//! - **Collaborators**: repository and object store behind trait objects
//! - **Telemetry**: the request latency aggregator
//!
//! # Structured Concurrency
//!
//! Background tasks are tracked with `TaskTracker` and stopped through a
//! `CancellationToken`. The same token is handed to the lifecycle
//! controller, so draining the server also stops the reporters. Call
//! `shutdown()` to wait for them before exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::auth::{CredentialVerifier, TokenCodec};
use crate::config::Config;
use crate::error::AppResult;
use crate::middleware::TrustedProxyConfig;
use crate::store::{InMemoryObjectStore, InMemoryRepository, ObjectStore, Repository};
use crate::telemetry::RequestTelemetry;

/// Routes listed in each periodic telemetry summary.
const REPORT_TOP_ROUTES: usize = 10;

/// Shared application context.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub codec: Arc<TokenCodec>,
    pub verifier: Arc<CredentialVerifier>,
    pub repository: Arc<dyn Repository>,
    pub objects: Arc<dyn ObjectStore>,
    pub telemetry: Arc<RequestTelemetry>,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create the context over the given collaborators and start background
    /// tasks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the password hash cost is rejected.
    pub fn new(
        config: Config,
        repository: Arc<dyn Repository>,
        objects: Arc<dyn ObjectStore>,
    ) -> AppResult<Self> {
        let codec = Arc::new(TokenCodec::new(&config.jwt_secret, config.token_ttl));
        let verifier = Arc::new(CredentialVerifier::new(
            repository.clone(),
            codec.clone(),
            config.password_hash_cost,
        )?);
        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));

        let state = Self {
            config: Arc::new(config),
            codec,
            verifier,
            repository,
            objects,
            telemetry: Arc::new(RequestTelemetry::new()),
            trusted_proxies,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_telemetry_reporter();

        Ok(state)
    }

    /// Context backed by the process-local repository and object store.
    pub fn in_memory(config: Config) -> AppResult<Self> {
        let objects = InMemoryObjectStore::new(
            config.storage_bucket.clone(),
            config.storage_public_url.clone(),
            config
                .storage_signing_key
                .as_ref()
                .map(|key| key.expose().as_bytes()),
        );
        Self::new(
            config,
            Arc::new(InMemoryRepository::new()),
            Arc::new(objects),
        )
    }

    /// Token shared with the lifecycle controller.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// True once a drain has started.
    pub fn is_draining(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Periodically log the busiest routes.
    fn spawn_telemetry_reporter(&self) {
        let period = self.config.telemetry_report_interval;
        if period.is_zero() {
            debug!("Telemetry reporter disabled");
            return;
        }

        let telemetry = self.telemetry.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Telemetry reporter received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => telemetry.log_summary(REPORT_TOP_ROUTES),
                }
            }

            // Final summary so the last interval is not lost
            telemetry.log_summary(REPORT_TOP_ROUTES);
            debug!("Telemetry reporter shutting down");
        });
    }

    /// Stop background tasks and wait for them.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn test_config() -> Config {
        Config {
            password_hash_cost: crate::config::MIN_HASH_COST,
            telemetry_report_interval: Duration::from_millis(10),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_reporter() {
        let state = AppState::in_memory(test_config()).unwrap();
        assert!(!state.is_draining());

        tokio::time::timeout(Duration::from_secs(2), state.shutdown())
            .await
            .expect("reporter did not stop");
        assert!(state.is_draining());
    }

    #[tokio::test]
    async fn test_cancellation_token_is_shared() {
        let state = AppState::in_memory(test_config()).unwrap();
        state.cancellation_token().cancel();
        assert!(state.is_draining());
        state.shutdown().await;
    }

    #[test]
    fn test_invalid_cost_is_config_error() {
        let config = Config {
            password_hash_cost: 99,
            ..Config::default()
        };
        let result = AppState::in_memory(config);
        assert!(matches!(
            result,
            Err(crate::error::AppError::ConfigError(_))
        ));
    }
}
