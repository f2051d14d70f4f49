//! # Email Polling Service
//!
//! Background task that periodically syncs new mail for every user with a
//! connected Gmail account. Each tick runs the exact same
//! `fetch(only_new=true)` path the interactive sync endpoint uses, so
//! behavior is identical whether a sync is user-triggered or scheduled.

use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::categorize::CategorizationGateway;
use crate::config::AppConfig;
use crate::connectors::GmailConnector;
use crate::connectors::broker::ConnectorError;
use crate::crypto::CryptoKey;
use crate::ingest::MessageIngestor;
use crate::models::Provider;
use crate::repositories::{ConnectionRepository, EmailRepository, OAuthStateRepository};

/// Background email polling service
pub struct EmailPollingService {
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    crypto_key: CryptoKey,
}

#[derive(Debug, Default)]
struct TickStats {
    users_polled: u64,
    users_failed: u64,
    emails_ingested: u64,
}

impl EmailPollingService {
    /// Create a new polling service instance
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection, crypto_key: CryptoKey) -> Self {
        Self {
            config,
            db,
            crypto_key,
        }
    }

    /// Run the polling loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.polling.tick_seconds,
            "Starting email polling service"
        );
        let tick_interval = TokioDuration::from_secs(self.config.polling.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Email polling service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Email polling tick failed");
                    }
                    let elapsed = tick_started.elapsed();
                    histogram!("email_poll_tick_duration_ms")
                        .record(elapsed.as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Email polling service stopped");
    }

    /// Execute one tick: sync every connected Gmail user with bounded
    /// concurrency.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<(), ConnectorError> {
        // Housekeeping: abandoned OAuth flows leave expired state rows behind
        match OAuthStateRepository::new(self.db.clone()).purge_expired().await {
            Ok(purged) if purged > 0 => {
                debug!(purged, "Purged expired OAuth states");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "Failed to purge expired OAuth states");
            }
        }

        let connections = ConnectionRepository::new(self.db.clone());

        // Users leaving "connected" (disconnect or refresh_required) simply
        // stop appearing here on the next tick.
        let user_ids = connections
            .connected_user_ids(Provider::Gmail)
            .await
            .map_err(ConnectorError::store)?;

        let mut stats = TickStats::default();
        stats.users_polled = user_ids.len() as u64;

        debug!(users = user_ids.len(), "Email polling tick started");

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.polling.concurrency as usize,
        ));
        let batch_size = self.config.polling.batch_size;

        let mut handles = Vec::new();

        for user_id in user_ids {
            let semaphore = semaphore.clone();
            let ingestor = match self.build_ingestor() {
                Ok(ingestor) => ingestor,
                Err(err) => {
                    // Misconfigured provider credentials fail every user the
                    // same way; log once per tick and bail.
                    error!(error = %err, "Cannot build ingestor, skipping tick");
                    return Err(err);
                }
            };

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                let fetched = ingestor.fetch(user_id, batch_size, true).await;
                (user_id, fetched.len() as u64)
            });

            handles.push(handle);
        }

        for handle in handles {
            match handle.await {
                Ok((user_id, count)) => {
                    stats.emails_ingested += count;
                    if count > 0 {
                        info!(user_id = %user_id, new_emails = count, "Polled new emails");
                    }
                }
                Err(err) => {
                    stats.users_failed += 1;
                    warn!(error = %err, "Per-user poll task panicked or was cancelled");
                }
            }
        }

        gauge!("email_poll_users_gauge").set(stats.users_polled as f64);
        counter!("email_poll_ticks_total").increment(1);
        counter!("email_poll_ingested_total").increment(stats.emails_ingested);

        debug!(
            users_polled = stats.users_polled,
            users_failed = stats.users_failed,
            emails_ingested = stats.emails_ingested,
            "Email polling tick completed"
        );

        Ok(())
    }

    fn build_ingestor(&self) -> Result<MessageIngestor, ConnectorError> {
        let gmail =
            GmailConnector::from_config(&self.config, self.db.clone(), self.crypto_key.clone())?;

        Ok(MessageIngestor::new(
            gmail,
            EmailRepository::new(self.db.clone()),
            ConnectionRepository::new(self.db.clone()),
            CategorizationGateway::new(self.config.categorization.clone()),
        ))
    }
}
