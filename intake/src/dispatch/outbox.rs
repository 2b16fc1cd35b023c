//! Outbox relay.
//!
//! Intake commits each handin together with a `dispatch_outbox` row. This
//! relay publishes those rows and marks them dispatched. A failed publish is
//! recorded on the row and retried later with capped exponential backoff,
//! with no retry limit: a stored handin is always dispatched eventually.

use chrono::{DateTime, Utc};
use db::models::dispatch_outbox::{self, Entity as DispatchOutbox};
use sea_orm::{DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{DispatchMessage, DispatchQueue, QueueError};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between sweeps.
    pub interval: Duration,
    /// Rows published per sweep.
    pub batch_size: u64,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub publish_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            batch_size: 50,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            publish_timeout: Duration::from_secs(3),
        }
    }
}

impl RelayConfig {
    pub fn from_config(cfg: &common::AppConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.relay_interval_ms),
            batch_size: cfg.relay_batch_size.max(1),
            backoff_base: Duration::from_millis(cfg.relay_backoff_base_ms),
            backoff_max: Duration::from_millis(cfg.relay_backoff_max_ms),
            publish_timeout: Duration::from_millis(cfg.publish_timeout_ms),
        }
    }

    /// Delay before the next try of a row that has already failed `failures`
    /// times: `base * 2^failures`, capped at `backoff_max`.
    pub fn backoff(&self, failures: i32) -> Duration {
        let exp = failures.clamp(0, 31) as u32;
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct OutboxRelay {
    db: DatabaseConnection,
    queue: Arc<dyn DispatchQueue>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(db: DatabaseConnection, queue: Arc<dyn DispatchQueue>, config: RelayConfig) -> Self {
        Self {
            db,
            queue,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Undispatched rows, whether due yet or not.
    pub async fn backlog(&self) -> Result<u64, DbErr> {
        DispatchOutbox::backlog(&self.db).await
    }

    /// Publishes every row that is due now, up to one batch.
    pub async fn relay_pending(&self) -> Result<RelayReport, DbErr> {
        let now = self.clock.now();
        let due = DispatchOutbox::due(&self.db, now, self.config.batch_size).await?;

        let mut report = RelayReport::default();
        for row in &due {
            if self.publish_entry(row).await? {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// Tries to publish one outbox row.
    ///
    /// Returns `Ok(true)` once the row is dispatched, `Ok(false)` if the
    /// publish failed and a retry was scheduled. Publish failures are logged
    /// here and never returned; only bookkeeping errors are.
    pub async fn publish_entry(&self, row: &dispatch_outbox::Model) -> Result<bool, DbErr> {
        match self.try_publish(row).await {
            Ok(()) => {
                let marked =
                    DispatchOutbox::mark_dispatched(&self.db, row.id, self.clock.now()).await?;
                if marked {
                    tracing::info!(
                        handin_id = %row.handin_id,
                        channel = %row.channel,
                        attempts = row.attempts + 1,
                        "handin dispatched"
                    );
                } else {
                    tracing::debug!(handin_id = %row.handin_id, "outbox row already dispatched");
                }
                Ok(true)
            }
            Err(err) => {
                let retry_at = self.retry_at(self.clock.now(), row.attempts);
                tracing::warn!(
                    handin_id = %row.handin_id,
                    channel = %row.channel,
                    attempts = row.attempts + 1,
                    retry_at = %retry_at,
                    error = %err,
                    "dispatch failed, will retry"
                );
                DispatchOutbox::record_failure(&self.db, row.id, &err.to_string(), retry_at)
                    .await?;
                Ok(false)
            }
        }
    }

    async fn try_publish(&self, row: &dispatch_outbox::Model) -> Result<(), QueueError> {
        let message = DispatchMessage::from_json(row.payload.clone())?;
        let timeout = self.config.publish_timeout;
        match tokio::time::timeout(timeout, self.queue.publish(&row.channel, &message)).await {
            Ok(res) => res,
            Err(_) => Err(QueueError::Timeout(timeout)),
        }
    }

    fn retry_at(&self, now: DateTime<Utc>, failures: i32) -> DateTime<Utc> {
        let delay = self.config.backoff(failures);
        now + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
    }

    /// Runs a sweep every `interval` until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval = ?self.config.interval, "outbox relay started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.relay_pending().await {
                            Ok(report) if report != RelayReport::default() => {
                                tracing::debug!(
                                    published = report.published,
                                    failed = report.failed,
                                    "outbox sweep"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "outbox sweep failed"),
                        }
                    }
                }
            }

            tracing::info!("outbox relay stopped");
        })
    }
}
