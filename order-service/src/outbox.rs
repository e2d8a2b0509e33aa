use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broker::MessageBroker;
use crate::models::{DeliveryState, OutboxMessage};
use crate::store::{OutboxStore, StoreError};

/// Exponential backoff with a cap and additive jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempts` failed ones, without jitter.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

pub fn is_due(message: &OutboxMessage, now: DateTime<Utc>, max_attempts: i32) -> bool {
    message.published_at.is_none()
        && message.dead_lettered_at.is_none()
        && message.attempts < max_attempts
        && message.next_attempt_at.map_or(true, |at| at <= now)
}

/// Due messages, oldest first, at most `limit`.
pub fn select_due<'a>(
    messages: impl IntoIterator<Item = &'a OutboxMessage>,
    now: DateTime<Utc>,
    max_attempts: i32,
    limit: usize,
) -> Vec<&'a OutboxMessage> {
    let mut due: Vec<&OutboxMessage> = messages
        .into_iter()
        .filter(|m| is_due(m, now, max_attempts))
        .collect();
    due.sort_by_key(|m| m.occurred_at);
    due.truncate(limit);
    due
}

/// Delivery state after one attempt.
pub fn next_delivery_state(
    message: &OutboxMessage,
    outcome: &DeliveryOutcome,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
    jitter: Duration,
) -> DeliveryState {
    let attempts = message.attempts.saturating_add(1);
    match outcome {
        DeliveryOutcome::Delivered => DeliveryState {
            published_at: Some(now),
            attempts,
            next_attempt_at: None,
            dead_lettered_at: None,
            last_error: None,
        },
        DeliveryOutcome::Failed(reason) if attempts >= policy.max_attempts => DeliveryState {
            published_at: None,
            attempts,
            next_attempt_at: None,
            dead_lettered_at: Some(now),
            last_error: Some(format!(
                "dead-lettered after {} attempts: {}",
                attempts, reason
            )),
        },
        DeliveryOutcome::Failed(reason) => DeliveryState {
            published_at: None,
            attempts,
            next_attempt_at: Some(now + to_chrono(policy.backoff(attempts) + jitter)),
            dead_lettered_at: None,
            last_error: Some(reason.clone()),
        },
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub claim_lease: Duration,
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            poll_interval: Duration::from_secs(2),
            claim_lease: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Drains the outbox to the broker on a fixed interval.
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn MessageBroker>,
    config: PublisherConfig,
}

impl OutboxPublisher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Loops until `shutdown` turns true. A running cycle always finishes,
    /// including its write-back, before the signal is observed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.run_cycle().await {
                error!("Error processing outbox messages: {}", e);
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Outbox publisher stopped");
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One claim-publish-record pass with an explicit clock.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let retry = &self.config.retry;
        let batch = self
            .store
            .claim_due(
                now,
                self.config.batch_size,
                retry.max_attempts,
                to_chrono(self.config.claim_lease),
            )
            .await?;

        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let mut updates = Vec::with_capacity(batch.len());
        for message in &batch {
            let outcome = match self.broker.publish(&message.envelope()).await {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(e) => DeliveryOutcome::Failed(e.to_string()),
            };
            let state = next_delivery_state(message, &outcome, now, retry, retry.jitter());

            if state.published_at.is_some() {
                report.published += 1;
                info!(id = %message.id, message_type = %message.message_type, "Published outbox message");
            } else if state.dead_lettered_at.is_some() {
                report.dead_lettered += 1;
                error!(
                    id = %message.id,
                    message_type = %message.message_type,
                    attempts = state.attempts,
                    error = state.last_error.as_deref().unwrap_or_default(),
                    "Outbox message dead-lettered"
                );
            } else {
                report.retried += 1;
                warn!(
                    id = %message.id,
                    message_type = %message.message_type,
                    attempts = state.attempts,
                    next_attempt_at = ?state.next_attempt_at,
                    error = state.last_error.as_deref().unwrap_or_default(),
                    "Outbox publish attempt failed"
                );
            }
            updates.push((message.id, state));
        }

        self.store.record_deliveries(updates).await?;
        debug!(?report, "Outbox cycle finished");
        Ok(report)
    }
}
