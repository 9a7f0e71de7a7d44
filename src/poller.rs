//! Polling fallback confirmation channel.
//!
//! When the webhook is delayed or undeliverable (local development, no
//! public endpoint), a bounded poll of the gateway's payment status acts
//! as the second producer into the reconciliation engine. Schedule:
//! immediate check, then backoff capped at 8s, bounded by attempt count
//! and by the intent's TTL. A poll that finds the payment captured calls
//! the exact same engine entry point the webhook would - the CAS makes
//! whichever path lands second a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::db::{queries, AppState, DbPool};
use crate::error::Result;
use crate::gateway::{Gateway, PaymentProbe};
use crate::models::PaymentStatus;
use crate::reconcile::{self, PaymentEvent, ReconcileConfig};

/// Poll schedule knobs. The defaults are the production schedule; tests
/// shrink them to keep runs fast.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Hard ceiling on poll attempts regardless of TTL.
    pub max_attempts: u32,
    /// Delay before the second attempt onwards; the last entry repeats.
    pub backoff: Vec<Duration>,
    /// Delay before the first re-check (the user just closed the
    /// checkout UI, the capture is usually already in flight).
    pub first_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            backoff: vec![
                Duration::from_secs(3),
                Duration::from_secs(5),
                Duration::from_secs(8),
            ],
            first_delay: Duration::from_millis(500),
        }
    }
}

impl PollerConfig {
    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.first_delay;
        }
        let idx = ((attempt - 1) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

/// Terminal result of one polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Confirmed,
    Failed,
    /// Attempts or TTL exhausted without a settled payment. NOT a
    /// payment failure: the webhook may still arrive later and will be
    /// honored by the same engine.
    TimedOut,
    /// Cancelled from outside (shutdown, UI dismissed).
    Cancelled,
}

/// Poll the gateway for one intent until it settles, times out, or is
/// cancelled. Cancellation is cooperative: an in-flight gateway call
/// completes and its result still goes through the CAS-guarded engine
/// before the loop notices the flag.
pub async fn poll_payment(
    db: &DbPool,
    gateway: &Arc<dyn Gateway>,
    cfg: &ReconcileConfig,
    poll_cfg: &PollerConfig,
    intent_id: &str,
    mut cancel: watch::Receiver<bool>,
) -> Result<PollOutcome> {
    for attempt in 0..poll_cfg.max_attempts {
        if *cancel.borrow() {
            return Ok(PollOutcome::Cancelled);
        }

        let mut conn = db.get()?;

        let Some(intent) = queries::get_payment_intent(&conn, intent_id)? else {
            tracing::warn!("poller: intent {} not found, stopping", intent_id);
            return Ok(PollOutcome::TimedOut);
        };
        let intent = reconcile::expire_if_due(&conn, intent)?;

        // The other path may already have settled this.
        match intent.status {
            PaymentStatus::Confirmed => return Ok(PollOutcome::Confirmed),
            PaymentStatus::Failed => return Ok(PollOutcome::Failed),
            PaymentStatus::Expired => return Ok(PollOutcome::TimedOut),
            _ => {}
        }

        if let Some(order_id) = intent.gateway_order_id.clone() {
            match gateway.fetch_payment(&order_id).await {
                Ok(PaymentProbe::Captured {
                    payment_id,
                    amount_minor,
                }) => {
                    let outcome = reconcile::apply_event(
                        &mut conn,
                        cfg,
                        intent_id,
                        PaymentEvent::Confirmed {
                            gateway_payment_id: payment_id,
                            amount_minor,
                        },
                    )?;
                    tracing::debug!("poller confirmed {}: {:?}", intent_id, outcome);
                    return Ok(PollOutcome::Confirmed);
                }
                Ok(PaymentProbe::Failed { reason, .. }) => {
                    reconcile::apply_event(
                        &mut conn,
                        cfg,
                        intent_id,
                        PaymentEvent::Failed { reason },
                    )?;
                    return Ok(PollOutcome::Failed);
                }
                Ok(PaymentProbe::Pending) => {}
                // Transient gateway trouble burns the attempt; the next
                // backoff doubles as our retry delay.
                Err(e) => {
                    tracing::debug!("poller: gateway fetch failed for {}: {}", intent_id, e);
                }
            }
        }

        // Connections must not be held across await points.
        drop(conn);

        tokio::select! {
            _ = tokio::time::sleep(poll_cfg.delay(attempt)) => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return Ok(PollOutcome::Cancelled);
                }
            }
        }
    }

    tracing::info!("poller exhausted attempts for {}", intent_id);
    Ok(PollOutcome::TimedOut)
}

/// Spawn the fallback poll for a freshly created checkout. Fire and
/// forget: the poll bounds itself by TTL and attempt count, and stops
/// early once either confirmation path settles the intent.
pub fn spawn_fallback_poll(state: &AppState, intent_id: String, cancel: watch::Receiver<bool>) {
    let db = state.db.clone();
    let gateway = state.gateway.clone();
    let cfg = state.reconcile_config();
    tokio::spawn(async move {
        let poll_cfg = PollerConfig::default();
        match poll_payment(&db, &gateway, &cfg, &poll_cfg, &intent_id, cancel).await {
            Ok(outcome) => {
                tracing::debug!("fallback poll for {} ended: {:?}", intent_id, outcome)
            }
            Err(e) => tracing::warn!("fallback poll for {} errored: {}", intent_id, e),
        }
    });
}
