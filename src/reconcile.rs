//! Reconciliation engine: the idempotent state-transition core.
//!
//! Confirmation signals arrive from two independent, unordered, possibly
//! duplicated producers - the webhook ingress and the polling fallback.
//! Both funnel through [`apply_event`]. The only synchronization
//! primitive is the store's compare-and-swap on status: the caller whose
//! CAS into `confirmed` succeeds runs the entitlement activator, inside
//! the same database transaction. Losers observe the already-advanced
//! status and no-op. No locks, no channels, no global ordering.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::queries::{self, NewCommission, TransitionFields, TransitionOutcome};
use crate::error::{AppError, Result};
use crate::models::{anomaly, PaymentIntent, PaymentStatus};

/// Normalized payment event, decoded once at the ingress boundary.
/// The engine never sees raw gateway payloads.
#[derive(Debug, Clone)]
pub enum PaymentEvent {
    /// Either path reports the gateway has an order open for this intent.
    Seen { gateway_order_id: String },
    /// The gateway captured the payment.
    Confirmed {
        gateway_payment_id: String,
        amount_minor: i64,
    },
    /// The gateway declined or the payment attempt failed terminally.
    Failed { reason: String },
}

/// What applying an event did.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// This caller's CAS won and the intent moved to the given status.
    Transitioned(PaymentStatus),
    /// The intent had already settled (or another caller won the race).
    /// Not an error: duplicate webhooks and late polls land here.
    AlreadySettled(PaymentStatus),
    /// The event was suppressed and surfaced to operators (late
    /// confirmation on an expired intent, amount mismatch).
    Anomalous(&'static str),
    NotFound,
}

/// Knobs the activator needs; a subset of the service config.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub commission_rate_bps: i64,
    /// Upper bound on a single commission credit (minor units).
    pub max_commission_minor: i64,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Lazily expire an overdue intent. Runs on every engine entry and on
/// status reads, so expiry needs no dedicated timer to be observable.
/// CAS-guarded: a confirmation that already landed makes the expiry a
/// harmless no-op.
pub fn expire_if_due(conn: &Connection, intent: PaymentIntent) -> Result<PaymentIntent> {
    if !intent.is_expirable(now()) {
        return Ok(intent);
    }

    match queries::transition_intent(
        conn,
        &intent.id,
        intent.status,
        PaymentStatus::Expired,
        &TransitionFields::default(),
    )? {
        TransitionOutcome::Applied(expired) => {
            tracing::info!("payment intent expired: {}", expired.id);
            Ok(expired)
        }
        // Someone advanced it first (possibly to confirmed) - re-read.
        TransitionOutcome::Stale(_) => queries::get_payment_intent(conn, &intent.id)?
            .ok_or_else(|| AppError::Internal("Intent vanished during expiry".into())),
        TransitionOutcome::NotFound => {
            Err(AppError::Internal("Intent vanished during expiry".into()))
        }
    }
}

/// Apply a normalized payment event to an intent.
///
/// Exactly-once guarantee: for any number of concurrent `Confirmed`
/// events on one correlation ID, exactly one caller returns
/// `Transitioned(Confirmed)` and runs the activator; every other caller
/// returns `AlreadySettled`.
pub fn apply_event(
    conn: &mut Connection,
    cfg: &ReconcileConfig,
    intent_id: &str,
    event: PaymentEvent,
) -> Result<Outcome> {
    let Some(intent) = queries::get_payment_intent(conn, intent_id)? else {
        return Ok(Outcome::NotFound);
    };
    let intent = expire_if_due(conn, intent)?;

    match event {
        PaymentEvent::Seen { gateway_order_id } => apply_seen(conn, intent, gateway_order_id),
        PaymentEvent::Confirmed {
            gateway_payment_id,
            amount_minor,
        } => apply_confirmed(conn, cfg, intent, gateway_payment_id, amount_minor),
        PaymentEvent::Failed { reason } => apply_failed(conn, intent, reason),
    }
}

fn apply_seen(
    conn: &Connection,
    intent: PaymentIntent,
    gateway_order_id: String,
) -> Result<Outcome> {
    match intent.status {
        PaymentStatus::Created => {
            let fields = TransitionFields {
                gateway_order_id: Some(gateway_order_id),
                ..Default::default()
            };
            match queries::transition_intent(
                conn,
                &intent.id,
                PaymentStatus::Created,
                PaymentStatus::AwaitingConfirmation,
                &fields,
            )? {
                TransitionOutcome::Applied(_) => {
                    Ok(Outcome::Transitioned(PaymentStatus::AwaitingConfirmation))
                }
                // Expected under dual-path racing: the other producer got
                // there first. Success from this caller's perspective.
                TransitionOutcome::Stale(current) => {
                    tracing::debug!(
                        "seen race lost for {}: already {}",
                        intent.id,
                        current
                    );
                    Ok(Outcome::AlreadySettled(current))
                }
                TransitionOutcome::NotFound => Ok(Outcome::NotFound),
            }
        }
        // Re-entering awaiting_confirmation from itself is the normal
        // duplicate-notification case.
        PaymentStatus::AwaitingConfirmation => {
            Ok(Outcome::Transitioned(PaymentStatus::AwaitingConfirmation))
        }
        status => {
            tracing::debug!("seen ignored for {}: already {}", intent.id, status);
            Ok(Outcome::AlreadySettled(status))
        }
    }
}

fn apply_confirmed(
    conn: &mut Connection,
    cfg: &ReconcileConfig,
    intent: PaymentIntent,
    gateway_payment_id: String,
    amount_minor: i64,
) -> Result<Outcome> {
    // A confirmation for an expired intent must not revive it: a very
    // late duplicate webhook could otherwise grant entitlement for a
    // stale, possibly fraud-adjacent transaction. Operators see it.
    if intent.status == PaymentStatus::Expired {
        tracing::warn!(
            "late confirmation for expired intent {}: payment {}",
            intent.id,
            gateway_payment_id
        );
        queries::record_anomaly(
            conn,
            Some(&intent.id),
            anomaly::LATE_CONFIRMATION,
            &format!("gateway payment {} confirmed after expiry", gateway_payment_id),
        )?;
        return Ok(Outcome::Anomalous(anomaly::LATE_CONFIRMATION));
    }

    if intent.status.is_terminal() {
        tracing::debug!(
            "confirmation ignored for {}: already {}",
            intent.id,
            intent.status
        );
        return Ok(Outcome::AlreadySettled(intent.status));
    }

    // The gateway is authoritative for what was charged; a mismatch with
    // what we quoted must not silently activate a membership.
    if amount_minor != intent.amount_minor {
        tracing::warn!(
            "amount mismatch for {}: expected {} got {}",
            intent.id,
            intent.amount_minor,
            amount_minor
        );
        queries::record_anomaly(
            conn,
            Some(&intent.id),
            anomaly::AMOUNT_MISMATCH,
            &format!(
                "expected {} {}, gateway captured {}",
                intent.amount_minor, intent.currency, amount_minor
            ),
        )?;
        return Ok(Outcome::Anomalous(anomaly::AMOUNT_MISMATCH));
    }

    // CAS from the observed pre-state. Status only ever advances, so the
    // retry loop terminates after at most two iterations
    // (created -> awaiting_confirmation -> terminal).
    let mut observed = intent;
    loop {
        let fields = TransitionFields {
            gateway_payment_id: Some(gateway_payment_id.clone()),
            confirmed_at: Some(now()),
            ..Default::default()
        };

        let tx = conn.transaction()?;
        match queries::transition_intent(
            &tx,
            &observed.id,
            observed.status,
            PaymentStatus::Confirmed,
            &fields,
        )? {
            TransitionOutcome::Applied(confirmed) => {
                // This caller won the race: activate inside the same
                // transaction, so "advance status" and "write
                // entitlement" commit or roll back as one unit.
                activate_entitlement(&tx, cfg, &confirmed)?;
                tx.commit()?;
                tracing::info!(
                    "payment confirmed: intent={}, gateway_payment={}",
                    confirmed.id,
                    gateway_payment_id
                );
                return Ok(Outcome::Transitioned(PaymentStatus::Confirmed));
            }
            TransitionOutcome::Stale(current) => {
                drop(tx);
                match current {
                    // Lost the race to the other confirmation path. The
                    // winner activated; we must not re-trigger it.
                    PaymentStatus::Confirmed | PaymentStatus::Failed => {
                        tracing::debug!(
                            "confirmation race lost for {}: already {}",
                            observed.id,
                            current
                        );
                        return Ok(Outcome::AlreadySettled(current));
                    }
                    PaymentStatus::Expired => {
                        tracing::warn!(
                            "confirmation raced with expiry for {}: payment {}",
                            observed.id,
                            gateway_payment_id
                        );
                        queries::record_anomaly(
                            conn,
                            Some(&observed.id),
                            anomaly::LATE_CONFIRMATION,
                            &format!(
                                "gateway payment {} lost expiry race",
                                gateway_payment_id
                            ),
                        )?;
                        return Ok(Outcome::Anomalous(anomaly::LATE_CONFIRMATION));
                    }
                    // Advanced created -> awaiting_confirmation under us;
                    // retry from the new pre-state.
                    _ => {
                        observed = queries::get_payment_intent(conn, &observed.id)?
                            .ok_or_else(|| {
                                AppError::Internal("Intent vanished mid-confirmation".into())
                            })?;
                    }
                }
            }
            TransitionOutcome::NotFound => return Ok(Outcome::NotFound),
        }
    }
}

fn apply_failed(conn: &Connection, intent: PaymentIntent, reason: String) -> Result<Outcome> {
    if intent.status.is_terminal() {
        tracing::debug!(
            "failure event ignored for {}: already {}",
            intent.id,
            intent.status
        );
        return Ok(Outcome::AlreadySettled(intent.status));
    }

    let fields = TransitionFields {
        failure_reason: Some(reason.clone()),
        ..Default::default()
    };
    // Accepted from created as well as awaiting_confirmation: a failure
    // webhook can outrun the order-recorded notification.
    match queries::transition_intent(
        conn,
        &intent.id,
        intent.status,
        PaymentStatus::Failed,
        &fields,
    )? {
        TransitionOutcome::Applied(failed) => {
            tracing::info!("payment failed: intent={}, reason={}", failed.id, reason);
            Ok(Outcome::Transitioned(PaymentStatus::Failed))
        }
        TransitionOutcome::Stale(current) => {
            tracing::debug!("failure race lost for {}: already {}", intent.id, current);
            Ok(Outcome::AlreadySettled(current))
        }
        TransitionOutcome::NotFound => Ok(Outcome::NotFound),
    }
}

/// Entitlement & commission activator.
///
/// Invoked by the confirmation CAS winner inside its transaction, and by
/// the resume path for intents whose activation crashed mid-way. The
/// `entitlement_activated` claim makes re-invocation a no-op, and the
/// commission insert is additionally guarded by its unique key - so even
/// a replayed activation cannot double-credit.
pub fn activate_entitlement(
    conn: &Connection,
    cfg: &ReconcileConfig,
    intent: &PaymentIntent,
) -> Result<bool> {
    if !queries::try_claim_activation(conn, &intent.id)? {
        tracing::debug!("activation already done for {}", intent.id);
        return Ok(false);
    }

    let plan = queries::get_plan(conn, &intent.plan_id)?
        .ok_or_else(|| AppError::Internal(format!("Unknown plan: {}", intent.plan_id)))?;

    let starts_at = now();
    queries::upsert_membership(
        conn,
        &intent.user_id,
        &plan.id,
        starts_at,
        plan.ends_at(starts_at),
    )?;

    if let Some(code) = &intent.referral_code {
        credit_referral(conn, cfg, intent, code)?;
    }

    tracing::info!(
        "membership activated: user={}, plan={}, intent={}",
        intent.user_id,
        plan.id,
        intent.id
    );
    Ok(true)
}

/// Commission crediting, first qualifying purchase only.
fn credit_referral(
    conn: &Connection,
    cfg: &ReconcileConfig,
    intent: &PaymentIntent,
    code: &str,
) -> Result<()> {
    let Some(referrer) = queries::get_referrer_by_code(conn, code)? else {
        // Validated at checkout time; a vanished code is not worth
        // failing the activation over.
        tracing::warn!("referral code {} no longer exists, skipping", code);
        return Ok(());
    };

    if referrer.user_id == intent.user_id {
        tracing::debug!("self-referral on {}, skipping commission", intent.id);
        return Ok(());
    }

    // First qualifying purchase only. The current intent is already
    // `confirmed` at this point, hence the exclusion.
    if queries::has_prior_confirmed_purchase(conn, &intent.user_id, &intent.id)? {
        tracing::debug!(
            "user {} already purchased, no commission for {}",
            intent.user_id,
            intent.id
        );
        return Ok(());
    }

    let commission_minor =
        (intent.amount_minor * cfg.commission_rate_bps / 10_000).min(cfg.max_commission_minor);

    let inserted = queries::insert_commission_once(
        conn,
        &NewCommission {
            referrer_id: &referrer.id,
            referred_user_id: &intent.user_id,
            intent_id: &intent.id,
            amount_minor: intent.amount_minor,
            commission_minor,
        },
    )?;

    match inserted {
        Some(commission) => {
            queries::bump_referrer_aggregates(conn, &referrer.id, commission.commission_minor)?;
            tracing::info!(
                "commission credited: referrer={}, amount={}, intent={}",
                referrer.id,
                commission.commission_minor,
                intent.id
            );
        }
        None => {
            tracing::debug!("commission already exists for {}", intent.id);
        }
    }

    Ok(())
}

/// Resume activation for a confirmed intent whose entitlement step never
/// completed. Returns true if this call performed the activation.
pub fn resume_activation(
    conn: &mut Connection,
    cfg: &ReconcileConfig,
    intent_id: &str,
) -> Result<bool> {
    let tx = conn.transaction()?;
    let Some(intent) = queries::get_payment_intent(&tx, intent_id)? else {
        return Ok(false);
    };
    if intent.status != PaymentStatus::Confirmed || intent.entitlement_activated {
        return Ok(false);
    }
    let activated = activate_entitlement(&tx, cfg, &intent)?;
    tx.commit()?;
    Ok(activated)
}

/// Refund handling, symmetric to activation but outside it: cancels the
/// membership and any pending commission. The intent itself stays
/// `confirmed` - terminal statuses never regress, and the intent row is
/// the audit trail of what was once paid.
pub fn apply_refund(conn: &Connection, intent: &PaymentIntent, refund_id: &str) -> Result<()> {
    if intent.status != PaymentStatus::Confirmed {
        tracing::debug!(
            "refund {} for non-confirmed intent {} ignored",
            refund_id,
            intent.id
        );
        return Ok(());
    }

    let cancelled = queries::cancel_membership(conn, &intent.user_id)?;
    let commissions = queries::cancel_pending_commission_for_intent(conn, &intent.id)?;
    tracing::info!(
        "refund {} processed: intent={}, membership_cancelled={}, commissions_cancelled={}",
        refund_id,
        intent.id,
        cancelled,
        commissions
    );
    Ok(())
}
