use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{msg, AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, ANOMALY_COLS, COMMISSION_COLS, MEMBERSHIP_COLS, PAYMENT_INTENT_COLS,
    PLAN_COLS, REFERRER_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Plans ============

/// Insert a plan if it does not already exist. Plans are static
/// configuration; existing rows are left untouched.
pub fn create_plan(conn: &Connection, plan: &Plan) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO plans (id, name, duration_days, price_minor, currency)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            &plan.id,
            &plan.name,
            plan.duration_days,
            plan.price_minor,
            &plan.currency
        ],
    )?;
    Ok(())
}

pub fn get_plan(conn: &Connection, id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE id = ?1", PLAN_COLS),
        &[&id],
    )
}

pub fn list_plans(conn: &Connection) -> Result<Vec<Plan>> {
    query_all(
        conn,
        &format!("SELECT {} FROM plans ORDER BY price_minor", PLAN_COLS),
        &[],
    )
}

// ============ Payment Intents ============

/// Create a payment intent keyed by the client-generated correlation ID.
///
/// Idempotent: a retry with the same correlation ID and the same payload
/// returns the existing row instead of erroring. A retry with a
/// *different* payload is a `Conflict` - correlation IDs are immutable
/// once bound to a payment attempt.
pub fn create_payment_intent(
    conn: &Connection,
    input: &CreatePaymentIntent,
    ttl_secs: i64,
) -> Result<PaymentIntent> {
    let created_at = now();

    let affected = conn.execute(
        "INSERT OR IGNORE INTO payment_intents
            (id, user_id, plan_id, amount_minor, currency, status, referral_code,
             entitlement_activated, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'created', ?6, 0, ?7, ?8)",
        params![
            &input.correlation_id,
            &input.user_id,
            &input.plan_id,
            input.amount_minor,
            &input.currency,
            &input.referral_code,
            created_at,
            created_at + ttl_secs,
        ],
    )?;

    let intent = get_payment_intent(conn, &input.correlation_id)?
        .ok_or_else(|| AppError::Internal("Intent vanished after insert".into()))?;

    if affected == 0 {
        // Row already existed - only accept the retry if it describes
        // the same payment.
        let same = intent.user_id == input.user_id
            && intent.plan_id == input.plan_id
            && intent.amount_minor == input.amount_minor
            && intent.currency == input.currency;
        if !same {
            return Err(AppError::Conflict(msg::CORRELATION_ID_REUSED.to_string()));
        }
    }

    Ok(intent)
}

pub fn get_payment_intent(conn: &Connection, id: &str) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents WHERE id = ?1",
            PAYMENT_INTENT_COLS
        ),
        &[&id],
    )
}

pub fn find_intent_by_gateway_order(
    conn: &Connection,
    gateway_order_id: &str,
) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents WHERE gateway_order_id = ?1",
            PAYMENT_INTENT_COLS
        ),
        &[&gateway_order_id],
    )
}

pub fn find_intent_by_gateway_payment(
    conn: &Connection,
    gateway_payment_id: &str,
) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents WHERE gateway_payment_id = ?1",
            PAYMENT_INTENT_COLS
        ),
        &[&gateway_payment_id],
    )
}

/// Optional fields carried along with a status transition.
#[derive(Debug, Default)]
pub struct TransitionFields {
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub confirmed_at: Option<i64>,
    pub failure_reason: Option<String>,
}

/// Result of a compare-and-swap status transition.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// The CAS succeeded; the updated row is returned.
    Applied(PaymentIntent),
    /// The stored status no longer matched the expected one. Carries the
    /// status another caller already advanced the intent to, so callers
    /// can distinguish a benign lost race from an anomaly.
    Stale(PaymentStatus),
    NotFound,
}

/// The sole write path for payment intent status.
///
/// Performs a single-statement compare-and-swap: the UPDATE only takes
/// effect if the stored status still equals `expected`. Under the
/// dual-writer race (webhook vs. poller) exactly one caller observes
/// `Applied`; the rest observe `Stale` with the winning status.
pub fn transition_intent(
    conn: &Connection,
    id: &str,
    expected: PaymentStatus,
    new: PaymentStatus,
    fields: &TransitionFields,
) -> Result<TransitionOutcome> {
    let updated: Option<PaymentIntent> = query_one(
        conn,
        &format!(
            "UPDATE payment_intents SET
                status = ?3,
                gateway_order_id = COALESCE(?4, gateway_order_id),
                gateway_payment_id = COALESCE(?5, gateway_payment_id),
                confirmed_at = COALESCE(?6, confirmed_at),
                failure_reason = COALESCE(?7, failure_reason)
             WHERE id = ?1 AND status = ?2
             RETURNING {}",
            PAYMENT_INTENT_COLS
        ),
        &[
            &id,
            &expected.as_str(),
            &new.as_str(),
            &fields.gateway_order_id,
            &fields.gateway_payment_id,
            &fields.confirmed_at,
            &fields.failure_reason,
        ],
    )?;

    if let Some(intent) = updated {
        return Ok(TransitionOutcome::Applied(intent));
    }

    match get_payment_intent(conn, id)? {
        Some(current) => Ok(TransitionOutcome::Stale(current.status)),
        None => Ok(TransitionOutcome::NotFound),
    }
}

/// Atomically claim the entitlement-activation step for a confirmed
/// intent. Returns true exactly once per intent; a crashed activation
/// retried after restart re-claims only if the flag never flipped.
pub fn try_claim_activation(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_intents SET entitlement_activated = 1
         WHERE id = ?1 AND status = 'confirmed' AND entitlement_activated = 0",
        params![id],
    )?;
    Ok(affected > 0)
}

/// Sweep all overdue non-terminal intents to `expired`. The per-intent
/// CAS in `transition_intent` covers the lazy path; this is the periodic
/// variant, and the status guard makes it just as race-safe: an intent
/// that confirmed in the meantime is not touched.
pub fn expire_stale_intents(conn: &Connection) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE payment_intents SET status = 'expired'
         WHERE status IN ('created', 'awaiting_confirmation') AND expires_at <= ?1",
        params![now()],
    )?;
    Ok(affected)
}

/// Confirmed intents whose entitlement step never completed (crash
/// between the status CAS and the activation writes). Scanned by the
/// maintenance task so the one condition that must never be left
/// unresolved gets resumed.
pub fn find_unactivated_confirmed(
    conn: &Connection,
    older_than_secs: i64,
) -> Result<Vec<PaymentIntent>> {
    let cutoff = now() - older_than_secs;
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_intents
             WHERE status = 'confirmed' AND entitlement_activated = 0 AND confirmed_at <= ?1
             ORDER BY confirmed_at",
            PAYMENT_INTENT_COLS
        ),
        &[&cutoff],
    )
}

// ============ Memberships ============

/// Upsert the user's membership: replace semantics, never append.
/// Activating a new plan supersedes whatever was there.
pub fn upsert_membership(
    conn: &Connection,
    user_id: &str,
    plan_id: &str,
    starts_at: i64,
    ends_at: i64,
) -> Result<Membership> {
    let updated_at = now();
    conn.execute(
        "INSERT INTO memberships (user_id, plan_id, starts_at, ends_at, status, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            plan_id = excluded.plan_id,
            starts_at = excluded.starts_at,
            ends_at = excluded.ends_at,
            status = 'active',
            updated_at = excluded.updated_at",
        params![user_id, plan_id, starts_at, ends_at, updated_at],
    )?;

    Ok(Membership {
        user_id: user_id.to_string(),
        plan_id: plan_id.to_string(),
        starts_at,
        ends_at,
        status: MembershipStatus::Active,
        updated_at,
    })
}

pub fn get_membership(conn: &Connection, user_id: &str) -> Result<Option<Membership>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM memberships WHERE user_id = ?1",
            MEMBERSHIP_COLS
        ),
        &[&user_id],
    )
}

/// Cancel an active membership (refund path). Returns false if the user
/// had no active membership to cancel.
pub fn cancel_membership(conn: &Connection, user_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE memberships SET status = 'cancelled', updated_at = ?2
         WHERE user_id = ?1 AND status = 'active'",
        params![user_id, now()],
    )?;
    Ok(affected > 0)
}

// ============ Referrers & Commissions ============

pub fn create_referrer(conn: &Connection, user_id: &str, code: &str) -> Result<Referrer> {
    let id = EntityType::Referrer.gen_id();
    let created_at = now();
    conn.execute(
        "INSERT INTO referrers (id, user_id, code, total_referred, total_commission_minor, created_at)
         VALUES (?1, ?2, ?3, 0, 0, ?4)",
        params![&id, user_id, code, created_at],
    )?;
    Ok(Referrer {
        id,
        user_id: user_id.to_string(),
        code: code.to_string(),
        total_referred: 0,
        total_commission_minor: 0,
        created_at,
    })
}

pub fn get_referrer_by_code(conn: &Connection, code: &str) -> Result<Option<Referrer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM referrers WHERE code = ?1", REFERRER_COLS),
        &[&code],
    )
}

pub fn get_referrer_by_id(conn: &Connection, id: &str) -> Result<Option<Referrer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM referrers WHERE id = ?1", REFERRER_COLS),
        &[&id],
    )
}

/// Whether the user already has a confirmed purchase other than the
/// given intent. Backs the first-qualifying-purchase commission rule.
pub fn has_prior_confirmed_purchase(
    conn: &Connection,
    user_id: &str,
    excluding_intent: &str,
) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM payment_intents
            WHERE user_id = ?1 AND status = 'confirmed' AND id != ?2
         )",
        params![user_id, excluding_intent],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Data required to create a commission row.
#[derive(Debug)]
pub struct NewCommission<'a> {
    pub referrer_id: &'a str,
    pub referred_user_id: &'a str,
    pub intent_id: &'a str,
    pub amount_minor: i64,
    pub commission_minor: i64,
}

/// Insert a commission row at most once per (referrer, referred user,
/// intent) triple. Returns None when the row already existed - the
/// caller must then skip the aggregate bump too.
pub fn insert_commission_once(
    conn: &Connection,
    input: &NewCommission<'_>,
) -> Result<Option<ReferralCommission>> {
    let id = EntityType::Commission.gen_id();
    let created_at = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO referral_commissions
            (id, referrer_id, referred_user_id, intent_id, amount_minor, commission_minor, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
        params![
            &id,
            input.referrer_id,
            input.referred_user_id,
            input.intent_id,
            input.amount_minor,
            input.commission_minor,
            created_at,
        ],
    )?;

    if affected == 0 {
        return Ok(None);
    }

    Ok(Some(ReferralCommission {
        id,
        referrer_id: input.referrer_id.to_string(),
        referred_user_id: input.referred_user_id.to_string(),
        intent_id: input.intent_id.to_string(),
        amount_minor: input.amount_minor,
        commission_minor: input.commission_minor,
        status: CommissionStatus::Pending,
        created_at,
    }))
}

pub fn bump_referrer_aggregates(
    conn: &Connection,
    referrer_id: &str,
    commission_minor: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE referrers SET
            total_referred = total_referred + 1,
            total_commission_minor = total_commission_minor + ?2
         WHERE id = ?1",
        params![referrer_id, commission_minor],
    )?;
    Ok(())
}

/// Cancel any pending commission tied to a refunded intent. A refunded
/// purchase is no longer qualifying.
pub fn cancel_pending_commission_for_intent(conn: &Connection, intent_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE referral_commissions SET status = 'cancelled'
         WHERE intent_id = ?1 AND status = 'pending'",
        params![intent_id],
    )?;
    Ok(affected)
}

pub fn list_commissions_for_referrer(
    conn: &Connection,
    referrer_id: &str,
) -> Result<Vec<ReferralCommission>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM referral_commissions WHERE referrer_id = ?1 ORDER BY created_at DESC",
            COMMISSION_COLS
        ),
        &[&referrer_id],
    )
}

pub fn get_commission_for_intent(
    conn: &Connection,
    intent_id: &str,
) -> Result<Option<ReferralCommission>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM referral_commissions WHERE intent_id = ?1",
            COMMISSION_COLS
        ),
        &[&intent_id],
    )
}

// ============ Anomalies ============

/// Append an operator-facing anomaly record.
pub fn record_anomaly(
    conn: &Connection,
    intent_id: Option<&str>,
    kind: &str,
    detail: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO payment_anomalies (id, intent_id, kind, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            EntityType::Anomaly.gen_id(),
            intent_id,
            kind,
            detail,
            now()
        ],
    )?;
    Ok(())
}

pub fn list_recent_anomalies(conn: &Connection, limit: i64) -> Result<Vec<PaymentAnomaly>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_anomalies ORDER BY created_at DESC LIMIT ?1",
            ANOMALY_COLS
        ),
        &[&limit],
    )
}
