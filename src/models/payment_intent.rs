use serde::{Deserialize, Serialize};

/// Lifecycle status of a payment intent.
///
/// Transitions are monotonic: `created -> awaiting_confirmation ->
/// {confirmed, failed, expired}`. The three terminal statuses are
/// absorbing; every write goes through the store's compare-and-swap,
/// so a status can never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    AwaitingConfirmation,
    Confirmed,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::AwaitingConfirmation => "awaiting_confirmation",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
        }
    }

    /// Terminal statuses absorb all further events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Confirmed | PaymentStatus::Failed | PaymentStatus::Expired
        )
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PaymentStatus::Created),
            "awaiting_confirmation" => Ok(PaymentStatus::AwaitingConfirmation),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "failed" => Ok(PaymentStatus::Failed),
            "expired" => Ok(PaymentStatus::Expired),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One end-to-end payment attempt, keyed by a client-generated
/// correlation ID. Never deleted: settled intents are the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Client-generated correlation ID - the idempotency key for the
    /// whole flow.
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub referral_code: Option<String>,
    /// Tracks the entitlement step separately from `status`, so a crash
    /// between confirming and activating can resume at the entitlement
    /// step without re-deciding the payment outcome.
    pub entitlement_activated: bool,
    pub created_at: i64,
    pub expires_at: i64,
    pub confirmed_at: Option<i64>,
    pub failure_reason: Option<String>,
}

impl PaymentIntent {
    /// Whether the TTL has lapsed for an intent that never settled.
    /// Terminal intents never expire retroactively.
    pub fn is_expirable(&self, now: i64) -> bool {
        !self.status.is_terminal() && now >= self.expires_at
    }
}

/// Data required to create a new payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentIntent {
    pub correlation_id: String,
    pub user_id: String,
    pub plan_id: String,
    pub amount_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Anomalous payment events surfaced to operators rather than silently
/// dropped (late confirmations on expired intents, amount mismatches,
/// signature failures).
#[derive(Debug, Clone, Serialize)]
pub struct PaymentAnomaly {
    pub id: String,
    pub intent_id: Option<String>,
    pub kind: String,
    pub detail: String,
    pub created_at: i64,
}

/// Anomaly kinds written by the reconciliation engine and webhook ingress.
pub mod anomaly {
    pub const LATE_CONFIRMATION: &str = "late_confirmation";
    pub const AMOUNT_MISMATCH: &str = "amount_mismatch";
    pub const UNKNOWN_ORDER: &str = "unknown_order";
}
