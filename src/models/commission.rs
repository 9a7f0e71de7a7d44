use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for CommissionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommissionStatus::Pending),
            "paid" => Ok(CommissionStatus::Paid),
            "cancelled" => Ok(CommissionStatus::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credit owed to a referrer for a referred user's first qualifying
/// purchase. At most one row per (referrer, referred user, intent)
/// triple; the payout process (elsewhere) moves `pending -> paid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralCommission {
    pub id: String,
    pub referrer_id: String,
    pub referred_user_id: String,
    /// Correlation ID of the purchase this commission is tied to.
    pub intent_id: String,
    pub amount_minor: i64,
    pub commission_minor: i64,
    pub status: CommissionStatus,
    pub created_at: i64,
}

/// A user who can refer others, with denormalized lifetime aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referrer {
    pub id: String,
    pub user_id: String,
    pub code: String,
    pub total_referred: i64,
    pub total_commission_minor: i64,
    pub created_at: i64,
}
