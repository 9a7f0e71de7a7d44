use serde::{Deserialize, Serialize};

/// A membership plan. Static keyed configuration: seeded at startup,
/// read-only at runtime. Pricing is server-authoritative - the client
/// never supplies an amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub duration_days: i64,
    pub price_minor: i64,
    pub currency: String,
}

impl Plan {
    /// Membership end timestamp for an activation at `now`.
    pub fn ends_at(&self, now: i64) -> i64 {
        now + self.duration_days * 86400
    }
}
