//! Prefixed ID generation for server-owned prepdesk entities.
//!
//! All server-generated IDs carry a `pd_` brand prefix to guarantee
//! collision avoidance with gateway IDs (Razorpay's `order_`, `pay_`,
//! `rfnd_`, etc.). Payment intent IDs are NOT generated here: they are
//! client-supplied correlation IDs (see `models::payment_intent`).
//!
//! Format: `pd_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// Entity types that have server-generated prefixed IDs.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Referrer,
    Commission,
    Anomaly,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Referrer => "pd_ref",
            Self::Commission => "pd_com",
            Self::Anomaly => "pd_anm",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

/// Cheap validation for client-supplied correlation IDs, rejecting
/// garbage before it hits the database. Correlation IDs are opaque
/// client tokens; we only bound the alphabet and length.
pub fn is_valid_correlation_id(s: &str) -> bool {
    (8..=64).contains(&s.len())
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let id = EntityType::Commission.gen_id();
        assert!(id.starts_with("pd_com_"));
        // pd_com_ (7 chars) + 32 hex chars = 39 chars total
        assert_eq!(id.len(), 39);
    }

    #[test]
    fn test_ids_are_unique() {
        let id1 = EntityType::Anomaly.gen_id();
        let id2 = EntityType::Anomaly.gen_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_correlation_id_validation() {
        assert!(is_valid_correlation_id("order-20260807-0001"));
        assert!(is_valid_correlation_id("f47ac10b58cc4372a5670e02b2c3d479"));
        assert!(is_valid_correlation_id("client_gen_123"));

        assert!(!is_valid_correlation_id("")); // empty
        assert!(!is_valid_correlation_id("short")); // too short
        assert!(!is_valid_correlation_id(&"x".repeat(65))); // too long
        assert!(!is_valid_correlation_id("has spaces here")); // bad alphabet
        assert!(!is_valid_correlation_id("semi;colon-attack")); // bad alphabet
    }
}
