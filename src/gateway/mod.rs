//! Payment gateway adapter boundary.
//!
//! Everything the core knows about the external gateway goes through the
//! [`Gateway`] trait: order creation and payment status lookup. Signature
//! verification is a pair of pure functions - no gateway call, no state,
//! and crucially no way to switch it off at runtime. Tests inject a fake
//! `Gateway`; production wires up [`RazorpayClient`].

mod razorpay;

pub use razorpay::RazorpayClient;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

/// An order registered with the gateway before checkout opens.
#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Snapshot of what the gateway knows about payments against one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProbe {
    /// No settled payment attempt yet.
    Pending,
    Captured {
        payment_id: String,
        amount_minor: i64,
    },
    Failed {
        payment_id: String,
        reason: String,
    },
}

/// Outbound gateway operations.
///
/// Errors split into `AppError::GatewayUnavailable` (transient - caller
/// retries with backoff) and `AppError::GatewayRejected` (terminal - the
/// request itself is invalid).
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Register an order with the gateway. `receipt` is our correlation
    /// ID, echoed back in gateway dashboards and webhooks.
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder>;

    /// Fetch the current payment status for an order. Used by the
    /// polling fallback channel.
    async fn fetch_payment(&self, order_id: &str) -> Result<PaymentProbe>;
}

/// Constant-time comparison of a provided hex signature against an HMAC
/// computed over `message`. False for any malformed input; never errors.
fn hmac_matches(message: &[u8], signature: &str, secret: &str) -> bool {
    // An empty secret would verify anything an attacker HMACs with "".
    // Misconfiguration must fail closed.
    if secret.is_empty() || signature.is_empty() {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(message);
    let expected = hex::encode(mac.finalize().into_bytes());

    let expected_bytes = expected.as_bytes();
    let provided_bytes = signature.as_bytes();

    // Length check is not constant-time, but signature length is not
    // secret (always 64 hex chars for SHA-256).
    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}

/// Verify the signature the gateway's checkout UI hands the client after
/// a successful payment. Canonical string: `"{order_id}|{payment_id}"`,
/// HMAC-SHA256 with the merchant key secret, hex-encoded.
pub fn verify_checkout_signature(
    order_id: &str,
    payment_id: &str,
    signature: &str,
    secret: &str,
) -> bool {
    if order_id.is_empty() || payment_id.is_empty() {
        return false;
    }
    let message = format!("{}|{}", order_id, payment_id);
    hmac_matches(message.as_bytes(), signature, secret)
}

/// Verify a webhook delivery: HMAC-SHA256 over the raw request body with
/// the webhook signing secret, hex-encoded in the signature header.
pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    hmac_matches(payload, signature, secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(message: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_checkout_signature_roundtrip() {
        let sig = sign("order_ABC|pay_XYZ", "secret123");
        assert!(verify_checkout_signature(
            "order_ABC",
            "pay_XYZ",
            &sig,
            "secret123"
        ));
    }

    #[test]
    fn test_checkout_signature_wrong_payment() {
        let sig = sign("order_ABC|pay_XYZ", "secret123");
        assert!(!verify_checkout_signature(
            "order_ABC",
            "pay_OTHER",
            &sig,
            "secret123"
        ));
    }

    #[test]
    fn test_checkout_signature_wrong_secret() {
        let sig = sign("order_ABC|pay_XYZ", "wrong");
        assert!(!verify_checkout_signature(
            "order_ABC",
            "pay_XYZ",
            &sig,
            "secret123"
        ));
    }

    #[test]
    fn test_webhook_signature_tamper_detection() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = sign(std::str::from_utf8(body).unwrap(), "whsec");
        assert!(verify_webhook_signature(body, &sig, "whsec"));

        // Flip one byte of the body
        let mut tampered = body.to_vec();
        tampered[10] ^= 0x01;
        assert!(!verify_webhook_signature(&tampered, &sig, "whsec"));

        // Flip one char of the signature
        let mut bad_sig = sig.clone().into_bytes();
        bad_sig[0] = if bad_sig[0] == b'a' { b'b' } else { b'a' };
        assert!(!verify_webhook_signature(
            body,
            std::str::from_utf8(&bad_sig).unwrap(),
            "whsec"
        ));
    }

    #[test]
    fn test_malformed_inputs_return_false() {
        assert!(!verify_webhook_signature(b"body", "", "whsec"));
        assert!(!verify_webhook_signature(b"body", "not-hex-at-all", "whsec"));
        assert!(!verify_webhook_signature(b"body", "deadbeef", ""));
        assert!(!verify_checkout_signature("", "pay_X", "deadbeef", "s"));
        assert!(!verify_checkout_signature("order_X", "", "deadbeef", "s"));
    }
}
