use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::db::AppState;
use crate::gateway;

use super::{process_event, GatewayEvent, WebhookResult};

/// Signature header on inbound gateway callbacks.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

/// Envelope the gateway posts: event name plus nested entity payloads.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[allow(dead_code)]
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment: Option<EntityWrapper<PaymentEntity>>,
    #[serde(default)]
    refund: Option<EntityWrapper<RefundEntity>>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    /// Minor units (paise).
    amount: i64,
    #[allow(dead_code)]
    currency: Option<String>,
    #[allow(dead_code)]
    status: Option<String>,
    order_id: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundEntity {
    id: String,
    payment_id: String,
}

/// Decode a raw webhook body into the normalized event. Unknown event
/// names map to `Ignored`; a recognized event with a malformed payload
/// is a permanent failure (the gateway must not redeliver it).
fn parse_event(body: &Bytes) -> Result<GatewayEvent, WebhookResult> {
    let envelope: WebhookEnvelope = serde_json::from_slice(body).map_err(|e| {
        tracing::error!("Failed to parse webhook body: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid JSON")
    })?;

    let payment = |payload: WebhookPayload| {
        payload
            .payment
            .map(|w| w.entity)
            .ok_or((StatusCode::BAD_REQUEST, "Missing payment entity"))
    };

    match envelope.event.as_str() {
        "payment.authorized" => {
            let entity = payment(envelope.payload)?;
            Ok(GatewayEvent::PaymentPending {
                order_id: entity.order_id,
            })
        }
        "payment.captured" => {
            let entity = payment(envelope.payload)?;
            Ok(GatewayEvent::PaymentCaptured {
                order_id: entity.order_id,
                payment_id: entity.id,
                amount_minor: entity.amount,
            })
        }
        "payment.failed" => {
            let entity = payment(envelope.payload)?;
            Ok(GatewayEvent::PaymentFailed {
                order_id: entity.order_id,
                reason: entity
                    .error_description
                    .unwrap_or_else(|| "payment failed".to_string()),
            })
        }
        "refund.created" | "refund.processed" => {
            let refund = envelope
                .payload
                .refund
                .map(|w| w.entity)
                .ok_or((StatusCode::BAD_REQUEST, "Missing refund entity"))?;
            Ok(GatewayEvent::RefundConfirmed {
                payment_id: refund.payment_id,
                refund_id: refund.id,
            })
        }
        _ => Ok(GatewayEvent::Ignored),
    }
}

/// Axum handler for gateway webhooks.
///
/// Verification is mandatory in every environment: there is no flag to
/// relax it, and the secret is required config for the binary to accept
/// webhooks at all.
pub async fn handle_razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Missing signature header");
    };

    if !gateway::verify_webhook_signature(&body, signature, &state.webhook_secret) {
        tracing::warn!("webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let event = match parse_event(&body) {
        Ok(e) => e,
        Err(e) => return e,
    };

    process_event(&state, event)
}
