//! Webhook ingress: authenticate inbound gateway callbacks, decode them
//! once into a normalized event, and feed the reconciliation engine.
//!
//! Response discipline matters here because the gateway redelivers on
//! any non-2xx: replays, unknown orders and already-settled intents all
//! get 200 so redelivery stops; only store unavailability surfaces a
//! 5xx, because that is the one case where the gateway's own retry is
//! the recovery mechanism.

pub mod razorpay;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use rusqlite::Connection;

use crate::db::{queries, AppState};
use crate::models::{anomaly, PaymentIntent};
use crate::reconcile::{self, Outcome, PaymentEvent};

pub use razorpay::handle_razorpay_webhook;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Gateway events after one decode at the boundary. The reconciliation
/// engine never sees a raw payload or an untyped JSON value.
#[derive(Debug)]
pub enum GatewayEvent {
    /// A payment is open/authorized against the order.
    PaymentPending { order_id: String },
    /// The gateway captured the payment.
    PaymentCaptured {
        order_id: String,
        payment_id: String,
        amount_minor: i64,
    },
    /// The payment attempt failed terminally.
    PaymentFailed { order_id: String, reason: String },
    /// A refund was created/processed for a captured payment.
    RefundConfirmed {
        payment_id: String,
        refund_id: String,
    },
    /// Event type not relevant to payment reconciliation.
    Ignored,
}

/// Dispatch a decoded event into the engine, mapping outcomes onto the
/// idempotent response discipline.
pub fn process_event(state: &AppState, event: GatewayEvent) -> WebhookResult {
    dispatch(state, event).unwrap_or_else(|e| e)
}

fn dispatch(state: &AppState, event: GatewayEvent) -> Result<WebhookResult, WebhookResult> {
    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    let engine_result = match event {
        GatewayEvent::PaymentPending { order_id } => {
            let intent = lookup_by_order(&conn, &order_id)?;
            reconcile::apply_event(
                &mut conn,
                &state.reconcile_config(),
                &intent.id,
                PaymentEvent::Seen {
                    gateway_order_id: order_id,
                },
            )
        }
        GatewayEvent::PaymentCaptured {
            order_id,
            payment_id,
            amount_minor,
        } => {
            let intent = match queries::find_intent_by_gateway_order(&conn, &order_id) {
                Ok(Some(i)) => i,
                Ok(None) => {
                    // A captured payment we cannot correlate is operator
                    // material, not just a log line.
                    if let Err(e) = queries::record_anomaly(
                        &conn,
                        None,
                        anomaly::UNKNOWN_ORDER,
                        &format!(
                            "captured payment {} for unknown order {}",
                            payment_id, order_id
                        ),
                    ) {
                        tracing::error!("Failed to record anomaly: {}", e);
                    }
                    return Ok((StatusCode::OK, "Unknown order"));
                }
                Err(e) => {
                    tracing::error!("DB error looking up order {}: {}", order_id, e);
                    return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
                }
            };
            reconcile::apply_event(
                &mut conn,
                &state.reconcile_config(),
                &intent.id,
                PaymentEvent::Confirmed {
                    gateway_payment_id: payment_id,
                    amount_minor,
                },
            )
        }
        GatewayEvent::PaymentFailed { order_id, reason } => {
            let intent = lookup_by_order(&conn, &order_id)?;
            reconcile::apply_event(
                &mut conn,
                &state.reconcile_config(),
                &intent.id,
                PaymentEvent::Failed { reason },
            )
        }
        GatewayEvent::RefundConfirmed {
            payment_id,
            refund_id,
        } => return Ok(process_refund(&conn, &payment_id, &refund_id)),
        GatewayEvent::Ignored => return Ok((StatusCode::OK, "Event ignored")),
    };

    match engine_result {
        Ok(Outcome::Transitioned(_)) => Ok((StatusCode::OK, "OK")),
        // Duplicate delivery or a race the other path won: success,
        // nothing reprocessed.
        Ok(Outcome::AlreadySettled(_)) => Ok((StatusCode::OK, "Already processed")),
        Ok(Outcome::Anomalous(_)) => Ok((StatusCode::OK, "Anomaly recorded")),
        Ok(Outcome::NotFound) => Ok((StatusCode::OK, "Unknown payment")),
        Err(e) => {
            tracing::error!("Webhook processing error: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Processing error"))
        }
    }
}

/// Lookup helper: `Err` carries the ready-made idempotent response.
fn lookup_by_order(conn: &Connection, order_id: &str) -> Result<PaymentIntent, WebhookResult> {
    match queries::find_intent_by_gateway_order(conn, order_id) {
        Ok(Some(intent)) => Ok(intent),
        Ok(None) => {
            tracing::warn!("webhook references unknown order {}", order_id);
            Err((StatusCode::OK, "Unknown order"))
        }
        Err(e) => {
            tracing::error!("DB error looking up order {}: {}", order_id, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}

fn process_refund(conn: &Connection, payment_id: &str, refund_id: &str) -> WebhookResult {
    let intent = match queries::find_intent_by_gateway_payment(conn, payment_id) {
        Ok(Some(i)) => i,
        Ok(None) => {
            tracing::warn!(
                "refund {} references unknown payment {}",
                refund_id,
                payment_id
            );
            return (StatusCode::OK, "Unknown payment");
        }
        Err(e) => {
            tracing::error!("DB error looking up payment {}: {}", payment_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    match reconcile::apply_refund(conn, &intent, refund_id) {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!("Refund processing error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing error")
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/razorpay", post(handle_razorpay_webhook))
}
