use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::id;
use crate::models::{CreatePaymentIntent, PaymentStatus};
use crate::poller;
use crate::reconcile::{self, PaymentEvent};

/// The client generates the correlation ID and owns retries against it.
/// Pricing is server-authoritative: the request names a plan, never an
/// amount.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub correlation_id: String,
    pub user_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub correlation_id: String,
    pub gateway_order_id: String,
    /// Public key id the client passes to the hosted checkout widget.
    pub gateway_key_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Create a payment intent and register the gateway order.
///
/// Safe to retry with the same correlation ID: an intent that already
/// has an order returns the stored order; one whose order creation
/// failed last time gets a fresh attempt.
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    if !id::is_valid_correlation_id(&request.correlation_id) {
        return Err(AppError::BadRequest(msg::INVALID_CORRELATION_ID.into()));
    }

    let conn = state.db.get()?;

    let plan = queries::get_plan(&conn, &request.plan_id)?.or_not_found(msg::PLAN_NOT_FOUND)?;

    if let Some(ref code) = request.referral_code {
        if queries::get_referrer_by_code(&conn, code)?.is_none() {
            return Err(AppError::BadRequest(msg::REFERRAL_CODE_NOT_FOUND.into()));
        }
    }

    let intent = queries::create_payment_intent(
        &conn,
        &CreatePaymentIntent {
            correlation_id: request.correlation_id.clone(),
            user_id: request.user_id.clone(),
            plan_id: plan.id.clone(),
            amount_minor: plan.price_minor,
            currency: plan.currency.clone(),
            referral_code: request.referral_code.clone(),
        },
        state.payment_ttl_secs,
    )?;

    if intent.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Payment already settled as {}",
            intent.status
        )));
    }

    // Client retry after the order was already registered.
    if let Some(order_id) = intent.gateway_order_id.clone() {
        return Ok(Json(CheckoutResponse {
            correlation_id: intent.id,
            gateway_order_id: order_id,
            gateway_key_id: state.gateway_key_id.clone(),
            amount_minor: intent.amount_minor,
            currency: intent.currency,
        }));
    }

    // No pooled connection held across the gateway call.
    drop(conn);

    let order = state
        .gateway
        .create_order(intent.amount_minor, &intent.currency, &intent.id)
        .await?;

    let mut conn = state.db.get()?;
    reconcile::apply_event(
        &mut conn,
        &state.reconcile_config(),
        &intent.id,
        PaymentEvent::Seen {
            gateway_order_id: order.id,
        },
    )?;

    // Under concurrent retries another request may have recorded its own
    // order first; the stored one is canonical either way.
    let intent = queries::get_payment_intent(&conn, &intent.id)?
        .or_not_found(msg::INTENT_NOT_FOUND)?;
    let gateway_order_id = intent
        .gateway_order_id
        .clone()
        .ok_or_else(|| AppError::Internal("Order not recorded on intent".into()))?;

    if intent.status == PaymentStatus::AwaitingConfirmation && state.poll_fallback {
        poller::spawn_fallback_poll(&state, intent.id.clone(), state.shutdown.clone());
    }

    Ok(Json(CheckoutResponse {
        correlation_id: intent.id,
        gateway_order_id,
        gateway_key_id: state.gateway_key_id.clone(),
        amount_minor: intent.amount_minor,
        currency: intent.currency,
    }))
}
