use axum::extract::State;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::gateway;
use crate::reconcile::{self, PaymentEvent};

use super::status::{status_response, StatusResponse};

/// Client-reported checkout completion. The hosted checkout hands the
/// client a payment ID and a signature over `order_id|payment_id`; we
/// verify it server-side before trusting the report.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub correlation_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
}

/// Second producer into the reconciliation engine. If the webhook got
/// here first, this is a verified no-op and still returns the snapshot.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<StatusResponse>> {
    let mut conn = state.db.get()?;

    let intent = queries::get_payment_intent(&conn, &request.correlation_id)?
        .or_not_found(msg::INTENT_NOT_FOUND)?;

    let order_id = intent.gateway_order_id.clone().ok_or_else(|| {
        AppError::BadRequest("Payment has no gateway order to confirm against".into())
    })?;

    if !gateway::verify_checkout_signature(
        &order_id,
        &request.gateway_payment_id,
        &request.gateway_signature,
        &state.checkout_secret,
    ) {
        tracing::warn!(
            "checkout signature verification failed for intent {}",
            intent.id
        );
        return Err(AppError::Unauthorized);
    }

    // The client never carries an amount; the one we quoted is what the
    // gateway charged for this order.
    reconcile::apply_event(
        &mut conn,
        &state.reconcile_config(),
        &intent.id,
        PaymentEvent::Confirmed {
            gateway_payment_id: request.gateway_payment_id.clone(),
            amount_minor: intent.amount_minor,
        },
    )?;

    let intent = queries::get_payment_intent(&conn, &request.correlation_id)?
        .or_not_found(msg::INTENT_NOT_FOUND)?;
    Ok(Json(status_response(intent)))
}
