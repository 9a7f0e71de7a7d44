use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, OptionExt, Result};
use crate::extractors::{Json, Query};
use crate::models::{PaymentIntent, PaymentStatus};
use crate::reconcile;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub correlation_id: String,
    pub status: PaymentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

pub(super) fn status_response(intent: PaymentIntent) -> StatusResponse {
    let (message, retry_after) = match intent.status {
        PaymentStatus::Created | PaymentStatus::AwaitingConfirmation => {
            ("processing".to_string(), Some(3))
        }
        PaymentStatus::Confirmed => ("succeeded".to_string(), None),
        PaymentStatus::Failed => (
            intent
                .failure_reason
                .clone()
                .unwrap_or_else(|| "payment failed".to_string()),
            None,
        ),
        PaymentStatus::Expired => ("payment window expired".to_string(), None),
    };

    StatusResponse {
        correlation_id: intent.id,
        status: intent.status,
        message,
        retry_after_seconds: retry_after,
    }
}

/// Non-blocking status snapshot for the client's polling loop. Performs
/// the lazy TTL check, so an abandoned intent reads as expired without
/// waiting for the periodic sweep.
pub async fn payment_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>> {
    let conn = state.db.get()?;

    let intent = queries::get_payment_intent(&conn, &query.correlation_id)?
        .or_not_found(msg::INTENT_NOT_FOUND)?;
    let intent = reconcile::expire_if_due(&conn, intent)?;

    Ok(Json(status_response(intent)))
}
