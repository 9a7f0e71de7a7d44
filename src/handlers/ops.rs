//! Operator-facing read endpoints: the anomaly feed and the
//! confirmed-but-unactivated scan. Deployment-internal; mount behind the
//! reverse proxy's internal vhost.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::{PaymentAnomaly, PaymentIntent};

#[derive(Debug, Deserialize)]
pub struct AnomaliesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_anomalies(
    State(state): State<AppState>,
    Query(query): Query<AnomaliesQuery>,
) -> Result<Json<Vec<PaymentAnomaly>>> {
    let conn = state.db.get()?;
    let anomalies = queries::list_recent_anomalies(&conn, query.limit.clamp(1, 500))?;
    Ok(Json(anomalies))
}

#[derive(Debug, Deserialize)]
pub struct UnactivatedQuery {
    /// Only report intents confirmed at least this long ago; fresh ones
    /// are usually just racing their own activation.
    #[serde(default = "default_age")]
    pub older_than_secs: i64,
}

fn default_age() -> i64 {
    300
}

pub async fn list_unactivated(
    State(state): State<AppState>,
    Query(query): Query<UnactivatedQuery>,
) -> Result<Json<Vec<PaymentIntent>>> {
    let conn = state.db.get()?;
    let intents = queries::find_unactivated_confirmed(&conn, query.older_than_secs.max(0))?;
    Ok(Json(intents))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ops/anomalies", get(list_anomalies))
        .route("/ops/unactivated", get(list_unactivated))
}
