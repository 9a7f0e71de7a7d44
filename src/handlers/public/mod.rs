mod checkout;
mod confirm;
mod status;

pub use checkout::{create_checkout, CheckoutRequest, CheckoutResponse};
pub use confirm::{confirm_payment, ConfirmRequest};
pub use status::{payment_status, StatusResponse};

use axum::routing::{get, post};
use axum::Router;

use crate::db::AppState;
use crate::rate_limit;

async fn health() -> &'static str {
    "ok"
}

/// Public payment endpoints with per-tier rate limiting.
pub fn router(strict_rpm: u32, standard_rpm: u32) -> Router<AppState> {
    let strict = Router::new()
        .route("/checkout", post(create_checkout))
        .layer(rate_limit::strict_layer(strict_rpm));

    let standard = Router::new()
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/status", get(payment_status))
        .layer(rate_limit::standard_layer(standard_rpm));

    Router::new()
        .merge(strict)
        .merge(standard)
        .route("/health", get(health))
}
