//! Test utilities and fixtures for prepdesk integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;
use hmac::{Hmac, Mac};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use sha2::Sha256;
use tokio::sync::watch;

// Re-export the main library crate
pub use prepdesk::db::{init_db, queries, AppState, DbPool};
pub use prepdesk::error::AppError;
pub use prepdesk::gateway::{Gateway, GatewayOrder, PaymentProbe};
pub use prepdesk::handlers;
pub use prepdesk::models::*;
pub use prepdesk::poller::{PollOutcome, PollerConfig};
pub use prepdesk::reconcile::{self, Outcome, PaymentEvent, ReconcileConfig};

pub const TEST_TTL_SECS: i64 = 900;
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_CHECKOUT_SECRET: &str = "key_secret_test";

/// Create an in-memory test database with schema and plans ready.
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    seed_test_plans(&conn);
    conn
}

/// The plans every test database knows about.
pub fn seed_test_plans(conn: &Connection) {
    let plans = [
        Plan {
            id: "basic".to_string(),
            name: "Basic (30 days)".to_string(),
            duration_days: 30,
            price_minor: 29_900,
            currency: "INR".to_string(),
        },
        Plan {
            id: "pro".to_string(),
            name: "Pro (90 days)".to_string(),
            duration_days: 90,
            price_minor: 99_900,
            currency: "INR".to_string(),
        },
    ];
    for plan in &plans {
        queries::create_plan(conn, plan).expect("Failed to seed test plan");
    }
}

pub fn reconcile_cfg() -> ReconcileConfig {
    ReconcileConfig {
        commission_rate_bps: 1000,
        max_commission_minor: 1_000_000,
    }
}

/// Create a test payment intent for the given plan.
pub fn create_test_intent(
    conn: &Connection,
    correlation_id: &str,
    user_id: &str,
    plan_id: &str,
    referral_code: Option<&str>,
) -> PaymentIntent {
    let plan = queries::get_plan(conn, plan_id)
        .expect("query failed")
        .expect("plan should exist");
    queries::create_payment_intent(
        conn,
        &CreatePaymentIntent {
            correlation_id: correlation_id.to_string(),
            user_id: user_id.to_string(),
            plan_id: plan.id,
            amount_minor: plan.price_minor,
            currency: plan.currency,
            referral_code: referral_code.map(|s| s.to_string()),
        },
        TEST_TTL_SECS,
    )
    .expect("Failed to create test intent")
}

/// Move an intent to awaiting_confirmation with a gateway order recorded.
pub fn record_test_order(conn: &Connection, intent_id: &str, order_id: &str) -> PaymentIntent {
    let fields = queries::TransitionFields {
        gateway_order_id: Some(order_id.to_string()),
        ..Default::default()
    };
    match queries::transition_intent(
        conn,
        intent_id,
        PaymentStatus::Created,
        PaymentStatus::AwaitingConfirmation,
        &fields,
    )
    .expect("transition failed")
    {
        queries::TransitionOutcome::Applied(intent) => intent,
        other => panic!("expected Applied, got {:?}", other),
    }
}

/// Create a test referrer with the given code.
pub fn create_test_referrer(conn: &Connection, user_id: &str, code: &str) -> Referrer {
    queries::create_referrer(conn, user_id, code).expect("Failed to create test referrer")
}

/// Programmable gateway fake implementing the same adapter contract as
/// the production client. No randomness: tests set exactly what the
/// gateway reports.
pub struct FakeGateway {
    pub probe: Mutex<PaymentProbe>,
    pub created_orders: Mutex<Vec<String>>,
    pub unavailable: Mutex<bool>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            probe: Mutex::new(PaymentProbe::Pending),
            created_orders: Mutex::new(Vec::new()),
            unavailable: Mutex::new(false),
        })
    }

    pub fn set_probe(&self, probe: PaymentProbe) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> prepdesk::error::Result<GatewayOrder> {
        if *self.unavailable.lock().unwrap() {
            return Err(AppError::GatewayUnavailable("fake outage".into()));
        }
        let mut orders = self.created_orders.lock().unwrap();
        let id = format!("order_fake_{}", orders.len() + 1);
        orders.push(receipt.to_string());
        Ok(GatewayOrder {
            id,
            amount_minor,
            currency: currency.to_string(),
        })
    }

    async fn fetch_payment(&self, _order_id: &str) -> prepdesk::error::Result<PaymentProbe> {
        if *self.unavailable.lock().unwrap() {
            return Err(AppError::GatewayUnavailable("fake outage".into()));
        }
        Ok(self.probe.lock().unwrap().clone())
    }
}

/// Pool over a unique temp-file database so every pooled connection sees
/// the same data (in-memory SQLite is per-connection).
pub fn create_test_pool() -> DbPool {
    let path = std::env::temp_dir().join(format!("prepdesk_test_{}.db", uuid::Uuid::new_v4()));
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
    });
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
        seed_test_plans(&conn);
    }
    pool
}

/// Create an AppState for testing. Returns the shutdown sender so tests
/// control poller cancellation.
pub fn create_test_app_state(gateway: Arc<dyn Gateway>) -> (AppState, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        db: create_test_pool(),
        gateway,
        gateway_key_id: "rzp_test_key".to_string(),
        checkout_secret: TEST_CHECKOUT_SECRET.to_string(),
        webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        payment_ttl_secs: TEST_TTL_SECS,
        commission_rate_bps: 1000,
        min_withdrawal_minor: 10_000,
        max_withdrawal_minor: 1_000_000,
        poll_fallback: false,
        shutdown: shutdown_rx,
    };
    (state, shutdown_tx)
}

/// Create a Router with all endpoints (without rate limiting for tests)
pub fn test_app(state: AppState) -> Router {
    Router::new()
        .route("/checkout", post(handlers::public::create_checkout))
        .route("/payments/confirm", post(handlers::public::confirm_payment))
        .route("/payments/status", get(handlers::public::payment_status))
        .merge(handlers::webhooks::router())
        .merge(handlers::ops::router())
        .with_state(state)
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex(message: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute a valid webhook signature over a body.
pub fn webhook_signature(body: &[u8], secret: &str) -> String {
    hmac_hex(body, secret)
}

/// Compute a valid checkout callback signature.
pub fn checkout_signature(order_id: &str, payment_id: &str, secret: &str) -> String {
    hmac_hex(format!("{}|{}", order_id, payment_id).as_bytes(), secret)
}

/// Build a gateway webhook body for a payment event.
pub fn payment_webhook_body(
    event: &str,
    order_id: &str,
    payment_id: &str,
    amount_minor: i64,
) -> String {
    serde_json::json!({
        "event": event,
        "created_at": chrono::Utc::now().timestamp(),
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "amount": amount_minor,
                    "currency": "INR",
                    "status": if event == "payment.captured" { "captured" } else { "failed" },
                    "order_id": order_id,
                    "error_description": if event == "payment.failed" {
                        Some("card declined")
                    } else {
                        None
                    },
                }
            }
        }
    })
    .to_string()
}

/// Build a gateway webhook body for a refund event.
pub fn refund_webhook_body(event: &str, refund_id: &str, payment_id: &str) -> String {
    serde_json::json!({
        "event": event,
        "created_at": chrono::Utc::now().timestamp(),
        "payload": {
            "refund": {
                "entity": {
                    "id": refund_id,
                    "payment_id": payment_id,
                }
            }
        }
    })
    .to_string()
}

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
