mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::gateway::Gateway;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding the database pool, the gateway adapter and
/// the configuration the payment core needs at request time.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Gateway adapter. Trait object so tests can inject a fake without
    /// any runtime bypass flag existing in production code.
    pub gateway: Arc<dyn Gateway>,
    /// Public key id the client needs to open the hosted checkout.
    pub gateway_key_id: String,
    /// Secret used for checkout callback signatures (order_id|payment_id).
    pub checkout_secret: String,
    /// Secret used for webhook body signatures.
    pub webhook_secret: String,
    pub payment_ttl_secs: i64,
    pub commission_rate_bps: i64,
    pub min_withdrawal_minor: i64,
    pub max_withdrawal_minor: i64,
    pub poll_fallback: bool,
    /// Flipped on shutdown; fallback polls subscribe to it.
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

impl AppState {
    pub fn reconcile_config(&self) -> crate::reconcile::ReconcileConfig {
        crate::reconcile::ReconcileConfig {
            commission_rate_bps: self.commission_rate_bps,
            max_commission_minor: self.max_withdrawal_minor,
        }
    }
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // WAL + a busy timeout: webhook and poller connections write
    // concurrently, and a failed CAS must mean "lost the race", never
    // "database was locked".
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
    });
    Pool::builder().max_size(10).build(manager)
}
