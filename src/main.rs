use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prepdesk::config::Config;
use prepdesk::db::{create_pool, init_db, queries, AppState};
use prepdesk::gateway::RazorpayClient;
use prepdesk::handlers;
use prepdesk::models::Plan;
use prepdesk::reconcile;

#[derive(Parser, Debug)]
#[command(name = "prepdesk")]
#[command(about = "Payment verification and reconciliation core for PrepDesk")]
struct Cli {
    /// Seed the database with dev data (referrer + referral code)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Membership plans are static configuration. Idempotent: existing rows
/// are never touched, so price changes go through operations, not boot.
fn seed_plans(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for plans");
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
        Plan {
            id: "annual".to_string(),
            name: "Annual (365 days)".to_string(),
            duration_days: 365,
            price_minor: 299_900,
            currency: "INR".to_string(),
        },
    ];
    for plan in &plans {
        queries::create_plan(&conn, plan).expect("Failed to seed plan");
    }
    tracing::info!("Plans ready ({} configured)", plans.len());
}

/// Seeds dev fixtures for manual testing: a referrer with a known code.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    if queries::get_referrer_by_code(&conn, "DEVREF01")
        .expect("Failed to check referral code")
        .is_some()
    {
        tracing::info!("Dev data already seeded, skipping");
        return;
    }

    let referrer = queries::create_referrer(&conn, "dev-user-referrer", "DEVREF01")
        .expect("Failed to create dev referrer");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED");
    tracing::info!("Referrer: {} (user {})", referrer.id, referrer.user_id);
    tracing::info!("Referral code: {}", referrer.code);
    tracing::info!("============================================");
}

/// Spawns the maintenance loop: sweeps overdue intents to `expired` and
/// resumes activation for confirmed intents whose entitlement step never
/// completed. Runs every minute.
fn spawn_maintenance_task(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60);
        let cfg = state.reconcile_config();

        loop {
            tokio::time::sleep(interval).await;

            let mut conn = match state.db.get() {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Maintenance: failed to get db connection: {}", e);
                    continue;
                }
            };

            match queries::expire_stale_intents(&conn) {
                Ok(count) if count > 0 => {
                    tracing::info!("Expired {} overdue payment intents", count);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Maintenance: expiry sweep failed: {}", e),
            }

            // 2 minutes of grace: anything younger is likely still
            // inside its own activation transaction.
            let stuck = match queries::find_unactivated_confirmed(&conn, 120) {
                Ok(intents) => intents,
                Err(e) => {
                    tracing::warn!("Maintenance: unactivated scan failed: {}", e);
                    continue;
                }
            };

            for intent in stuck {
                match reconcile::resume_activation(&mut conn, &cfg, &intent.id) {
                    Ok(true) => {
                        tracing::warn!("Resumed stuck activation for intent {}", intent.id)
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Failed to resume activation for {}: {}", intent.id, e)
                    }
                }
            }
        }
    });

    tracing::info!("Maintenance task started (runs every 60 seconds)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prepdesk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    if config.webhook_secret.is_empty() {
        tracing::warn!(
            "RAZORPAY_WEBHOOK_SECRET is not set - all webhook deliveries will be rejected"
        );
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        db: db_pool,
        gateway: Arc::new(RazorpayClient::new(
            &config.gateway_key_id,
            &config.gateway_key_secret,
        )),
        gateway_key_id: config.gateway_key_id.clone(),
        checkout_secret: config.gateway_key_secret.clone(),
        webhook_secret: config.webhook_secret.clone(),
        payment_ttl_secs: config.payment_ttl_secs,
        commission_rate_bps: config.commission_rate_bps,
        min_withdrawal_minor: config.min_withdrawal_minor,
        max_withdrawal_minor: config.max_withdrawal_minor,
        poll_fallback: config.poll_fallback,
        shutdown: shutdown_rx,
    };

    seed_plans(&state);

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set PREPDESK_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_maintenance_task(state.clone());

    let app = Router::new()
        .merge(handlers::public::router(
            config.rate_limit_strict_rpm,
            config.rate_limit_standard_rpm,
        ))
        .merge(handlers::webhooks::router())
        .merge(handlers::ops::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("PrepDesk payment core listening on {}", addr);

    // Use into_make_service_with_connect_info to enable IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // Stop in-flight fallback polls
    let _ = shutdown_tx.send(true);

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
