use std::env;

/// Default payment intent TTL: 15 minutes, matching the gateway's own
/// checkout session lifetime.
const DEFAULT_PAYMENT_TTL_SECS: i64 = 15 * 60;

/// Default referral commission: 10% expressed in basis points.
const DEFAULT_COMMISSION_RATE_BPS: i64 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub gateway_key_id: String,
    pub gateway_key_secret: String,
    pub webhook_secret: String,
    /// Seconds from intent creation until it expires unconfirmed.
    pub payment_ttl_secs: i64,
    /// Referral commission rate in basis points (1000 = 10%).
    pub commission_rate_bps: i64,
    /// Commission payout bounds (minor units). Payout itself happens
    /// elsewhere; these only clamp what a single purchase may credit.
    pub min_withdrawal_minor: i64,
    pub max_withdrawal_minor: i64,
    /// Spawn a server-side gateway poll per checkout as a fallback
    /// confirmation channel (useful when webhooks cannot reach us).
    pub poll_fallback: bool,
    pub rate_limit_strict_rpm: u32,
    pub rate_limit_standard_rpm: u32,
    pub dev_mode: bool,
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("PREPDESK_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "prepdesk.db".to_string()),
            gateway_key_id: env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            gateway_key_secret: env::var("RAZORPAY_KEY_SECRET").unwrap_or_default(),
            webhook_secret: env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default(),
            payment_ttl_secs: env_i64("PAYMENT_TTL_SECS", DEFAULT_PAYMENT_TTL_SECS),
            commission_rate_bps: env_i64(
                "REFERRAL_COMMISSION_RATE_BPS",
                DEFAULT_COMMISSION_RATE_BPS,
            ),
            min_withdrawal_minor: env_i64("MIN_WITHDRAWAL_MINOR", 10_000),
            max_withdrawal_minor: env_i64("MAX_WITHDRAWAL_MINOR", 1_000_000),
            poll_fallback: env::var("POLL_FALLBACK")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(true),
            rate_limit_strict_rpm: env_u32("RATE_LIMIT_STRICT_RPM", 10),
            rate_limit_standard_rpm: env_u32("RATE_LIMIT_STANDARD_RPM", 30),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
