use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Membership plans (static configuration, seeded at startup)
        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            duration_days INTEGER NOT NULL,
            price_minor INTEGER NOT NULL,
            currency TEXT NOT NULL
        );

        -- Payment intents (one row per payment attempt, never deleted)
        -- id is the client-generated correlation ID: the idempotency key
        -- for the whole flow. All status writes go through a CAS
        -- (UPDATE ... WHERE status = expected); that is what makes the
        -- webhook/poller race safe without any locks.
        CREATE TABLE IF NOT EXISTS payment_intents (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            plan_id TEXT NOT NULL REFERENCES plans(id),
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'created'
                CHECK (status IN ('created', 'awaiting_confirmation', 'confirmed', 'failed', 'expired')),
            gateway_order_id TEXT,
            gateway_payment_id TEXT,
            referral_code TEXT,
            entitlement_activated INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            confirmed_at INTEGER,
            failure_reason TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_intents_user ON payment_intents(user_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_intents_gateway_order
            ON payment_intents(gateway_order_id) WHERE gateway_order_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_intents_gateway_payment
            ON payment_intents(gateway_payment_id) WHERE gateway_payment_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_intents_sweep
            ON payment_intents(status, expires_at);
        -- Resume scan for confirmed-but-unactivated intents
        CREATE INDEX IF NOT EXISTS idx_intents_unactivated
            ON payment_intents(confirmed_at) WHERE status = 'confirmed' AND entitlement_activated = 0;

        -- Memberships (entitlements): at most one row per user,
        -- activation upserts in place
        CREATE TABLE IF NOT EXISTS memberships (
            user_id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL REFERENCES plans(id),
            starts_at INTEGER NOT NULL,
            ends_at INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('active', 'cancelled', 'expired')),
            updated_at INTEGER NOT NULL
        );

        -- Referrers and their codes, with denormalized lifetime aggregates
        CREATE TABLE IF NOT EXISTS referrers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            code TEXT NOT NULL UNIQUE,
            total_referred INTEGER NOT NULL DEFAULT 0,
            total_commission_minor INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_referrers_code ON referrers(code);

        -- Referral commissions. The unique triple backs the activator's
        -- idempotency (INSERT OR IGNORE): a crashed activation retried
        -- after restart cannot double-credit.
        CREATE TABLE IF NOT EXISTS referral_commissions (
            id TEXT PRIMARY KEY,
            referrer_id TEXT NOT NULL REFERENCES referrers(id),
            referred_user_id TEXT NOT NULL,
            intent_id TEXT NOT NULL REFERENCES payment_intents(id),
            amount_minor INTEGER NOT NULL,
            commission_minor INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'paid', 'cancelled')),
            created_at INTEGER NOT NULL,
            UNIQUE(referrer_id, referred_user_id, intent_id)
        );
        CREATE INDEX IF NOT EXISTS idx_commissions_referrer ON referral_commissions(referrer_id);
        CREATE INDEX IF NOT EXISTS idx_commissions_intent ON referral_commissions(intent_id);

        -- Operator-facing anomaly records (late confirmations, amount
        -- mismatches, signature failures). Append-only.
        CREATE TABLE IF NOT EXISTS payment_anomalies (
            id TEXT PRIMARY KEY,
            intent_id TEXT,
            kind TEXT NOT NULL,
            detail TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_anomalies_time ON payment_anomalies(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_anomalies_intent ON payment_anomalies(intent_id);
        "#,
    )?;
    Ok(())
}
