//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models implement to
//! define how they are constructed from database rows, plus helper
//! functions for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt data.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PLAN_COLS: &str = "id, name, duration_days, price_minor, currency";

pub const PAYMENT_INTENT_COLS: &str = "id, user_id, plan_id, amount_minor, currency, status, gateway_order_id, gateway_payment_id, referral_code, entitlement_activated, created_at, expires_at, confirmed_at, failure_reason";

pub const MEMBERSHIP_COLS: &str = "user_id, plan_id, starts_at, ends_at, status, updated_at";

pub const REFERRER_COLS: &str =
    "id, user_id, code, total_referred, total_commission_minor, created_at";

pub const COMMISSION_COLS: &str = "id, referrer_id, referred_user_id, intent_id, amount_minor, commission_minor, status, created_at";

pub const ANOMALY_COLS: &str = "id, intent_id, kind, detail, created_at";

// ============ FromRow Implementations ============

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plan {
            id: row.get(0)?,
            name: row.get(1)?,
            duration_days: row.get(2)?,
            price_minor: row.get(3)?,
            currency: row.get(4)?,
        })
    }
}

impl FromRow for PaymentIntent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentIntent {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_id: row.get(2)?,
            amount_minor: row.get(3)?,
            currency: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            gateway_order_id: row.get(6)?,
            gateway_payment_id: row.get(7)?,
            referral_code: row.get(8)?,
            entitlement_activated: row.get::<_, i64>(9)? != 0,
            created_at: row.get(10)?,
            expires_at: row.get(11)?,
            confirmed_at: row.get(12)?,
            failure_reason: row.get(13)?,
        })
    }
}

impl FromRow for Membership {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Membership {
            user_id: row.get(0)?,
            plan_id: row.get(1)?,
            starts_at: row.get(2)?,
            ends_at: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for Referrer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Referrer {
            id: row.get(0)?,
            user_id: row.get(1)?,
            code: row.get(2)?,
            total_referred: row.get(3)?,
            total_commission_minor: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for ReferralCommission {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ReferralCommission {
            id: row.get(0)?,
            referrer_id: row.get(1)?,
            referred_user_id: row.get(2)?,
            intent_id: row.get(3)?,
            amount_minor: row.get(4)?,
            commission_minor: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for PaymentAnomaly {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentAnomaly {
            id: row.get(0)?,
            intent_id: row.get(1)?,
            kind: row.get(2)?,
            detail: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}
