//! PrepDesk payment core - asynchronous payment verification and
//! reconciliation for the exam-prep membership platform.
//!
//! This library implements the payment intent store, the gateway
//! adapter, webhook ingress, the polling fallback channel, the
//! CAS-based reconciliation engine and the entitlement/commission
//! activator. Everything else (UI, content, auth, SMS) lives elsewhere.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod gateway;
pub mod handlers;
pub mod id;
pub mod models;
pub mod poller;
pub mod rate_limit;
pub mod reconcile;
