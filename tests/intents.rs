//! Payment intent store tests: idempotent creation and the
//! compare-and-swap transition that the whole reconciliation design
//! rests on.

#[path = "common/mod.rs"]
mod common;

use common::*;
use prepdesk::db::queries::{TransitionFields, TransitionOutcome};
use rusqlite::Connection;

// ============ Creation Tests ============

#[test]
fn test_create_and_get_intent() {
    let conn = setup_test_db();

    let intent = create_test_intent(&conn, "corr-0001-abcd", "user-1", "pro", None);

    assert_eq!(intent.id, "corr-0001-abcd");
    assert_eq!(intent.user_id, "user-1");
    assert_eq!(intent.plan_id, "pro");
    assert_eq!(intent.amount_minor, 99_900);
    assert_eq!(intent.currency, "INR");
    assert_eq!(intent.status, PaymentStatus::Created);
    assert!(intent.gateway_order_id.is_none());
    assert!(intent.gateway_payment_id.is_none());
    assert!(!intent.entitlement_activated);
    assert_eq!(intent.expires_at, intent.created_at + TEST_TTL_SECS);

    let retrieved = queries::get_payment_intent(&conn, "corr-0001-abcd")
        .expect("query failed")
        .expect("intent should exist");
    assert_eq!(retrieved.id, intent.id);
    assert_eq!(retrieved.status, intent.status);
    assert_eq!(retrieved.created_at, intent.created_at);
}

#[test]
fn test_create_intent_idempotent_retry() {
    let conn = setup_test_db();

    let first = create_test_intent(&conn, "corr-retry-01", "user-1", "pro", None);
    // Same payload retried: the original row comes back, not a new one.
    let second = create_test_intent(&conn, "corr-retry-01", "user-1", "pro", None);

    assert_eq!(first.created_at, second.created_at);
    assert_eq!(first.expires_at, second.expires_at);

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM payment_intents", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_create_intent_conflicting_reuse_rejected() {
    let conn = setup_test_db();

    create_test_intent(&conn, "corr-reuse-01", "user-1", "pro", None);

    // Same correlation ID, different payment: must be a conflict.
    let result = queries::create_payment_intent(
        &conn,
        &CreatePaymentIntent {
            correlation_id: "corr-reuse-01".to_string(),
            user_id: "user-2".to_string(),
            plan_id: "basic".to_string(),
            amount_minor: 29_900,
            currency: "INR".to_string(),
            referral_code: None,
        },
        TEST_TTL_SECS,
    );

    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[test]
fn test_get_intent_nonexistent() {
    let conn = setup_test_db();

    let result = queries::get_payment_intent(&conn, "corr-none").expect("query should not error");
    assert!(result.is_none());
}

// ============ CAS Transition Tests ============

#[test]
fn test_transition_applies_when_expected_matches() {
    let conn = setup_test_db();
    create_test_intent(&conn, "corr-cas-01", "user-1", "pro", None);

    let intent = record_test_order(&conn, "corr-cas-01", "order_A1");
    assert_eq!(intent.status, PaymentStatus::AwaitingConfirmation);
    assert_eq!(intent.gateway_order_id.as_deref(), Some("order_A1"));
}

#[test]
fn test_transition_stale_when_expected_mismatches() {
    let conn = setup_test_db();
    create_test_intent(&conn, "corr-cas-02", "user-1", "pro", None);
    record_test_order(&conn, "corr-cas-02", "order_A2");

    // Second caller still believes the intent is `created`.
    let outcome = queries::transition_intent(
        &conn,
        "corr-cas-02",
        PaymentStatus::Created,
        PaymentStatus::AwaitingConfirmation,
        &TransitionFields {
            gateway_order_id: Some("order_B2".to_string()),
            ..Default::default()
        },
    )
    .expect("transition should not error");

    match outcome {
        TransitionOutcome::Stale(current) => {
            assert_eq!(current, PaymentStatus::AwaitingConfirmation)
        }
        other => panic!("expected Stale, got {:?}", other),
    }

    // The loser's fields did not overwrite the winner's.
    let stored = queries::get_payment_intent(&conn, "corr-cas-02")
        .unwrap()
        .unwrap();
    assert_eq!(stored.gateway_order_id.as_deref(), Some("order_A2"));
}

#[test]
fn test_transition_not_found() {
    let conn = setup_test_db();

    let outcome = queries::transition_intent(
        &conn,
        "corr-ghost",
        PaymentStatus::Created,
        PaymentStatus::AwaitingConfirmation,
        &TransitionFields::default(),
    )
    .expect("transition should not error");

    assert!(matches!(outcome, TransitionOutcome::NotFound));
}

#[test]
fn test_terminal_status_is_absorbing() {
    let conn = setup_test_db();
    create_test_intent(&conn, "corr-term-01", "user-1", "pro", None);
    record_test_order(&conn, "corr-term-01", "order_T1");

    let confirmed = match queries::transition_intent(
        &conn,
        "corr-term-01",
        PaymentStatus::AwaitingConfirmation,
        PaymentStatus::Confirmed,
        &TransitionFields {
            gateway_payment_id: Some("pay_T1".to_string()),
            confirmed_at: Some(now()),
            ..Default::default()
        },
    )
    .unwrap()
    {
        TransitionOutcome::Applied(i) => i,
        other => panic!("expected Applied, got {:?}", other),
    };

    // Every further transition attempt fails the CAS and leaves the
    // confirmation fields untouched.
    for (expected, new) in [
        (PaymentStatus::AwaitingConfirmation, PaymentStatus::Failed),
        (PaymentStatus::AwaitingConfirmation, PaymentStatus::Expired),
        (PaymentStatus::Created, PaymentStatus::Confirmed),
    ] {
        let outcome = queries::transition_intent(
            &conn,
            "corr-term-01",
            expected,
            new,
            &TransitionFields {
                gateway_payment_id: Some("pay_EVIL".to_string()),
                failure_reason: Some("should not land".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(
            matches!(outcome, TransitionOutcome::Stale(PaymentStatus::Confirmed)),
            "terminal intent must reject {:?} -> {:?}",
            expected,
            new
        );
    }

    let stored = queries::get_payment_intent(&conn, "corr-term-01")
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Confirmed);
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("pay_T1"));
    assert_eq!(stored.confirmed_at, confirmed.confirmed_at);
    assert!(stored.failure_reason.is_none());
}

#[test]
fn test_transition_concurrent_exactly_one_winner() {
    // Verify CAS prevents double-confirmation under concurrent access.
    // Multiple threads race the same transition -- exactly 1 should win.

    use std::sync::{Arc, Barrier};

    let num_threads = 5;
    let db_path = std::env::temp_dir().join(format!(
        "prepdesk_test_cas_concurrent_{}.db",
        uuid::Uuid::new_v4()
    ));

    {
        let conn = Connection::open(&db_path).expect("Failed to create test db");
        init_db(&conn).unwrap();
        seed_test_plans(&conn);
        create_test_intent(&conn, "corr-race-01", "user-1", "pro", None);
        record_test_order(&conn, "corr-race-01", "order_R1");
    }

    let barrier = Arc::new(Barrier::new(num_threads));
    let mut handles = Vec::new();

    for i in 0..num_threads {
        let barrier = barrier.clone();
        let db_path = db_path.clone();
        handles.push(std::thread::spawn(move || {
            let conn = Connection::open(&db_path).expect("Failed to open test db");
            conn.busy_timeout(std::time::Duration::from_secs(5)).unwrap();
            barrier.wait();
            let outcome = queries::transition_intent(
                &conn,
                "corr-race-01",
                PaymentStatus::AwaitingConfirmation,
                PaymentStatus::Confirmed,
                &TransitionFields {
                    gateway_payment_id: Some(format!("pay_thread_{}", i)),
                    confirmed_at: Some(now()),
                    ..Default::default()
                },
            )
            .expect("transition should not error");
            matches!(outcome, TransitionOutcome::Applied(_))
        }));
    }

    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1, "exactly one thread should win the CAS");

    let conn = Connection::open(&db_path).unwrap();
    let stored = queries::get_payment_intent(&conn, "corr-race-01")
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Confirmed);

    let _ = std::fs::remove_file(&db_path);
}

// ============ Expiry Sweep Tests ============

#[test]
fn test_expire_stale_intents_sweeps_only_overdue() {
    let conn = setup_test_db();

    // Overdue: zero TTL puts expires_at in the past immediately.
    queries::create_payment_intent(
        &conn,
        &CreatePaymentIntent {
            correlation_id: "corr-overdue-1".to_string(),
            user_id: "user-1".to_string(),
            plan_id: "pro".to_string(),
            amount_minor: 99_900,
            currency: "INR".to_string(),
            referral_code: None,
        },
        -1,
    )
    .unwrap();

    // Fresh: normal TTL.
    create_test_intent(&conn, "corr-fresh-1", "user-2", "pro", None);

    // Already confirmed: must never be swept.
    create_test_intent(&conn, "corr-done-1", "user-3", "pro", None);
    record_test_order(&conn, "corr-done-1", "order_D1");
    queries::transition_intent(
        &conn,
        "corr-done-1",
        PaymentStatus::AwaitingConfirmation,
        PaymentStatus::Confirmed,
        &TransitionFields {
            gateway_payment_id: Some("pay_D1".to_string()),
            confirmed_at: Some(now()),
            ..Default::default()
        },
    )
    .unwrap();

    let swept = queries::expire_stale_intents(&conn).expect("sweep should not error");
    assert_eq!(swept, 1);

    let overdue = queries::get_payment_intent(&conn, "corr-overdue-1")
        .unwrap()
        .unwrap();
    assert_eq!(overdue.status, PaymentStatus::Expired);

    let fresh = queries::get_payment_intent(&conn, "corr-fresh-1")
        .unwrap()
        .unwrap();
    assert_eq!(fresh.status, PaymentStatus::Created);

    let done = queries::get_payment_intent(&conn, "corr-done-1")
        .unwrap()
        .unwrap();
    assert_eq!(done.status, PaymentStatus::Confirmed);
}

#[test]
fn test_find_intent_by_gateway_order() {
    let conn = setup_test_db();
    create_test_intent(&conn, "corr-lookup-1", "user-1", "pro", None);
    record_test_order(&conn, "corr-lookup-1", "order_L1");

    let found = queries::find_intent_by_gateway_order(&conn, "order_L1")
        .expect("query failed")
        .expect("intent should be found");
    assert_eq!(found.id, "corr-lookup-1");

    let missing =
        queries::find_intent_by_gateway_order(&conn, "order_unknown").expect("query failed");
    assert!(missing.is_none());
}
