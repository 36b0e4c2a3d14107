use super::common::*;
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

use crate::workflows::ownership::domain::{ListingId, PaymentStatus, UserId};
use crate::workflows::ownership::error::OwnershipError;
use crate::workflows::ownership::memory::InMemoryOwnershipStore;
use crate::workflows::ownership::payments::{
    sign_payload, verify_signature, PaymentConfirmation, PaymentConfirmationHandler,
    CHECKOUT_COMPLETED, CHECKOUT_PAYMENT_FAILED,
};

fn event_body(
    event_type: &str,
    session_id: &str,
    listing_id: &str,
    user_id: &str,
    days: u32,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event_type": event_type,
        "session": {
            "id": session_id,
            "payment_intent": "pi_3Nf0",
            "amount_total": 4900,
            "metadata": {
                "listing_id": listing_id,
                "user_id": user_id,
                "duration_days": days.to_string(),
            }
        }
    }))
    .expect("serialize event")
}

fn signed(body: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET.as_bytes(), now().timestamp(), body).expect("sign")
}

fn confirmation(session_id: &str, user_id: &str, days: u32) -> PaymentConfirmation {
    PaymentConfirmation {
        external_session_id: session_id.to_string(),
        payment_intent: None,
        listing_id: ListingId("L1".into()),
        user_id: UserId(user_id.to_string()),
        duration_days: days,
        amount_cents: 4900,
    }
}

#[test]
fn replayed_session_is_applied_once() {
    let (services, store, notifier) = build_services(vec![owned_listing("L1", "TX", "U1")]);
    let body = event_body(CHECKOUT_COMPLETED, "session_abc", "L1", "U1", 30);
    let header = signed(&body);

    let first = services
        .payments
        .handle_webhook(Some(&header), &body, now())
        .expect("first delivery");
    let second = services
        .payments
        .handle_webhook(Some(&header), &body, now() + Duration::seconds(30))
        .expect("replay");

    let expected_until = now() + Duration::days(30);
    assert!(first.applied);
    assert_eq!(first.featured_until, Some(expected_until));
    assert!(!second.applied);
    assert_eq!(second.featured_until, Some(expected_until));

    let listing = stored(&store, "L1");
    assert!(listing.is_featured);
    assert_eq!(listing.featured_until, Some(expected_until));
    assert_eq!(listing.featured_region, Some(region("TX")));

    let ledger = store.payments().expect("ledger");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].status, PaymentStatus::Completed);
    assert_eq!(ledger[0].payment_intent.as_deref(), Some("pi_3Nf0"));
    assert_eq!(notifier.kinds(), vec!["featured_activated"]);
}

#[test]
fn payment_on_active_placement_runs_from_confirmation_time() {
    let current_until = now() + Duration::days(10);
    let (services, store, _) = build_services(vec![featured_listing(
        "L1",
        "TX",
        "U1",
        Some(current_until),
    )]);

    let outcome = services
        .payments
        .apply_confirmation(confirmation("session_ext", "U1", 30), now())
        .expect("apply");

    assert_eq!(outcome.featured_until, Some(now() + Duration::days(30)));
    assert_eq!(stored(&store, "L1").featured_until, outcome.featured_until);
}

#[test]
fn concurrent_deliveries_of_one_session_apply_once() {
    let inner = InMemoryOwnershipStore::new();
    inner
        .seed_listing(owned_listing("L1", "TX", "U1"))
        .expect("seed");
    let store = Arc::new(StaleLedgerStore::new(inner.clone(), 2));
    let notifier = Arc::new(RecordingNotifier::default());
    let handler = PaymentConfirmationHandler::new(
        store,
        notifier.clone(),
        WEBHOOK_SECRET,
        Duration::seconds(300),
    );

    let results = std::thread::scope(|scope| {
        let a = scope.spawn(|| {
            handler.apply_confirmation(confirmation("session_race", "U1", 30), now())
        });
        let b = scope.spawn(|| {
            handler.apply_confirmation(confirmation("session_race", "U1", 30), now())
        });
        [a.join().expect("thread a"), b.join().expect("thread b")]
    });

    let outcomes: Vec<_> = results
        .into_iter()
        .map(|result| result.expect("both deliveries acknowledged"))
        .collect();
    let applied = outcomes.iter().filter(|outcome| outcome.applied).count();
    assert_eq!((applied, outcomes.len() - applied), (1, 1));
    let expected_until = Some(now() + Duration::days(30));
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.featured_until == expected_until));

    let ledger = inner.payments().expect("ledger");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].status, PaymentStatus::Completed);
    assert_eq!(stored(&inner, "L1").featured_until, expected_until);
    assert_eq!(notifier.kinds(), vec!["featured_activated"]);
}

#[test]
fn invalid_signature_changes_nothing() {
    let (services, store, _) = build_services(vec![owned_listing("L1", "TX", "U1")]);
    let body = event_body(CHECKOUT_COMPLETED, "session_bad", "L1", "U1", 30);
    let forged = sign_payload(b"whsec_someone_else", now().timestamp(), &body).expect("sign");

    for header in [
        Some(forged.as_str()),
        Some("t=abc,v1=00"),
        Some("t=-9223372036854775808,v1=00"),
        Some("t=9223372036854775807,v1=00"),
        None,
    ] {
        let result = services.payments.handle_webhook(header, &body, now());
        assert!(matches!(result, Err(OwnershipError::UpstreamSignatureInvalid)));
    }

    assert!(store.payments().expect("ledger").is_empty());
    assert!(!stored(&store, "L1").is_featured);
}

#[test]
fn signature_outside_tolerance_is_rejected() {
    let body = b"{}";
    let header = sign_payload(WEBHOOK_SECRET.as_bytes(), now().timestamp(), body).expect("sign");
    let tolerance = Duration::seconds(300);

    assert!(verify_signature(WEBHOOK_SECRET.as_bytes(), &header, body, tolerance, now()).is_ok());
    assert!(verify_signature(
        WEBHOOK_SECRET.as_bytes(),
        &header,
        body,
        tolerance,
        now() + Duration::seconds(301)
    )
    .is_err());
    assert!(
        verify_signature(WEBHOOK_SECRET.as_bytes(), &header, b"{ }", tolerance, now()).is_err()
    );
}

#[test]
fn payment_from_non_owner_is_not_ledgered_so_retry_can_apply() {
    let (services, store, _) = build_services(vec![owned_listing("L1", "TX", "U1")]);

    let result = services
        .payments
        .apply_confirmation(confirmation("session_wrong", "U2", 30), now());

    assert!(matches!(result, Err(OwnershipError::Conflict(_))));
    assert!(store.payments().expect("ledger").is_empty());
    assert!(!stored(&store, "L1").is_featured);
}

#[test]
fn failed_payment_is_ledgered_and_can_later_complete() {
    let (services, store, _) = build_services(vec![owned_listing("L1", "TX", "U1")]);
    let failed_body = event_body(CHECKOUT_PAYMENT_FAILED, "session_retry", "L1", "U1", 30);

    let failed = services
        .payments
        .handle_webhook(Some(&signed(&failed_body)), &failed_body, now())
        .expect("failure recorded");
    assert!(!failed.applied);
    assert!(!stored(&store, "L1").is_featured);
    assert_eq!(
        store.payments().expect("ledger")[0].status,
        PaymentStatus::Failed
    );

    let completed_body = event_body(CHECKOUT_COMPLETED, "session_retry", "L1", "U1", 30);
    let completed = services
        .payments
        .handle_webhook(Some(&signed(&completed_body)), &completed_body, now())
        .expect("completion");

    assert!(completed.applied);
    let ledger = store.payments().expect("ledger");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].status, PaymentStatus::Completed);
}

#[test]
fn unrelated_events_are_acknowledged_without_effect() {
    let (services, store, _) = build_services(vec![owned_listing("L1", "TX", "U1")]);
    let body = event_body("customer.updated", "session_x", "L1", "U1", 30);

    let outcome = services
        .payments
        .handle_webhook(Some(&signed(&body)), &body, now())
        .expect("acknowledged");

    assert_eq!(outcome.event_type, "customer.updated");
    assert!(!outcome.applied);
    assert!(store.payments().expect("ledger").is_empty());
}

#[test]
fn completed_event_without_metadata_is_a_validation_error() {
    let (services, _, _) = build_services(vec![owned_listing("L1", "TX", "U1")]);
    let body = serde_json::to_vec(&json!({
        "event_type": CHECKOUT_COMPLETED,
        "session": { "id": "session_meta" }
    }))
    .expect("serialize");

    let result = services
        .payments
        .handle_webhook(Some(&signed(&body)), &body, now());

    assert!(matches!(result, Err(OwnershipError::Validation(_))));
}
