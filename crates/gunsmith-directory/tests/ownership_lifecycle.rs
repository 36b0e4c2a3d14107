//! End-to-end ownership lifecycle through the public service facade: an
//! administrator lists a shop, the owner claims it with a token, gets verified,
//! pays for a featured slot, and the slot lapses back to the waitlist.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use gunsmith_directory::config::OwnershipConfig;
use gunsmith_directory::workflows::ownership::{
    sign_payload, CallerIdentity, ChannelNotifier, InMemoryOwnershipStore, NewListing,
    OwnershipEvent, OwnershipServices, OwnershipStore, RedemptionOutcome, RegionCode,
    VerificationStatus,
};

const SECRET: &str = "whsec_lifecycle";

fn services() -> (
    OwnershipServices<InMemoryOwnershipStore, ChannelNotifier>,
    Arc<InMemoryOwnershipStore>,
    tokio::sync::mpsc::UnboundedReceiver<OwnershipEvent>,
) {
    let store = Arc::new(InMemoryOwnershipStore::new());
    let (notifier, receiver) = ChannelNotifier::channel();
    let config = OwnershipConfig {
        webhook_secret: SECRET.to_string(),
        ..OwnershipConfig::default()
    };
    let services = OwnershipServices::new(store.clone(), Arc::new(notifier), &config);
    (services, store, receiver)
}

#[test]
fn listing_moves_from_unclaimed_to_verified_and_featured() {
    let (services, store, mut events) = services();
    let start = Utc
        .with_ymd_and_hms(2026, 5, 4, 15, 30, 0)
        .single()
        .expect("valid timestamp");
    let admin = CallerIdentity::administrator("ops-7");
    let owner = CallerIdentity::member("user-482");
    let tennessee = RegionCode::parse("TN").expect("region");

    let listing = services
        .listings
        .register(
            &admin,
            NewListing {
                name: "Smoky Mountain Gunsmithing".to_string(),
                region: tennessee.clone(),
            },
            start,
        )
        .expect("register");

    let token = services
        .claims
        .tokens()
        .issue(&admin, &listing.id, services.claim_token_ttl, start)
        .expect("token");
    let redemption = services
        .claims
        .redeem_token(&token.token, &owner, start + Duration::days(2))
        .expect("redeem");
    assert_eq!(redemption.outcome, RedemptionOutcome::Claimed);

    services
        .verification
        .resubmit(&owner, &listing.id, "574-01-234-5-B-67890")
        .expect("license submitted");
    let verified = services
        .verification
        .approve(&admin, &listing.id)
        .expect("approved");
    assert_eq!(verified.verification_status, VerificationStatus::Verified);

    let paid_at = start + Duration::days(3);
    let quote = services
        .featured
        .prepare_checkout(&owner, &listing.id, 60, paid_at)
        .expect("quote");
    assert_eq!(quote.amount_cents, 9800);

    let body = serde_json::to_vec(&json!({
        "event_type": "checkout.session.completed",
        "session": {
            "id": "cs_live_lifecycle",
            "amount_total": quote.amount_cents,
            "metadata": {
                "listing_id": quote.metadata.listing_id,
                "user_id": quote.metadata.user_id,
                "duration_days": quote.metadata.duration_days.to_string(),
            }
        }
    }))
    .expect("body");
    let header = sign_payload(SECRET.as_bytes(), paid_at.timestamp(), &body).expect("sign");
    let outcome = services
        .payments
        .handle_webhook(Some(&header), &body, paid_at)
        .expect("webhook");
    assert_eq!(outcome.featured_until, Some(paid_at + Duration::days(60)));

    let availability = services
        .featured
        .check_availability(&tennessee, paid_at)
        .expect("availability");
    assert_eq!(availability.available, 2);

    let report = services
        .featured
        .sweep(paid_at + Duration::days(61))
        .expect("sweep");
    assert_eq!(report.expired_listings, vec![listing.id.clone()]);

    let finished = store
        .listing(&listing.id)
        .expect("readable")
        .expect("present");
    assert!(!finished.is_featured);
    assert_eq!(finished.verification_status, VerificationStatus::Verified);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![
            "listing_claimed",
            "verification_submitted",
            "verification_resolved",
            "featured_activated",
            "featured_expired",
        ]
    );
}
