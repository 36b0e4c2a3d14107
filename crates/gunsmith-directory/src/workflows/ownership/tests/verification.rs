use super::common::*;

use crate::workflows::ownership::domain::{ListingId, UserId, VerificationStatus};
use crate::workflows::ownership::error::OwnershipError;
use crate::workflows::ownership::repository::OwnershipEvent;
use crate::workflows::ownership::verification::{normalize_license, validate_license_format};

fn pending_listing(license: Option<&str>) -> crate::workflows::ownership::domain::Listing {
    let mut listing = owned_listing("L1", "TX", "U1");
    listing.verification_status = VerificationStatus::Pending;
    listing.license_identifier = license.map(str::to_string);
    listing
}

#[test]
fn license_format_accepts_fourteen_digits_and_one_letter() {
    assert!(validate_license_format("123456789A12345"));
    assert!(validate_license_format("1-23-456-78-9a-12345"));
    assert!(validate_license_format(" 5 74 012 34 5B 67890 "));

    assert!(!validate_license_format("12345678901234"));
    assert!(!validate_license_format("123456789AB1234"));
    assert!(!validate_license_format("1234567890123456"));
    assert!(!validate_license_format(""));
}

#[test]
fn normalization_strips_separators_and_uppercases() {
    assert_eq!(normalize_license("1-23-456-78-9a-12345"), "123456789A12345");
    assert_eq!(normalize_license("--"), "");
}

#[test]
fn approve_marks_pending_listing_verified() {
    let (services, store, notifier) =
        build_services(vec![pending_listing(Some("123456789A12345"))]);

    let listing = services
        .verification
        .approve(&admin(), &ListingId("L1".into()))
        .expect("approve");

    assert_eq!(listing.verification_status, VerificationStatus::Verified);
    assert_eq!(stored(&store, "L1").verification_status, VerificationStatus::Verified);
    assert!(matches!(
        notifier.events().as_slice(),
        [OwnershipEvent::VerificationResolved {
            status: VerificationStatus::Verified,
            ..
        }]
    ));
}

#[test]
fn approve_requires_a_license_on_file() {
    let (services, store, _) = build_services(vec![pending_listing(None)]);

    let result = services
        .verification
        .approve(&admin(), &ListingId("L1".into()));

    assert!(matches!(result, Err(OwnershipError::Validation(_))));
    assert_eq!(stored(&store, "L1").verification_status, VerificationStatus::Pending);
}

#[test]
fn reject_keeps_ownership() {
    let (services, store, _) = build_services(vec![pending_listing(Some("123456789A12345"))]);

    let listing = services
        .verification
        .reject(&admin(), &ListingId("L1".into()))
        .expect("reject");

    assert_eq!(listing.verification_status, VerificationStatus::Rejected);
    assert_eq!(stored(&store, "L1").owner_id, Some(UserId("U1".into())));
}

#[test]
fn resolution_requires_pending_status_and_administrator() {
    let (services, _, _) = build_services(vec![owned_listing("L1", "TX", "U1")]);
    let id = ListingId("L1".into());

    assert!(matches!(
        services.verification.approve(&admin(), &id),
        Err(OwnershipError::Conflict(_))
    ));
    assert!(matches!(
        services.verification.reject(&member("U1"), &id),
        Err(OwnershipError::Forbidden(_))
    ));
}

#[test]
fn owner_can_resubmit_after_rejection() {
    let mut rejected = owned_listing("L1", "TX", "U1");
    rejected.verification_status = VerificationStatus::Rejected;
    rejected.license_identifier = Some("999999999Z99999".into());
    let (services, store, notifier) = build_services(vec![rejected]);

    let listing = services
        .verification
        .resubmit(&member("U1"), &ListingId("L1".into()), "1-23-456-78-9a-12345")
        .expect("resubmit");

    assert_eq!(listing.verification_status, VerificationStatus::Pending);
    assert_eq!(listing.license_identifier.as_deref(), Some("123456789A12345"));
    assert_eq!(stored(&store, "L1"), listing);
    assert_eq!(notifier.kinds(), vec!["verification_submitted"]);
}

#[test]
fn token_claimed_owner_can_supply_missing_license() {
    let (services, _, _) = build_services(vec![pending_listing(None)]);
    let id = ListingId("L1".into());

    services
        .verification
        .resubmit(&member("U1"), &id, "123456789A12345")
        .expect("license supplied");
    let approved = services
        .verification
        .approve(&admin(), &id)
        .expect("approve");

    assert_eq!(approved.verification_status, VerificationStatus::Verified);
}

#[test]
fn resubmit_is_refused_for_non_owners_and_settled_states() {
    let mut verified = owned_listing("L2", "TX", "U1");
    verified.verification_status = VerificationStatus::Verified;
    verified.license_identifier = Some("123456789A12345".into());
    let (services, _, _) = build_services(vec![
        pending_listing(Some("123456789A12345")),
        verified,
    ]);

    assert!(matches!(
        services
            .verification
            .resubmit(&member("U2"), &ListingId("L1".into()), "123456789A12345"),
        Err(OwnershipError::Forbidden(_))
    ));
    assert!(matches!(
        services
            .verification
            .resubmit(&member("U1"), &ListingId("L1".into()), "123456789A12345"),
        Err(OwnershipError::Conflict(_))
    ));
    assert!(matches!(
        services
            .verification
            .resubmit(&member("U1"), &ListingId("L2".into()), "123456789A12345"),
        Err(OwnershipError::Conflict(_))
    ));
    assert!(matches!(
        services
            .verification
            .resubmit(&member("U1"), &ListingId("L2".into()), "not-a-license"),
        Err(OwnershipError::Validation(_))
    ));
}
