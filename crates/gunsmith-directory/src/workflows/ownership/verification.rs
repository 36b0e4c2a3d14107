use std::sync::Arc;

use tracing::info;

use super::domain::{Listing, ListingId, VerificationStatus};
use super::error::OwnershipError;
use super::identity::CallerIdentity;
use super::repository::{
    publish, ListingPatch, ListingPredicate, NotificationDispatch, OwnershipEvent, OwnershipStore,
};

const LICENSE_LENGTH: usize = 15;
const LICENSE_DIGITS: usize = 14;

/// Strip separators and upper-case: `"1-23-456-78-9a-12345"` becomes `"123456789A12345"`.
pub fn normalize_license(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Structural check only: 15 alphanumerics after normalisation, exactly 14
/// digits and one letter. No issuing-authority lookup.
pub fn validate_license_format(raw: &str) -> bool {
    let normalized = normalize_license(raw);
    let digits = normalized.chars().filter(char::is_ascii_digit).count();
    let letters = normalized.chars().filter(char::is_ascii_alphabetic).count();
    normalized.len() == LICENSE_LENGTH && digits == LICENSE_DIGITS && letters == 1
}

/// Normalise and validate, returning the stored form.
pub(crate) fn checked_license(raw: &str) -> Result<String, OwnershipError> {
    if !validate_license_format(raw) {
        return Err(OwnershipError::validation(
            "license identifier must contain 14 digits and 1 letter",
        ));
    }
    Ok(normalize_license(raw))
}

/// Routes license submissions through administrator review.
pub struct VerificationEngine<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
}

impl<S, N> VerificationEngine<S, N>
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self { store, notifier }
    }

    pub fn approve(
        &self,
        caller: &CallerIdentity,
        listing_id: &ListingId,
    ) -> Result<Listing, OwnershipError> {
        caller.require_administrator("approve_verification")?;
        self.resolve(listing_id, VerificationStatus::Verified)
    }

    /// Drops the badge request. Ownership is left as it is.
    pub fn reject(
        &self,
        caller: &CallerIdentity,
        listing_id: &ListingId,
    ) -> Result<Listing, OwnershipError> {
        caller.require_administrator("reject_verification")?;
        self.resolve(listing_id, VerificationStatus::Rejected)
    }

    /// Owner sends a (new) license for review, moving the listing back to `pending`.
    pub fn resubmit(
        &self,
        caller: &CallerIdentity,
        listing_id: &ListingId,
        license_identifier: &str,
    ) -> Result<Listing, OwnershipError> {
        let principal = caller.require_authenticated()?;
        let license = checked_license(license_identifier)?;

        let listing = self
            .store
            .transaction(|tx| -> Result<Listing, OwnershipError> {
                let current = tx
                    .listing(listing_id)?
                    .ok_or(OwnershipError::NotFound("listing"))?;
                if !current.is_owned_by(&principal.id) {
                    return Err(OwnershipError::Forbidden("caller does not own this listing"));
                }
                // A token claim leaves the listing pending with no license on
                // file; the owner may supply one without waiting for a rejection.
                match current.verification_status {
                    VerificationStatus::Pending if current.license_identifier.is_some() => {
                        return Err(OwnershipError::conflict("verification is already pending"))
                    }
                    VerificationStatus::Verified => {
                        return Err(OwnershipError::conflict("listing is already verified"))
                    }
                    _ => {}
                }

                let patch = ListingPatch {
                    verification_status: Some(VerificationStatus::Pending),
                    license_identifier: Some(Some(license.clone())),
                    ..ListingPatch::default()
                };
                let predicate = ListingPredicate::owned_by(principal.id.clone())
                    .with_verification(current.verification_status);
                let update = tx.update_listing_if(listing_id, &predicate, &patch)?;
                if !update.applied {
                    return Err(OwnershipError::conflict("listing changed during submission"));
                }
                Ok(update.listing)
            })?;

        info!(listing_id = %listing_id, "license submitted for verification");
        publish(
            self.notifier.as_ref(),
            OwnershipEvent::VerificationSubmitted {
                listing_id: listing_id.clone(),
            },
        );
        Ok(listing)
    }

    fn resolve(
        &self,
        listing_id: &ListingId,
        status: VerificationStatus,
    ) -> Result<Listing, OwnershipError> {
        let listing = self
            .store
            .transaction(|tx| -> Result<Listing, OwnershipError> {
                let current = tx
                    .listing(listing_id)?
                    .ok_or(OwnershipError::NotFound("listing"))?;
                if current.verification_status != VerificationStatus::Pending {
                    return Err(OwnershipError::conflict(format!(
                        "verification is {}, not pending",
                        current.verification_status.label()
                    )));
                }
                if status == VerificationStatus::Verified && current.license_identifier.is_none() {
                    return Err(OwnershipError::validation(
                        "no license identifier on file for this listing",
                    ));
                }

                let predicate =
                    ListingPredicate::any().with_verification(VerificationStatus::Pending);
                let update = tx.update_listing_if(
                    listing_id,
                    &predicate,
                    &ListingPatch::verification(status),
                )?;
                if !update.applied {
                    return Err(OwnershipError::conflict("verification was resolved concurrently"));
                }
                Ok(update.listing)
            })?;

        info!(listing_id = %listing_id, status = status.label(), "verification resolved");
        publish(
            self.notifier.as_ref(),
            OwnershipEvent::VerificationResolved {
                listing_id: listing_id.clone(),
                status,
            },
        );
        Ok(listing)
    }
}
