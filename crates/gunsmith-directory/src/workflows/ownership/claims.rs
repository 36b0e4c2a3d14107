use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::domain::{ClaimRequest, ClaimRequestId, ClaimStatus, Listing, ListingId};
use super::error::OwnershipError;
use super::identity::CallerIdentity;
use super::repository::{
    publish, ListingPatch, ListingPredicate, NotificationDispatch, OwnershipEvent, OwnershipStore,
    RepositoryError,
};
use super::tokens::{Redemption, TokenIssuer};
use super::verification::checked_license;

/// Manual claim submitted by a signed-in user who has no claim token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimSubmission {
    pub listing_id: ListingId,
    #[serde(default)]
    pub license_identifier: Option<String>,
    #[serde(default)]
    pub supporting_document_ref: Option<String>,
}

/// Drives a listing from unclaimed to owned, by token or by reviewed request.
pub struct ClaimWorkflow<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    tokens: TokenIssuer<S, N>,
}

impl<S, N> ClaimWorkflow<S, N>
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        let tokens = TokenIssuer::new(store.clone(), notifier.clone());
        Self {
            store,
            notifier,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer<S, N> {
        &self.tokens
    }

    /// Token path.
    pub fn redeem_token(
        &self,
        token: &str,
        caller: &CallerIdentity,
        now: DateTime<Utc>,
    ) -> Result<Redemption, OwnershipError> {
        self.tokens.redeem(token, caller, now)
    }

    /// Request path: open a `pending` review case. Ownership does not change yet.
    pub fn submit_claim(
        &self,
        caller: &CallerIdentity,
        submission: ClaimSubmission,
        now: DateTime<Utc>,
    ) -> Result<ClaimRequest, OwnershipError> {
        let principal = caller.require_authenticated()?;
        let license_identifier = submission
            .license_identifier
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(checked_license)
            .transpose()?;
        let supporting_document_ref = submission
            .supporting_document_ref
            .map(|reference| reference.trim().to_string())
            .filter(|reference| !reference.is_empty());

        let request = ClaimRequest {
            id: ClaimRequestId(format!("clm-{}", Uuid::new_v4().simple())),
            listing_id: submission.listing_id,
            claimant_id: principal.id.clone(),
            license_identifier,
            supporting_document_ref,
            status: ClaimStatus::Pending,
            submitted_at: now,
            resolved_at: None,
        };

        self.store
            .transaction(|tx| -> Result<(), OwnershipError> {
                let listing = tx
                    .listing(&request.listing_id)?
                    .ok_or(OwnershipError::NotFound("listing"))?;
                if listing.is_owned_by(&principal.id) {
                    return Err(OwnershipError::conflict("you already own this listing"));
                }
                if listing.is_owned() {
                    return Err(OwnershipError::conflict("listing is already claimed"));
                }
                let duplicate = tx
                    .claim_requests_for_listing(&request.listing_id)?
                    .iter()
                    .any(|existing| {
                        existing.claimant_id == principal.id
                            && existing.status == ClaimStatus::Pending
                    });
                if duplicate {
                    return Err(OwnershipError::conflict(
                        "a claim request for this listing is already pending review",
                    ));
                }
                tx.insert_claim_request(request.clone())?;
                Ok(())
            })?;

        info!(claim_id = %request.id, listing_id = %request.listing_id, "claim request submitted");
        publish(
            self.notifier.as_ref(),
            OwnershipEvent::ClaimRequestSubmitted {
                claim_id: request.id.clone(),
                listing_id: request.listing_id.clone(),
            },
        );
        Ok(request)
    }

    /// Administrator decision on a pending request.
    ///
    /// Approval sets ownership and pending verification in the same write as
    /// the request status, and closes any other pending requests for the
    /// listing. If another owner got there first the whole decision rolls back
    /// and the request stays pending.
    pub fn resolve(
        &self,
        caller: &CallerIdentity,
        claim_id: &ClaimRequestId,
        approve: bool,
        now: DateTime<Utc>,
    ) -> Result<ClaimRequest, OwnershipError> {
        caller.require_administrator("resolve_claim")?;

        let resolved = self
            .store
            .transaction(|tx| -> Result<ClaimRequest, OwnershipError> {
                let mut request = tx
                    .claim_request(claim_id)?
                    .ok_or(OwnershipError::NotFound("claim request"))?;
                if request.status != ClaimStatus::Pending {
                    return Err(OwnershipError::conflict(format!(
                        "claim request is already {}",
                        request.status.label()
                    )));
                }

                if approve {
                    let update = tx.update_listing_if(
                        &request.listing_id,
                        &ListingPredicate::unowned(),
                        &ListingPatch::claim(
                            request.claimant_id.clone(),
                            request.license_identifier.clone(),
                        ),
                    )?;
                    if !update.applied {
                        return Err(OwnershipError::conflict("listing is already claimed"));
                    }

                    for mut sibling in tx.claim_requests_for_listing(&request.listing_id)? {
                        if sibling.id != request.id && sibling.status == ClaimStatus::Pending {
                            sibling.status = ClaimStatus::Rejected;
                            sibling.resolved_at = Some(now);
                            tx.update_claim_request(sibling)?;
                        }
                    }
                }

                request.status = if approve {
                    ClaimStatus::Approved
                } else {
                    ClaimStatus::Rejected
                };
                request.resolved_at = Some(now);
                tx.update_claim_request(request.clone())?;
                Ok(request)
            })?;

        info!(
            claim_id = %resolved.id,
            listing_id = %resolved.listing_id,
            status = resolved.status.label(),
            "claim request resolved"
        );
        publish(
            self.notifier.as_ref(),
            OwnershipEvent::ClaimRequestResolved {
                claim_id: resolved.id.clone(),
                listing_id: resolved.listing_id.clone(),
                claimant_id: resolved.claimant_id.clone(),
                approved: approve,
            },
        );
        if approve {
            publish(
                self.notifier.as_ref(),
                OwnershipEvent::ListingClaimed {
                    listing_id: resolved.listing_id.clone(),
                    owner_id: resolved.claimant_id.clone(),
                },
            );
        }
        Ok(resolved)
    }

    /// Administrator override: clears owner, verification status and license together.
    pub fn force_unclaim(
        &self,
        caller: &CallerIdentity,
        listing_id: &ListingId,
    ) -> Result<Listing, OwnershipError> {
        let admin = caller.require_administrator("force_unclaim")?;

        let listing = self
            .store
            .transaction(|tx| -> Result<Listing, OwnershipError> {
                let update = tx
                    .update_listing_if(
                        listing_id,
                        &ListingPredicate::any(),
                        &ListingPatch::unclaim(),
                    )
                    .map_err(|error| match error {
                        RepositoryError::NotFound => OwnershipError::NotFound("listing"),
                        other => OwnershipError::Repository(other),
                    })?;
                Ok(update.listing)
            })?;

        info!(listing_id = %listing_id, admin = %admin.id, "listing ownership reset");
        publish(
            self.notifier.as_ref(),
            OwnershipEvent::ListingUnclaimed {
                listing_id: listing_id.clone(),
            },
        );
        Ok(listing)
    }
}
