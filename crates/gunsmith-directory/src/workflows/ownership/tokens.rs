use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use tracing::info;

use super::domain::{ClaimToken, Listing, ListingId, VerificationStatus};
use super::error::OwnershipError;
use super::identity::CallerIdentity;
use super::repository::{
    publish, ListingPatch, ListingPredicate, NotificationDispatch, OwnershipEvent, OwnershipStore,
};

const TOKEN_BYTES: usize = 32;

/// Longest lifetime a claim link may be issued with.
pub const MAX_CLAIM_TOKEN_TTL_HOURS: i64 = 24 * 365;

/// Converts a requested lifetime in hours, rejecting values outside
/// `1..=MAX_CLAIM_TOKEN_TTL_HOURS`.
pub fn claim_token_ttl(hours: i64) -> Result<Duration, OwnershipError> {
    if !(1..=MAX_CLAIM_TOKEN_TTL_HOURS).contains(&hours) {
        return Err(OwnershipError::validation(format!(
            "token lifetime must be between 1 and {MAX_CLAIM_TOKEN_TTL_HOURS} hours"
        )));
    }
    Duration::try_hours(hours)
        .ok_or_else(|| OwnershipError::validation("token lifetime is out of range"))
}

/// Issues and redeems single-use claim tokens.
pub struct TokenIssuer<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
}

/// How a successful redemption left the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionOutcome {
    /// The caller became the owner.
    Claimed,
    /// The listing already belonged to the caller; the token is now spent.
    AlreadyOwnedByCaller,
    /// Someone else owns the listing; the token is now spent and nothing changed.
    OwnedByAnotherAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub listing_id: ListingId,
    pub outcome: RedemptionOutcome,
    pub verification_status: VerificationStatus,
}

impl<S, N> TokenIssuer<S, N>
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self { store, notifier }
    }

    /// Mint a token for an unclaimed listing. Administrator only.
    pub fn issue(
        &self,
        caller: &CallerIdentity,
        listing_id: &ListingId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<ClaimToken, OwnershipError> {
        caller.require_administrator("issue_claim_token")?;
        if ttl <= Duration::zero() || ttl > Duration::hours(MAX_CLAIM_TOKEN_TTL_HOURS) {
            return Err(OwnershipError::validation(format!(
                "token lifetime must be between 1 and {MAX_CLAIM_TOKEN_TTL_HOURS} hours"
            )));
        }
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| OwnershipError::validation("token expiry is out of range"))?;

        let token = ClaimToken {
            token: generate_token(),
            listing_id: listing_id.clone(),
            expires_at,
            used_at: None,
            created_at: now,
        };

        self.store
            .transaction(|tx| -> Result<(), OwnershipError> {
                let listing = tx
                    .listing(listing_id)?
                    .ok_or(OwnershipError::NotFound("listing"))?;
                if listing.is_owned() {
                    return Err(OwnershipError::conflict("listing is already claimed"));
                }
                tx.insert_claim_token(token.clone())?;
                Ok(())
            })?;

        info!(listing_id = %listing_id, expires_at = %token.expires_at, "claim token issued");
        Ok(token)
    }

    /// Redeem `token` on behalf of `caller`.
    ///
    /// Checks run in a fixed order: existence, prior use, expiry, then
    /// authentication, so an anonymous visitor learns a link is dead before
    /// being sent to sign in. A listing that is already owned consumes the
    /// token without changing hands.
    pub fn redeem(
        &self,
        token: &str,
        caller: &CallerIdentity,
        now: DateTime<Utc>,
    ) -> Result<Redemption, OwnershipError> {
        let record = self
            .store
            .claim_token(token)?
            .ok_or(OwnershipError::NotFound("claim token"))?;
        if record.used_at.is_some() {
            return Err(OwnershipError::AlreadyUsed);
        }
        if record.expires_at <= now {
            return Err(OwnershipError::Expired);
        }
        let principal = caller.require_authenticated()?;

        let listing = self
            .store
            .listing(&record.listing_id)?
            .ok_or(OwnershipError::NotFound("listing"))?;

        if let Some(owner_id) = &listing.owner_id {
            self.store.transaction(|tx| -> Result<(), OwnershipError> {
                if !tx.mark_token_used(token, now)? {
                    return Err(OwnershipError::AlreadyUsed);
                }
                Ok(())
            })?;

            let outcome = if owner_id == &principal.id {
                RedemptionOutcome::AlreadyOwnedByCaller
            } else {
                RedemptionOutcome::OwnedByAnotherAccount
            };
            info!(listing_id = %listing.id, ?outcome, "claim token spent on owned listing");
            return Ok(Redemption {
                listing_id: listing.id,
                outcome,
                verification_status: listing.verification_status,
            });
        }

        let claimed: Listing = self
            .store
            .transaction(|tx| -> Result<Listing, OwnershipError> {
                if !tx.mark_token_used(token, now)? {
                    return Err(OwnershipError::AlreadyUsed);
                }
                let update = tx.update_listing_if(
                    &record.listing_id,
                    &ListingPredicate::unowned(),
                    &ListingPatch::claim(principal.id.clone(), None),
                )?;
                if !update.applied {
                    return Err(OwnershipError::conflict(
                        "listing was claimed by another account",
                    ));
                }
                Ok(update.listing)
            })?;

        info!(listing_id = %claimed.id, owner = %principal.id, "listing claimed with token");
        publish(
            self.notifier.as_ref(),
            OwnershipEvent::ListingClaimed {
                listing_id: claimed.id.clone(),
                owner_id: principal.id.clone(),
            },
        );

        Ok(Redemption {
            listing_id: claimed.id,
            outcome: RedemptionOutcome::Claimed,
            verification_status: claimed.verification_status,
        })
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
