use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::domain::{
    ClaimRequest, ClaimRequestId, ClaimToken, Listing, ListingId, PaymentTransaction, RegionCode,
    UserId, VerificationStatus, WaitlistEntry, WaitlistEntryId,
};

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Durable store for listings, claim artefacts, the waitlist and the payment ledger.
///
/// Every multi-record mutation runs inside [`OwnershipStore::transaction`]: the
/// closure's writes become visible together when it returns `Ok`, and none of
/// them do when it returns `Err`.
pub trait OwnershipStore: Send + Sync {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>;

    fn listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError> {
        self.transaction(|tx| tx.listing(id))
    }

    fn claim_token(&self, token: &str) -> Result<Option<ClaimToken>, RepositoryError> {
        self.transaction(|tx| tx.claim_token(token))
    }

    /// Every region that has a listing or a waitlist entry.
    fn regions(&self) -> Result<Vec<RegionCode>, RepositoryError>;
}

/// Operations available inside a store transaction.
pub trait StoreTransaction {
    fn listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError>;
    /// Fails with `Conflict` when the id or slug is taken.
    fn insert_listing(&mut self, listing: Listing) -> Result<(), RepositoryError>;
    /// Applies `patch` only if the stored listing satisfies `predicate`.
    fn update_listing_if(
        &mut self,
        id: &ListingId,
        predicate: &ListingPredicate,
        patch: &ListingPatch,
    ) -> Result<ConditionalUpdate, RepositoryError>;
    /// Listings whose `featured_region` equals `region`, featured or not, plus
    /// legacy featured rows with no `featured_region` whose home region matches.
    fn featured_in_region(&self, region: &RegionCode) -> Result<Vec<Listing>, RepositoryError>;

    fn claim_token(&self, token: &str) -> Result<Option<ClaimToken>, RepositoryError>;
    fn insert_claim_token(&mut self, token: ClaimToken) -> Result<(), RepositoryError>;
    /// Sets `used_at` if still unset; returns whether this call consumed the token.
    fn mark_token_used(&mut self, token: &str, used_at: DateTime<Utc>)
        -> Result<bool, RepositoryError>;

    fn claim_request(&self, id: &ClaimRequestId) -> Result<Option<ClaimRequest>, RepositoryError>;
    fn claim_requests_for_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ClaimRequest>, RepositoryError>;
    fn insert_claim_request(&mut self, request: ClaimRequest) -> Result<(), RepositoryError>;
    fn update_claim_request(&mut self, request: ClaimRequest) -> Result<(), RepositoryError>;

    /// Entries for `region`, oldest first.
    fn waitlist(&self, region: &RegionCode) -> Result<Vec<WaitlistEntry>, RepositoryError>;
    /// Fails with `Conflict` when a `waiting` entry already holds the same tuple.
    fn insert_waitlist_entry(&mut self, entry: WaitlistEntry) -> Result<(), RepositoryError>;
    fn update_waitlist_entry(&mut self, entry: WaitlistEntry) -> Result<(), RepositoryError>;

    fn payment(&self, external_session_id: &str)
        -> Result<Option<PaymentTransaction>, RepositoryError>;
    /// Fails with `Conflict` when the session id is already recorded.
    fn insert_payment(&mut self, payment: PaymentTransaction) -> Result<(), RepositoryError>;
    fn update_payment(&mut self, payment: PaymentTransaction) -> Result<(), RepositoryError>;
}

/// Expected owner state for a conditional listing write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OwnerCondition {
    #[default]
    Any,
    Unowned,
    OwnedBy(UserId),
}

/// Guard evaluated against the stored listing at write time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPredicate {
    pub owner: OwnerCondition,
    pub verification: Option<VerificationStatus>,
}

impl ListingPredicate {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn unowned() -> Self {
        Self {
            owner: OwnerCondition::Unowned,
            verification: None,
        }
    }

    pub fn owned_by(user_id: UserId) -> Self {
        Self {
            owner: OwnerCondition::OwnedBy(user_id),
            verification: None,
        }
    }

    pub fn with_verification(mut self, status: VerificationStatus) -> Self {
        self.verification = Some(status);
        self
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        let owner_ok = match &self.owner {
            OwnerCondition::Any => true,
            OwnerCondition::Unowned => listing.owner_id.is_none(),
            OwnerCondition::OwnedBy(user_id) => listing.is_owned_by(user_id),
        };
        let verification_ok = self
            .verification
            .map_or(true, |status| listing.verification_status == status);
        owner_ok && verification_ok
    }
}

/// Featured-state change carried by a [`ListingPatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeaturedPatch {
    Activate {
        region: RegionCode,
        until: DateTime<Utc>,
    },
    Clear,
}

/// Closed set of fields this subsystem may write on a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPatch {
    pub owner_id: Option<Option<UserId>>,
    pub verification_status: Option<VerificationStatus>,
    pub license_identifier: Option<Option<String>>,
    pub featured: Option<FeaturedPatch>,
}

impl ListingPatch {
    /// Ownership and pending verification, written together.
    pub fn claim(owner_id: UserId, license_identifier: Option<String>) -> Self {
        Self {
            owner_id: Some(Some(owner_id)),
            verification_status: Some(VerificationStatus::Pending),
            license_identifier: license_identifier.map(Some),
            featured: None,
        }
    }

    /// Administrator override. Ownership and verification are always reset as a pair.
    pub fn unclaim() -> Self {
        Self {
            owner_id: Some(None),
            verification_status: Some(VerificationStatus::Unverified),
            license_identifier: Some(None),
            featured: None,
        }
    }

    pub fn verification(status: VerificationStatus) -> Self {
        Self {
            verification_status: Some(status),
            ..Self::default()
        }
    }

    pub fn featured(featured: FeaturedPatch) -> Self {
        Self {
            featured: Some(featured),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, listing: &mut Listing) {
        if let Some(owner_id) = &self.owner_id {
            listing.owner_id = owner_id.clone();
        }
        if let Some(status) = self.verification_status {
            listing.verification_status = status;
        }
        if let Some(license) = &self.license_identifier {
            listing.license_identifier = license.clone();
        }
        match &self.featured {
            Some(FeaturedPatch::Activate { region, until }) => {
                listing.is_featured = true;
                listing.featured_region = Some(region.clone());
                listing.featured_until = Some(*until);
            }
            Some(FeaturedPatch::Clear) => {
                listing.is_featured = false;
                listing.featured_until = None;
            }
            None => {}
        }
    }
}

/// Result of [`StoreTransaction::update_listing_if`]: whether the write happened
/// and the listing as stored afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalUpdate {
    pub applied: bool,
    pub listing: Listing,
}

/// Events published after a transition commits. Email rendering and delivery
/// happen downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OwnershipEvent {
    ListingClaimed {
        listing_id: ListingId,
        owner_id: UserId,
    },
    ListingUnclaimed {
        listing_id: ListingId,
    },
    ClaimRequestSubmitted {
        claim_id: ClaimRequestId,
        listing_id: ListingId,
    },
    ClaimRequestResolved {
        claim_id: ClaimRequestId,
        listing_id: ListingId,
        claimant_id: UserId,
        approved: bool,
    },
    VerificationSubmitted {
        listing_id: ListingId,
    },
    VerificationResolved {
        listing_id: ListingId,
        status: VerificationStatus,
    },
    FeaturedActivated {
        listing_id: ListingId,
        region: RegionCode,
        featured_until: DateTime<Utc>,
    },
    FeaturedExpired {
        listing_id: ListingId,
        region: RegionCode,
    },
    WaitlistJoined {
        entry_id: WaitlistEntryId,
        listing_id: ListingId,
        region: RegionCode,
    },
    WaitlistSlotOpened {
        entry_id: WaitlistEntryId,
        listing_id: ListingId,
        user_id: UserId,
        region: RegionCode,
    },
}

impl OwnershipEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OwnershipEvent::ListingClaimed { .. } => "listing_claimed",
            OwnershipEvent::ListingUnclaimed { .. } => "listing_unclaimed",
            OwnershipEvent::ClaimRequestSubmitted { .. } => "claim_request_submitted",
            OwnershipEvent::ClaimRequestResolved { .. } => "claim_request_resolved",
            OwnershipEvent::VerificationSubmitted { .. } => "verification_submitted",
            OwnershipEvent::VerificationResolved { .. } => "verification_resolved",
            OwnershipEvent::FeaturedActivated { .. } => "featured_activated",
            OwnershipEvent::FeaturedExpired { .. } => "featured_expired",
            OwnershipEvent::WaitlistJoined { .. } => "waitlist_joined",
            OwnershipEvent::WaitlistSlotOpened { .. } => "waitlist_slot_opened",
        }
    }
}

/// Outbound notification hook (e-mail adapters and similar).
pub trait NotificationDispatch: Send + Sync {
    fn notify(&self, event: OwnershipEvent) -> Result<(), DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("notification channel closed")]
    Closed,
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Fire-and-forget publish; delivery failures are logged and swallowed.
pub(crate) fn publish<N: NotificationDispatch + ?Sized>(notifier: &N, event: OwnershipEvent) {
    let kind = event.kind();
    if let Err(error) = notifier.notify(event) {
        warn!(kind, %error, "notification dispatch failed");
    }
}
