use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::domain::{
    ClaimRequest, ClaimRequestId, ClaimToken, Listing, ListingId, PaymentTransaction, RegionCode,
    WaitlistEntry, WaitlistStatus,
};
use super::repository::{
    ConditionalUpdate, ListingPatch, ListingPredicate, OwnershipStore, RepositoryError,
    StoreTransaction,
};

#[derive(Debug, Default, Clone)]
struct StoreState {
    listings: BTreeMap<ListingId, Listing>,
    tokens: HashMap<String, ClaimToken>,
    claims: BTreeMap<ClaimRequestId, ClaimRequest>,
    waitlist: Vec<WaitlistEntry>,
    payments: BTreeMap<String, PaymentTransaction>,
}

/// Process-local store. A transaction works on a staged copy of the state and
/// swaps it in on success, so a failed closure leaves nothing behind.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOwnershipStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryOwnershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a listing as-is, bypassing slug allocation. Used by fixtures and demos.
    pub fn seed_listing(&self, listing: Listing) -> Result<(), RepositoryError> {
        self.transaction(|tx| tx.insert_listing(listing))
    }

    pub fn payments(&self) -> Result<Vec<PaymentTransaction>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.payments.values().cloned().collect())
    }

    pub fn claim_requests(&self) -> Result<Vec<ClaimRequest>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.claims.values().cloned().collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl OwnershipStore for InMemoryOwnershipStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        let mut tx = MemoryTransaction { state: &mut staged };
        let value = work(&mut tx as &mut dyn StoreTransaction)?;
        *guard = staged;
        Ok(value)
    }

    fn regions(&self) -> Result<Vec<RegionCode>, RepositoryError> {
        let guard = self.lock()?;
        let regions: BTreeSet<RegionCode> = guard
            .listings
            .values()
            .map(|listing| listing.region.clone())
            .chain(guard.waitlist.iter().map(|entry| entry.region.clone()))
            .collect();
        Ok(regions.into_iter().collect())
    }
}

struct MemoryTransaction<'a> {
    state: &'a mut StoreState,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError> {
        Ok(self.state.listings.get(id).cloned())
    }

    fn insert_listing(&mut self, listing: Listing) -> Result<(), RepositoryError> {
        let slug_taken = self
            .state
            .listings
            .values()
            .any(|existing| existing.slug == listing.slug);
        if slug_taken || self.state.listings.contains_key(&listing.id) {
            return Err(RepositoryError::Conflict);
        }
        self.state.listings.insert(listing.id.clone(), listing);
        Ok(())
    }

    fn update_listing_if(
        &mut self,
        id: &ListingId,
        predicate: &ListingPredicate,
        patch: &ListingPatch,
    ) -> Result<ConditionalUpdate, RepositoryError> {
        let listing = self
            .state
            .listings
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;

        if !predicate.matches(listing) {
            return Ok(ConditionalUpdate {
                applied: false,
                listing: listing.clone(),
            });
        }

        patch.apply_to(listing);
        Ok(ConditionalUpdate {
            applied: true,
            listing: listing.clone(),
        })
    }

    fn featured_in_region(&self, region: &RegionCode) -> Result<Vec<Listing>, RepositoryError> {
        Ok(self
            .state
            .listings
            .values()
            .filter(|listing| match &listing.featured_region {
                Some(featured_region) => featured_region == region,
                None => listing.is_featured && &listing.region == region,
            })
            .cloned()
            .collect())
    }

    fn claim_token(&self, token: &str) -> Result<Option<ClaimToken>, RepositoryError> {
        Ok(self.state.tokens.get(token).cloned())
    }

    fn insert_claim_token(&mut self, token: ClaimToken) -> Result<(), RepositoryError> {
        if self.state.tokens.contains_key(&token.token) {
            return Err(RepositoryError::Conflict);
        }
        self.state.tokens.insert(token.token.clone(), token);
        Ok(())
    }

    fn mark_token_used(
        &mut self,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let record = self
            .state
            .tokens
            .get_mut(token)
            .ok_or(RepositoryError::NotFound)?;
        if record.used_at.is_some() {
            return Ok(false);
        }
        record.used_at = Some(used_at);
        Ok(true)
    }

    fn claim_request(&self, id: &ClaimRequestId) -> Result<Option<ClaimRequest>, RepositoryError> {
        Ok(self.state.claims.get(id).cloned())
    }

    fn claim_requests_for_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ClaimRequest>, RepositoryError> {
        Ok(self
            .state
            .claims
            .values()
            .filter(|request| &request.listing_id == listing_id)
            .cloned()
            .collect())
    }

    fn insert_claim_request(&mut self, request: ClaimRequest) -> Result<(), RepositoryError> {
        if self.state.claims.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        self.state.claims.insert(request.id.clone(), request);
        Ok(())
    }

    fn update_claim_request(&mut self, request: ClaimRequest) -> Result<(), RepositoryError> {
        match self.state.claims.get_mut(&request.id) {
            Some(existing) => {
                *existing = request;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn waitlist(&self, region: &RegionCode) -> Result<Vec<WaitlistEntry>, RepositoryError> {
        let mut entries: Vec<WaitlistEntry> = self
            .state
            .waitlist
            .iter()
            .filter(|entry| &entry.region == region)
            .cloned()
            .collect();
        entries.sort_by(|lhs, rhs| lhs.created_at.cmp(&rhs.created_at));
        Ok(entries)
    }

    fn insert_waitlist_entry(&mut self, entry: WaitlistEntry) -> Result<(), RepositoryError> {
        let duplicate = self.state.waitlist.iter().any(|existing| {
            existing.id == entry.id
                || (existing.status == WaitlistStatus::Waiting
                    && entry.status == WaitlistStatus::Waiting
                    && existing.matches_tuple(&entry.listing_id, &entry.user_id, &entry.region))
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        self.state.waitlist.push(entry);
        Ok(())
    }

    fn update_waitlist_entry(&mut self, entry: WaitlistEntry) -> Result<(), RepositoryError> {
        match self
            .state
            .waitlist
            .iter_mut()
            .find(|existing| existing.id == entry.id)
        {
            Some(existing) => {
                *existing = entry;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn payment(
        &self,
        external_session_id: &str,
    ) -> Result<Option<PaymentTransaction>, RepositoryError> {
        Ok(self.state.payments.get(external_session_id).cloned())
    }

    fn insert_payment(&mut self, payment: PaymentTransaction) -> Result<(), RepositoryError> {
        if self.state.payments.contains_key(&payment.external_session_id) {
            return Err(RepositoryError::Conflict);
        }
        self.state
            .payments
            .insert(payment.external_session_id.clone(), payment);
        Ok(())
    }

    fn update_payment(&mut self, payment: PaymentTransaction) -> Result<(), RepositoryError> {
        match self.state.payments.get_mut(&payment.external_session_id) {
            Some(existing) => {
                *existing = payment;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }
}
