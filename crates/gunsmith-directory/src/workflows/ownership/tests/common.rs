use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::config::OwnershipConfig;
use crate::workflows::ownership::domain::{
    ClaimRequest, ClaimRequestId, ClaimToken, Listing, ListingId, PaymentTransaction, RegionCode,
    UserId, WaitlistEntry,
};
use crate::workflows::ownership::identity::CallerIdentity;
use crate::workflows::ownership::memory::InMemoryOwnershipStore;
use crate::workflows::ownership::repository::{
    ConditionalUpdate, DispatchError, ListingPatch, ListingPredicate, NotificationDispatch,
    OwnershipEvent, OwnershipStore, RepositoryError, StoreTransaction,
};
use crate::workflows::ownership::service::OwnershipServices;

pub(super) const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn region(code: &str) -> RegionCode {
    RegionCode::parse(code).expect("valid region")
}

pub(super) fn admin() -> CallerIdentity {
    CallerIdentity::administrator("admin-1")
}

pub(super) fn member(id: &str) -> CallerIdentity {
    CallerIdentity::member(id)
}

pub(super) fn listing(id: &str, region_code: &str) -> Listing {
    Listing::unclaimed(
        ListingId(id.to_string()),
        id.to_ascii_lowercase(),
        format!("{id} Gunworks"),
        region(region_code),
        now() - Duration::days(90),
    )
}

pub(super) fn owned_listing(id: &str, region_code: &str, owner: &str) -> Listing {
    let mut listing = listing(id, region_code);
    listing.owner_id = Some(UserId(owner.to_string()));
    listing
}

pub(super) fn featured_listing(
    id: &str,
    region_code: &str,
    owner: &str,
    until: Option<DateTime<Utc>>,
) -> Listing {
    let mut listing = owned_listing(id, region_code, owner);
    listing.is_featured = true;
    listing.featured_region = Some(region(region_code));
    listing.featured_until = until;
    listing
}

pub(super) fn ownership_config() -> OwnershipConfig {
    OwnershipConfig {
        webhook_secret: WEBHOOK_SECRET.to_string(),
        ..OwnershipConfig::default()
    }
}

#[derive(Default, Clone)]
pub(super) struct RecordingNotifier {
    events: Arc<Mutex<Vec<OwnershipEvent>>>,
}

impl RecordingNotifier {
    pub(super) fn events(&self) -> Vec<OwnershipEvent> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(OwnershipEvent::kind).collect()
    }
}

impl NotificationDispatch for RecordingNotifier {
    fn notify(&self, event: OwnershipEvent) -> Result<(), DispatchError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(event);
        Ok(())
    }
}

/// Dispatcher whose transport is always down.
pub(super) struct FailingNotifier;

impl NotificationDispatch for FailingNotifier {
    fn notify(&self, _event: OwnershipEvent) -> Result<(), DispatchError> {
        Err(DispatchError::Transport("smtp relay offline".to_string()))
    }
}

pub(super) fn store_with(listings: Vec<Listing>) -> Arc<InMemoryOwnershipStore> {
    let store = Arc::new(InMemoryOwnershipStore::new());
    for listing in listings {
        store.seed_listing(listing).expect("seed listing");
    }
    store
}

pub(super) fn build_services(
    listings: Vec<Listing>,
) -> (
    OwnershipServices<InMemoryOwnershipStore, RecordingNotifier>,
    Arc<InMemoryOwnershipStore>,
    Arc<RecordingNotifier>,
) {
    let store = store_with(listings);
    let notifier = Arc::new(RecordingNotifier::default());
    let services = OwnershipServices::new(store.clone(), notifier.clone(), &ownership_config());
    (services, store, notifier)
}

pub(super) fn stored(store: &InMemoryOwnershipStore, id: &str) -> Listing {
    store
        .listing(&ListingId(id.to_string()))
        .expect("store readable")
        .expect("listing present")
}

/// Holds every caller at the first listing read until `parties` callers have
/// arrived, forcing concurrent requests to interleave at the worst point.
pub(super) struct RendezvousStore {
    inner: InMemoryOwnershipStore,
    barrier: Barrier,
}

impl RendezvousStore {
    pub(super) fn new(inner: InMemoryOwnershipStore, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
        }
    }
}

impl OwnershipStore for RendezvousStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.transaction(work)
    }

    fn listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError> {
        let listing = self.inner.listing(id)?;
        self.barrier.wait();
        Ok(listing)
    }

    fn regions(&self) -> Result<Vec<RegionCode>, RepositoryError> {
        self.inner.regions()
    }
}

/// Lets the first `parties` transactions read the payment ledger as it stood
/// before any of them started, as concurrent deliveries on separate database
/// connections would. Unique session ids are still enforced by the inner store.
pub(super) struct StaleLedgerStore {
    inner: InMemoryOwnershipStore,
    barrier: Barrier,
    parties: usize,
    arrivals: AtomicUsize,
}

impl StaleLedgerStore {
    pub(super) fn new(inner: InMemoryOwnershipStore, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            parties,
            arrivals: AtomicUsize::new(0),
        }
    }
}

impl OwnershipStore for StaleLedgerStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        if self.arrivals.fetch_add(1, Ordering::SeqCst) >= self.parties {
            return self.inner.transaction(work);
        }

        let payments: HashMap<String, PaymentTransaction> = self
            .inner
            .payments()?
            .into_iter()
            .map(|row| (row.external_session_id.clone(), row))
            .collect();
        self.barrier.wait();
        self.inner.transaction(|tx: &mut dyn StoreTransaction| {
            let mut stale = StaleLedgerTransaction {
                inner: tx,
                payments,
            };
            work(&mut stale)
        })
    }

    fn regions(&self) -> Result<Vec<RegionCode>, RepositoryError> {
        self.inner.regions()
    }
}

struct StaleLedgerTransaction<'a> {
    inner: &'a mut dyn StoreTransaction,
    payments: HashMap<String, PaymentTransaction>,
}

impl StoreTransaction for StaleLedgerTransaction<'_> {
    fn listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError> {
        self.inner.listing(id)
    }

    fn insert_listing(&mut self, listing: Listing) -> Result<(), RepositoryError> {
        self.inner.insert_listing(listing)
    }

    fn update_listing_if(
        &mut self,
        id: &ListingId,
        predicate: &ListingPredicate,
        patch: &ListingPatch,
    ) -> Result<ConditionalUpdate, RepositoryError> {
        self.inner.update_listing_if(id, predicate, patch)
    }

    fn featured_in_region(&self, region: &RegionCode) -> Result<Vec<Listing>, RepositoryError> {
        self.inner.featured_in_region(region)
    }

    fn claim_token(&self, token: &str) -> Result<Option<ClaimToken>, RepositoryError> {
        self.inner.claim_token(token)
    }

    fn insert_claim_token(&mut self, token: ClaimToken) -> Result<(), RepositoryError> {
        self.inner.insert_claim_token(token)
    }

    fn mark_token_used(
        &mut self,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner.mark_token_used(token, used_at)
    }

    fn claim_request(&self, id: &ClaimRequestId) -> Result<Option<ClaimRequest>, RepositoryError> {
        self.inner.claim_request(id)
    }

    fn claim_requests_for_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ClaimRequest>, RepositoryError> {
        self.inner.claim_requests_for_listing(listing_id)
    }

    fn insert_claim_request(&mut self, request: ClaimRequest) -> Result<(), RepositoryError> {
        self.inner.insert_claim_request(request)
    }

    fn update_claim_request(&mut self, request: ClaimRequest) -> Result<(), RepositoryError> {
        self.inner.update_claim_request(request)
    }

    fn waitlist(&self, region: &RegionCode) -> Result<Vec<WaitlistEntry>, RepositoryError> {
        self.inner.waitlist(region)
    }

    fn insert_waitlist_entry(&mut self, entry: WaitlistEntry) -> Result<(), RepositoryError> {
        self.inner.insert_waitlist_entry(entry)
    }

    fn update_waitlist_entry(&mut self, entry: WaitlistEntry) -> Result<(), RepositoryError> {
        self.inner.update_waitlist_entry(entry)
    }

    fn payment(
        &self,
        external_session_id: &str,
    ) -> Result<Option<PaymentTransaction>, RepositoryError> {
        Ok(self.payments.get(external_session_id).cloned())
    }

    fn insert_payment(&mut self, payment: PaymentTransaction) -> Result<(), RepositoryError> {
        self.inner.insert_payment(payment)
    }

    fn update_payment(&mut self, payment: PaymentTransaction) -> Result<(), RepositoryError> {
        self.inner.update_payment(payment)
    }
}

/// Store whose backend is unreachable.
pub(super) struct UnavailableStore;

impl OwnershipStore for UnavailableStore {
    fn transaction<T, E, F>(&self, _work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        Err(RepositoryError::Unavailable("database offline at 10.0.4.2".to_string()).into())
    }

    fn regions(&self) -> Result<Vec<RegionCode>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline at 10.0.4.2".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
