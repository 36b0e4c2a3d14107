use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::domain::{
    Listing, ListingId, RegionCode, UserId, WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};
use super::error::OwnershipError;
use super::identity::CallerIdentity;
use super::repository::{
    publish, FeaturedPatch, ListingPatch, ListingPredicate, NotificationDispatch, OwnershipEvent,
    OwnershipStore, RepositoryError, StoreTransaction,
};

/// Concurrently active featured placements allowed per region.
pub const FEATURED_SLOTS_PER_REGION: usize = 3;

pub const MAX_FEATURED_DURATION_DAYS: u32 = 365;

const BILLING_BLOCK_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeaturedAvailability {
    pub region: RegionCode,
    pub available: usize,
    pub total: usize,
    pub current: usize,
    /// Active placements beyond the cap, awaiting administrator reconciliation.
    #[serde(skip_serializing_if = "is_zero")]
    pub oversubscribed: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// Metadata the payment processor must echo back on the confirmation webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutMetadata {
    pub listing_id: ListingId,
    pub user_id: UserId,
    pub duration_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutQuote {
    pub region: RegionCode,
    pub amount_cents: i64,
    pub extends_current_placement: bool,
    pub metadata: CheckoutMetadata,
}

/// What one scheduler pass changed in a region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_listings: Vec<ListingId>,
    pub notified_entries: Vec<WaitlistEntryId>,
    pub lapsed_entries: Vec<WaitlistEntryId>,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.expired_listings.extend(other.expired_listings);
        self.notified_entries.extend(other.notified_entries);
        self.lapsed_entries.extend(other.lapsed_entries);
    }
}

/// Counts active placements. Listings carrying an expiry are authoritative;
/// the bare boolean is only consulted for regions that have no expiry data at
/// all. The two are never added together.
pub(crate) fn count_active(listings: &[Listing], now: DateTime<Utc>) -> usize {
    let featured: Vec<&Listing> = listings.iter().filter(|listing| listing.is_featured).collect();
    let has_expiry_data = featured.iter().any(|listing| listing.featured_until.is_some());
    if has_expiry_data {
        featured
            .iter()
            .filter(|listing| listing.is_actively_featured(now))
            .count()
    } else {
        featured.len()
    }
}

fn availability_in(
    tx: &dyn StoreTransaction,
    region: &RegionCode,
    now: DateTime<Utc>,
) -> Result<FeaturedAvailability, RepositoryError> {
    let listings = tx.featured_in_region(region)?;
    let active = count_active(&listings, now);
    let current = active.min(FEATURED_SLOTS_PER_REGION);
    Ok(FeaturedAvailability {
        region: region.clone(),
        available: FEATURED_SLOTS_PER_REGION - current,
        total: FEATURED_SLOTS_PER_REGION,
        current,
        oversubscribed: active.saturating_sub(FEATURED_SLOTS_PER_REGION),
    })
}

/// Enforces the regional featured cap and manages the waitlist.
pub struct FeaturedSlotAllocator<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    price_cents_per_block: i64,
    notification_window: Duration,
}

impl<S, N> FeaturedSlotAllocator<S, N>
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        price_cents_per_block: i64,
        notification_window: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            price_cents_per_block,
            notification_window,
        }
    }

    pub fn check_availability(
        &self,
        region: &RegionCode,
        now: DateTime<Utc>,
    ) -> Result<FeaturedAvailability, OwnershipError> {
        let availability = self
            .store
            .transaction(|tx| availability_in(&*tx, region, now))?;
        if availability.oversubscribed > 0 {
            warn!(
                region = %region,
                oversubscribed = availability.oversubscribed,
                "featured placements exceed the regional cap"
            );
        }
        Ok(availability)
    }

    /// Queue `listing_id` for the next free slot in `region`. The caller must own it.
    pub fn join_waitlist(
        &self,
        caller: &CallerIdentity,
        listing_id: &ListingId,
        region: &RegionCode,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, OwnershipError> {
        let principal = caller.require_authenticated()?;
        let entry = WaitlistEntry {
            id: WaitlistEntryId(format!("wl-{}", Uuid::new_v4().simple())),
            listing_id: listing_id.clone(),
            user_id: principal.id.clone(),
            region: region.clone(),
            status: WaitlistStatus::Waiting,
            created_at: now,
            notified_at: None,
        };

        self.store
            .transaction(|tx| -> Result<(), OwnershipError> {
                let listing = tx
                    .listing(listing_id)?
                    .ok_or(OwnershipError::NotFound("listing"))?;
                if !listing.is_owned_by(&principal.id) {
                    return Err(OwnershipError::Forbidden("caller does not own this listing"));
                }
                match tx.insert_waitlist_entry(entry.clone()) {
                    Err(RepositoryError::Conflict) => Err(OwnershipError::conflict(
                        "listing is already on the waitlist for this region",
                    )),
                    other => Ok(other?),
                }
            })?;

        info!(listing_id = %listing_id, region = %region, "listing joined featured waitlist");
        publish(
            self.notifier.as_ref(),
            OwnershipEvent::WaitlistJoined {
                entry_id: entry.id.clone(),
                listing_id: listing_id.clone(),
                region: region.clone(),
            },
        );
        Ok(entry)
    }

    /// Price a featured purchase and check capacity before sending the owner to
    /// checkout. The check is optimistic; confirmation does not re-check the cap.
    pub fn prepare_checkout(
        &self,
        caller: &CallerIdentity,
        listing_id: &ListingId,
        duration_days: u32,
        now: DateTime<Utc>,
    ) -> Result<CheckoutQuote, OwnershipError> {
        let principal = caller.require_authenticated()?;
        validate_duration(duration_days)?;

        let (listing, availability) = self
            .store
            .transaction(|tx| -> Result<(Listing, FeaturedAvailability), OwnershipError> {
                let listing = tx
                    .listing(listing_id)?
                    .ok_or(OwnershipError::NotFound("listing"))?;
                let availability = availability_in(&*tx, &listing.region, now)?;
                Ok((listing, availability))
            })?;

        if !listing.is_owned_by(&principal.id) {
            return Err(OwnershipError::Forbidden("caller does not own this listing"));
        }

        let extends_current_placement = listing.is_actively_featured(now)
            && listing.featured_region.as_ref() == Some(&listing.region);
        if !extends_current_placement && availability.available == 0 {
            return Err(OwnershipError::ResourceExhausted(format!(
                "no featured slots available in {}; join the waitlist to be notified",
                listing.region
            )));
        }

        let blocks = i64::from(duration_days.div_ceil(BILLING_BLOCK_DAYS));
        Ok(CheckoutQuote {
            region: listing.region.clone(),
            amount_cents: blocks * self.price_cents_per_block,
            extends_current_placement,
            metadata: CheckoutMetadata {
                listing_id: listing.id,
                user_id: principal.id.clone(),
                duration_days,
            },
        })
    }

    /// Clear featured state on listings whose window has elapsed.
    pub fn release_expired(
        &self,
        region: &RegionCode,
        now: DateTime<Utc>,
    ) -> Result<Vec<ListingId>, OwnershipError> {
        let released = self
            .store
            .transaction(|tx| -> Result<Vec<ListingId>, OwnershipError> {
                let mut released = Vec::new();
                for listing in tx.featured_in_region(region)? {
                    let elapsed = listing.is_featured
                        && listing.featured_until.is_some_and(|until| until <= now);
                    if !elapsed {
                        continue;
                    }
                    let update = tx.update_listing_if(
                        &listing.id,
                        &ListingPredicate::any(),
                        &ListingPatch::featured(FeaturedPatch::Clear),
                    )?;
                    if update.applied {
                        released.push(listing.id);
                    }
                }
                Ok(released)
            })?;

        for listing_id in &released {
            info!(listing_id = %listing_id, region = %region, "featured placement expired");
            publish(
                self.notifier.as_ref(),
                OwnershipEvent::FeaturedExpired {
                    listing_id: listing_id.clone(),
                    region: region.clone(),
                },
            );
        }
        Ok(released)
    }

    /// Lapse stale notifications, then notify the oldest waiting entries for
    /// each free slot not already promised to an outstanding notification.
    pub fn promote_waitlist(
        &self,
        region: &RegionCode,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, OwnershipError> {
        let window = self.notification_window;
        let (report, notified) = self
            .store
            .transaction(|tx| -> Result<(SweepReport, Vec<WaitlistEntry>), OwnershipError> {
                let mut report = SweepReport::default();
                let mut outstanding = 0usize;
                let mut waiting = Vec::new();

                for mut entry in tx.waitlist(region)? {
                    match entry.status {
                        WaitlistStatus::Notified => {
                            let lapsed = entry
                                .notified_at
                                .map_or(true, |notified_at| notified_at + window <= now);
                            if lapsed {
                                entry.status = WaitlistStatus::Expired;
                                report.lapsed_entries.push(entry.id.clone());
                                tx.update_waitlist_entry(entry)?;
                            } else {
                                outstanding += 1;
                            }
                        }
                        WaitlistStatus::Waiting => waiting.push(entry),
                        WaitlistStatus::Expired => {}
                    }
                }

                let availability = availability_in(&*tx, region, now)?;
                let openings = availability.available.saturating_sub(outstanding);
                let mut notified = Vec::new();
                for mut entry in waiting.into_iter().take(openings) {
                    entry.status = WaitlistStatus::Notified;
                    entry.notified_at = Some(now);
                    report.notified_entries.push(entry.id.clone());
                    tx.update_waitlist_entry(entry.clone())?;
                    notified.push(entry);
                }
                Ok((report, notified))
            })?;

        for entry in notified {
            info!(
                listing_id = %entry.listing_id,
                region = %region,
                "featured slot offered to waitlist"
            );
            publish(
                self.notifier.as_ref(),
                OwnershipEvent::WaitlistSlotOpened {
                    entry_id: entry.id,
                    listing_id: entry.listing_id,
                    user_id: entry.user_id,
                    region: region.clone(),
                },
            );
        }
        Ok(report)
    }

    /// One scheduler pass over every known region.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, OwnershipError> {
        let mut report = SweepReport::default();
        for region in self.store.regions()? {
            let expired_listings = self.release_expired(&region, now)?;
            report.absorb(SweepReport {
                expired_listings,
                ..SweepReport::default()
            });
            report.absorb(self.promote_waitlist(&region, now)?);
        }
        Ok(report)
    }
}

pub(crate) fn validate_duration(duration_days: u32) -> Result<(), OwnershipError> {
    if duration_days == 0 || duration_days > MAX_FEATURED_DURATION_DAYS {
        return Err(OwnershipError::validation(format!(
            "duration_days must be between 1 and {MAX_FEATURED_DURATION_DAYS}"
        )));
    }
    Ok(())
}
