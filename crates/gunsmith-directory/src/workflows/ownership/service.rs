use std::sync::Arc;

use chrono::Duration;

use super::claims::ClaimWorkflow;
use super::featured::FeaturedSlotAllocator;
use super::identity::{HeaderIdentityGateway, IdentityGateway};
use super::listings::ListingRegistry;
use super::payments::PaymentConfirmationHandler;
use super::repository::{NotificationDispatch, OwnershipStore};
use super::verification::VerificationEngine;
use crate::config::OwnershipConfig;

/// Every ownership workflow wired to one store and one outbox.
pub struct OwnershipServices<S, N> {
    pub claims: ClaimWorkflow<S, N>,
    pub verification: VerificationEngine<S, N>,
    pub featured: FeaturedSlotAllocator<S, N>,
    pub payments: PaymentConfirmationHandler<S, N>,
    pub listings: ListingRegistry<S>,
    pub identity: Arc<dyn IdentityGateway>,
    pub claim_token_ttl: Duration,
}

impl<S, N> OwnershipServices<S, N>
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: &OwnershipConfig) -> Self {
        Self::with_identity(store, notifier, config, Arc::new(HeaderIdentityGateway))
    }

    pub fn with_identity(
        store: Arc<S>,
        notifier: Arc<N>,
        config: &OwnershipConfig,
        identity: Arc<dyn IdentityGateway>,
    ) -> Self {
        Self {
            claims: ClaimWorkflow::new(store.clone(), notifier.clone()),
            verification: VerificationEngine::new(store.clone(), notifier.clone()),
            featured: FeaturedSlotAllocator::new(
                store.clone(),
                notifier.clone(),
                config.featured_price_cents_per_30_days,
                config.waitlist_notification_window(),
            ),
            payments: PaymentConfirmationHandler::new(
                store.clone(),
                notifier,
                config.webhook_secret.as_bytes(),
                config.signature_tolerance(),
            ),
            listings: ListingRegistry::new(store),
            identity,
            claim_token_ttl: config.claim_token_ttl(),
        }
    }
}
