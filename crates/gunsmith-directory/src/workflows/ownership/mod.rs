//! Listing ownership lifecycle: claim tokens, reviewed claim requests,
//! license verification, regional featured placement and payment
//! confirmation.
//!
//! Every operation takes the caller identity and the current time explicitly.
//! Persistence sits behind [`OwnershipStore`], outbound mail behind
//! [`NotificationDispatch`].

pub mod claims;
pub mod domain;
pub mod error;
pub mod featured;
pub mod identity;
pub mod listings;
pub mod memory;
pub mod outbox;
pub mod payments;
pub mod repository;
pub mod router;
pub mod service;
pub mod tokens;
pub mod verification;

#[cfg(test)]
mod tests;

pub use claims::{ClaimSubmission, ClaimWorkflow};
pub use domain::{
    ClaimRequest, ClaimRequestId, ClaimStatus, ClaimToken, Listing, ListingId, ListingView,
    PaymentStatus, PaymentTransaction, RegionCode, UserId, VerificationStatus, WaitlistEntry,
    WaitlistEntryId, WaitlistStatus,
};
pub use error::OwnershipError;
pub use featured::{
    CheckoutQuote, FeaturedAvailability, FeaturedSlotAllocator, SweepReport,
    FEATURED_SLOTS_PER_REGION, MAX_FEATURED_DURATION_DAYS,
};
pub use identity::{CallerIdentity, HeaderIdentityGateway, IdentityGateway, Principal, Role};
pub use listings::{ImportReport, ListingImportError, ListingRegistry, NewListing};
pub use memory::InMemoryOwnershipStore;
pub use outbox::{drain_outbox, ChannelNotifier};
pub use payments::{
    sign_payload, verify_signature, PaymentConfirmation, PaymentConfirmationHandler,
    WebhookOutcome, SIGNATURE_HEADER,
};
pub use repository::{
    DispatchError, NotificationDispatch, OwnershipEvent, OwnershipStore, RepositoryError,
    StoreTransaction,
};
pub use router::ownership_router;
pub use service::OwnershipServices;
pub use tokens::{
    claim_token_ttl, Redemption, RedemptionOutcome, TokenIssuer, MAX_CLAIM_TOKEN_TTL_HOURS,
};
pub use verification::{normalize_license, validate_license_format, VerificationEngine};
