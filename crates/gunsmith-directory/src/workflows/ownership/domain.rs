use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, immutable identifier of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub String);

/// Account identifier as resolved by the identity gateway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimRequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitlistEntryId(pub String);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ClaimRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper-case region code (US state or territory abbreviation, e.g. `TX`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

impl RegionCode {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let valid = (2..=8).contains(&trimmed.len())
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RegionCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("'{value}' is not a valid region code"))
    }
}

impl From<RegionCode> for String {
    fn from(value: RegionCode) -> Self {
        value.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trust badge lifecycle: `unverified -> pending -> {verified, rejected}`, `rejected -> pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

/// Directory entry, limited to the fields this subsystem owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub slug: String,
    pub name: String,
    pub region: RegionCode,
    pub owner_id: Option<UserId>,
    pub verification_status: VerificationStatus,
    pub license_identifier: Option<String>,
    pub is_featured: bool,
    pub featured_region: Option<RegionCode>,
    pub featured_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn unclaimed(
        id: ListingId,
        slug: impl Into<String>,
        name: impl Into<String>,
        region: RegionCode,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            slug: slug.into(),
            name: name.into(),
            region,
            owner_id: None,
            verification_status: VerificationStatus::Unverified,
            license_identifier: None,
            is_featured: false,
            featured_region: None,
            featured_until: None,
            created_at,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owner_id.is_some()
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        self.owner_id.as_ref() == Some(user_id)
    }

    /// Timed featured state still running at `now`. Legacy rows without an
    /// expiry are not considered active here.
    pub fn is_actively_featured(&self, now: DateTime<Utc>) -> bool {
        self.is_featured && self.featured_until.is_some_and(|until| until > now)
    }
}

/// Public projection of a listing; never exposes the owner's account id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingView {
    pub id: ListingId,
    pub slug: String,
    pub name: String,
    pub region: RegionCode,
    pub claimed: bool,
    pub verification_status: VerificationStatus,
    pub is_featured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_until: Option<DateTime<Utc>>,
}

impl From<&Listing> for ListingView {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id.clone(),
            slug: listing.slug.clone(),
            name: listing.name.clone(),
            region: listing.region.clone(),
            claimed: listing.is_owned(),
            verification_status: listing.verification_status,
            is_featured: listing.is_featured,
            featured_until: listing.featured_until,
        }
    }
}

/// Single-use credential binding a listing to a redemption. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimToken {
    pub token: String,
    pub listing_id: ListingId,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ClaimToken {
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
}

impl ClaimStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
        }
    }
}

/// Manual review case opened when the claimant has no token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub id: ClaimRequestId,
    pub listing_id: ListingId,
    pub claimant_id: UserId,
    pub license_identifier: Option<String>,
    pub supporting_document_ref: Option<String>,
    pub status: ClaimStatus,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Waiting,
    Notified,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: WaitlistEntryId,
    pub listing_id: ListingId,
    pub user_id: UserId,
    pub region: RegionCode,
    pub status: WaitlistStatus,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
}

impl WaitlistEntry {
    pub fn matches_tuple(
        &self,
        listing_id: &ListingId,
        user_id: &UserId,
        region: &RegionCode,
    ) -> bool {
        &self.listing_id == listing_id && &self.user_id == user_id && &self.region == region
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Failed,
}

/// Append-only ledger row keyed by the processor's checkout session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub external_session_id: String,
    pub payment_intent: Option<String>,
    pub listing_id: ListingId,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub duration_days: u32,
    pub featured_until_computed: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
    pub recorded_at: DateTime<Utc>,
}
