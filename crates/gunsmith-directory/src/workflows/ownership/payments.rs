use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::domain::{ListingId, PaymentStatus, PaymentTransaction, UserId};
use super::error::OwnershipError;
use super::featured::validate_duration;
use super::repository::{
    publish, FeaturedPatch, ListingPatch, ListingPredicate, NotificationDispatch, OwnershipEvent,
    OwnershipStore, RepositoryError,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "payment-signature";
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";

/// A captured payment as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub external_session_id: String,
    pub payment_intent: Option<String>,
    pub listing_id: ListingId,
    pub user_id: UserId,
    pub duration_days: u32,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationOutcome {
    /// `false` when the session had already been applied.
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub event_type: String,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_until: Option<DateTime<Utc>>,
}

/// Inbound notification body. Only the fields below are trusted, and only
/// after the signature has been checked.
#[derive(Debug, Clone, Deserialize)]
struct PaymentEvent {
    event_type: String,
    session: CheckoutSession,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl CheckoutSession {
    fn metadata_field(&self, name: &str) -> Result<&str, OwnershipError> {
        self.metadata
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                OwnershipError::validation(format!("session metadata is missing {name}"))
            })
    }

    fn confirmation(&self) -> Result<PaymentConfirmation, OwnershipError> {
        let duration_days = self
            .metadata_field("duration_days")?
            .parse::<u32>()
            .map_err(|_| {
                OwnershipError::validation("session metadata duration_days is not a number")
            })?;

        Ok(PaymentConfirmation {
            external_session_id: self.id.clone(),
            payment_intent: self.payment_intent.clone(),
            listing_id: ListingId(self.metadata_field("listing_id")?.to_string()),
            user_id: UserId(self.metadata_field("user_id")?.to_string()),
            duration_days,
            amount_cents: self.amount_total.unwrap_or_default(),
        })
    }
}

/// Render a `t=<unix>,v1=<hex>` signature header for `body`.
pub fn sign_payload(secret: &[u8], timestamp: i64, body: &[u8]) -> Result<String, OwnershipError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| OwnershipError::validation("webhook secret is unusable"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check a signature header against `body`. Any parse failure, stale
/// timestamp or digest mismatch is reported as an invalid signature.
pub fn verify_signature(
    secret: &[u8],
    header: &str,
    body: &[u8],
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), OwnershipError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(OwnershipError::UpstreamSignatureInvalid)?;
    let skew = now
        .timestamp()
        .checked_sub(timestamp)
        .and_then(i64::checked_abs)
        .ok_or(OwnershipError::UpstreamSignatureInvalid)?;
    if skew > tolerance.num_seconds() {
        return Err(OwnershipError::UpstreamSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| OwnershipError::UpstreamSignatureInvalid)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    let matched = candidates.into_iter().any(|candidate| {
        hex::decode(candidate)
            .map(|digest| mac.clone().verify_slice(&digest).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(OwnershipError::UpstreamSignatureInvalid)
    }
}

/// Applies processor confirmations exactly once per checkout session.
pub struct PaymentConfirmationHandler<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    secret: Vec<u8>,
    tolerance: Duration,
}

impl<S, N> PaymentConfirmationHandler<S, N>
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        secret: impl Into<Vec<u8>>,
        tolerance: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            secret: secret.into(),
            tolerance,
        }
    }

    /// Entry point for the webhook route: authenticate, decode, dispatch.
    pub fn handle_webhook(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, OwnershipError> {
        let header = signature_header.ok_or(OwnershipError::UpstreamSignatureInvalid)?;
        if let Err(error) = verify_signature(&self.secret, header, body, self.tolerance, now) {
            warn!("rejected payment notification with invalid signature");
            return Err(error);
        }

        let event: PaymentEvent = serde_json::from_slice(body)
            .map_err(|err| OwnershipError::validation(format!("malformed payment event: {err}")))?;

        let (applied, featured_until) = match event.event_type.as_str() {
            CHECKOUT_COMPLETED => {
                let outcome = self.apply_confirmation(event.session.confirmation()?, now)?;
                (outcome.applied, outcome.featured_until)
            }
            CHECKOUT_PAYMENT_FAILED => {
                self.record_failure(event.session.confirmation()?, now)?;
                (false, None)
            }
            other => {
                debug!(event_type = other, "ignoring payment event");
                (false, None)
            }
        };

        Ok(WebhookOutcome {
            event_type: event.event_type,
            applied,
            featured_until,
        })
    }

    /// Grant or extend featured status for a paid session. The placement runs
    /// `duration_days` from `now`, replacing any window still in force.
    ///
    /// A session already recorded as completed is a no-op. The listing write is
    /// scoped to the paying owner and commits together with the ledger row; if
    /// either fails neither is kept, so the processor's retry can apply cleanly.
    pub fn apply_confirmation(
        &self,
        confirmation: PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationOutcome, OwnershipError> {
        validate_duration(confirmation.duration_days)?;
        if confirmation.amount_cents < 0 {
            return Err(OwnershipError::validation("amount must not be negative"));
        }

        let result = self
            .store
            .transaction(|tx| -> Result<ConfirmationOutcome, OwnershipError> {
                let existing = tx.payment(&confirmation.external_session_id)?;
                if let Some(previous) = &existing {
                    if previous.status == PaymentStatus::Completed {
                        return Ok(ConfirmationOutcome {
                            applied: false,
                            featured_until: previous.featured_until_computed,
                        });
                    }
                }

                let listing = tx
                    .listing(&confirmation.listing_id)?
                    .ok_or(OwnershipError::NotFound("listing"))?;
                let featured_until = now
                    .checked_add_signed(Duration::days(i64::from(confirmation.duration_days)))
                    .ok_or_else(|| OwnershipError::validation("featured window is out of range"))?;

                let update = tx.update_listing_if(
                    &confirmation.listing_id,
                    &ListingPredicate::owned_by(confirmation.user_id.clone()),
                    &ListingPatch::featured(FeaturedPatch::Activate {
                        region: listing.region.clone(),
                        until: featured_until,
                    }),
                )?;
                if !update.applied {
                    return Err(OwnershipError::conflict(
                        "listing is not owned by the paying account",
                    ));
                }

                let row = PaymentTransaction {
                    external_session_id: confirmation.external_session_id.clone(),
                    payment_intent: confirmation.payment_intent.clone(),
                    listing_id: confirmation.listing_id.clone(),
                    user_id: confirmation.user_id.clone(),
                    amount_cents: confirmation.amount_cents,
                    duration_days: confirmation.duration_days,
                    featured_until_computed: Some(featured_until),
                    status: PaymentStatus::Completed,
                    recorded_at: now,
                };
                if existing.is_some() {
                    tx.update_payment(row)?;
                } else {
                    tx.insert_payment(row)?;
                }

                Ok(ConfirmationOutcome {
                    applied: true,
                    featured_until: Some(featured_until),
                })
            });

        let outcome = match result {
            // A concurrent delivery of the same session won the unique-key race.
            Err(OwnershipError::Repository(RepositoryError::Conflict)) => {
                let recorded = self
                    .store
                    .transaction(|tx| tx.payment(&confirmation.external_session_id))?;
                ConfirmationOutcome {
                    applied: false,
                    featured_until: recorded.and_then(|row| row.featured_until_computed),
                }
            }
            other => other?,
        };

        if outcome.applied {
            if let Some(featured_until) = outcome.featured_until {
                info!(
                    session = %confirmation.external_session_id,
                    listing_id = %confirmation.listing_id,
                    %featured_until,
                    "featured placement activated"
                );
                let region = self
                    .store
                    .listing(&confirmation.listing_id)?
                    .map(|listing| listing.region);
                if let Some(region) = region {
                    publish(
                        self.notifier.as_ref(),
                        OwnershipEvent::FeaturedActivated {
                            listing_id: confirmation.listing_id.clone(),
                            region,
                            featured_until,
                        },
                    );
                }
            }
        } else {
            debug!(
                session = %confirmation.external_session_id,
                "duplicate payment confirmation ignored"
            );
        }
        Ok(outcome)
    }

    /// Ledger a failed payment for audit. Never touches the listing, and never
    /// overwrites an existing row.
    pub fn record_failure(
        &self,
        confirmation: PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<bool, OwnershipError> {
        let recorded = self
            .store
            .transaction(|tx| -> Result<bool, OwnershipError> {
                if tx.payment(&confirmation.external_session_id)?.is_some() {
                    return Ok(false);
                }
                tx.insert_payment(PaymentTransaction {
                    external_session_id: confirmation.external_session_id.clone(),
                    payment_intent: confirmation.payment_intent.clone(),
                    listing_id: confirmation.listing_id.clone(),
                    user_id: confirmation.user_id.clone(),
                    amount_cents: confirmation.amount_cents,
                    duration_days: confirmation.duration_days,
                    featured_until_computed: None,
                    status: PaymentStatus::Failed,
                    recorded_at: now,
                })?;
                Ok(true)
            })?;

        if recorded {
            info!(session = %confirmation.external_session_id, "failed payment recorded");
        }
        Ok(recorded)
    }
}
