use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::claims::ClaimSubmission;
use super::domain::{ClaimRequestId, ListingId, ListingView, RegionCode};
use super::error::OwnershipError;
use super::listings::{ListingImportError, NewListing};
use super::payments::SIGNATURE_HEADER;
use super::repository::{NotificationDispatch, OwnershipStore};
use super::service::OwnershipServices;
use super::tokens::claim_token_ttl;
use super::verification::{normalize_license, validate_license_format};

type SharedServices<S, N> = Arc<OwnershipServices<S, N>>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct IssueTokenRequest {
    listing_id: ListingId,
    #[serde(default)]
    ttl_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ResolveClaimRequest {
    approve: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct LicenseSubmission {
    license_identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WaitlistRequest {
    listing_id: ListingId,
    region: RegionCode,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CheckoutRequest {
    listing_id: ListingId,
    duration_days: u32,
}

/// HTTP surface for claims, verification, featured placement and payment webhooks.
pub fn ownership_router<S, N>(services: SharedServices<S, N>) -> Router
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    Router::new()
        .route("/api/v1/claims", post(submit_claim_handler::<S, N>))
        .route("/api/v1/claims/tokens", post(issue_token_handler::<S, N>))
        .route(
            "/api/v1/claims/tokens/:token/redeem",
            post(redeem_handler::<S, N>),
        )
        .route(
            "/api/v1/admin/claims/:claim_id/resolve",
            post(resolve_claim_handler::<S, N>),
        )
        .route("/api/v1/admin/listings", post(register_listing_handler::<S, N>))
        .route(
            "/api/v1/admin/listings/import",
            post(import_listings_handler::<S, N>),
        )
        .route(
            "/api/v1/admin/listings/:listing_id/unclaim",
            post(force_unclaim_handler::<S, N>),
        )
        .route(
            "/api/v1/admin/listings/:listing_id/verification/approve",
            post(approve_verification_handler::<S, N>),
        )
        .route(
            "/api/v1/admin/listings/:listing_id/verification/reject",
            post(reject_verification_handler::<S, N>),
        )
        .route(
            "/api/v1/listings/:listing_id/verification",
            post(resubmit_verification_handler::<S, N>),
        )
        .route(
            "/api/v1/featured/:region/availability",
            get(availability_handler::<S, N>),
        )
        .route("/api/v1/featured/waitlist", post(join_waitlist_handler::<S, N>))
        .route("/api/v1/featured/checkout", post(checkout_handler::<S, N>))
        .route("/api/v1/webhooks/payments", post(payment_webhook_handler::<S, N>))
        .route("/api/v1/licenses/:raw/validate", get(validate_license_handler))
        .with_state(services)
}

pub(crate) fn status_for(error: &OwnershipError) -> StatusCode {
    match error {
        OwnershipError::NotFound(_) => StatusCode::NOT_FOUND,
        OwnershipError::AlreadyUsed | OwnershipError::Expired => StatusCode::GONE,
        OwnershipError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        OwnershipError::Conflict(_) | OwnershipError::ResourceExhausted(_) => StatusCode::CONFLICT,
        OwnershipError::Forbidden(_) => StatusCode::FORBIDDEN,
        OwnershipError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OwnershipError::UpstreamSignatureInvalid => StatusCode::BAD_REQUEST,
        OwnershipError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: OwnershipError) -> Response {
    let status = status_for(&error);
    let message = match &error {
        OwnershipError::Repository(inner) => {
            error!(error = %inner, "ownership store failure");
            "internal error".to_string()
        }
        other => other.to_string(),
    };
    let payload = json!({
        "error": message,
        "code": error.code(),
    });
    (status, Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, OwnershipError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn issue_token_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Json(request): Json<IssueTokenRequest>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let ttl = match request.ttl_hours.map(claim_token_ttl).transpose() {
        Ok(ttl) => ttl.unwrap_or(services.claim_token_ttl),
        Err(error) => return error_response(error),
    };
    let result = services
        .claims
        .tokens()
        .issue(&caller, &request.listing_id, ttl, Utc::now());
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn redeem_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    match services.claims.redeem_token(&token, &caller, Utc::now()) {
        Ok(redemption) => (StatusCode::OK, Json(redemption)).into_response(),
        Err(OwnershipError::AuthenticationRequired) => {
            // Echo the token so the client can resume after sign-in.
            let payload = json!({
                "error": OwnershipError::AuthenticationRequired.to_string(),
                "code": OwnershipError::AuthenticationRequired.code(),
                "token": token,
            });
            (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submit_claim_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Json(submission): Json<ClaimSubmission>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services.claims.submit_claim(&caller, submission, Utc::now());
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn resolve_claim_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Path(claim_id): Path<String>,
    Json(request): Json<ResolveClaimRequest>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services.claims.resolve(
        &caller,
        &ClaimRequestId(claim_id),
        request.approve,
        Utc::now(),
    );
    respond(StatusCode::OK, result)
}

pub(crate) async fn register_listing_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Json(new_listing): Json<NewListing>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services
        .listings
        .register(&caller, new_listing, Utc::now())
        .map(|listing| ListingView::from(&listing));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn import_listings_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    match services.listings.import_csv(&caller, body.as_ref(), Utc::now()) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(ListingImportError::Ownership(error)) => error_response(error),
        Err(ListingImportError::Csv(error)) => {
            let payload = json!({
                "error": format!("invalid listing CSV data: {error}"),
                "code": "validation_error",
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
        }
        Err(other) => {
            error!(error = %other, "listing import failed");
            let payload = json!({ "error": "internal error", "code": "internal" });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn force_unclaim_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Path(listing_id): Path<String>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services
        .claims
        .force_unclaim(&caller, &ListingId(listing_id))
        .map(|listing| ListingView::from(&listing));
    respond(StatusCode::OK, result)
}

pub(crate) async fn approve_verification_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Path(listing_id): Path<String>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services
        .verification
        .approve(&caller, &ListingId(listing_id))
        .map(|listing| ListingView::from(&listing));
    respond(StatusCode::OK, result)
}

pub(crate) async fn reject_verification_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Path(listing_id): Path<String>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services
        .verification
        .reject(&caller, &ListingId(listing_id))
        .map(|listing| ListingView::from(&listing));
    respond(StatusCode::OK, result)
}

pub(crate) async fn resubmit_verification_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Path(listing_id): Path<String>,
    Json(submission): Json<LicenseSubmission>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services
        .verification
        .resubmit(&caller, &ListingId(listing_id), &submission.license_identifier)
        .map(|listing| ListingView::from(&listing));
    respond(StatusCode::ACCEPTED, result)
}

pub(crate) async fn availability_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    Path(region): Path<String>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let Some(region) = RegionCode::parse(&region) else {
        return error_response(OwnershipError::Validation(format!(
            "'{region}' is not a valid region code"
        )));
    };
    let result = services.featured.check_availability(&region, Utc::now());
    respond(StatusCode::OK, result)
}

pub(crate) async fn join_waitlist_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Json(request): Json<WaitlistRequest>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services.featured.join_waitlist(
        &caller,
        &request.listing_id,
        &request.region,
        Utc::now(),
    );
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn checkout_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let caller = services.identity.identify(&headers);
    let result = services.featured.prepare_checkout(
        &caller,
        &request.listing_id,
        request.duration_days,
        Utc::now(),
    );
    respond(StatusCode::OK, result)
}

pub(crate) async fn payment_webhook_handler<S, N>(
    State(services): State<SharedServices<S, N>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: OwnershipStore + 'static,
    N: NotificationDispatch + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let result = services
        .payments
        .handle_webhook(signature, body.as_ref(), Utc::now());
    respond(StatusCode::OK, result)
}

pub(crate) async fn validate_license_handler(Path(raw): Path<String>) -> Response {
    let payload = json!({
        "valid": validate_license_format(&raw),
        "normalized": normalize_license(&raw),
    });
    (StatusCode::OK, Json(payload)).into_response()
}
