use crate::infra::{operator, wire_services};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use gunsmith_directory::config::OwnershipConfig;
use gunsmith_directory::error::AppError;
use gunsmith_directory::workflows::ownership::{
    normalize_license, sign_payload, validate_license_format, CallerIdentity, NewListing,
    OwnershipError, RegionCode, FEATURED_SLOTS_PER_REGION,
};
use serde_json::json;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Starting clock for the walkthrough (RFC 3339). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Region the demo listing is placed in.
    #[arg(long, default_value = "TX")]
    pub(crate) region: String,
    /// Featured placement length purchased during the demo.
    #[arg(long, default_value_t = 30)]
    pub(crate) duration_days: u32,
}

#[derive(Args, Debug)]
pub(crate) struct LicenseArgs {
    /// License number as printed, separators allowed
    pub(crate) license: String,
}

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// CSV file with `name,region` columns
    pub(crate) path: PathBuf,
}

pub(crate) fn run_license_check(args: LicenseArgs) -> Result<(), AppError> {
    let normalized = normalize_license(&args.license);
    if validate_license_format(&args.license) {
        println!("{normalized}: structurally valid");
    } else {
        println!("{normalized}: not a valid license format (expected 14 digits and 1 letter)");
    }
    Ok(())
}

pub(crate) fn run_import_check(args: ImportArgs) -> Result<(), AppError> {
    let wiring = wire_services(&OwnershipConfig::default());
    let report = wiring
        .services
        .listings
        .import_path(&operator(), &args.path, Utc::now())?;

    println!("Listing import dry run: {}", args.path.display());
    println!("  Accepted: {}", report.imported.len());
    for view in &report.imported {
        println!("    {} ({}) -> /{}", view.name, view.region, view.slug);
    }
    if report.rejected.is_empty() {
        println!("  Rejected: none");
    } else {
        println!("  Rejected: {}", report.rejected.len());
        for row in &report.rejected {
            println!("    line {}: {}", row.line, row.reason);
        }
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let start = args.now.unwrap_or_else(Utc::now);
    let region = RegionCode::parse(&args.region).ok_or_else(|| {
        OwnershipError::Validation(format!("'{}' is not a valid region code", args.region))
    })?;

    let config = OwnershipConfig::default();
    let mut wiring = wire_services(&config);
    let services = &wiring.services;
    let admin = operator();
    let owner = CallerIdentity::member("demo-owner");

    println!("Gunsmith directory ownership demo");
    println!("Clock start: {}", start.to_rfc3339());

    let listing = services.listings.register(
        &admin,
        NewListing {
            name: "Demo Precision Gunsmithing".to_string(),
            region: region.clone(),
        },
        start,
    )?;
    println!("\nListed {} as /{} in {}", listing.name, listing.slug, listing.region);

    let token = services
        .claims
        .tokens()
        .issue(&admin, &listing.id, services.claim_token_ttl, start)?;
    println!(
        "Claim link issued, expires {}",
        token.expires_at.to_rfc3339()
    );

    match services
        .claims
        .redeem_token(&token.token, &CallerIdentity::Anonymous, start)
    {
        Err(OwnershipError::AuthenticationRequired) => {
            println!("  Anonymous visit: sign-in required, token kept for resume")
        }
        other => println!("  Anonymous visit: unexpected result {other:?}"),
    }
    let redemption = services.claims.redeem_token(&token.token, &owner, start)?;
    println!(
        "  Signed-in redemption: {:?}, verification {}",
        redemption.outcome,
        redemption.verification_status.label()
    );
    if let Err(err) = services.claims.redeem_token(&token.token, &owner, start) {
        println!("  Second redemption refused: {err}");
    }

    let license = "1-23-456-78-9a-12345";
    services
        .verification
        .resubmit(&owner, &listing.id, license)?;
    let verified = services.verification.approve(&admin, &listing.id)?;
    println!(
        "\nLicense {} reviewed: {}",
        normalize_license(license),
        verified.verification_status.label()
    );

    let availability = services.featured.check_availability(&region, start)?;
    println!(
        "\nFeatured slots in {}: {}/{} available",
        region, availability.available, FEATURED_SLOTS_PER_REGION
    );
    let quote = services
        .featured
        .prepare_checkout(&owner, &listing.id, args.duration_days, start)?;
    println!(
        "  Checkout for {} days: ${}.{:02}",
        args.duration_days,
        quote.amount_cents / 100,
        quote.amount_cents % 100
    );

    let body = serde_json::to_vec(&json!({
        "event_type": "checkout.session.completed",
        "session": {
            "id": "cs_demo_0001",
            "amount_total": quote.amount_cents,
            "metadata": {
                "listing_id": quote.metadata.listing_id,
                "user_id": quote.metadata.user_id,
                "duration_days": quote.metadata.duration_days.to_string(),
            }
        }
    }))
    .map_err(|err| OwnershipError::Validation(err.to_string()))?;
    let header = sign_payload(config.webhook_secret.as_bytes(), start.timestamp(), &body)?;

    let first = services
        .payments
        .handle_webhook(Some(&header), &body, start)?;
    let replay = services
        .payments
        .handle_webhook(Some(&header), &body, start + Duration::seconds(5))?;
    println!(
        "  Payment webhook applied: {} (replay applied: {})",
        first.applied, replay.applied
    );
    if let Some(until) = first.featured_until {
        println!("  Featured until {}", until.to_rfc3339());
    }

    let after_expiry = start + Duration::days(i64::from(args.duration_days) + 1);
    let report = services.featured.sweep(after_expiry)?;
    println!(
        "\nSweep at {}: {} placement(s) expired",
        after_expiry.to_rfc3339(),
        report.expired_listings.len()
    );

    println!("\nNotifications queued:");
    while let Ok(event) = wiring.outbox.try_recv() {
        println!("  - {}", event.kind());
    }
    Ok(())
}
