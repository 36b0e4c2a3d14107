use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::domain::{Listing, ListingId, ListingView, RegionCode};
use super::error::OwnershipError;
use super::identity::CallerIdentity;
use super::repository::{OwnershipStore, RepositoryError};

/// Slug candidates tried before giving up on a name.
pub const MAX_SLUG_ATTEMPTS: usize = 20;

/// Administrator input for a new listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewListing {
    pub name: String,
    pub region: RegionCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRejection {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: Vec<ListingView>,
    pub rejected: Vec<ImportRejection>,
}

#[derive(Debug)]
pub enum ListingImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Ownership(OwnershipError),
}

impl fmt::Display for ListingImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingImportError::Io(err) => write!(f, "failed to read listing import: {}", err),
            ListingImportError::Csv(err) => write!(f, "invalid listing CSV data: {}", err),
            ListingImportError::Ownership(err) => write!(f, "listing import refused: {}", err),
        }
    }
}

impl std::error::Error for ListingImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListingImportError::Io(err) => Some(err),
            ListingImportError::Csv(err) => Some(err),
            ListingImportError::Ownership(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ListingImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ListingImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<OwnershipError> for ListingImportError {
    fn from(err: OwnershipError) -> Self {
        Self::Ownership(err)
    }
}

#[derive(Debug, Deserialize)]
struct ImportRow {
    name: String,
    region: String,
}

/// Lower-case, hyphen-separated URL slug. Empty when the name has no ASCII alphanumerics.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Administrator-side creation of directory entries.
pub struct ListingRegistry<S> {
    store: Arc<S>,
}

impl<S> ListingRegistry<S>
where
    S: OwnershipStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create an unclaimed listing, disambiguating the slug on collision.
    pub fn register(
        &self,
        caller: &CallerIdentity,
        new_listing: NewListing,
        now: DateTime<Utc>,
    ) -> Result<Listing, OwnershipError> {
        caller.require_administrator("register_listing")?;
        self.insert_with_unique_slug(new_listing, now)
    }

    pub fn import_path<P: AsRef<Path>>(
        &self,
        caller: &CallerIdentity,
        path: P,
        now: DateTime<Utc>,
    ) -> Result<ImportReport, ListingImportError> {
        let file = std::fs::File::open(path)?;
        self.import_csv(caller, file, now)
    }

    /// Bulk import from `name,region` CSV. Bad rows are reported, not fatal.
    pub fn import_csv<R: Read>(
        &self,
        caller: &CallerIdentity,
        reader: R,
        now: DateTime<Utc>,
    ) -> Result<ImportReport, ListingImportError> {
        caller.require_administrator("import_listings")?;

        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv_reader.headers()?.clone();

        let mut report = ImportReport::default();
        for record in csv_reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    let line = err.position().map(|position| position.line()).unwrap_or_default();
                    report.rejected.push(ImportRejection {
                        line,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let line = record.position().map(|position| position.line()).unwrap_or_default();
            let row: ImportRow = match record.deserialize(Some(&headers)) {
                Ok(row) => row,
                Err(err) => {
                    report.rejected.push(ImportRejection {
                        line,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let Some(region) = RegionCode::parse(&row.region) else {
                report.rejected.push(ImportRejection {
                    line,
                    reason: format!("'{}' is not a valid region code", row.region),
                });
                continue;
            };

            match self.insert_with_unique_slug(
                NewListing {
                    name: row.name,
                    region,
                },
                now,
            ) {
                Ok(listing) => report.imported.push(ListingView::from(&listing)),
                Err(err) => report.rejected.push(ImportRejection {
                    line,
                    reason: err.to_string(),
                }),
            }
        }

        info!(
            imported = report.imported.len(),
            rejected = report.rejected.len(),
            "listing import finished"
        );
        Ok(report)
    }

    fn insert_with_unique_slug(
        &self,
        new_listing: NewListing,
        now: DateTime<Utc>,
    ) -> Result<Listing, OwnershipError> {
        let name = new_listing.name.trim().to_string();
        let base = slugify(&name);
        if base.is_empty() {
            return Err(OwnershipError::validation(
                "listing name must contain letters or digits",
            ));
        }

        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let slug = if attempt == 1 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            let listing = Listing::unclaimed(
                ListingId(format!("lst-{}", Uuid::new_v4().simple())),
                slug,
                name.clone(),
                new_listing.region.clone(),
                now,
            );

            match self
                .store
                .transaction(|tx| tx.insert_listing(listing.clone()))
            {
                Ok(()) => {
                    info!(listing_id = %listing.id, slug = %listing.slug, "listing registered");
                    return Ok(listing);
                }
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }

        warn!(slug = %base, attempts = MAX_SLUG_ATTEMPTS, "slug candidates exhausted");
        Err(OwnershipError::ResourceExhausted(format!(
            "could not allocate a unique slug for '{name}'"
        )))
    }
}
