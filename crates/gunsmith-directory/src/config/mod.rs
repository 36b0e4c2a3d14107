use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::Duration;

use crate::workflows::ownership::MAX_CLAIM_TOKEN_TTL_HOURS;

const DEV_WEBHOOK_SECRET: &str = "whsec_development_only";
const MAX_SIGNATURE_TOLERANCE_SECS: i64 = 24 * 60 * 60;
const MAX_WAITLIST_NOTIFICATION_HOURS: i64 = 24 * 90;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub ownership: OwnershipConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let webhook_secret = match env::var("PAYMENT_WEBHOOK_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ if environment == AppEnvironment::Production => {
                return Err(ConfigError::MissingWebhookSecret)
            }
            _ => DEV_WEBHOOK_SECRET.to_string(),
        };

        let ownership = OwnershipConfig {
            claim_token_ttl_hours: bounded_var(
                "CLAIM_TOKEN_TTL_HOURS",
                168,
                1,
                MAX_CLAIM_TOKEN_TTL_HOURS,
            )?,
            webhook_secret,
            signature_tolerance_secs: bounded_var(
                "PAYMENT_SIGNATURE_TOLERANCE_SECS",
                300,
                0,
                MAX_SIGNATURE_TOLERANCE_SECS,
            )?,
            featured_price_cents_per_30_days: numeric_var(
                "FEATURED_PRICE_CENTS_PER_30_DAYS",
                4900,
            )?,
            waitlist_notification_hours: bounded_var(
                "WAITLIST_NOTIFICATION_HOURS",
                48,
                1,
                MAX_WAITLIST_NOTIFICATION_HOURS,
            )?,
            sweep_interval_secs: numeric_var("SWEEP_INTERVAL_SECS", 300)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            ownership,
        })
    }
}

fn numeric_var<T>(variable: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

fn bounded_var(
    variable: &'static str,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    let value = numeric_var(variable, default)?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange { variable, min, max })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for claim tokens, payment webhooks and featured placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipConfig {
    pub claim_token_ttl_hours: i64,
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
    pub featured_price_cents_per_30_days: i64,
    pub waitlist_notification_hours: i64,
    pub sweep_interval_secs: u64,
}

impl OwnershipConfig {
    pub fn claim_token_ttl(&self) -> Duration {
        Duration::hours(self.claim_token_ttl_hours.clamp(1, MAX_CLAIM_TOKEN_TTL_HOURS))
    }

    pub fn signature_tolerance(&self) -> Duration {
        Duration::seconds(
            self.signature_tolerance_secs
                .clamp(0, MAX_SIGNATURE_TOLERANCE_SECS),
        )
    }

    pub fn waitlist_notification_window(&self) -> Duration {
        Duration::hours(
            self.waitlist_notification_hours
                .clamp(1, MAX_WAITLIST_NOTIFICATION_HOURS),
        )
    }
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            claim_token_ttl_hours: 168,
            webhook_secret: DEV_WEBHOOK_SECRET.to_string(),
            signature_tolerance_secs: 300,
            featured_price_cents_per_30_days: 4900,
            waitlist_notification_hours: 48,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
    OutOfRange {
        variable: &'static str,
        min: i64,
        max: i64,
    },
    MissingWebhookSecret,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a valid number")
            }
            ConfigError::OutOfRange { variable, min, max } => {
                write!(f, "{variable} must be between {min} and {max}")
            }
            ConfigError::MissingWebhookSecret => {
                write!(f, "PAYMENT_WEBHOOK_SECRET is required in production")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. }
            | ConfigError::MissingWebhookSecret => None,
        }
    }
}
