//! Ownership, verification and featured-placement lifecycle for directory listings.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
