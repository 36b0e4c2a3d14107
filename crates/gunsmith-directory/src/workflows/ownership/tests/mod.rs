mod common;
mod payments;
mod verification;
