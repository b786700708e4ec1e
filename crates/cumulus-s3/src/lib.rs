//! Cumulus S3 - object-store adapter backed by AWS S3
//!
//! Implements the [`ObjectStore`](cumulus_core::ports::ObjectStore) port
//! against a bucket and key prefix, including S3-compatible services via
//! an endpoint override.

pub mod store;

pub use store::{S3ObjectStore, S3Options};
