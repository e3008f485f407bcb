//! Core domain types for canon, the host inventory reconciler.
//!
//! This crate defines the facts agents report and the pure logic around them:
//! - Software facts and their identity fingerprint
//! - Certificate facts and their normalization
//! - Host report envelope and operating system facts
//! - List options, pagination and count scopes
//! - Shared configuration

pub mod certificate;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod inventory;
pub mod listing;
pub mod software;

pub use certificate::{CertificateFact, CertificateSource, DistinguishedName};
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, FingerprintService};
pub use inventory::{HostReport, OperatingSystemFact};
pub use listing::{CountScope, ListOptions, OrderDirection, PaginationMetadata};
pub use software::SoftwareFact;
