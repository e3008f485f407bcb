//! Host certificate repository.

use crate::error::MetadataResult;
use crate::models::{CertificateSyncResult, HostCertificateRow};
use async_trait::async_trait;
use canon_core::certificate::CertificateFact;
use canon_core::listing::{ListOptions, PaginationMetadata};

/// Order keys accepted by [`CertificateRepo::list_host_certificates`].
pub const CERTIFICATE_ORDER_KEYS: &[&str] = &[
    "common_name",
    "not_valid_after",
    "not_valid_before",
    "issuer_common_name",
    "subject_common_name",
    "created_at",
];

/// Repository for per-host certificate observations.
#[async_trait]
pub trait CertificateRepo: Send + Sync {
    /// Make the host's undeleted certificates match `incoming`.
    ///
    /// Fingerprints are validated before anything is read. Duplicates in
    /// `incoming` are logged and dropped. New fingerprints are inserted,
    /// missing ones soft-deleted, and matching ones left untouched, all in
    /// one retried transaction.
    async fn update_host_certificates(
        &self,
        host_id: i64,
        incoming: &[CertificateFact],
    ) -> MetadataResult<CertificateSyncResult>;

    /// Undeleted certificates for a host.
    async fn list_host_certificates(
        &self,
        host_id: i64,
        opts: &ListOptions,
    ) -> MetadataResult<(Vec<HostCertificateRow>, PaginationMetadata)>;
}
