//! Vulnerability catalog repository.

use crate::error::MetadataResult;
use crate::models::{
    CveMetaRow, OsVulnerabilityRow, SoftwareVulnerabilityRow, VulnerabilityDetail,
    VulnerabilityListItem,
};
use async_trait::async_trait;
use canon_core::listing::{CountScope, ListOptions, PaginationMetadata};

/// Order keys accepted by [`VulnerabilityRepo::list_vulnerabilities`].
pub const VULNERABILITY_ORDER_KEYS: &[&str] = &[
    "hosts_count",
    "cve",
    "cvss_score",
    "epss_probability",
    "published",
];

/// Filters for the vulnerability listing.
#[derive(Debug, Clone, Default)]
pub struct VulnerabilityListOptions {
    pub scope: CountScope,
    /// Only CVEs flagged in the CISA known exploited catalog.
    pub known_exploit: bool,
    /// Case-insensitive substring of the CVE id.
    pub search: Option<String>,
    pub list: ListOptions,
}

/// Repository for CVE metadata and vulnerable software / OS versions.
#[async_trait]
pub trait VulnerabilityRepo: Send + Sync {
    /// Insert or update CVE metadata.
    async fn upsert_cve_meta(&self, rows: &[CveMetaRow]) -> MetadataResult<()>;

    /// Record that a software row is affected by a CVE. Returns whether a
    /// new row was inserted.
    async fn insert_software_vulnerability(
        &self,
        row: &SoftwareVulnerabilityRow,
    ) -> MetadataResult<bool>;

    /// Record that an operating system is affected by a CVE. Returns
    /// whether a new row was inserted.
    async fn insert_os_vulnerability(&self, row: &OsVulnerabilityRow) -> MetadataResult<bool>;

    /// CVEs with hosts in scope, with the total matching count.
    async fn list_vulnerabilities(
        &self,
        opts: &VulnerabilityListOptions,
    ) -> MetadataResult<(Vec<VulnerabilityListItem>, i64, PaginationMetadata)>;

    /// One CVE with its affected software and OS versions.
    ///
    /// Returns `NotFound` when no host in scope is affected.
    async fn get_vulnerability(
        &self,
        cve: &str,
        scope: CountScope,
    ) -> MetadataResult<VulnerabilityDetail>;
}
