//! Database models mapping to the catalog schema.

use canon_core::certificate::{CertificateFact, CertificateSource, DistinguishedName};
use canon_core::software::SoftwareFact;
use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Software catalog
// =============================================================================

/// Canonical software title.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TitleRow {
    pub title_id: Uuid,
    /// Display name as first seen. Never rewritten.
    pub name: String,
    pub source: String,
    pub browser: String,
    pub bundle_identifier: String,
    /// `NULL` only on legacy rows; titles created here use `''` when no
    /// code is known.
    pub upgrade_code: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TitleRow {
    /// Trimmed, non-empty upgrade code, if any.
    pub fn upgrade_code(&self) -> Option<&str> {
        self.upgrade_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

/// One distinct software fact, identified by its checksum.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SoftwareRow {
    pub software_id: Uuid,
    pub title_id: Uuid,
    pub name: String,
    pub version: String,
    pub source: String,
    pub browser: String,
    pub bundle_identifier: String,
    pub upgrade_code: Option<String>,
    pub release: String,
    pub vendor: String,
    pub arch: String,
    pub extension_id: String,
    pub checksum: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SoftwareRow {
    /// Build the row for a fact that is about to be inserted.
    pub fn from_fact(
        software_id: Uuid,
        title_id: Uuid,
        fact: &SoftwareFact,
        checksum: &str,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            software_id,
            title_id,
            name: fact.display_name().to_string(),
            version: fact.version.trim().to_string(),
            source: fact.source.trim().to_string(),
            browser: fact.browser.trim().to_string(),
            bundle_identifier: fact.bundle_identifier.trim().to_string(),
            upgrade_code: fact.upgrade_code().map(str::to_string),
            release: fact.release.trim().to_string(),
            vendor: fact.vendor.trim().to_string(),
            arch: fact.arch.trim().to_string(),
            extension_id: fact.extension_id.trim().to_string(),
            checksum: checksum.to_string(),
            created_at: now,
        }
    }
}

/// A host's association with a software row, as read for diffing.
#[derive(Debug, Clone, FromRow)]
pub struct HostSoftwareRow {
    pub host_id: i64,
    pub software_id: Uuid,
    pub checksum: String,
    pub last_opened_at: Option<OffsetDateTime>,
}

/// Software installed on a host.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HostSoftwareItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub software: SoftwareRow,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_opened_at: Option<OffsetDateTime>,
}

/// How a software fact was mapped onto the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// A software row with the same checksum already existed.
    Existing,
    /// A new title was created.
    Created,
    /// Linked to the name-matched title unchanged.
    Linked,
    /// Linked to the name-matched title after filling its empty upgrade code.
    Backfilled,
    /// Linked to the title owning the fact's upgrade code instead of the
    /// name-matched one.
    Redirected,
}

/// Result of resolving one software fact.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSoftware {
    pub software_id: Uuid,
    pub title_id: Uuid,
    pub outcome: ResolutionOutcome,
}

/// Result of syncing a host's software list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostSoftwareUpdate {
    pub inserted: Vec<Uuid>,
    pub deleted: Vec<Uuid>,
    pub last_opened_updated: usize,
}

impl HostSoftwareUpdate {
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.last_opened_updated == 0
    }
}

// =============================================================================
// Host certificates
// =============================================================================

/// Stored certificate observation. Soft-deleted via `deleted_at`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HostCertificateRow {
    pub certificate_id: Uuid,
    pub host_id: i64,
    pub sha1_sum: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_valid_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_valid_after: OffsetDateTime,
    pub certificate_authority: bool,
    pub common_name: String,
    pub key_algorithm: String,
    pub key_strength: i64,
    pub key_usage: String,
    pub serial: String,
    pub signing_algorithm: String,
    pub subject_country: String,
    pub subject_org: String,
    pub subject_org_unit: String,
    pub subject_common_name: String,
    pub issuer_country: String,
    pub issuer_org: String,
    pub issuer_org_unit: String,
    pub issuer_common_name: String,
    pub source: String,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl HostCertificateRow {
    /// Build a new row from a normalized fact.
    pub fn from_fact(
        certificate_id: Uuid,
        host_id: i64,
        fact: &CertificateFact,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            certificate_id,
            host_id,
            sha1_sum: fact.sha1_sum.clone(),
            not_valid_before: fact.not_valid_before,
            not_valid_after: fact.not_valid_after,
            certificate_authority: fact.certificate_authority,
            common_name: fact.common_name.clone(),
            key_algorithm: fact.key_algorithm.clone(),
            key_strength: fact.key_strength,
            key_usage: fact.key_usage.clone(),
            serial: fact.serial.clone(),
            signing_algorithm: fact.signing_algorithm.clone(),
            subject_country: fact.subject.country.clone(),
            subject_org: fact.subject.organization.clone(),
            subject_org_unit: fact.subject.organizational_unit.clone(),
            subject_common_name: fact.subject.common_name.clone(),
            issuer_country: fact.issuer.country.clone(),
            issuer_org: fact.issuer.organization.clone(),
            issuer_org_unit: fact.issuer.organizational_unit.clone(),
            issuer_common_name: fact.issuer.common_name.clone(),
            source: fact.source.as_str().to_string(),
            username: fact.username.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn source(&self) -> CertificateSource {
        CertificateSource::parse(&self.source)
    }

    pub fn subject(&self) -> DistinguishedName {
        DistinguishedName {
            country: self.subject_country.clone(),
            organization: self.subject_org.clone(),
            organizational_unit: self.subject_org_unit.clone(),
            common_name: self.subject_common_name.clone(),
        }
    }

    pub fn issuer(&self) -> DistinguishedName {
        DistinguishedName {
            country: self.issuer_country.clone(),
            organization: self.issuer_org.clone(),
            organizational_unit: self.issuer_org_unit.clone(),
            common_name: self.issuer_common_name.clone(),
        }
    }
}

/// Result of one certificate sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CertificateSyncResult {
    pub inserted: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

// =============================================================================
// Vulnerabilities
// =============================================================================

/// CVE metadata.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CveMetaRow {
    pub cve: String,
    pub cvss_score: Option<f64>,
    pub epss_probability: Option<f64>,
    pub cisa_known_exploit: Option<bool>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
    pub description: String,
}

/// A CVE affecting one software row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SoftwareVulnerabilityRow {
    pub software_id: Uuid,
    pub cve: String,
    /// Feed the match came from (e.g. `nvd`, `osv`).
    pub source: String,
    pub resolved_in_version: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A CVE affecting one operating system version.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OsVulnerabilityRow {
    pub os_id: Uuid,
    pub cve: String,
    pub source: String,
    pub resolved_in_version: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Inventory
// =============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperatingSystemRow {
    pub os_id: Uuid,
    pub name: String,
    pub version: String,
    pub arch: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TeamRow {
    pub team_id: i64,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HostRow {
    pub host_id: i64,
    pub hostname: String,
    /// `None` for hosts that belong to no team.
    pub team_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Aggregates
// =============================================================================

/// Title with its aggregate counts in one scope.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SoftwareTitleListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub title: TitleRow,
    pub hosts_count: i64,
    /// Versions of this title installed on at least one host in scope.
    pub versions_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub counts_updated_at: OffsetDateTime,
    /// CVE ids affecting any version of the title.
    #[sqlx(skip)]
    pub vulnerabilities: Vec<String>,
}

/// CVE with its host count in one scope.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VulnerabilityListItem {
    pub cve: String,
    pub cvss_score: Option<f64>,
    pub epss_probability: Option<f64>,
    pub cisa_known_exploit: Option<bool>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
    pub description: Option<String>,
    pub hosts_count: i64,
    pub affects_software: bool,
    pub affects_os: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub counts_updated_at: OffsetDateTime,
}

/// Software version affected by a CVE.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VulnerableSoftwareItem {
    pub software_id: Uuid,
    pub title_id: Uuid,
    pub name: String,
    pub version: String,
    pub source: String,
    pub resolved_in_version: Option<String>,
    /// Hosts in scope with this version installed.
    pub hosts_count: i64,
}

/// Operating system version affected by a CVE.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VulnerableOsItem {
    pub os_id: Uuid,
    pub name: String,
    pub version: String,
    pub arch: String,
    pub resolved_in_version: Option<String>,
}

/// A CVE with every affected software and operating system version.
#[derive(Debug, Clone, Serialize)]
pub struct VulnerabilityDetail {
    #[serde(flatten)]
    pub summary: VulnerabilityListItem,
    pub software: Vec<VulnerableSoftwareItem>,
    pub operating_systems: Vec<VulnerableOsItem>,
}
