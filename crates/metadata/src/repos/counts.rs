//! Aggregate host counts repository.

use crate::error::MetadataResult;
use crate::models::SoftwareTitleListItem;
use async_trait::async_trait;
use canon_core::listing::{CountScope, ListOptions, PaginationMetadata};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Order keys accepted by [`CountRepo::list_software_titles`].
pub const TITLE_ORDER_KEYS: &[&str] = &["hosts_count", "name", "source", "versions_count"];

/// Filters for the title listing.
#[derive(Debug, Clone, Default)]
pub struct TitleListOptions {
    pub scope: CountScope,
    /// Only titles with at least one known CVE.
    pub vulnerable_only: bool,
    /// Case-insensitive substring of the title name, or of a CVE id
    /// affecting one of its versions.
    pub search: Option<String>,
    pub list: ListOptions,
}

/// Rows written by one count sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountSyncStats {
    /// Rows upserted with a non-zero count.
    pub upserted: usize,
    /// Rows removed because no host is counted any more.
    pub pruned: u64,
}

/// Result of [`CountRepo::sync_all_counts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllCountsSync {
    pub titles: CountSyncStats,
    pub software: CountSyncStats,
    pub vulnerabilities: CountSyncStats,
}

/// Repository for denormalized host counts.
///
/// Each sync recomputes a whole table in one retried transaction: counts
/// are reset, recomputed for the global, per-team and no-team scopes,
/// upserted in batches, and rows left at zero are deleted. Readers see
/// either the old or the new counts.
#[async_trait]
pub trait CountRepo: Send + Sync {
    async fn sync_title_host_counts(&self, now: OffsetDateTime) -> MetadataResult<CountSyncStats>;

    async fn sync_software_host_counts(
        &self,
        now: OffsetDateTime,
    ) -> MetadataResult<CountSyncStats>;

    async fn sync_vulnerability_host_counts(
        &self,
        now: OffsetDateTime,
    ) -> MetadataResult<CountSyncStats>;

    /// Run every sync in order: software, titles, vulnerabilities.
    async fn sync_all_counts(&self, now: OffsetDateTime) -> MetadataResult<AllCountsSync> {
        let software = self.sync_software_host_counts(now).await?;
        let titles = self.sync_title_host_counts(now).await?;
        let vulnerabilities = self.sync_vulnerability_host_counts(now).await?;
        Ok(AllCountsSync {
            titles,
            software,
            vulnerabilities,
        })
    }

    /// Titles with hosts in scope, with the total matching count.
    async fn list_software_titles(
        &self,
        opts: &TitleListOptions,
    ) -> MetadataResult<(Vec<SoftwareTitleListItem>, i64, PaginationMetadata)>;

    /// Hosts counted for a title in scope, 0 when none.
    async fn get_title_host_count(&self, title_id: Uuid, scope: CountScope)
    -> MetadataResult<i64>;
}
