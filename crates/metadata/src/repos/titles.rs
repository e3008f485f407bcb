//! Title catalog repository.

use crate::error::MetadataResult;
use crate::models::{ResolvedSoftware, SoftwareRow, TitleRow};
use async_trait::async_trait;
use canon_core::software::SoftwareFact;
use uuid::Uuid;

/// Repository for canonical titles and the software rows linked to them.
#[async_trait]
pub trait TitleRepo: Send + Sync {
    /// Map a software fact onto the catalog, creating the software row and,
    /// if needed, its title.
    ///
    /// Runs as one retried transaction. Concurrent callers resolving the
    /// same identity converge on the same title and software rows.
    async fn resolve_software(&self, fact: &SoftwareFact) -> MetadataResult<ResolvedSoftware>;

    /// Get a title by id.
    async fn get_title(&self, title_id: Uuid) -> MetadataResult<Option<TitleRow>>;

    /// Titles whose `(name, source, browser)` matches, ignoring name case.
    /// Ordered oldest first.
    async fn find_titles_by_name(
        &self,
        name: &str,
        source: &str,
        browser: &str,
    ) -> MetadataResult<Vec<TitleRow>>;

    /// The title owning a non-empty upgrade code.
    async fn find_title_by_upgrade_code(
        &self,
        upgrade_code: &str,
    ) -> MetadataResult<Option<TitleRow>>;

    /// Get a software row by fact checksum.
    async fn get_software_by_checksum(&self, checksum: &str)
    -> MetadataResult<Option<SoftwareRow>>;

    /// All software rows linked to a title, ordered by version.
    async fn list_title_software(&self, title_id: Uuid) -> MetadataResult<Vec<SoftwareRow>>;
}
