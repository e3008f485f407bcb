//! Host software repository.

use crate::error::MetadataResult;
use crate::models::{HostSoftwareItem, HostSoftwareUpdate};
use async_trait::async_trait;
use canon_core::software::SoftwareFact;

/// Repository for host to software associations.
#[async_trait]
pub trait HostSoftwareRepo: Send + Sync {
    /// Replace a host's software list with `facts`.
    ///
    /// Current associations are read from the reader pool. If nothing
    /// changed no transaction is opened. Otherwise one retried transaction
    /// removes stale associations, resolves new facts through the title
    /// catalog and advances `last_opened_at`. Software rows are never
    /// deleted.
    async fn update_host_software(
        &self,
        host_id: i64,
        facts: &[SoftwareFact],
    ) -> MetadataResult<HostSoftwareUpdate>;

    /// Software installed on a host, ordered by name then version.
    async fn list_host_software(&self, host_id: i64) -> MetadataResult<Vec<HostSoftwareItem>>;
}
