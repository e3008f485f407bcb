//! Hosts, teams and operating systems.

use crate::error::MetadataResult;
use crate::models::{HostRow, OperatingSystemRow, TeamRow};
use async_trait::async_trait;
use canon_core::inventory::OperatingSystemFact;
use uuid::Uuid;

/// Repository for the inventory tables the aggregates join against.
#[async_trait]
pub trait InventoryRepo: Send + Sync {
    /// Create a team or rename an existing one.
    async fn upsert_team(&self, team: &TeamRow) -> MetadataResult<()>;

    /// Create a host or update its hostname and team.
    async fn upsert_host(&self, host: &HostRow) -> MetadataResult<()>;

    async fn get_host(&self, host_id: i64) -> MetadataResult<Option<HostRow>>;

    /// Record the host's operating system, creating the OS row if needed.
    /// Returns the OS id.
    async fn set_host_operating_system(
        &self,
        host_id: i64,
        os: &OperatingSystemFact,
    ) -> MetadataResult<Uuid>;

    async fn get_host_operating_system(
        &self,
        host_id: i64,
    ) -> MetadataResult<Option<OperatingSystemRow>>;
}
