//! Host software list diffing.

use crate::error::MetadataResult;
use crate::models::HostSoftwareRow;
use canon_core::fingerprint::FingerprintService;
use canon_core::software::SoftwareFact;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;
use uuid::Uuid;

/// Validate and fingerprint reported facts, keeping the first fact per
/// checksum. The map iterates in checksum order, which is also the order
/// new facts are resolved in.
pub fn fingerprint_facts(facts: &[SoftwareFact]) -> MetadataResult<BTreeMap<String, SoftwareFact>> {
    let mut by_checksum = BTreeMap::new();
    for fact in facts {
        fact.validate()?;
        let checksum = FingerprintService::software(fact).to_hex();
        by_checksum.entry(checksum).or_insert_with(|| fact.clone());
    }
    Ok(by_checksum)
}

/// Changes needed to make a host's associations match a report.
#[derive(Debug, Clone, Default)]
pub struct HostSoftwarePlan {
    /// Checksums not currently associated with the host, in sorted order.
    pub to_add: Vec<String>,
    /// Software rows no longer reported.
    pub to_remove: Vec<Uuid>,
    /// Retained associations whose reported `last_opened_at` moved forward.
    pub to_touch: Vec<(Uuid, OffsetDateTime)>,
}

impl HostSoftwarePlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_touch.is_empty()
    }
}

pub fn plan(
    current: &[HostSoftwareRow],
    incoming: &BTreeMap<String, SoftwareFact>,
) -> HostSoftwarePlan {
    let stored: HashMap<&str, &HostSoftwareRow> =
        current.iter().map(|row| (row.checksum.as_str(), row)).collect();

    let mut plan = HostSoftwarePlan::default();
    for (checksum, fact) in incoming {
        match stored.get(checksum.as_str()) {
            None => plan.to_add.push(checksum.clone()),
            Some(row) => {
                if let Some(reported) = fact.last_opened_at
                    && row.last_opened_at.is_none_or(|stored| reported > stored)
                {
                    plan.to_touch.push((row.software_id, reported));
                }
            }
        }
    }
    plan.to_remove = current
        .iter()
        .filter(|row| !incoming.contains_key(&row.checksum))
        .map(|row| row.software_id)
        .collect();
    plan
}
