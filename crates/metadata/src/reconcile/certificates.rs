//! Certificate set diffing.

use crate::models::HostCertificateRow;
use canon_core::certificate::CertificateFact;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Changes needed to make a host's stored certificates match a report.
#[derive(Debug, Clone, Default)]
pub struct CertificatePlan {
    /// Reported certificates with no undeleted stored row.
    pub to_insert: Vec<CertificateFact>,
    /// Stored rows whose fingerprint was not reported.
    pub to_delete: Vec<Uuid>,
    /// Fingerprints present on both sides. Left untouched even if other
    /// attributes differ.
    pub unchanged: usize,
}

impl CertificatePlan {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// Drop repeated fingerprints, keeping the first occurrence.
///
/// Returns the kept facts and the fingerprints that were dropped.
pub fn dedupe_by_sha1(incoming: Vec<CertificateFact>) -> (Vec<CertificateFact>, Vec<String>) {
    let mut seen = HashSet::with_capacity(incoming.len());
    let mut kept = Vec::with_capacity(incoming.len());
    let mut duplicates = Vec::new();
    for fact in incoming {
        if seen.insert(fact.sha1_sum.clone()) {
            kept.push(fact);
        } else {
            duplicates.push(fact.sha1_sum);
        }
    }
    (kept, duplicates)
}

/// Diff stored rows against normalized, deduplicated incoming facts.
pub fn diff(existing: &[HostCertificateRow], incoming: Vec<CertificateFact>) -> CertificatePlan {
    let stored: HashMap<&str, Uuid> = existing
        .iter()
        .map(|row| (row.sha1_sum.as_str(), row.certificate_id))
        .collect();
    let reported: HashSet<String> = incoming.iter().map(|f| f.sha1_sum.clone()).collect();

    let mut plan = CertificatePlan::default();
    for fact in incoming {
        if stored.contains_key(fact.sha1_sum.as_str()) {
            plan.unchanged += 1;
        } else {
            plan.to_insert.push(fact);
        }
    }
    plan.to_delete = existing
        .iter()
        .filter(|row| !reported.contains(&row.sha1_sum))
        .map(|row| row.certificate_id)
        .collect();
    plan
}
