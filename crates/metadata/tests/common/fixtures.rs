//! Test data builders.

use canon_core::certificate::{CertificateFact, CertificateSource, DistinguishedName};
use canon_core::software::SoftwareFact;
use canon_metadata::MetadataStore;
use canon_metadata::models::{HostRow, TeamRow};
use time::OffsetDateTime;
use time::macros::datetime;

/// A `programs` fact with an optional upgrade code.
#[allow(dead_code)]
pub fn program(name: &str, version: &str, upgrade_code: Option<&str>) -> SoftwareFact {
    let fact = SoftwareFact::new(name, version, "programs");
    match upgrade_code {
        Some(code) => fact.with_upgrade_code(code),
        None => fact,
    }
}

/// A certificate whose fingerprint is `seed` repeated to 40 hex digits.
#[allow(dead_code)]
pub fn certificate(seed: char, common_name: &str) -> CertificateFact {
    CertificateFact {
        sha1_sum: seed.to_string().repeat(40),
        not_valid_before: datetime!(2024-01-01 0:00 UTC),
        not_valid_after: datetime!(2034-01-01 0:00 UTC),
        certificate_authority: false,
        common_name: common_name.to_string(),
        key_algorithm: "rsaEncryption".to_string(),
        key_strength: 2048,
        key_usage: "Digital Signature".to_string(),
        serial: format!("{seed}01"),
        signing_algorithm: "sha256WithRSAEncryption".to_string(),
        subject: DistinguishedName {
            country: "US".to_string(),
            organization: "Example".to_string(),
            organizational_unit: String::new(),
            common_name: common_name.to_string(),
        },
        issuer: DistinguishedName {
            common_name: "Example Root CA".to_string(),
            ..Default::default()
        },
        source: CertificateSource::System,
        username: String::new(),
    }
}

/// Register a team.
#[allow(dead_code)]
pub async fn add_team(store: &dyn MetadataStore, team_id: i64) {
    store
        .upsert_team(&TeamRow {
            team_id,
            name: format!("team-{team_id}"),
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .expect("Failed to upsert team");
}

/// Register a host, optionally in a team.
#[allow(dead_code)]
pub async fn add_host(store: &dyn MetadataStore, host_id: i64, team_id: Option<i64>) {
    let now = OffsetDateTime::now_utc();
    store
        .upsert_host(&HostRow {
            host_id,
            hostname: format!("host-{host_id}"),
            team_id,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("Failed to upsert host");
}
