//! Host-level report envelope and operating system facts.

use crate::certificate::CertificateFact;
use crate::software::SoftwareFact;
use serde::{Deserialize, Serialize};

/// Operating system reported by a host. Identity is `(name, version, arch)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingSystemFact {
    pub name: String,
    pub version: String,
    pub arch: String,
}

/// Everything a host reports in one check-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostReport {
    pub hostname: String,
    pub team_id: Option<i64>,
    pub operating_system: Option<OperatingSystemFact>,
    pub software: Vec<SoftwareFact>,
    /// `None` means the agent did not collect certificates this time and the
    /// stored set must be left alone. `Some(vec![])` clears it.
    pub certificates: Option<Vec<CertificateFact>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_report_deserializes_partial_payload() {
        let json = r#"{
            "hostname": "laptop-1",
            "software": [{"name": "Figma", "version": "116.1", "source": "apps"}]
        }"#;
        let report: HostReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.hostname, "laptop-1");
        assert_eq!(report.software.len(), 1);
        assert!(report.certificates.is_none());
        assert!(report.team_id.is_none());
    }
}
