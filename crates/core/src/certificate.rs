//! Certificate facts as reported by host agents.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Maximum stored length of free-text certificate attributes.
pub const MAX_FIELD_LEN: usize = 255;

/// Maximum stored length of country attributes.
pub const MAX_COUNTRY_LEN: usize = 32;

/// Length of a hex-encoded SHA-1 fingerprint.
const SHA1_HEX_LEN: usize = 40;

/// Where on the host a certificate was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateSource {
    /// System keychain / machine store.
    #[default]
    System,
    /// A user's keychain / personal store.
    User,
}

impl CertificateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }

    /// Parse the stored representation. Unknown values map to `System`.
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Self::User,
            _ => Self::System,
        }
    }
}

/// Subject or issuer name components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistinguishedName {
    pub country: String,
    pub organization: String,
    pub organizational_unit: String,
    pub common_name: String,
}

impl DistinguishedName {
    fn truncated(&self) -> Self {
        Self {
            country: truncate(&self.country, MAX_COUNTRY_LEN),
            organization: truncate(&self.organization, MAX_FIELD_LEN),
            organizational_unit: truncate(&self.organizational_unit, MAX_FIELD_LEN),
            common_name: truncate(&self.common_name, MAX_FIELD_LEN),
        }
    }
}

/// One certificate observation for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFact {
    /// Hex-encoded SHA-1 of the DER certificate. Identity key per host.
    pub sha1_sum: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_valid_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_valid_after: OffsetDateTime,
    #[serde(default)]
    pub certificate_authority: bool,
    #[serde(default)]
    pub common_name: String,
    #[serde(default)]
    pub key_algorithm: String,
    #[serde(default)]
    pub key_strength: i64,
    #[serde(default)]
    pub key_usage: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub signing_algorithm: String,
    #[serde(default)]
    pub subject: DistinguishedName,
    #[serde(default)]
    pub issuer: DistinguishedName,
    #[serde(default)]
    pub source: CertificateSource,
    #[serde(default)]
    pub username: String,
}

impl CertificateFact {
    /// Return a copy ready to be stored: the fingerprint is validated and
    /// lowercased, text attributes are truncated to their column limits.
    pub fn normalized(&self) -> crate::Result<Self> {
        let sha1_sum = normalize_sha1(&self.sha1_sum)?;
        Ok(Self {
            sha1_sum,
            not_valid_before: self.not_valid_before,
            not_valid_after: self.not_valid_after,
            certificate_authority: self.certificate_authority,
            common_name: truncate(&self.common_name, MAX_FIELD_LEN),
            key_algorithm: truncate(&self.key_algorithm, MAX_FIELD_LEN),
            key_strength: self.key_strength,
            key_usage: truncate(&self.key_usage, MAX_FIELD_LEN),
            serial: truncate(&self.serial, MAX_FIELD_LEN),
            signing_algorithm: truncate(&self.signing_algorithm, MAX_FIELD_LEN),
            subject: self.subject.truncated(),
            issuer: self.issuer.truncated(),
            source: self.source,
            username: truncate(&self.username, MAX_FIELD_LEN),
        })
    }
}

/// Validate and lowercase a hex SHA-1 fingerprint.
pub fn normalize_sha1(sha1_sum: &str) -> crate::Result<String> {
    let trimmed = sha1_sum.trim();
    if trimmed.len() != SHA1_HEX_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(crate::Error::InvalidCertificate(format!(
            "sha1_sum must be {SHA1_HEX_LEN} hex characters, got '{sha1_sum}'"
        )));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
