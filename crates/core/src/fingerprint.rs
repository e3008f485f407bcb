//! Stable checksums over software facts.
//!
//! A fingerprint identifies an exact repeat of a reported fact. It carries
//! no identity-merging semantics: two facts that differ only in name casing
//! get different fingerprints and are merged later, at the title level.

use crate::software::SoftwareFact;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator between hashed fields.
const FIELD_SEPARATOR: &[u8] = b"\x00";

/// A SHA-256 fingerprint represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create a fingerprint from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64 character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidFingerprint(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidFingerprint(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidFingerprint(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string. This is the form stored in the
    /// `software.checksum` column.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Computes fingerprints for incoming software facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintService;

impl FingerprintService {
    /// Compute the fingerprint of a software fact.
    ///
    /// Every field is whitespace-trimmed and the fields are hashed in a fixed
    /// order. A missing upgrade code hashes like an empty one. Name casing is
    /// preserved.
    pub fn software(fact: &SoftwareFact) -> Fingerprint {
        let upgrade_code = fact.upgrade_code.as_deref().unwrap_or_default();
        let fields: [&str; 10] = [
            &fact.name,
            &fact.version,
            &fact.source,
            &fact.bundle_identifier,
            upgrade_code,
            &fact.release,
            &fact.arch,
            &fact.vendor,
            &fact.browser,
            &fact.extension_id,
        ];

        let mut hasher = Sha256::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                hasher.update(FIELD_SEPARATOR);
            }
            hasher.update(field.trim().as_bytes());
        }
        Fingerprint(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(name: &str, version: &str) -> SoftwareFact {
        SoftwareFact {
            name: name.to_string(),
            version: version.to_string(),
            source: "programs".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fp = FingerprintService::software(&fact("Figma", "116.1"));
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
    }

    #[test]
    fn test_fingerprint_is_stable_across_whitespace() {
        let a = FingerprintService::software(&fact("Figma", "116.1"));
        let b = FingerprintService::software(&fact("  Figma ", "116.1\n"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_preserves_case() {
        let a = FingerprintService::software(&fact("FooApp", "1.0"));
        let b = FingerprintService::software(&fact("fooapp", "1.0"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_and_empty_upgrade_code_match() {
        let mut with_empty = fact("Figma", "116.1");
        with_empty.upgrade_code = Some(String::new());
        let without = fact("Figma", "116.1");
        assert_eq!(
            FingerprintService::software(&with_empty),
            FingerprintService::software(&without)
        );

        let mut with_code = fact("Figma", "116.1");
        with_code.upgrade_code = Some("{G}".to_string());
        assert_ne!(
            FingerprintService::software(&with_code),
            FingerprintService::software(&without)
        );
    }

    #[test]
    fn test_fields_do_not_bleed_into_each_other() {
        // "ab" + "c" must not collide with "a" + "bc".
        let a = FingerprintService::software(&fact("ab", "c"));
        let b = FingerprintService::software(&fact("a", "bc"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Fingerprint::from_hex("abc").is_err());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_err());
    }
}
