//! Software facts as reported by host agents.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One installed-software observation for one host.
///
/// Only `name` and `source` are required. Every other field defaults to the
/// empty string, which is also how agents report "not applicable".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareFact {
    pub name: String,
    pub version: String,
    /// Collector that reported the fact (`programs`, `apps`, `deb_packages`,
    /// `chrome_extensions`, ...).
    pub source: String,
    /// Browser for extension sources, empty otherwise.
    pub browser: String,
    pub bundle_identifier: String,
    /// Vendor installer GUID. Stronger identity signal than the name.
    pub upgrade_code: Option<String>,
    pub release: String,
    pub vendor: String,
    pub arch: String,
    pub extension_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_opened_at: Option<OffsetDateTime>,
}

impl SoftwareFact {
    /// Create a fact with the required fields only.
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// Set the upgrade code.
    pub fn with_upgrade_code(mut self, upgrade_code: impl Into<String>) -> Self {
        self.upgrade_code = Some(upgrade_code.into());
        self
    }

    /// Trimmed, non-empty upgrade code, if any.
    pub fn upgrade_code(&self) -> Option<&str> {
        self.upgrade_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }

    /// Trimmed display name.
    pub fn display_name(&self) -> &str {
        self.name.trim()
    }

    /// Case-folded `(name, source, browser)` identity of this fact's title.
    pub fn title_key(&self) -> String {
        title_key(&self.name, &self.source, &self.browser)
    }

    /// Validate required fields.
    pub fn validate(&self) -> crate::Result<()> {
        if self.display_name().is_empty() {
            return Err(crate::Error::InvalidSoftware("name is empty".to_string()));
        }
        if self.source.trim().is_empty() {
            return Err(crate::Error::InvalidSoftware(format!(
                "source is empty for '{}'",
                self.display_name()
            )));
        }
        Ok(())
    }
}

/// Separates the parts of a title key.
const TITLE_KEY_SEPARATOR: &str = "\u{1f}";

/// Build the stored title match key: each part trimmed and lowercased with
/// full Unicode case folding, joined by the unit separator.
///
/// SQLite's `lower()` only folds ASCII, so both stores match on this key.
pub fn title_key(name: &str, source: &str, browser: &str) -> String {
    [name, source, browser]
        .iter()
        .map(|part| part.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(TITLE_KEY_SEPARATOR)
}
