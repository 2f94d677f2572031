//! Core domain types for the ISSN identity graph.
//! Pure value types: no sqlx, no HTTP.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;

// ── Identifier ───────────────────────────────────────────────

/// A serial-publication identifier in canonical `NNNN-NNNC` form.
///
/// Only the shape is validated. Registry data carries identifiers with bad
/// check digits and those must survive a load/diff cycle unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Issn([u8; 9]);

impl Issn {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        let bytes = trimmed.as_bytes();
        let mut out = [0u8; 9];
        match bytes.len() {
            9 if bytes[4] == b'-' => {
                out[..4].copy_from_slice(&bytes[..4]);
                out[5..].copy_from_slice(&bytes[5..]);
            }
            8 => {
                out[..4].copy_from_slice(&bytes[..4]);
                out[5..].copy_from_slice(&bytes[4..]);
            }
            _ => return Err(IdentityError::InvalidIdentifier(raw.to_string())),
        }
        out[4] = b'-';
        if out[8] == b'x' {
            out[8] = b'X';
        }

        let digits_ok = out[..4].iter().chain(&out[5..8]).all(u8::is_ascii_digit);
        let check_ok = out[8].is_ascii_digit() || out[8] == b'X';
        if !(digits_ok && check_ok) {
            return Err(IdentityError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for Issn {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Issn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Issn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Issn({})", self.as_str())
    }
}

impl Serialize for Issn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Issn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Issn::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ── Mappings ─────────────────────────────────────────────────

/// An `(identifier, linking identifier)` pair, the unit of diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingPair {
    pub identifier: Issn,
    pub linking_identifier: Issn,
}

impl MappingPair {
    pub fn new(identifier: Issn, linking_identifier: Issn) -> Self {
        Self {
            identifier,
            linking_identifier,
        }
    }
}

/// One row of a run's staging area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedMapping {
    pub identifier: Issn,
    pub linking_identifier: Issn,
    pub is_active: bool,
}

impl StagedMapping {
    pub fn pair(&self) -> MappingPair {
        MappingPair::new(self.identifier, self.linking_identifier)
    }
}

/// Persisted identifier → linking identifier mapping. Rows are inserted or
/// deleted, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMapping {
    pub identifier: Issn,
    pub linking_identifier: Issn,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CanonicalMapping {
    pub fn pair(&self) -> MappingPair {
        MappingPair::new(self.identifier, self.linking_identifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Added,
    Removed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// Append-only audit ledger entry. Unique per
/// `(linking_identifier, identifier, status)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingHistory {
    pub linking_identifier: Issn,
    pub identifier: Issn,
    pub status: HistoryStatus,
    pub occurred_at: DateTime<Utc>,
}

// ── Metadata & journals ──────────────────────────────────────

/// One aggregated record per linking identifier.
///
/// `registry_aliases` is owned by the metadata builder. The payloads,
/// `crossref_aliases` and `updated_at` belong to enrichment and must survive
/// a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetadata {
    pub linking_identifier: Issn,
    pub registry_aliases: Vec<Issn>,
    #[serde(default)]
    pub crossref_aliases: Vec<Issn>,
    #[serde(default)]
    pub previously_known_as: Vec<Issn>,
    #[serde(default)]
    pub registry_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub crossref_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CanonicalMetadata {
    pub fn new(linking_identifier: Issn, registry_aliases: Vec<Issn>) -> Self {
        Self {
            linking_identifier,
            registry_aliases,
            crossref_aliases: Vec::new(),
            previously_known_as: Vec::new(),
            registry_payload: None,
            crossref_payload: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// Externally-submitted "missing journal" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIdentifierRequest {
    pub id: i64,
    /// Raw submission; may not parse as an identifier.
    pub identifier: String,
    pub status: String,
    pub processed: bool,
}

/// Status value marking a pending request as ready for reconciliation.
pub const PENDING_STATUS_PROCESS: &str = "process";

/// Two linking identifiers observed to share a crossref-side alias.
/// Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkedIdentity {
    pub primary: Issn,
    pub secondary: Issn,
    pub reason: String,
}

/// The externally visible journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub linking_identifier: Issn,
    pub title: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub alternate_titles: Vec<String>,
    #[serde(default)]
    pub is_modified_title: bool,
}

impl Journal {
    pub fn new(linking_identifier: Issn, title: impl Into<String>) -> Self {
        Self {
            linking_identifier,
            title: title.into(),
            publisher: None,
            alternate_titles: Vec::new(),
            is_modified_title: false,
        }
    }
}

// ── External lookups ─────────────────────────────────────────

/// Parsed response of the per-identifier journal lookup API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalAliases {
    pub aliases: Vec<Issn>,
    pub electronic: Option<Issn>,
    pub print: Option<Issn>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_hyphenated_form() {
        let issn: Issn = "0000-006X".parse().unwrap();
        assert_eq!(issn.as_str(), "0000-006X");
    }

    #[test]
    fn normalises_compact_and_lowercase_forms() {
        assert_eq!(Issn::parse(" 0000006x ").unwrap().as_str(), "0000-006X");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for raw in ["", "1234", "ABCD-1234", "1234-12345", "1234_5678", "1234-567Y"] {
            assert!(Issn::parse(raw).is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn check_digit_is_not_verified() {
        // The correct check digit for 0000-000? is 0.
        assert!(Issn::parse("0000-0001").is_ok());
    }

    #[test]
    fn serde_uses_plain_string() {
        let issn = Issn::parse("2291-5222").unwrap();
        let json = serde_json::to_string(&issn).unwrap();
        assert_eq!(json, "\"2291-5222\"");
        let back: Issn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, issn);
        assert!(serde_json::from_str::<Issn>("\"nope\"").is_err());
    }

    #[test]
    fn history_status_strings() {
        assert_eq!(HistoryStatus::parse("added"), Some(HistoryStatus::Added));
        assert_eq!(HistoryStatus::Removed.as_str(), "removed");
        assert_eq!(HistoryStatus::parse("moved"), None);
    }

    proptest! {
        #[test]
        fn any_well_formed_identifier_parses(body in 0u32..10_000_000, check in prop_oneof![Just('X'), proptest::char::range('0', '9')]) {
            let digits = format!("{:07}", body);
            let raw = format!("{}-{}{}", &digits[..4], &digits[4..], check);
            let issn = Issn::parse(&raw).unwrap();
            prop_assert_eq!(issn.as_str(), raw.as_str());
            let compact = raw.replace('-', "");
            prop_assert_eq!(Issn::parse(&compact).unwrap(), issn);
        }
    }
}
