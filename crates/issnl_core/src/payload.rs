//! Typed views over the external JSON documents.
//!
//! Payloads are stored verbatim, but every field the engine reads goes
//! through these structs. A document that does not deserialize is "no data".

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Issn, JournalAliases};

static EMBEDDED_ISSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{3}[\dXx]").expect("static pattern"));

/// JSON-LD fields are either a single string or a list; anything else is
/// carried as `Other` so one odd node does not sink the whole record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TextValue {
    One(String),
    Many(Vec<String>),
    Other(Value),
}

impl TextValue {
    fn first(&self) -> Option<&str> {
        match self {
            Self::One(s) => Some(s),
            Self::Many(items) => items.first().map(String::as_str),
            Self::Other(_) => None,
        }
    }
}

// ── Registry portal ──────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryRecord {
    #[serde(rename = "@graph")]
    pub graph: Vec<RegistryNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryNode {
    #[serde(rename = "mainTitle", default)]
    pub main_title: Option<TextValue>,
    #[serde(default)]
    pub name: Option<TextValue>,
    #[serde(rename = "cancelledInFavorOf", default)]
    pub cancelled_in_favor_of: Option<TextValue>,
}

impl RegistryRecord {
    /// `None` unless the document carries an `@graph` array.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Raw title of the first node carrying `mainTitle` or `name`.
    pub fn title(&self) -> Option<String> {
        let node = self
            .graph
            .iter()
            .find(|n| n.main_title.is_some() || n.name.is_some())?;
        let value = node.main_title.as_ref().or(node.name.as_ref())?;
        match value {
            TextValue::One(s) => Some(s.clone()),
            TextValue::Many(items) => items
                .iter()
                .filter(|s| s.as_str() != ".")
                .min_by_key(|s| s.chars().count())
                .cloned(),
            TextValue::Other(_) => None,
        }
    }

    /// The identifier named by the first cancellation notice in the graph.
    pub fn cancelled_in_favor_of(&self) -> Option<Issn> {
        let raw = self
            .graph
            .iter()
            .find_map(|n| n.cancelled_in_favor_of.as_ref())?
            .first()?;
        let found = EMBEDDED_ISSN_RE.find(raw)?;
        Issn::parse(found.as_str()).ok()
    }
}

// ── Citation index ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CrossrefJournal {
    pub message: CrossrefMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefMessage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(rename = "ISSN", default)]
    pub issn: Vec<String>,
    #[serde(rename = "issn-type", default)]
    pub issn_type: Vec<IssnType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssnType {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl CrossrefJournal {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Deduplicated aliases in response order plus the electronic/print
    /// classification. Unparseable entries are dropped.
    pub fn aliases(&self) -> JournalAliases {
        let mut out = JournalAliases::default();
        for raw in &self.message.issn {
            if let Ok(issn) = Issn::parse(raw) {
                if !out.aliases.contains(&issn) {
                    out.aliases.push(issn);
                }
            }
        }
        for entry in &self.message.issn_type {
            let Ok(issn) = Issn::parse(&entry.value) else {
                continue;
            };
            match entry.kind.as_str() {
                "electronic" if out.electronic.is_none() => out.electronic = Some(issn),
                "print" if out.print.is_none() => out.print = Some(issn),
                _ => {}
            }
        }
        out
    }
}

// ── Title & publisher ────────────────────────────────────────

/// Strip control characters, surrounding whitespace and one trailing `.`.
pub fn format_title(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed).trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Collapse the common imprint spellings onto one publisher name.
pub fn normalize_publisher(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('"').trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    let normalized = if lower.contains("informa uk") {
        "Taylor & Francis"
    } else if lower.contains("wiley") {
        "Wiley"
    } else if lower.contains("springer") && trimmed != "Springer Publishing Company" {
        "Springer Nature"
    } else if lower.contains("sage publications") {
        "SAGE"
    } else {
        trimmed
    };
    Some(normalized.to_string())
}
