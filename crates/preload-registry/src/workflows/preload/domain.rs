use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle position of a domain within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreloadStatus {
    #[default]
    Unknown,
    Pending,
    Preloaded,
    PendingRemoval,
    PendingAutomatedRemoval,
    Removed,
    Rejected,
}

impl PreloadStatus {
    pub const ALL: [PreloadStatus; 7] = [
        PreloadStatus::Unknown,
        PreloadStatus::Pending,
        PreloadStatus::Preloaded,
        PreloadStatus::PendingRemoval,
        PreloadStatus::PendingAutomatedRemoval,
        PreloadStatus::Removed,
        PreloadStatus::Rejected,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            PreloadStatus::Unknown => "unknown",
            PreloadStatus::Pending => "pending",
            PreloadStatus::Preloaded => "preloaded",
            PreloadStatus::PendingRemoval => "pending-removal",
            PreloadStatus::PendingAutomatedRemoval => "pending-automated-removal",
            PreloadStatus::Removed => "removed",
            PreloadStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
    }
}

impl fmt::Display for PreloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy tag carried by preload list entries.
///
/// Values this registry does not know about survive a round trip through
/// [`PolicyType::Other`] so that imported records are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PolicyType {
    #[default]
    Unspecified,
    Test,
    Custom,
    BulkLegacy,
    Bulk18Weeks,
    Bulk1Year,
    Other(String),
}

impl PolicyType {
    pub fn as_str(&self) -> &str {
        match self {
            PolicyType::Unspecified => "",
            PolicyType::Test => "test",
            PolicyType::Custom => "custom",
            PolicyType::BulkLegacy => "bulk-legacy",
            PolicyType::Bulk18Weeks => "bulk-18-weeks",
            PolicyType::Bulk1Year => "bulk-1-year",
            PolicyType::Other(value) => value,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, PolicyType::Unspecified)
    }

    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            PolicyType::BulkLegacy | PolicyType::Bulk18Weeks | PolicyType::Bulk1Year
        )
    }
}

impl From<String> for PolicyType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" => PolicyType::Unspecified,
            "test" => PolicyType::Test,
            "custom" => PolicyType::Custom,
            "bulk-legacy" => PolicyType::BulkLegacy,
            "bulk-18-weeks" => PolicyType::Bulk18Weeks,
            "bulk-1-year" => PolicyType::Bulk1Year,
            _ => PolicyType::Other(value),
        }
    }
}

impl From<&str> for PolicyType {
    fn from(value: &str) -> Self {
        PolicyType::from(value.to_string())
    }
}

impl From<PolicyType> for String {
    fn from(value: PolicyType) -> Self {
        match value {
            PolicyType::Other(value) => value,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforcement mode of a preload list entry. Only `force-https` entries count
/// as preloaded HSTS domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PreloadMode {
    #[default]
    #[serde(rename = "")]
    Unspecified,
    #[serde(rename = "force-https")]
    ForceHttps,
}

impl PreloadMode {
    pub fn is_unspecified(&self) -> bool {
        matches!(self, PreloadMode::Unspecified)
    }
}

/// One record of the upstream browser preload list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreloadEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "PolicyType::is_unspecified")]
    pub policy: PolicyType,
    #[serde(default, skip_serializing_if = "PreloadMode::is_unspecified")]
    pub mode: PreloadMode,
    #[serde(default)]
    pub include_subdomains: bool,
}

impl PreloadEntry {
    pub fn is_hsts(&self) -> bool {
        self.mode == PreloadMode::ForceHttps
    }
}

/// Parsed snapshot of the upstream preload list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadList {
    #[serde(default)]
    pub entries: Vec<PreloadEntry>,
}

impl PreloadList {
    /// Parses the list source format: JSON with whole-line `//` comments.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let stripped = text
            .lines()
            .filter(|line| !line.trim_start().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        serde_json::from_str(&stripped)
    }

    /// Force-HTTPS entries keyed by name. The first occurrence of a name wins.
    pub fn hsts_index(&self) -> HashMap<&str, &PreloadEntry> {
        let mut index = HashMap::new();
        for entry in self.entries.iter().filter(|entry| entry.is_hsts()) {
            index.entry(entry.name.as_str()).or_insert(entry);
        }
        index
    }

    /// Force-HTTPS entries in list order with repeated names dropped.
    pub fn hsts_entries(&self) -> Vec<&PreloadEntry> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|entry| entry.is_hsts() && seen.insert(entry.name.as_str()))
            .collect()
    }
}

/// The per-domain record persisted by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainState {
    pub name: String,
    pub status: PreloadStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Stored only; never part of the JSON views.
    #[serde(skip)]
    pub submission_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_sub_domains: bool,
    #[serde(default, skip_serializing_if = "PolicyType::is_unspecified")]
    pub policy: PolicyType,
}

impl DomainState {
    /// The record reported for a name the store has never seen.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_bulk(&self) -> bool {
        self.policy.is_bulk()
    }

    /// Hand-maintained entries that only list maintainers may remove.
    pub fn is_protected(&self) -> bool {
        matches!(self.policy, PolicyType::Custom | PolicyType::Other(_))
    }

    /// Upstream list entry equivalent to this record.
    pub fn to_entry(&self) -> PreloadEntry {
        PreloadEntry {
            name: self.name.clone(),
            policy: self.policy.clone(),
            mode: PreloadMode::ForceHttps,
            include_subdomains: self.include_sub_domains,
        }
    }

    /// Compares against an expected record. Only the name and status must
    /// agree; the message is checked when the expectation carries one.
    pub fn matches_wanted(&self, wanted: &DomainState) -> bool {
        self.name == wanted.name
            && self.status == wanted.status
            && (wanted.message.is_empty() || self.message == wanted.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WantedMismatch {
    #[error("repeated wanted domain: {0}")]
    Repeated(String),
    #[error("missing wanted domain: {0}")]
    Missing(String),
    #[error("domain state does not match wanted state: {0}")]
    Mismatch(String),
    #[error("expected {wanted} domain states, found {actual}")]
    Count { wanted: usize, actual: usize },
}

/// Checks that `actual` holds exactly the `wanted` records, in any order.
pub fn match_wanted(actual: &[DomainState], wanted: &[DomainState]) -> Result<(), WantedMismatch> {
    let mut seen = HashSet::new();
    for state in wanted {
        if !seen.insert(state.name.as_str()) {
            return Err(WantedMismatch::Repeated(state.name.clone()));
        }
    }

    let by_name: HashMap<&str, &DomainState> = actual
        .iter()
        .map(|state| (state.name.as_str(), state))
        .collect();

    for state in wanted {
        match by_name.get(state.name.as_str()) {
            None => return Err(WantedMismatch::Missing(state.name.clone())),
            Some(found) if !found.matches_wanted(state) => {
                return Err(WantedMismatch::Mismatch(state.name.clone()))
            }
            Some(_) => {}
        }
    }

    if actual.len() != wanted.len() {
        return Err(WantedMismatch::Count {
            wanted: wanted.len(),
            actual: actual.len(),
        });
    }

    Ok(())
}

/// A single finding produced by eligibility checks or registry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: String,
    pub summary: String,
    pub message: String,
}

impl Issue {
    pub fn new(
        code: impl Into<String>,
        summary: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            message: message.into(),
        }
    }
}

/// Errors block an action; warnings are informational.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issues {
    #[serde(default)]
    pub errors: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<Issue>,
}

impl Issues {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn with_error(issue: Issue) -> Self {
        Self {
            errors: vec![issue],
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(issue: Issue) -> Self {
        Self {
            errors: Vec::new(),
            warnings: vec![issue],
        }
    }

    pub fn push_error(&mut self, issue: Issue) {
        self.errors.push(issue);
    }

    pub fn push_warning(&mut self, issue: Issue) {
        self.warnings.push(issue);
    }

    pub fn extend(&mut self, other: Issues) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn error_codes(&self) -> Vec<&str> {
        self.errors.iter().map(|issue| issue.code.as_str()).collect()
    }

    pub fn warning_codes(&self) -> Vec<&str> {
        self.warnings.iter().map(|issue| issue.code.as_str()).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DomainNameError {
    #[error("domain name is empty")]
    Empty,
    #[error("'{value}' is not a valid domain name: {source}")]
    Invalid {
        value: String,
        source: url::ParseError,
    },
}

/// Canonical form used as the store key: lowercased ASCII (IDNA) without a
/// trailing dot.
pub fn normalize_domain(raw: &str) -> Result<String, DomainNameError> {
    let trimmed = raw.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(DomainNameError::Empty);
    }

    match url::Host::parse(trimmed) {
        Ok(url::Host::Domain(domain)) => Ok(domain.to_ascii_lowercase()),
        Ok(other) => Ok(other.to_string()),
        Err(source) => Err(DomainNameError::Invalid {
            value: raw.to_string(),
            source,
        }),
    }
}

/// Strips the left-most label: `a.b.example.com` becomes `b.example.com`.
pub fn parent_domain(domain: &str) -> Option<&str> {
    let (_, parent) = domain.split_once('.')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}
