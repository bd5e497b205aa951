//! Identifiers for agents, domains and records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Agent identity, e.g. `planner` or `code_reviewer`.
pub type AgentId = String;

/// Domain name, e.g. `roadmap` or `specs`.
pub type DomainName = String;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid identifier regex"));
static RECORD_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$").expect("valid record key regex")
});

/// Returns whether `value` is a well-formed agent id or domain name.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

/// Returns whether `value` is a well-formed record key.
pub fn is_valid_record_key(value: &str) -> bool {
    RECORD_KEY_RE.is_match(value)
}

/// Fully qualified record address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub domain: DomainName,
    pub key: String,
}

impl RecordRef {
    pub fn new(domain: impl Into<DomainName>, key: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            key: key.into(),
        }
    }
}

impl Display for RecordRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.domain, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::{is_valid_identifier, is_valid_record_key, RecordRef};

    #[test]
    fn identifiers_are_lowercase_snake_case() {
        assert!(is_valid_identifier("code_reviewer"));
        assert!(is_valid_identifier("specs"));
        assert!(!is_valid_identifier("Specs"));
        assert!(!is_valid_identifier("_system"));
        assert!(!is_valid_identifier("road map"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn record_keys_allow_separators_but_not_slashes() {
        assert!(is_valid_record_key("T1"));
        assert!(is_valid_record_key("spec.auth-v2:draft"));
        assert!(!is_valid_record_key("specs/S1"));
        assert!(!is_valid_record_key("-leading"));
        assert!(!is_valid_record_key(""));
    }

    #[test]
    fn record_ref_displays_domain_and_key() {
        assert_eq!(RecordRef::new("specs", "S1").to_string(), "specs/S1");
    }
}
