//! Coordination configuration: agents, domain ownership, record schemas.
//!
//! # Responsibility
//! - Parse the TOML declaration loaded at startup.
//! - Validate it into an immutable [`Registry`]; every error here is fatal at
//!   boot.
//!
//! # Invariants
//! - Unknown fields and unknown record kinds are rejected at parse time.
//! - A domain has exactly one owner or is explicitly shared.

pub mod ownership;
pub mod schema;

use crate::model::ids::{is_valid_identifier, AgentId, DomainName};
use crate::model::record::RecordKind;
use ownership::{DomainOwner, OwnershipTable};
use schema::{RecordSchema, SchemaTable};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const BUILTIN_CONFIG: &str = include_str!("default.toml");

/// Raw configuration as declared in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinationConfig {
    pub agents: Vec<AgentConfig>,
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub record_types: Vec<RecordTypeConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainConfig {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    /// Any configured agent may write.
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordTypeConfig {
    pub kind: RecordKind,
    pub domain: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub dependency_graph: bool,
    /// Narrows fan-out; broadcast when absent.
    #[serde(default)]
    pub subscribers: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl CoordinationConfig {
    /// Parses a TOML declaration.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Default planner/architect/orchestrator/code_reviewer layout.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(BUILTIN_CONFIG)
    }
}

/// Validated, immutable view of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    agents: BTreeSet<AgentId>,
    ownership: OwnershipTable,
    schemas: SchemaTable,
    lifecycle_domain: DomainName,
    logging: Option<LoggingConfig>,
}

impl Registry {
    /// Validates a configuration.
    pub fn from_config(config: &CoordinationConfig) -> Result<Self, ConfigError> {
        let mut agents = BTreeSet::new();
        for agent in &config.agents {
            let id = agent.id.trim();
            if !is_valid_identifier(id) {
                return Err(ConfigError::InvalidIdentifier {
                    what: "agent id",
                    value: agent.id.clone(),
                });
            }
            if !agents.insert(id.to_string()) {
                return Err(ConfigError::DuplicateAgent(id.to_string()));
            }
        }
        if agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }

        let mut domains = BTreeMap::new();
        for domain in &config.domains {
            let name = domain.name.trim();
            if !is_valid_identifier(name) {
                return Err(ConfigError::InvalidIdentifier {
                    what: "domain name",
                    value: domain.name.clone(),
                });
            }
            let owner = match (domain.owner.as_deref().map(str::trim), domain.shared) {
                (Some(_), true) => return Err(ConfigError::OwnerAndShared(name.to_string())),
                (None, false) => return Err(ConfigError::MissingOwner(name.to_string())),
                (None, true) => DomainOwner::Shared,
                (Some(owner), false) => {
                    if !agents.contains(owner) {
                        return Err(ConfigError::UnknownOwner {
                            domain: name.to_string(),
                            owner: owner.to_string(),
                        });
                    }
                    DomainOwner::Agent(owner.to_string())
                }
            };
            if domains.insert(name.to_string(), owner).is_some() {
                return Err(ConfigError::DuplicateDomain(name.to_string()));
            }
        }
        let ownership = OwnershipTable::new(domains);

        let mut schemas = BTreeMap::new();
        for declared in &config.record_types {
            let schema = validate_record_type(declared, &agents, &ownership)?;
            if schemas.insert(declared.kind, schema).is_some() {
                return Err(ConfigError::DuplicateRecordType(declared.kind));
            }
        }
        let schemas = SchemaTable::new(schemas);

        let lifecycle_domain = match schemas.get(RecordKind::LifecycleEvent) {
            Some(schema) => schema.domain.clone(),
            None => return Err(ConfigError::MissingLifecycleSchema),
        };
        if !matches!(ownership.owner(&lifecycle_domain), Some(DomainOwner::Agent(_))) {
            return Err(ConfigError::LifecycleDomainWithoutOwner(lifecycle_domain));
        }

        Ok(Self {
            agents,
            ownership,
            schemas,
            lifecycle_domain,
            logging: config.logging.clone(),
        })
    }

    /// Loads and validates the built-in layout.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_config(&CoordinationConfig::builtin()?)
    }

    /// Configured agents in ascending id order.
    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(String::as_str)
    }

    pub fn has_agent(&self, agent: &str) -> bool {
        self.agents.contains(agent)
    }

    pub fn ownership(&self) -> &OwnershipTable {
        &self.ownership
    }

    pub fn schemas(&self) -> &SchemaTable {
        &self.schemas
    }

    /// Domain receiving lifecycle-event records.
    pub fn lifecycle_domain(&self) -> &str {
        &self.lifecycle_domain
    }

    pub fn logging(&self) -> Option<&LoggingConfig> {
        self.logging.as_ref()
    }
}

fn validate_record_type(
    declared: &RecordTypeConfig,
    agents: &BTreeSet<AgentId>,
    ownership: &OwnershipTable,
) -> Result<RecordSchema, ConfigError> {
    let kind = declared.kind;
    let domain = declared.domain.trim();
    if ownership.owner(domain).is_none() {
        return Err(ConfigError::UnknownSchemaDomain {
            kind,
            domain: domain.to_string(),
        });
    }
    if declared.dependency_graph && kind == RecordKind::LifecycleEvent {
        return Err(ConfigError::GraphNotAllowed(kind));
    }

    let mut required_fields = Vec::with_capacity(declared.required_fields.len());
    for field in &declared.required_fields {
        let field = field.trim();
        if field.is_empty() {
            return Err(ConfigError::EmptyRequiredField(kind));
        }
        if required_fields.iter().any(|existing: &String| existing == field) {
            return Err(ConfigError::DuplicateRequiredField {
                kind,
                field: field.to_string(),
            });
        }
        required_fields.push(field.to_string());
    }

    let subscribers = match &declared.subscribers {
        None => None,
        Some(list) => {
            let mut set = BTreeSet::new();
            for agent in list {
                let agent = agent.trim();
                if !agents.contains(agent) {
                    return Err(ConfigError::UnknownSubscriber {
                        kind,
                        agent: agent.to_string(),
                    });
                }
                set.insert(agent.to_string());
            }
            Some(set)
        }
    };

    Ok(RecordSchema {
        kind,
        domain: domain.to_string(),
        required_fields,
        dependency_graph: declared.dependency_graph,
        subscribers,
    })
}

/// Configuration errors. All of them abort startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse(String),
    NoAgents,
    InvalidIdentifier { what: &'static str, value: String },
    DuplicateAgent(String),
    DuplicateDomain(String),
    MissingOwner(String),
    OwnerAndShared(String),
    UnknownOwner { domain: String, owner: String },
    DuplicateRecordType(RecordKind),
    UnknownSchemaDomain { kind: RecordKind, domain: String },
    GraphNotAllowed(RecordKind),
    EmptyRequiredField(RecordKind),
    DuplicateRequiredField { kind: RecordKind, field: String },
    UnknownSubscriber { kind: RecordKind, agent: String },
    MissingLifecycleSchema,
    LifecycleDomainWithoutOwner(String),
    /// Database holds records in a domain the ownership table does not know.
    UnknownPersistedDomain(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse(message) => write!(f, "invalid config: {message}"),
            Self::NoAgents => write!(f, "config must declare at least one agent"),
            Self::InvalidIdentifier { what, value } => write!(f, "invalid {what}: `{value}`"),
            Self::DuplicateAgent(id) => write!(f, "agent declared twice: {id}"),
            Self::DuplicateDomain(name) => write!(f, "domain declared twice: {name}"),
            Self::MissingOwner(name) => {
                write!(f, "domain `{name}` needs an owner or `shared = true`")
            }
            Self::OwnerAndShared(name) => {
                write!(f, "domain `{name}` cannot have an owner and be shared")
            }
            Self::UnknownOwner { domain, owner } => {
                write!(f, "domain `{domain}` owned by unknown agent `{owner}`")
            }
            Self::DuplicateRecordType(kind) => {
                write!(f, "record type declared twice: {}", kind.as_str())
            }
            Self::UnknownSchemaDomain { kind, domain } => write!(
                f,
                "record type `{}` references unknown domain `{domain}`",
                kind.as_str()
            ),
            Self::GraphNotAllowed(kind) => write!(
                f,
                "record type `{}` cannot participate in the dependency graph",
                kind.as_str()
            ),
            Self::EmptyRequiredField(kind) => {
                write!(f, "record type `{}` has an empty required field", kind.as_str())
            }
            Self::DuplicateRequiredField { kind, field } => write!(
                f,
                "record type `{}` lists required field `{field}` twice",
                kind.as_str()
            ),
            Self::UnknownSubscriber { kind, agent } => write!(
                f,
                "record type `{}` subscribes unknown agent `{agent}`",
                kind.as_str()
            ),
            Self::MissingLifecycleSchema => {
                write!(f, "config must declare the `lifecycle_event` record type")
            }
            Self::LifecycleDomainWithoutOwner(domain) => write!(
                f,
                "lifecycle domain `{domain}` must have a single owning agent"
            ),
            Self::UnknownPersistedDomain(domain) => write!(
                f,
                "database contains records in unconfigured domain `{domain}`"
            ),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoordinationConfig, Registry};
    use crate::config::ownership::DomainOwner;
    use crate::model::record::RecordKind;

    const MINIMAL: &str = r#"
        [[agents]]
        id = "orchestrator"

        [[domains]]
        name = "orchestrator"
        owner = "orchestrator"

        [[record_types]]
        kind = "lifecycle_event"
        domain = "orchestrator"
    "#;

    fn registry_for(source: &str) -> Result<Registry, ConfigError> {
        Registry::from_config(&CoordinationConfig::from_toml_str(source)?)
    }

    #[test]
    fn builtin_layout_validates() {
        let registry = Registry::builtin().expect("builtin config");
        assert_eq!(registry.agents().count(), 6);
        assert_eq!(registry.lifecycle_domain(), "orchestrator");
        assert_eq!(
            registry.ownership().owner("specs"),
            Some(&DomainOwner::Agent("architect".to_string()))
        );
        assert_eq!(
            registry.ownership().owner("system"),
            Some(&DomainOwner::Shared)
        );
        assert!(registry
            .schemas()
            .get(RecordKind::Task)
            .expect("task schema")
            .dependency_graph);
    }

    #[test]
    fn minimal_layout_validates() {
        registry_for(MINIMAL).expect("minimal config");
    }

    #[test]
    fn rejects_unknown_fields() {
        let source = format!("{MINIMAL}\n[[agents]]\nid = \"planner\"\ntriggers = [\"x\"]\n");
        let err = registry_for(&source).expect_err("unknown field must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_unknown_record_kind() {
        let source = format!("{MINIMAL}\n[[record_types]]\nkind = \"design_token\"\ndomain = \"orchestrator\"\n");
        let err = registry_for(&source).expect_err("unknown kind must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_domain_owned_by_unknown_agent() {
        let source = format!("{MINIMAL}\n[[domains]]\nname = \"specs\"\nowner = \"architect\"\n");
        let err = registry_for(&source).expect_err("unknown owner must fail");
        assert_eq!(
            err,
            ConfigError::UnknownOwner {
                domain: "specs".to_string(),
                owner: "architect".to_string(),
            }
        );
    }

    #[test]
    fn rejects_duplicate_domain() {
        let source =
            format!("{MINIMAL}\n[[domains]]\nname = \"orchestrator\"\nshared = true\n");
        let err = registry_for(&source).expect_err("duplicate domain must fail");
        assert_eq!(err, ConfigError::DuplicateDomain("orchestrator".to_string()));
    }

    #[test]
    fn rejects_domain_without_owner_or_shared_flag() {
        let source = format!("{MINIMAL}\n[[domains]]\nname = \"review\"\n");
        let err = registry_for(&source).expect_err("ownerless domain must fail");
        assert_eq!(err, ConfigError::MissingOwner("review".to_string()));
    }

    #[test]
    fn rejects_missing_lifecycle_schema() {
        let source = r#"
            [[agents]]
            id = "orchestrator"

            [[domains]]
            name = "orchestrator"
            owner = "orchestrator"
        "#;
        let err = registry_for(source).expect_err("missing lifecycle schema must fail");
        assert_eq!(err, ConfigError::MissingLifecycleSchema);
    }

    #[test]
    fn rejects_duplicate_required_field_and_unknown_subscriber() {
        let duplicate = format!(
            "{MINIMAL}\n[[record_types]]\nkind = \"task\"\ndomain = \"orchestrator\"\nrequired_fields = [\"title\", \"title\"]\n"
        );
        assert_eq!(
            registry_for(&duplicate).expect_err("duplicate field must fail"),
            ConfigError::DuplicateRequiredField {
                kind: RecordKind::Task,
                field: "title".to_string(),
            }
        );

        let subscriber = format!(
            "{MINIMAL}\n[[record_types]]\nkind = \"commit\"\ndomain = \"orchestrator\"\nsubscribers = [\"ghost\"]\n"
        );
        assert_eq!(
            registry_for(&subscriber).expect_err("unknown subscriber must fail"),
            ConfigError::UnknownSubscriber {
                kind: RecordKind::Commit,
                agent: "ghost".to_string(),
            }
        );
    }
}
