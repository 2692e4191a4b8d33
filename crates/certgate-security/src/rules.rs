//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single grant or denial attached to a resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRule {
    /// Hierarchical resource identifier, e.g. `/ca/issue`.
    pub resource: String,
    /// Whether the rule also covers every descendant of `resource`.
    #[serde(default)]
    pub recursive: bool,
    /// Grant (`true`) or deny (`false`).
    pub allow: bool,
}

impl AccessRule {
    /// Grant limited to exactly `resource`.
    pub fn allow(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            recursive: false,
            allow: true,
        }
    }

    /// Grant covering `resource` and all descendants.
    pub fn allow_recursive(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            recursive: true,
            allow: true,
        }
    }

    /// Denial limited to exactly `resource`.
    pub fn deny(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            recursive: false,
            allow: false,
        }
    }

    /// Denial covering `resource` and all descendants.
    pub fn deny_recursive(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            recursive: true,
            allow: false,
        }
    }
}

/// Errors raised while building rule sets and trees.
///
/// Denial is never an error; these only surface from configuration problems.
#[derive(Debug, Error)]
pub enum AccessError {
    /// A rule names an empty resource.
    #[error("rule for role '{role}' has an empty resource")]
    EmptyResource {
        /// Role owning the offending rule.
        role: String,
    },
    /// A role with an empty name.
    #[error("role names cannot be empty")]
    EmptyRole,
    /// Rule file could not be read.
    #[error("unable to read rule file {path}: {source}")]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Rule file is not valid TOML for a [`RuleSet`].
    #[error("failed to parse rule set: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Role name to ordered rule list, as loaded from a rule file.
///
/// ```toml
/// [[roles.ca_admin]]
/// resource = "/ca"
/// recursive = true
/// allow = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rules per role, in declaration order.
    #[serde(default)]
    pub roles: IndexMap<String, Vec<AccessRule>>,
}

impl RuleSet {
    /// Empty rule set; every evaluation against it denies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rules to `role`, creating it when missing.
    pub fn with_role<I>(mut self, role: impl Into<String>, rules: I) -> Self
    where
        I: IntoIterator<Item = AccessRule>,
    {
        self.roles.entry(role.into()).or_default().extend(rules);
        self
    }

    /// Parse and validate a TOML rule document.
    pub fn from_toml_str(raw: &str) -> Result<Self, AccessError> {
        let set: RuleSet = toml::from_str(raw)?;
        set.validate()?;
        Ok(set)
    }

    /// Read, parse and validate a rule file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AccessError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| AccessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check that every role and resource is non-empty.
    pub fn validate(&self) -> Result<(), AccessError> {
        for (role, rules) in &self.roles {
            if role.trim().is_empty() {
                return Err(AccessError::EmptyRole);
            }
            if rules.iter().any(|rule| rule.resource.trim().is_empty()) {
                return Err(AccessError::EmptyResource { role: role.clone() });
            }
        }
        Ok(())
    }

    /// Total number of rules across all roles.
    pub fn rule_count(&self) -> usize {
        self.roles.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_in_declaration_order() {
        let set = RuleSet::from_toml_str(
            r#"
            [[roles.ca_admin]]
            resource = "/ca"
            recursive = true
            allow = true

            [[roles.ca_admin]]
            resource = "/ca/revoke"
            allow = false

            [[roles.auditor]]
            resource = "/audit"
            allow = true
            "#,
        )
        .unwrap();
        let names: Vec<_> = set.roles.keys().cloned().collect();
        assert_eq!(names, vec!["ca_admin", "auditor"]);
        assert_eq!(set.roles["ca_admin"][1], AccessRule::deny("/ca/revoke"));
        assert_eq!(set.rule_count(), 3);
    }

    #[test]
    fn rejects_empty_resource() {
        let err = RuleSet::from_toml_str(
            r#"
            [[roles.ops]]
            resource = ""
            allow = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AccessError::EmptyResource { role } if role == "ops"));
    }

    #[test]
    fn missing_allow_is_a_parse_error() {
        let err = RuleSet::from_toml_str("[[roles.ops]]\nresource = \"/ca\"\n").unwrap_err();
        assert!(matches!(err, AccessError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = RuleSet::load("/nonexistent/rules.toml").unwrap_err();
        assert!(matches!(err, AccessError::Io { .. }));
    }
}
