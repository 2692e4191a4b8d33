//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for an authenticated principal.
pub type PrincipalId = String;

/// Already-validated identity handle presented with every authorization request.
///
/// Issuance and validation happen upstream; the engine only reads the principal
/// identifier (cache key, audit field) and the role names (rule selection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthenticationToken {
    principal_id: PrincipalId,
    roles: Vec<String>,
}

impl AuthenticationToken {
    /// Token for `principal_id` holding the given roles.
    pub fn new<I, S>(principal_id: impl Into<PrincipalId>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal_id: principal_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Token without any role membership. Always denied.
    pub fn anonymous(principal_id: impl Into<PrincipalId>) -> Self {
        Self {
            principal_id: principal_id.into(),
            roles: Vec::new(),
        }
    }

    /// Principal identifier.
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    /// Role names in the order the token carries them.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

impl fmt::Display for AuthenticationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.principal_id)
    }
}
