//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
//! Resource trees and the atomically swapped snapshot the engine reads.
//!
//! A [`ResourceTree`] answers "which rule governs this resource" for one role.
//! Paths are matched segment by segment from the most specific prefix to the
//! root; the first rule that applies wins and anything unmatched is denied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::rules::{AccessError, AccessRule, RuleSet};
use crate::token::AuthenticationToken;

/// Segment delimiter for resource identifiers.
pub const DELIMITER: char = '/';
const ROOT: &str = "/";

/// Which rules may satisfy an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionMode {
    /// Recursive and non-recursive rules are both honoured.
    Any,
    /// Only recursive rules are honoured.
    RequireRecursive,
}

impl RecursionMode {
    /// Map the boolean `require_recursive` flag onto a mode.
    pub fn from_require_recursive(require_recursive: bool) -> Self {
        if require_recursive {
            RecursionMode::RequireRecursive
        } else {
            RecursionMode::Any
        }
    }

    /// Label used in logs and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecursionMode::Any => "any",
            RecursionMode::RequireRecursive => "require_recursive",
        }
    }
}

/// Outcome of evaluating one resource against one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision<'a> {
    /// Whether the matched rule grants access. `false` when nothing matched.
    pub allow: bool,
    /// Rule that decided the outcome, if any.
    pub matched_rule: Option<&'a AccessRule>,
}

impl<'a> Decision<'a> {
    fn unmatched() -> Self {
        Self {
            allow: false,
            matched_rule: None,
        }
    }

    /// True when the decision grants access under `mode`.
    pub fn is_granted(&self, mode: RecursionMode) -> bool {
        match (self.matched_rule, mode) {
            (None, _) => false,
            (Some(rule), RecursionMode::Any) => rule.allow,
            (Some(rule), RecursionMode::RequireRecursive) => rule.allow && rule.recursive,
        }
    }
}

/// Strip trailing delimiters; `None` for an empty identifier.
pub fn normalize(resource: &str) -> Option<&str> {
    if resource.is_empty() {
        return None;
    }
    let trimmed = resource.trim_end_matches(DELIMITER);
    if trimmed.is_empty() {
        Some(ROOT)
    } else {
        Some(trimmed)
    }
}

/// Iterate a normalized resource and its ancestors, most specific first.
///
/// `/ca/issue` yields `/ca/issue`, `/ca`, `/`.
pub fn ancestors(resource: &str) -> Ancestors<'_> {
    Ancestors {
        next: Some(resource),
    }
}

/// Iterator returned by [`ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    next: Option<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current == ROOT {
            None
        } else {
            match current.rfind(DELIMITER) {
                Some(0) => Some(ROOT),
                Some(idx) => Some(&current[..idx]),
                None => None,
            }
        };
        Some(current)
    }
}

/// Immutable index of one role's rules keyed by normalized resource path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTree {
    // Insertion order is kept per path so later rules override earlier ones.
    rules: HashMap<String, Vec<AccessRule>>,
    len: usize,
}

impl ResourceTree {
    /// Build a tree from rules; fails on an empty resource identifier.
    pub fn new<I>(rules: I) -> Result<Self, AccessError>
    where
        I: IntoIterator<Item = AccessRule>,
    {
        Self::for_role("", rules)
    }

    fn for_role<I>(role: &str, rules: I) -> Result<Self, AccessError>
    where
        I: IntoIterator<Item = AccessRule>,
    {
        let mut tree = Self::default();
        for mut rule in rules {
            let key = normalize(&rule.resource)
                .ok_or_else(|| AccessError::EmptyResource {
                    role: role.to_owned(),
                })?
                .to_owned();
            rule.resource = key.clone();
            tree.rules.entry(key).or_default().push(rule);
            tree.len += 1;
        }
        Ok(tree)
    }

    /// Find the governing rule for `resource`.
    ///
    /// Walks from the full path towards the root. At the full path any rule
    /// applies; at an ancestor only recursive rules do. Among applicable rules
    /// on the same path the last registered wins. No match denies.
    pub fn evaluate(&self, resource: &str) -> Decision<'_> {
        let Some(full) = normalize(resource) else {
            return Decision::unmatched();
        };
        for prefix in ancestors(full) {
            let Some(candidates) = self.rules.get(prefix) else {
                continue;
            };
            let exact = prefix == full;
            if let Some(rule) = candidates.iter().rev().find(|rule| exact || rule.recursive) {
                return Decision {
                    allow: rule.allow,
                    matched_rule: Some(rule),
                };
            }
        }
        Decision::unmatched()
    }

    /// Number of rules in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the tree holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Snapshot of every role's tree. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessTree {
    roles: IndexMap<String, ResourceTree>,
}

impl AccessTree {
    /// Empty snapshot; denies everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the tree for `role`.
    pub fn with_role(mut self, role: impl Into<String>, tree: ResourceTree) -> Self {
        self.roles.insert(role.into(), tree);
        self
    }

    /// Build a snapshot from a validated rule set.
    pub fn from_rule_set(set: &RuleSet) -> Result<Self, AccessError> {
        let mut roles = IndexMap::with_capacity(set.roles.len());
        for (role, rules) in &set.roles {
            if role.trim().is_empty() {
                return Err(AccessError::EmptyRole);
            }
            roles.insert(
                role.clone(),
                ResourceTree::for_role(role, rules.iter().cloned())?,
            );
        }
        Ok(Self { roles })
    }

    /// Tree for a role, if defined.
    pub fn role(&self, name: &str) -> Option<&ResourceTree> {
        self.roles.get(name)
    }

    /// Number of roles in the snapshot.
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Decide one resource for a token across all of its roles.
    ///
    /// An explicit deny matched in any role vetoes. Otherwise access is
    /// granted when at least one role's matched rule grants under `mode`.
    pub fn is_granted(
        &self,
        token: &AuthenticationToken,
        resource: &str,
        mode: RecursionMode,
    ) -> bool {
        let mut granted = false;
        for role in token.roles() {
            let Some(tree) = self.roles.get(role) else {
                continue;
            };
            let decision = tree.evaluate(resource);
            match decision.matched_rule {
                Some(rule) if !rule.allow => return false,
                Some(_) if decision.is_granted(mode) => granted = true,
                _ => {}
            }
        }
        granted
    }
}

/// Holder of the current [`AccessTree`] with lock-free reads.
///
/// Readers see either the previous or the new snapshot in full.
#[derive(Debug)]
pub struct AccessTreeStore {
    current: ArcSwap<AccessTree>,
    generation: AtomicU64,
}

impl Default for AccessTreeStore {
    fn default() -> Self {
        Self::new(AccessTree::default())
    }
}

impl AccessTreeStore {
    /// Store seeded with `tree` at generation zero.
    pub fn new(tree: AccessTree) -> Self {
        Self {
            current: ArcSwap::from_pointee(tree),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<AccessTree> {
        self.current.load_full()
    }

    /// Swap in a new snapshot and return its generation.
    pub fn publish(&self, tree: AccessTree) -> u64 {
        self.current.store(Arc::new(tree));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(generation, "access tree published");
        generation
    }

    /// Number of snapshots published since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(rules: Vec<AccessRule>) -> ResourceTree {
        ResourceTree::new(rules).unwrap()
    }

    #[test]
    fn ancestors_walk_to_root() {
        let chain: Vec<_> = ancestors("/ca/issue/sub").collect();
        assert_eq!(chain, vec!["/ca/issue/sub", "/ca/issue", "/ca", "/"]);
        let chain: Vec<_> = ancestors("ca/issue").collect();
        assert_eq!(chain, vec!["ca/issue", "ca"]);
        assert_eq!(ancestors("/").collect::<Vec<_>>(), vec!["/"]);
    }

    #[test]
    fn normalize_strips_trailing_delimiters() {
        assert_eq!(normalize("/ca/"), Some("/ca"));
        assert_eq!(normalize("///"), Some("/"));
        assert_eq!(normalize(""), None);
    }

    #[test]
    fn empty_tree_fails_closed() {
        let empty = ResourceTree::default();
        let decision = empty.evaluate("/ca/issue");
        assert!(!decision.allow);
        assert!(decision.matched_rule.is_none());
    }

    #[test]
    fn unrelated_prefix_denies() {
        let tree = tree(vec![AccessRule::allow_recursive("/ra")]);
        assert!(!tree.evaluate("/ca").allow);
        // Segment matching, not string prefix matching.
        assert!(!tree.evaluate("/rafting").allow);
    }

    #[test]
    fn recursive_rule_covers_self_and_descendants() {
        let tree = tree(vec![AccessRule::allow_recursive("/ca")]);
        assert!(tree.evaluate("/ca").allow);
        assert!(tree.evaluate("/ca/issue").allow);
        assert!(tree.evaluate("/ca/issue/deep").allow);
    }

    #[test]
    fn non_recursive_rule_is_exact() {
        let tree = tree(vec![AccessRule::allow("/ca")]);
        assert!(tree.evaluate("/ca").allow);
        assert!(tree.evaluate("/ca/").allow);
        assert!(!tree.evaluate("/ca/issue").allow);
    }

    #[test]
    fn most_specific_rule_wins() {
        let tree = tree(vec![
            AccessRule::allow_recursive("/ca"),
            AccessRule::deny("/ca/revoke"),
        ]);
        assert!(tree.evaluate("/ca/issue").allow);
        assert!(!tree.evaluate("/ca/revoke").allow);
        // The exact deny does not reach descendants; the recursive grant does.
        assert!(tree.evaluate("/ca/revoke/crl").allow);
    }

    #[test]
    fn last_registered_wins_on_same_path() {
        let first = tree(vec![AccessRule::allow("/ca"), AccessRule::deny("/ca")]);
        assert!(!first.evaluate("/ca").allow);
        let second = tree(vec![AccessRule::deny("/ca"), AccessRule::allow("/ca")]);
        assert!(second.evaluate("/ca").allow);
    }

    #[test]
    fn exact_non_recursive_rule_does_not_shadow_recursive_ancestor_for_children() {
        let tree = tree(vec![
            AccessRule::allow_recursive("/"),
            AccessRule::allow("/ca"),
        ]);
        let decision = tree.evaluate("/ca/issue");
        assert!(decision.allow);
        assert_eq!(decision.matched_rule.unwrap().resource, "/");
    }

    #[test]
    fn require_recursive_rejects_exact_rule() {
        let tree = tree(vec![AccessRule::allow("/ca/issue")]);
        let decision = tree.evaluate("/ca/issue");
        assert!(decision.is_granted(RecursionMode::Any));
        assert!(!decision.is_granted(RecursionMode::RequireRecursive));
    }

    #[test]
    fn empty_rule_resource_is_rejected() {
        assert!(matches!(
            ResourceTree::new(vec![AccessRule::allow("")]),
            Err(AccessError::EmptyResource { .. })
        ));
    }

    #[test]
    fn deny_in_any_role_vetoes() {
        let set = RuleSet::new()
            .with_role("issuer", [AccessRule::allow_recursive("/ca")])
            .with_role("restricted", [AccessRule::deny("/ca/issue")]);
        let snapshot = AccessTree::from_rule_set(&set).unwrap();
        let both = AuthenticationToken::new("carol", ["issuer", "restricted"]);
        let issuer = AuthenticationToken::new("dave", ["issuer"]);
        assert!(!snapshot.is_granted(&both, "/ca/issue", RecursionMode::Any));
        assert!(snapshot.is_granted(&issuer, "/ca/issue", RecursionMode::Any));
        assert!(snapshot.is_granted(&both, "/ca/other", RecursionMode::Any));
    }

    #[test]
    fn unknown_roles_and_anonymous_tokens_are_denied() {
        let snapshot =
            AccessTree::new().with_role("admin", tree(vec![AccessRule::allow_recursive("/")]));
        assert!(!snapshot.is_granted(
            &AuthenticationToken::anonymous("eve"),
            "/ca",
            RecursionMode::Any
        ));
        assert!(!snapshot.is_granted(
            &AuthenticationToken::new("eve", ["guest"]),
            "/ca",
            RecursionMode::Any
        ));
    }

    #[test]
    fn store_publish_swaps_snapshot() {
        let store = AccessTreeStore::default();
        let token = AuthenticationToken::new("alice", ["admin"]);
        assert!(!store.current().is_granted(&token, "/ca", RecursionMode::Any));

        let held = store.current();
        let generation = store.publish(
            AccessTree::new().with_role("admin", tree(vec![AccessRule::allow("/ca")])),
        );
        assert_eq!(generation, 1);
        assert_eq!(store.generation(), 1);
        assert!(store.current().is_granted(&token, "/ca", RecursionMode::Any));
        // Readers holding the previous snapshot keep a consistent view.
        assert!(!held.is_granted(&token, "/ca", RecursionMode::Any));
    }
}
