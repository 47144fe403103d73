use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// Context keys understood by the insertion and reporting paths.
pub const CTX_MACHINE_NAME: &str = "machine_name";
pub const CTX_USER_IDENTITY: &str = "user_identity";
pub const CTX_VO_NAME: &str = "vo_name";
pub const CTX_VIEW: &str = "view";
pub const CTX_VIEWGROUP: &str = "group";

/// Scope keyword granting an action unconditionally.
pub const SCOPE_ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Submit usage records.
    Insert,
    /// Render a report page.
    View,
    /// Run an ad-hoc aggregate query.
    Query,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::View => "view",
            Action::Query => "query",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Action::Insert),
            "view" => Ok(Action::View),
            "query" => Ok(Action::Query),
            other => Err(format!(
                "unknown action `{other}` (expected `insert`, `view` or `query`)"
            )),
        }
    }
}

/// One ANDed group of conditions: every key must be satisfied, a key is
/// satisfied by any of its allowed values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintSet {
    constraints: BTreeMap<String, BTreeSet<String>>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the allowed values of `key`. Repeated keys union.
    pub fn allow(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.constraints
            .entry(key.into())
            .or_default()
            .insert(value.into());
    }

    pub fn with(mut self, key: &str, values: &[&str]) -> Self {
        for v in values {
            self.allow(key, *v);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// True if for every key the context holds at least one pair with that
    /// key and an allowed value. A missing key fails its check.
    pub fn matches(&self, context: &[(&str, &str)]) -> bool {
        self.constraints.iter().all(|(key, allowed)| {
            context
                .iter()
                .any(|(k, v)| *k == key.as_str() && allowed.contains(*v))
        })
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, values) in &self.constraints {
            if !first {
                f.write_str("+")?;
            }
            first = false;
            let joined: Vec<&str> = values.iter().map(|v| v.as_str()).collect();
            write!(f, "{}={}", key, joined.join(";"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Unconditional grant for the action.
    All,
    /// Granted if any of the sets matches the request context.
    ConstraintSets(BTreeSet<ConstraintSet>),
}

impl Scope {
    pub fn constrained(sets: impl IntoIterator<Item = ConstraintSet>) -> Self {
        Scope::ConstraintSets(sets.into_iter().collect())
    }

    /// Union two scopes for the same subject and action. `All` absorbs.
    pub fn union(self, other: Scope) -> Scope {
        match (self, other) {
            (Scope::All, _) | (_, Scope::All) => Scope::All,
            (Scope::ConstraintSets(mut a), Scope::ConstraintSets(b)) => {
                a.extend(b);
                Scope::ConstraintSets(a)
            }
        }
    }

    pub fn matches(&self, context: &[(&str, &str)]) -> bool {
        match self {
            Scope::All => true,
            Scope::ConstraintSets(sets) => sets.iter().any(|set| set.matches(context)),
        }
    }
}

/// One parsed authorization entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub subject: String,
    pub action: Action,
    pub scope: Scope,
}

/// Rules parsed from one rule file, before compilation into a store.
#[derive(Debug, Clone, Default)]
pub struct ParsedRules {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub subject: String,
    pub action: Action,
    pub allowed: bool,
}
