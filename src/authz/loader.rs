use std::collections::HashMap;
use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::policy::parse_rule_text;
use crate::authz::types::*;
use crate::authz::RuleStore;

/// Load the rule file at `path` and compile it into an immutable `RuleStore`.
pub fn load_rules(path: &Path) -> Result<RuleStore, AuthzError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AuthzError::RuleFileLoad {
        path: path.display().to_string(),
        source,
    })?;
    let store = parse_rules(&contents)?;

    tracing::info!(
        path = %path.display(),
        subjects = store.subject_count(),
        rules = store.rule_count,
        "Loaded authorization rules"
    );

    Ok(store)
}

/// Parse and compile rule text held in memory.
pub fn parse_rules(source: &str) -> Result<RuleStore, AuthzError> {
    let parsed = parse_rule_text(source)?;
    Ok(compile_rules(vec![parsed]))
}

/// Merge parsed rules into a single store. Scopes for the same subject and
/// action are unioned.
pub fn compile_rules(parsed: Vec<ParsedRules>) -> RuleStore {
    let mut grants: HashMap<String, HashMap<Action, Scope>> = HashMap::new();
    let mut rule_count = 0;

    for p in parsed {
        for rule in p.rules {
            rule_count += 1;
            let by_action = grants.entry(rule.subject).or_default();
            let merged = match by_action.remove(&rule.action) {
                Some(existing) => existing.union(rule.scope),
                None => rule.scope,
            };
            by_action.insert(rule.action, merged);
        }
    }

    RuleStore { grants, rule_count }
}
