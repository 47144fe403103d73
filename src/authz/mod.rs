pub mod engine;
pub mod errors;
pub mod hostcheck;
pub mod loader;
pub mod policy;
pub mod types;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;

use errors::AuthzError;
use hostcheck::InsertionChecker;
use types::{Action, Scope, CTX_MACHINE_NAME};

/// Compiled authorization rules, keyed by subject then action.
/// Immutable after construction; a reload builds a new store.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RuleStore {
    /// subject -> action -> union of every scope granted for that action
    pub grants: HashMap<String, HashMap<Action, Scope>>,
    /// number of rules the store was compiled from
    pub rule_count: usize,
}

impl RuleStore {
    pub fn scope(&self, subject: &str, action: Action) -> Option<&Scope> {
        self.grants.get(subject).and_then(|by_action| by_action.get(&action))
    }

    pub fn subject_count(&self) -> usize {
        self.grants.len()
    }
}

/// Shared, atomically replaceable reference to the active rule store.
/// Readers see either the old or the new store in full.
#[derive(Debug)]
pub struct RuleStoreHandle {
    current: ArcSwap<RuleStore>,
}

impl RuleStoreHandle {
    pub fn new(store: RuleStore) -> Self {
        Self {
            current: ArcSwap::from_pointee(store),
        }
    }

    pub fn current(&self) -> Arc<RuleStore> {
        self.current.load_full()
    }

    pub fn replace(&self, store: RuleStore) {
        self.current.store(Arc::new(store));
    }

    /// Parse the rule file and swap it in. On error the active store is kept.
    pub fn reload(&self, path: &Path) -> Result<(), AuthzError> {
        match loader::load_rules(path) {
            Ok(store) => {
                self.replace(store);
                tracing::info!(path = %path.display(), "Reloaded authorization rules");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Rule reload failed, keeping previous rules"
                );
                Err(e)
            }
        }
    }
}

/// Authorization decisions as seen by request handlers: rule evaluation plus
/// the insert identity check that lets a host submit records for itself.
#[derive(Debug)]
pub struct Authorizer {
    rules: Arc<RuleStoreHandle>,
    insert_checker: InsertionChecker,
}

impl Authorizer {
    pub fn new(rules: Arc<RuleStoreHandle>, insert_checker: InsertionChecker) -> Self {
        Self {
            rules,
            insert_checker,
        }
    }

    pub fn rules(&self) -> &Arc<RuleStoreHandle> {
        &self.rules
    }

    pub fn has_relevant_right(&self, subject: &str, action: Action) -> bool {
        engine::has_relevant_right(&self.rules.current(), subject, action)
    }

    pub fn is_allowed(&self, subject: &str, action: Action, context: &[(&str, &str)]) -> bool {
        let store = self.rules.current();
        if action == Action::Insert
            && engine::has_relevant_right(&store, subject, action)
            && self.inserts_own_host(subject, context)
        {
            return true;
        }
        engine::is_allowed(&store, subject, action, context)
    }

    /// Check a batch of records submitted by `subject`; every machine name
    /// must be allowed.
    pub fn authorize_insert<'a, I>(&self, subject: &str, machine_names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut any = false;
        for machine_name in machine_names {
            any = true;
            if !self.is_allowed(subject, Action::Insert, &[(CTX_MACHINE_NAME, machine_name)]) {
                tracing::debug!(subject, machine_name, "Insert denied");
                return false;
            }
        }
        any || self.has_relevant_right(subject, Action::Insert)
    }

    fn inserts_own_host(&self, subject: &str, context: &[(&str, &str)]) -> bool {
        let fqdn = hostcheck::extract_fqdn(subject);
        let mut machine_names = context
            .iter()
            .filter(|(k, _)| *k == CTX_MACHINE_NAME)
            .map(|(_, v)| *v)
            .peekable();
        machine_names.peek().is_some()
            && machine_names.all(|mn| self.insert_checker.matches(mn, fqdn))
    }
}
